//! Build and step records.
//!
//! A [`Build`] is one pipeline run for one [`Environment`]; its
//! [`StepRecord`]s are the persisted, observable shape of each step:
//! `{name, index, result, logs: [{text, tag}]}`.

pub mod store;
mod types;

pub use store::{BuildStore, FileBuildStore, MemoryBuildStore, StoreError};
pub use types::*;
