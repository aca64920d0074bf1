//! modpack-lib: build pipeline engine for the modpack
//!
//! This crate provides:
//! - `process`: runs one external command as a stream of categorized output lines
//! - `step`: step lifecycle, step logger, file/git capabilities and the standard steps
//! - `processor`: runs one build's steps in order
//! - `queue`: single-worker FIFO of builds with per-build cancellation
//! - `build`: build/step records and their store
//! - `config`: variables and `modpack.toml`

pub mod build;
pub mod config;
pub mod consts;
pub mod platform;
pub mod process;
pub mod processor;
pub mod queue;
pub mod step;
pub mod util;
