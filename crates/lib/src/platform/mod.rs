//! Platform-specific locations.

pub mod paths;

pub use paths::BuildPaths;
