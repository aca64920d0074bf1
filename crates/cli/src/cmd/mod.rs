mod build;
mod exec;
mod steps;

pub use build::cmd_build;
pub use exec::cmd_exec;
pub use steps::cmd_steps;
