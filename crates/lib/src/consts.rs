/// Application name used for platform directories.
pub const APP_NAME: &str = "modpack";

/// Environment variable overriding the build environment root.
pub const ROOT_ENV_VAR: &str = "MODPACK_ROOT";
