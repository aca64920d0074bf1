//! Build environment directory layout.
//!
//! Every build works inside one root directory:
//!
//! ```text
//! {root}/
//! ├── source/              # VCS checkout shared by all environments
//! ├── build/{env}/         # build tool output (@modpack/addons/*.pbo)
//! ├── repo/{env}/          # deployable repository
//! ├── keys/{env}/          # public signing keys
//! ├── private_keys/        # private signing keys (never deployed)
//! └── builds/              # build records (FileBuildStore)
//! ```
//!
//! The root is `$MODPACK_ROOT` when set, otherwise `{data_dir}/modpack`.

use std::path::{Path, PathBuf};

use crate::build::Environment;
use crate::consts::{APP_NAME, ROOT_ENV_VAR};

/// Name of the mod folder produced by the build tool.
pub const MOD_FOLDER: &str = "@modpack";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the build environment root.
pub fn build_root() -> PathBuf {
  if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
    return PathBuf::from(path);
  }
  data_dir()
}

/// Paths of the shared on-disk build environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
  root: PathBuf,
}

impl BuildPaths {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    // Canonicalize when possible so logged paths are stable
    let root = dunce::canonicalize(&root).unwrap_or(root);
    Self { root }
  }

  /// Paths rooted at [`build_root`].
  pub fn from_env() -> Self {
    Self::new(build_root())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn source_dir(&self) -> PathBuf {
    self.root.join("source")
  }

  pub fn build_dir(&self, env: Environment) -> PathBuf {
    self.root.join("build").join(env.as_str())
  }

  pub fn mod_dir(&self, env: Environment) -> PathBuf {
    self.build_dir(env).join(MOD_FOLDER)
  }

  pub fn addons_dir(&self, env: Environment) -> PathBuf {
    self.mod_dir(env).join("addons")
  }

  /// Holds the revision the current build output was built from.
  pub fn built_revision_file(&self, env: Environment) -> PathBuf {
    self.build_dir(env).join(".built-revision")
  }

  pub fn repo_dir(&self, env: Environment) -> PathBuf {
    self.root.join("repo").join(env.as_str())
  }

  pub fn keys_dir(&self, env: Environment) -> PathBuf {
    self.root.join("keys").join(env.as_str())
  }

  pub fn private_keys_dir(&self) -> PathBuf {
    self.root.join("private_keys")
  }

  pub fn builds_dir(&self) -> PathBuf {
    self.root.join("builds")
  }
}
