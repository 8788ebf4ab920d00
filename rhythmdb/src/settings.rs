//! Resolving where the database file lives on disk.
//!
//! The crate itself never decides this on its own initiative — callers pass
//! a path to [`crate::persistence::load_into`] / [`crate::persistence::save_from`]
//! — but almost every consumer wants the same default, so we provide it here
//! rather than make every `rhythmdb-bench`-style binary reinvent it.
//!
//! Resolution order, following the usual XDG convention:
//! 1. the `RHYTHMDB_DATA_DIR` environment variable, if set;
//! 2. the platform data-local directory (`directories::BaseDirs`) joined
//!    with `rhythmbox`;
//! 3. `None` if neither is available (e.g. no `$HOME` in the environment).

use directories::BaseDirs;
use std::{
  env,
  path::{Path, PathBuf},
};

const ENV_OVERRIDE: &str = "RHYTHMDB_DATA_DIR";
const APP_DIR: &str = "rhythmbox";
const DB_FILE: &str = "rhythmdb.xml";

/// The directory rhythmdb-compatible data (the database file, the pending
/// keyword cache) is kept in.
pub fn data_dir() -> Option<PathBuf> {
  if let Ok(dir) = env::var(ENV_OVERRIDE) {
    return Some(PathBuf::from(dir));
  }
  BaseDirs::new().map(|base| Path::new(base.data_local_dir()).join(APP_DIR))
}

/// The default database file path: `data_dir()/rhythmdb.xml`.
pub fn default_db_path() -> Option<PathBuf> {
  data_dir().map(|dir| dir.join(DB_FILE))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn env_override_wins() {
    env::set_var(ENV_OVERRIDE, "/tmp/rhythmdb-test-override");
    assert_eq!(data_dir(), Some(PathBuf::from("/tmp/rhythmdb-test-override")));
    assert_eq!(
      default_db_path(),
      Some(PathBuf::from("/tmp/rhythmdb-test-override/rhythmdb.xml"))
    );
    env::remove_var(ENV_OVERRIDE);
  }
}
