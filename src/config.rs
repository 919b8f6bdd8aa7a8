//! Runtime configuration (spec §4.J).
//!
//! A small, `serde`-derived struct loaded from JSON. There is no daemon or
//! service process here, so configuration is just the handful of paths and
//! knobs the store needs to resolve a user's backup on disk; callers embed
//! this crate and are expected to load/merge the JSON however fits their
//! own deployment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

fn default_data_path() -> PathBuf {
    PathBuf::from("/var/lib/cyrus-backup/data")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/cyrus-backup/backups.sqlite3")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupStoreConfig {
    /// Root directory under which per-user backup log files live.
    #[serde(default = "default_data_path")]
    pub backup_data_path: PathBuf,

    /// SQLite database mapping userids to their backup log/index paths.
    #[serde(default = "default_db_path")]
    pub backups_db_path: PathBuf,
}

impl Default for BackupStoreConfig {
    fn default() -> Self {
        Self {
            backup_data_path: default_data_path(),
            backups_db_path: default_db_path(),
        }
    }
}

impl BackupStoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|err| BackupError::io(path, err))?;
        serde_json::from_slice(&data)
            .map_err(|err| BackupError::InvalidState(format!("invalid config {:?}: {}", path, err)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|err| BackupError::InvalidState(format!("failed to serialize config: {}", err)))?;
        crate::tools::file_set_contents(path, &data, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = BackupStoreConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let parsed: BackupStoreConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.backups_db_path, cfg.backups_db_path);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: BackupStoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.backup_data_path, default_data_path());
    }
}
