/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Per-account settings, grounded on
//! `remote_settings::config::RemoteSettingsConfig`'s plain-struct-with-defaults
//! shape, but loaded from YAML files instead of passed in at construction,
//! and merged across three layers (built-in defaults, global file, account
//! file) instead of a single flat record.

use crate::error::Result;
use crate::model::ConflictStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncSettings {
    pub pull_range_days: Option<u32>,
    pub auto_save: Option<bool>,
    pub conflict_strategy: Option<ConflictStrategy>,
}

/// One layer of configuration as read from a `config.yaml`. Every field is
/// optional so a layer can override just the keys it cares about;
/// [`Config::merged`] fills in the rest from lower layers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigLayer {
    pub default_tasklist: Option<String>,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// The fully-merged, account-scoped view handed to the engine.
#[derive(Debug, Clone)]
pub struct Config {
    pub default_tasklist: String,
    pub pull_range_days: Option<u32>,
    pub auto_save: bool,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_tasklist: "Inbox".to_string(),
            pull_range_days: None,
            auto_save: false,
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

/// Reads and atomically writes the global and per-account `config.yaml`
/// files.
pub struct ConfigStore {
    config_root: PathBuf,
}

impl ConfigStore {
    pub fn new(config_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
        }
    }

    fn global_path(&self) -> PathBuf {
        self.config_root.join("config.yaml")
    }

    fn account_path(&self, account_id: &str) -> PathBuf {
        self.config_root.join(account_id).join("config.yaml")
    }

    fn read_layer(path: &Path) -> Result<ConfigLayer> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_yaml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigLayer::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads merge defaults, global file, account file in that order.
    pub fn load(&self, account_id: &str) -> Result<Config> {
        let global = Self::read_layer(&self.global_path())?;
        let account = Self::read_layer(&self.account_path(account_id))?;
        let mut config = Config::default();

        if let Some(v) = global.default_tasklist {
            config.default_tasklist = v;
        }
        if let Some(v) = global.sync.pull_range_days {
            config.pull_range_days = Some(v);
        }
        if let Some(v) = global.sync.auto_save {
            config.auto_save = v;
        }
        if let Some(v) = global.sync.conflict_strategy {
            config.conflict_strategy = v;
        }

        if let Some(v) = account.default_tasklist {
            config.default_tasklist = v;
        }
        if let Some(v) = account.sync.pull_range_days {
            config.pull_range_days = Some(v);
        }
        if let Some(v) = account.sync.auto_save {
            config.auto_save = v;
        }
        if let Some(v) = account.sync.conflict_strategy {
            config.conflict_strategy = v;
        }

        Ok(config)
    }

    /// Writes are atomic: temp file in the same directory, then
    /// `fs::rename`.
    pub fn save_account(&self, account_id: &str, layer: &ConfigLayer) -> Result<()> {
        let path = self.account_path(account_id);
        Self::write_atomic(&path, layer)
    }

    pub fn save_global(&self, layer: &ConfigLayer) -> Result<()> {
        Self::write_atomic(&self.global_path(), layer)
    }

    fn write_atomic(path: &Path, layer: &ConfigLayer) -> Result<()> {
        let yaml = serde_yaml::to_string(layer)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("yaml.tmp");
        fs::write(&tmp_path, yaml)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn account_layer_overrides_global() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store
            .save_global(&ConfigLayer {
                default_tasklist: Some("GlobalInbox".into()),
                sync: SyncSettings {
                    pull_range_days: Some(30),
                    ..Default::default()
                },
            })
            .unwrap();
        store
            .save_account(
                "acct-1",
                &ConfigLayer {
                    default_tasklist: Some("AcctInbox".into()),
                    sync: SyncSettings::default(),
                },
            )
            .unwrap();

        let config = store.load("acct-1").unwrap();
        assert_eq!(config.default_tasklist, "AcctInbox");
        assert_eq!(config.pull_range_days, Some(30));
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let config = store.load("nonexistent").unwrap();
        assert_eq!(config.default_tasklist, "Inbox");
        assert_eq!(config.conflict_strategy, ConflictStrategy::LatestWins);
    }
}
