/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Enumerates accounts from the on-disk layout and resolves the active one.
//! Accounts are independent: nothing here crosses account boundaries.

use crate::error::{Error, Result};
use crate::model::{Account, AccountType};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads `<config_root>/<account_id>/` directories, each expected to
/// contain `credentials.json`.
pub struct AccountManager {
    config_root: PathBuf,
}

impl AccountManager {
    pub fn new(config_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
        }
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        let entries = match fs::read_dir(&self.config_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(accounts),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(account) = self.read_account(&entry.path())? {
                accounts.push(account);
            }
        }
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    pub fn resolve(&self, account_id: &str) -> Result<Account> {
        let path = self.config_root.join(account_id);
        self.read_account(&path)?
            .ok_or_else(|| Error::Validation(format!("no such account {account_id}")))
    }

    fn read_account(&self, storage_root: &Path) -> Result<Option<Account>> {
        let credentials_path = storage_root.join("credentials.json");
        if !credentials_path.exists() {
            return Ok(None);
        }
        let id = storage_root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation("account directory has a non-UTF8 name".into()))?
            .to_string();

        let (display_name, email, account_type) = match fs::read_to_string(&credentials_path) {
            Ok(raw) => {
                let parsed: CredentialsFile = serde_json::from_str(&raw)?;
                (
                    parsed.display_name.unwrap_or_else(|| id.clone()),
                    parsed.email,
                    parsed.account_type.unwrap_or(AccountType::Google),
                )
            }
            Err(_) => (id.clone(), None, AccountType::Google),
        };

        Ok(Some(Account {
            id,
            display_name,
            email,
            account_type,
            credentials_path,
            storage_root: storage_root.to_path_buf(),
        }))
    }
}

#[derive(serde::Deserialize)]
struct CredentialsFile {
    display_name: Option<String>,
    email: Option<String>,
    #[serde(rename = "type")]
    account_type: Option<AccountType>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_only_directories_with_credentials() {
        let dir = tempdir().unwrap();
        let acct_dir = dir.path().join("acct-1");
        fs::create_dir_all(&acct_dir).unwrap();
        fs::write(
            acct_dir.join("credentials.json"),
            r#"{"display_name": "Work", "email": "me@example.com", "type": "google"}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("not-an-account")).unwrap();

        let manager = AccountManager::new(dir.path());
        let accounts = manager.list_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, "acct-1");
        assert_eq!(accounts[0].display_name, "Work");
    }

    #[test]
    fn missing_config_root_yields_no_accounts() {
        let dir = tempdir().unwrap();
        let manager = AccountManager::new(dir.path().join("does-not-exist"));
        assert!(manager.list_accounts().unwrap().is_empty());
    }
}
