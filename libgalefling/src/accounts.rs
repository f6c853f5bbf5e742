//! Account registry
//!
//! Keeps the configured [`AccountConfig`]s in `accounts.toml`. The registry
//! validates ids, enforces uniqueness and each platform's
//! `max_account_count`, and preserves the order accounts were added in, which
//! is also the order results are reported in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{AccountError, Result};
use crate::specs::{PlatformId, SpecTable};
use crate::types::AccountConfig;

const MAX_ID_LEN: usize = 64;
const RESERVED_IDS: [&str; 3] = ["all", "none", "list"];

/// On-disk shape; the platform stays a string so unknown ids get a clear error
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    platform_id: String,
    account_id: String,
    #[serde(default)]
    profile_name: String,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<StoredAccount>,
}

/// Thread-safe registry persisted to TOML
#[derive(Clone)]
pub struct AccountRegistry {
    state_file: PathBuf,
    specs: SpecTable,
    accounts: Arc<RwLock<Vec<AccountConfig>>>,
}

impl AccountRegistry {
    /// Opens the registry at `state_file`
    ///
    /// A missing file yields an empty registry. A file that fails validation
    /// is an error rather than silently replaced.
    pub fn open(state_file: impl Into<PathBuf>, specs: SpecTable) -> Result<Self> {
        let state_file = state_file.into();
        let accounts = if state_file.exists() {
            Self::read(&state_file, &specs)?
        } else {
            tracing::debug!("No accounts file at {:?}, starting empty", state_file);
            Vec::new()
        };

        Ok(Self {
            state_file,
            specs,
            accounts: Arc::new(RwLock::new(accounts)),
        })
    }

    fn read(path: &Path, specs: &SpecTable) -> Result<Vec<AccountConfig>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AccountError::StateFile(format!("Failed to read {:?}: {}", path, e)))?;
        let file: AccountsFile = toml::from_str(&content)
            .map_err(|e| AccountError::StateFile(format!("Failed to parse {:?}: {}", path, e)))?;

        let mut accounts: Vec<AccountConfig> = Vec::with_capacity(file.accounts.len());
        for stored in file.accounts {
            let platform_id: PlatformId =
                stored
                    .platform_id
                    .parse()
                    .map_err(|_| AccountError::UnknownPlatform {
                        account_id: stored.account_id.clone(),
                        platform: stored.platform_id.clone(),
                    })?;
            let account = AccountConfig {
                platform_id,
                account_id: stored.account_id,
                profile_name: stored.profile_name,
                enabled: stored.enabled,
            };
            Self::check_insert(&accounts, &account, specs)?;
            accounts.push(account);
        }
        Ok(accounts)
    }

    /// Validates an account id
    ///
    /// Alphanumeric plus `-` and `_`, at most 64 characters, and not one of
    /// the reserved selector words.
    pub fn validate_account_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(AccountError::InvalidId("account id cannot be empty".to_string()).into());
        }
        if id.len() > MAX_ID_LEN {
            return Err(AccountError::InvalidId(format!(
                "'{}' is {} characters (max {})",
                id,
                id.len(),
                MAX_ID_LEN
            ))
            .into());
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AccountError::InvalidId(format!(
                "'{}' must be alphanumeric with hyphens/underscores only",
                id
            ))
            .into());
        }
        if RESERVED_IDS.contains(&id.to_lowercase().as_str()) {
            return Err(AccountError::InvalidId(format!("'{}' is reserved", id)).into());
        }
        Ok(())
    }

    fn check_insert(
        existing: &[AccountConfig],
        account: &AccountConfig,
        specs: &SpecTable,
    ) -> Result<()> {
        Self::validate_account_id(&account.account_id)?;
        if existing.iter().any(|a| a.account_id == account.account_id) {
            return Err(AccountError::Duplicate(account.account_id.clone()).into());
        }
        let max = specs.get(account.platform_id).max_account_count;
        let on_platform = existing
            .iter()
            .filter(|a| a.platform_id == account.platform_id)
            .count();
        if on_platform >= max {
            return Err(AccountError::TooManyAccounts {
                platform: account.platform_id.to_string(),
                max,
            }
            .into());
        }
        Ok(())
    }

    pub fn add(&self, account: AccountConfig) -> Result<()> {
        {
            let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
            Self::check_insert(&accounts, &account, &self.specs)?;
            tracing::info!(
                "Registered account {} on {}",
                account.account_id,
                account.platform_id
            );
            accounts.push(account);
        }
        self.save()
    }

    pub fn remove(&self, account_id: &str) -> Result<AccountConfig> {
        let removed = {
            let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
            let index = accounts
                .iter()
                .position(|a| a.account_id == account_id)
                .ok_or_else(|| AccountError::NotFound(account_id.to_string()))?;
            accounts.remove(index)
        };
        self.save()?;
        Ok(removed)
    }

    pub fn set_enabled(&self, account_id: &str, enabled: bool) -> Result<()> {
        {
            let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
            let account = accounts
                .iter_mut()
                .find(|a| a.account_id == account_id)
                .ok_or_else(|| AccountError::NotFound(account_id.to_string()))?;
            account.enabled = enabled;
        }
        self.save()
    }

    pub fn get(&self, account_id: &str) -> Option<AccountConfig> {
        self.accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|a| a.account_id == account_id)
            .cloned()
    }

    /// All accounts in registration order
    pub fn list(&self) -> Vec<AccountConfig> {
        self.accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn enabled(&self) -> Vec<AccountConfig> {
        self.list().into_iter().filter(|a| a.enabled).collect()
    }

    /// First free `{platform}_{n}` id, e.g. `bluesky_2`
    pub fn next_account_id(&self, platform: PlatformId) -> String {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        (1..)
            .map(|n| format!("{}_{}", platform, n))
            .find(|candidate| !accounts.iter().any(|a| &a.account_id == candidate))
            .unwrap_or_else(|| format!("{}_{}", platform, accounts.len() + 1))
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AccountError::StateFile(format!("Failed to create directory: {}", e))
            })?;
        }

        let file = AccountsFile {
            accounts: self
                .list()
                .into_iter()
                .map(|a| StoredAccount {
                    platform_id: a.platform_id.to_string(),
                    account_id: a.account_id,
                    profile_name: a.profile_name,
                    enabled: a.enabled,
                })
                .collect(),
        };
        let content = toml::to_string_pretty(&file)
            .map_err(|e| AccountError::StateFile(format!("Failed to serialize: {}", e)))?;
        std::fs::write(&self.state_file, content)
            .map_err(|e| AccountError::StateFile(format!("Failed to write state file: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GaleflingError;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> AccountRegistry {
        AccountRegistry::open(dir.path().join("accounts.toml"), SpecTable::builtin()).unwrap()
    }

    #[test]
    fn test_validate_account_id_valid() {
        for id in ["bluesky_1", "twitter-main", "a1-b2_c3", "x".repeat(64).as_str()] {
            assert!(AccountRegistry::validate_account_id(id).is_ok(), "{}", id);
        }
    }

    #[test]
    fn test_validate_account_id_invalid() {
        for id in ["", "has space", "at@sign", "dot.ted", "all", "NONE", "x".repeat(65).as_str()] {
            assert!(AccountRegistry::validate_account_id(id).is_err(), "{}", id);
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(registry(&dir).list().is_empty());
    }

    #[test]
    fn test_add_persists_in_order() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.add(AccountConfig::new(PlatformId::Twitter, "twitter_1", "main"))
            .unwrap();
        reg.add(AccountConfig::new(PlatformId::Bluesky, "bluesky_1", "rin"))
            .unwrap();

        let reopened = registry(&dir);
        let ids: Vec<_> = reopened.list().into_iter().map(|a| a.account_id).collect();
        assert_eq!(ids, vec!["twitter_1", "bluesky_1"]);
        assert_eq!(reopened.get("bluesky_1").unwrap().profile_name, "rin");
    }

    #[test]
    fn test_duplicate_rejected() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.add(AccountConfig::new(PlatformId::Twitter, "twitter_1", ""))
            .unwrap();
        let err = reg
            .add(AccountConfig::new(PlatformId::Bluesky, "twitter_1", ""))
            .unwrap_err();
        assert!(matches!(err, GaleflingError::Account(AccountError::Duplicate(_))));
    }

    #[test]
    fn test_max_account_count_enforced() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.add(AccountConfig::new(PlatformId::Onlyfans, "onlyfans_1", ""))
            .unwrap();
        let err = reg
            .add(AccountConfig::new(PlatformId::Onlyfans, "onlyfans_2", ""))
            .unwrap_err();
        assert!(matches!(
            err,
            GaleflingError::Account(AccountError::TooManyAccounts { max: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_platform_in_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("accounts.toml");
        std::fs::write(
            &path,
            "[[accounts]]\nplatform_id = \"myspace\"\naccount_id = \"myspace_1\"\n",
        )
        .unwrap();

        let err = AccountRegistry::open(&path, SpecTable::builtin()).err().unwrap();
        assert!(err.to_string().contains("myspace"));
    }

    #[test]
    fn test_set_enabled_and_filter() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.add(AccountConfig::new(PlatformId::Twitter, "twitter_1", ""))
            .unwrap();
        reg.add(AccountConfig::new(PlatformId::Fetlife, "fetlife_1", ""))
            .unwrap();
        reg.set_enabled("twitter_1", false).unwrap();

        let enabled: Vec<_> = reg.enabled().into_iter().map(|a| a.account_id).collect();
        assert_eq!(enabled, vec!["fetlife_1"]);
        assert!(!registry(&dir).get("twitter_1").unwrap().enabled);
    }

    #[test]
    fn test_remove_and_next_id() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        assert_eq!(reg.next_account_id(PlatformId::Bluesky), "bluesky_1");
        reg.add(AccountConfig::new(PlatformId::Bluesky, "bluesky_1", ""))
            .unwrap();
        assert_eq!(reg.next_account_id(PlatformId::Bluesky), "bluesky_2");

        reg.remove("bluesky_1").unwrap();
        assert!(reg.get("bluesky_1").is_none());
        assert!(reg.remove("bluesky_1").is_err());
    }

    #[test]
    fn test_concurrent_reads() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.add(AccountConfig::new(PlatformId::Twitter, "twitter_1", ""))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.get("twitter_1").is_some())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
