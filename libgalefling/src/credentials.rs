//! Credential providers
//!
//! The core never reads credentials from a global location. A
//! [`CredentialProvider`] is injected into the client factory and returns an
//! opaque key/value map per account. Three backends ship with the crate:
//!
//! - [`FileCredentialProvider`]: one `{account_id}_auth.json` file per account
//! - [`KeyringCredentialProvider`]: one OS keyring entry per account holding
//!   the same JSON object
//! - [`MemoryCredentialProvider`]: in-process map, used by tests and embedders
//!
//! Values are held as [`SecretString`] once loaded so they are zeroed on drop
//! and never show up in `Debug` output.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::error::CredentialError;

type CredResult<T> = std::result::Result<T, CredentialError>;

/// Loaded credentials for one account
pub struct Credentials {
    account_id: String,
    values: HashMap<String, SecretString>,
}

impl Credentials {
    pub fn new(account_id: impl Into<String>, values: HashMap<String, String>) -> Self {
        Self {
            account_id: account_id.into(),
            values: values
                .into_iter()
                .map(|(k, v)| (k, SecretString::from(v)))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.expose_secret())
    }

    /// Value for `key`, or a `Malformed` error naming the missing field
    pub fn require(&self, key: &str) -> CredResult<&str> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CredentialError::Malformed {
                account_id: self.account_id.clone(),
                reason: format!("missing '{}'", key),
            })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("keys", &keys)
            .finish()
    }
}

/// Source of per-account credentials
pub trait CredentialProvider: Send + Sync {
    /// Loads the credential map for an account
    ///
    /// Returns `CredentialError::NotFound` when nothing is stored.
    fn load(&self, account_id: &str) -> CredResult<Credentials>;

    fn store(&self, account_id: &str, values: &HashMap<String, String>) -> CredResult<()>;

    /// Removes an account's credentials; deleting nothing is not an error
    fn delete(&self, account_id: &str) -> CredResult<()>;

    fn exists(&self, account_id: &str) -> bool {
        self.load(account_id).is_ok()
    }

    fn backend_name(&self) -> &str;
}

fn parse_blob(account_id: &str, raw: &str) -> CredResult<Credentials> {
    let values: HashMap<String, String> =
        serde_json::from_str(raw).map_err(|e| CredentialError::Malformed {
            account_id: account_id.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Credentials::new(account_id, values))
}

fn render_blob(values: &HashMap<String, String>) -> String {
    // sorted keys keep files diff-friendly
    let ordered: BTreeMap<&String, &String> = values.iter().collect();
    serde_json::to_string_pretty(&ordered).unwrap_or_else(|_| "{}".to_string())
}

/// `{dir}/{account_id}_auth.json`
pub struct FileCredentialProvider {
    dir: PathBuf,
}

impl FileCredentialProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{}_auth.json", account_id))
    }
}

impl CredentialProvider for FileCredentialProvider {
    fn load(&self, account_id: &str) -> CredResult<Credentials> {
        let path = self.file_path(account_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound(account_id.to_string()));
            }
            Err(e) => return Err(CredentialError::Io(e)),
        };
        tracing::debug!("Loaded credentials for {} from {:?}", account_id, path);
        parse_blob(account_id, &raw)
    }

    fn store(&self, account_id: &str, values: &HashMap<String, String>) -> CredResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.file_path(account_id);
        std::fs::write(&path, render_blob(values))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }

        tracing::debug!("Stored credentials for {} at {:?}", account_id, path);
        Ok(())
    }

    fn delete(&self, account_id: &str) -> CredResult<()> {
        match std::fs::remove_file(self.file_path(account_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CredentialError::Io(e)),
        }
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

/// OS keyring, one entry per account under `service`
pub struct KeyringCredentialProvider {
    service: String,
}

impl KeyringCredentialProvider {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account_id: &str) -> CredResult<keyring::Entry> {
        keyring::Entry::new(&self.service, account_id)
            .map_err(|e| CredentialError::Keyring(e.to_string()))
    }
}

impl Default for KeyringCredentialProvider {
    fn default() -> Self {
        Self::new("galefling")
    }
}

impl CredentialProvider for KeyringCredentialProvider {
    fn load(&self, account_id: &str) -> CredResult<Credentials> {
        match self.entry(account_id)?.get_password() {
            Ok(raw) => {
                tracing::debug!("Retrieved credentials for {} from OS keyring", account_id);
                parse_blob(account_id, &raw)
            }
            Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound(account_id.to_string())),
            Err(e) => Err(CredentialError::Keyring(e.to_string())),
        }
    }

    fn store(&self, account_id: &str, values: &HashMap<String, String>) -> CredResult<()> {
        self.entry(account_id)?
            .set_password(&render_blob(values))
            .map_err(|e| CredentialError::Keyring(e.to_string()))?;
        tracing::debug!("Stored credentials for {} in OS keyring", account_id);
        Ok(())
    }

    fn delete(&self, account_id: &str) -> CredResult<()> {
        match self.entry(account_id)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Keyring(e.to_string())),
        }
    }

    fn backend_name(&self) -> &str {
        "keyring"
    }
}

/// In-memory provider
#[derive(Clone, Default)]
pub struct MemoryCredentialProvider {
    accounts: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
}

impl MemoryCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy in tests
    pub fn with(self, account_id: &str, pairs: &[(&str, &str)]) -> Self {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id.to_string(), values);
        self
    }
}

impl CredentialProvider for MemoryCredentialProvider {
    fn load(&self, account_id: &str) -> CredResult<Credentials> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(account_id)
            .map(|values| Credentials::new(account_id, values.clone()))
            .ok_or_else(|| CredentialError::NotFound(account_id.to_string()))
    }

    fn store(&self, account_id: &str, values: &HashMap<String, String>) -> CredResult<()> {
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id.to_string(), values.clone());
        Ok(())
    }

    fn delete(&self, account_id: &str) -> CredResult<()> {
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(account_id);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// `{account_id}_auth.json` files under `path`
    #[default]
    File,
    /// OS-native keyring (macOS Keychain, Windows Credential Manager, Secret Service)
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default)]
    pub storage: StorageBackend,

    /// Directory for file storage; unused by the keyring
    #[serde(default = "default_credential_path")]
    pub path: String,

    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
}

fn default_credential_path() -> String {
    "~/.config/galefling/credentials".to_string()
}

fn default_keyring_service() -> String {
    "galefling".to_string()
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            path: default_credential_path(),
            keyring_service: default_keyring_service(),
        }
    }
}

impl CredentialConfig {
    /// Builds the configured provider
    pub fn provider(&self) -> Arc<dyn CredentialProvider> {
        match self.storage {
            StorageBackend::File => {
                let dir = shellexpand::tilde(&self.path).to_string();
                Arc::new(FileCredentialProvider::new(dir))
            }
            StorageBackend::Keyring => {
                Arc::new(KeyringCredentialProvider::new(self.keyring_service.clone()))
            }
        }
    }
}
