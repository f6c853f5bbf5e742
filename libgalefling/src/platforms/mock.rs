//! Mock platform implementation for testing
//!
//! A configurable [`SilentClient`] that can succeed, fail with any
//! [`ErrorCode`] at authentication or post time, sleep, or panic. Paired with
//! [`MockFactory`] it lets dispatcher tests run without credentials or
//! network access.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::{ClientFactory, ConfirmClickClient, PlatformClient, SilentClient};
use crate::error::{ErrorCode, PlatformError};
use crate::imaging::ProcessedImage;
use crate::specs::{PlatformSpec, Tier};
use crate::types::AccountConfig;

/// What the mock does when asked to post
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Succeed,
    FailAuth(ErrorCode),
    FailPost(ErrorCode),
    /// Panics inside `publish`
    Panic,
}

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub outcome: MockOutcome,

    /// Delay before completing each operation
    pub delay: Duration,

    /// Permalink returned on success
    pub post_url: Option<String>,

    pub auth_call_count: Arc<Mutex<usize>>,
    pub post_call_count: Arc<Mutex<usize>>,

    /// Texts that reached `publish`
    pub posted_content: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            outcome: MockOutcome::Succeed,
            delay: Duration::ZERO,
            post_url: None,
            auth_call_count: Arc::new(Mutex::new(0)),
            post_call_count: Arc::new(Mutex::new(0)),
            posted_content: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockConfig {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn success_with_url(url: impl Into<String>) -> Self {
        Self {
            post_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn auth_failure(code: ErrorCode) -> Self {
        Self {
            outcome: MockOutcome::FailAuth(code),
            ..Default::default()
        }
    }

    pub fn post_failure(code: ErrorCode) -> Self {
        Self {
            outcome: MockOutcome::FailPost(code),
            ..Default::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            outcome: MockOutcome::Panic,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn auth_calls(&self) -> usize {
        *self.auth_call_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn post_calls(&self) -> usize {
        *self.post_call_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn posted(&self) -> Vec<String> {
        self.posted_content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Mock silent client for testing
pub struct MockClient {
    account: AccountConfig,
    spec: PlatformSpec,
    config: MockConfig,
    authenticated: bool,
}

impl MockClient {
    pub fn new(account: AccountConfig, spec: PlatformSpec, config: MockConfig) -> Self {
        Self {
            account,
            spec,
            config,
            authenticated: false,
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }
}

#[async_trait]
impl SilentClient for MockClient {
    fn account(&self) -> &AccountConfig {
        &self.account
    }

    fn spec(&self) -> &PlatformSpec {
        &self.spec
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn authenticate(&mut self) -> Result<(), PlatformError> {
        *self
            .config
            .auth_call_count
            .lock()
            .unwrap_or_else(|e| e.into_inner()) += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let MockOutcome::FailAuth(code) = self.config.outcome {
            return Err(PlatformError::new(code, "mock authentication failed"));
        }
        self.authenticated = true;
        Ok(())
    }

    async fn publish(
        &mut self,
        text: &str,
        _image: Option<&ProcessedImage>,
    ) -> Result<Option<String>, PlatformError> {
        *self
            .config
            .post_call_count
            .lock()
            .unwrap_or_else(|e| e.into_inner()) += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        match self.config.outcome {
            MockOutcome::Panic => panic!("mock client for {} panicked", self.account.account_id),
            MockOutcome::FailPost(code) => Err(PlatformError::new(code, "mock post failed")),
            _ => {
                self.config
                    .posted_content
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(text.to_string());
                Ok(self.config.post_url.clone())
            }
        }
    }
}

/// Builds [`MockClient`]s for silent accounts and real
/// [`ConfirmClickClient`]s for confirm-click accounts
pub struct MockFactory {
    configs: HashMap<String, MockConfig>,
    default: MockConfig,
    profiles_root: PathBuf,
    construction_errors: HashMap<String, PlatformError>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            configs: HashMap::new(),
            default: MockConfig::default(),
            profiles_root: std::env::temp_dir().join("galefling-mock-profiles"),
            construction_errors: HashMap::new(),
        }
    }

    /// Behaviour for one account
    pub fn with_account(mut self, account_id: &str, config: MockConfig) -> Self {
        self.configs.insert(account_id.to_string(), config);
        self
    }

    /// Behaviour for accounts without their own entry
    pub fn with_default(mut self, config: MockConfig) -> Self {
        self.default = config;
        self
    }

    /// Make `build` fail for one account, as missing credentials would
    pub fn with_construction_error(mut self, account_id: &str, error: PlatformError) -> Self {
        self.construction_errors
            .insert(account_id.to_string(), error);
        self
    }

    pub fn with_profiles_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.profiles_root = root.into();
        self
    }

    /// Shared config handle, for inspecting call counters after a dispatch
    pub fn config_for(&self, account_id: &str) -> MockConfig {
        self.configs
            .get(account_id)
            .unwrap_or(&self.default)
            .clone()
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for MockFactory {
    fn build(
        &self,
        account: &AccountConfig,
        spec: &PlatformSpec,
    ) -> Result<PlatformClient, PlatformError> {
        if let Some(error) = self.construction_errors.get(&account.account_id) {
            return Err(error.clone());
        }
        if let Tier::ConfirmClick(_) = spec.tier {
            let client =
                ConfirmClickClient::new(account.clone(), spec.clone(), &self.profiles_root)?;
            return Ok(PlatformClient::ConfirmClick(client));
        }
        Ok(PlatformClient::Silent(Box::new(MockClient::new(
            account.clone(),
            spec.clone(),
            self.config_for(&account.account_id),
        ))))
    }
}
