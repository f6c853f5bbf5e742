//! Platform clients
//!
//! Every configured account is served by exactly one [`PlatformClient`] per
//! dispatch. The variant is decided by the platform's [`Tier`]:
//!
//! - [`PlatformClient::Silent`] wraps a backend implementing [`SilentClient`]
//!   (Twitter/X, Bluesky, Instagram, or the mock used in tests). These post
//!   synchronously through an API and return a [`PostResult`].
//! - [`PlatformClient::ConfirmClick`] is a single generic implementation
//!   driven by the platform's [`ComposerSpec`]. It never posts by itself; it
//!   prepares a [`BrowserSession`] that a human completes.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libgalefling::credentials::FileCredentialProvider;
//! use libgalefling::platforms::{ClientFactory, DefaultClientFactory, PlatformClient};
//! use libgalefling::specs::{PlatformId, SpecTable};
//! use libgalefling::types::AccountConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let specs = SpecTable::builtin();
//! let factory = DefaultClientFactory::new(
//!     Arc::new(FileCredentialProvider::new("/home/me/.config/galefling/credentials")),
//!     std::time::Duration::from_secs(30),
//!     "/home/me/.local/share/galefling/webprofiles",
//! )?;
//!
//! let account = AccountConfig::new(PlatformId::Bluesky, "bluesky_1", "rin");
//! if let PlatformClient::Silent(mut client) = factory.build(&account, specs.get(PlatformId::Bluesky))? {
//!     let result = client.post("Hello from GaleFling", None).await;
//!     println!("{:?}", result.post_url);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::browser::BrowserSession;
use crate::credentials::CredentialProvider;
use crate::error::{ErrorCode, PlatformError};
use crate::imaging::ProcessedImage;
use crate::specs::{ComposerSpec, PlatformId, PlatformSpec, Tier};
use crate::types::{AccountConfig, PostResult};

pub mod bluesky;
pub mod http;
pub mod instagram;
pub mod twitter;

#[cfg(test)]
pub(crate) mod test_server;

// Available outside tests so integration tests and the CLI test suite can use it
pub mod mock;

/// Checks text against a platform's limits before any backend call
///
/// Length is counted in characters, not bytes.
pub fn validate_text(spec: &PlatformSpec, text: &str) -> Result<(), PlatformError> {
    if text.trim().is_empty() {
        return Err(PlatformError::new(ErrorCode::PostEmpty, "post text is empty"));
    }
    if let Some(max) = spec.max_text_length {
        let length = text.chars().count();
        if length > max {
            return Err(PlatformError::new(
                ErrorCode::PostTextTooLong,
                format!(
                    "{} characters exceeds the {} limit of {}",
                    length, spec.display_name, max
                ),
            ));
        }
    }
    Ok(())
}

/// Backend that posts through a programmatic API
///
/// Implementors provide [`authenticate`](SilentClient::authenticate) and
/// [`publish`](SilentClient::publish); the provided
/// [`post`](SilentClient::post) adds validation, lazy authentication and the
/// conversion into a [`PostResult`], so no backend can skip those steps.
#[async_trait]
pub trait SilentClient: Send + Sync {
    fn account(&self) -> &AccountConfig;

    fn spec(&self) -> &PlatformSpec;

    fn is_authenticated(&self) -> bool;

    /// Establishes a session with the backend
    ///
    /// # Errors
    ///
    /// `AUTH-INVALID`, `AUTH-EXPIRED` or `AUTH-MISSING` for credential
    /// problems, `RATE-LIMIT` when throttled, `NET-*` for transport failures.
    async fn authenticate(&mut self) -> Result<(), PlatformError>;

    /// Verifies credentials and reachability without posting
    async fn test_connection(&mut self) -> Result<(), PlatformError> {
        self.authenticate().await
    }

    /// Uploads the image (if any) and creates the post
    ///
    /// Called only after validation and authentication succeeded. Returns
    /// the permalink when the backend provides one.
    async fn publish(
        &mut self,
        text: &str,
        image: Option<&ProcessedImage>,
    ) -> Result<Option<String>, PlatformError>;

    /// Validates, authenticates if needed, and publishes
    ///
    /// Never fails: every error becomes a failed [`PostResult`].
    async fn post(&mut self, text: &str, image: Option<&ProcessedImage>) -> PostResult {
        match validated_publish(self, text, image).await {
            Ok(url) => {
                tracing::info!(
                    account = %self.account().account_id,
                    url = url.as_deref().unwrap_or("<none>"),
                    "Posted"
                );
                PostResult::posted(self.account(), url)
            }
            Err(e) => {
                tracing::warn!(
                    account = %self.account().account_id,
                    code = %e.code(),
                    "Post failed: {}",
                    e.detail()
                );
                PostResult::failure(self.account(), self.spec(), &e)
            }
        }
    }
}

async fn validated_publish<C: SilentClient + ?Sized>(
    client: &mut C,
    text: &str,
    image: Option<&ProcessedImage>,
) -> Result<Option<String>, PlatformError> {
    validate_text(client.spec(), text)?;
    if client.spec().requires_image && image.is_none() {
        return Err(PlatformError::new(
            ErrorCode::PostFailed,
            format!("{} requires an image for each post", client.spec().display_name),
        ));
    }
    if !client.is_authenticated() {
        client.authenticate().await?;
    }
    client.publish(text, image).await
}

/// Generic client for platforms completed inside an embedded browser
#[derive(Debug, Clone)]
pub struct ConfirmClickClient {
    account: AccountConfig,
    spec: PlatformSpec,
    composer: ComposerSpec,
    profile_dir: PathBuf,
}

impl ConfirmClickClient {
    /// `profiles_root` holds one isolated browser profile per account
    pub fn new(
        account: AccountConfig,
        spec: PlatformSpec,
        profiles_root: &Path,
    ) -> Result<Self, PlatformError> {
        let composer = spec.composer().cloned().ok_or_else(|| {
            PlatformError::new(
                ErrorCode::SysConfigMissing,
                format!("{} has no composer description", spec.display_name),
            )
        })?;
        let profile_dir = profiles_root.join(&account.account_id);
        Ok(Self {
            account,
            spec,
            composer,
            profile_dir,
        })
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    /// Browser-backed sessions authenticate through the profile's cookies
    pub async fn authenticate(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    /// Reachability cannot be checked without a visible browser
    pub async fn test_connection(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    pub fn prepare(
        &self,
        text: &str,
        image: Option<ProcessedImage>,
    ) -> Result<BrowserSession, PlatformError> {
        validate_text(&self.spec, text)?;
        Ok(BrowserSession::new(
            self.account.clone(),
            self.spec.clone(),
            &self.composer,
            text.to_string(),
            image,
            self.profile_dir.clone(),
        ))
    }
}

/// The closed set of client variants
pub enum PlatformClient {
    Silent(Box<dyn SilentClient>),
    ConfirmClick(ConfirmClickClient),
}

impl PlatformClient {
    pub fn account(&self) -> &AccountConfig {
        match self {
            PlatformClient::Silent(client) => client.account(),
            PlatformClient::ConfirmClick(client) => client.account(),
        }
    }

    pub async fn authenticate(&mut self) -> Result<(), PlatformError> {
        match self {
            PlatformClient::Silent(client) => client.authenticate().await,
            PlatformClient::ConfirmClick(client) => client.authenticate().await,
        }
    }

    pub async fn test_connection(&mut self) -> Result<(), PlatformError> {
        match self {
            PlatformClient::Silent(client) => client.test_connection().await,
            PlatformClient::ConfirmClick(client) => client.test_connection().await,
        }
    }
}

impl std::fmt::Debug for PlatformClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformClient::Silent(client) => f
                .debug_tuple("Silent")
                .field(&client.account().account_id)
                .finish(),
            PlatformClient::ConfirmClick(client) => {
                f.debug_tuple("ConfirmClick").field(client).finish()
            }
        }
    }
}

/// Builds the client for one account
///
/// Construction failures (missing credentials, unknown backend) are returned
/// as [`PlatformError`]s and end up as that account's result.
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        account: &AccountConfig,
        spec: &PlatformSpec,
    ) -> Result<PlatformClient, PlatformError>;
}

/// Factory for the real backends
pub struct DefaultClientFactory {
    credentials: Arc<dyn CredentialProvider>,
    http: reqwest::Client,
    profiles_root: PathBuf,
}

impl DefaultClientFactory {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
        profiles_root: impl Into<PathBuf>,
    ) -> Result<Self, PlatformError> {
        Ok(Self {
            credentials,
            http: http::build_client(timeout)?,
            profiles_root: profiles_root.into(),
        })
    }
}

impl ClientFactory for DefaultClientFactory {
    fn build(
        &self,
        account: &AccountConfig,
        spec: &PlatformSpec,
    ) -> Result<PlatformClient, PlatformError> {
        if let Tier::ConfirmClick(_) = spec.tier {
            let client = ConfirmClickClient::new(account.clone(), spec.clone(), &self.profiles_root)?;
            return Ok(PlatformClient::ConfirmClick(client));
        }

        let credentials = self.credentials.load(&account.account_id)?;
        let client: Box<dyn SilentClient> = match account.platform_id {
            PlatformId::Twitter => Box::new(twitter::TwitterClient::new(
                account.clone(),
                spec.clone(),
                &credentials,
                self.http.clone(),
            )?),
            PlatformId::Bluesky => Box::new(bluesky::BlueskyClient::new(
                account.clone(),
                spec.clone(),
                &credentials,
                self.http.clone(),
            )?),
            PlatformId::Instagram => Box::new(instagram::InstagramClient::new(
                account.clone(),
                spec.clone(),
                &credentials,
                self.http.clone(),
            )?),
            other => {
                return Err(PlatformError::new(
                    ErrorCode::SysConfigMissing,
                    format!("no API backend exists for {}", other),
                ))
            }
        };
        Ok(PlatformClient::Silent(client))
    }
}
