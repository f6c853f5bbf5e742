//! GaleFling - post once, land everywhere
//!
//! Core library for fanning one post out to several social platforms and
//! accounts. Platforms with a usable API are posted to silently; the rest are
//! prepared as browser sessions a human confirms with one click. Every
//! selected account ends with exactly one [`PostResult`].

pub mod accounts;
pub mod aggregator;
pub mod browser;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod imaging;
pub mod logging;
pub mod platforms;
pub mod specs;
pub mod types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use accounts::AccountRegistry;
pub use config::Config;
pub use credentials::{CredentialConfig, CredentialProvider, StorageBackend};
pub use dispatcher::{Dispatch, Dispatcher};
pub use error::{ErrorCode, GaleflingError, PlatformError, Result};
pub use specs::{PlatformId, PlatformSpec, SpecTable};
pub use types::{AccountConfig, PostRequest, PostResult};
