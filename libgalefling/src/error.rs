//! Error types and the stable error-code taxonomy for GaleFling
//!
//! Two layers live here:
//!
//! - [`ErrorCode`]: the stable, machine-readable code space shared by every
//!   platform backend. Each code carries a technical string (for logs and
//!   support) and a separate plain-language message (for the end user). The
//!   two are never merged at the data-model level.
//! - [`GaleflingError`]: the crate-level error for failures that happen
//!   outside a single account's processing (configuration, account registry,
//!   invalid requests). Per-account failures never surface as this type; they
//!   become a [`crate::types::PostResult`] instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GaleflingError>;

#[derive(Error, Debug)]
pub enum GaleflingError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GaleflingError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            GaleflingError::InvalidInput(_) => 3,
            GaleflingError::Platform(e) if e.code().category() == ErrorCategory::Auth => 2,
            GaleflingError::Credential(_) => 2,
            GaleflingError::Platform(_) => 1,
            GaleflingError::Config(_) => 1,
            GaleflingError::Account(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid platform spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Invalid account id: {0}")]
    InvalidId(String),

    #[error("Duplicate account id '{0}'")]
    Duplicate(String),

    #[error("Account '{0}' not found")]
    NotFound(String),

    #[error("Account '{account_id}' references unknown platform '{platform}'")]
    UnknownPlatform { account_id: String, platform: String },

    #[error("Platform '{platform}' allows at most {max} account(s)")]
    TooManyAccounts { platform: String, max: usize },

    #[error("Account state file error: {0}")]
    StateFile(String),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No credentials stored for account '{0}'")]
    NotFound(String),

    #[error("Credentials for '{account_id}' are malformed: {reason}")]
    Malformed { account_id: String, reason: String },

    #[error("OS keyring error: {0}")]
    Keyring(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure inside one platform operation, carrying its stable code
///
/// `detail` is the technical description (backend message, HTTP status,
/// transport error). It is logged and kept on the result for support, but the
/// user-facing text always comes from [`ErrorCode::user_message`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {detail}")]
pub struct PlatformError {
    code: ErrorCode,
    detail: String,
}

impl PlatformError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<CredentialError> for PlatformError {
    fn from(err: CredentialError) -> Self {
        let code = match &err {
            CredentialError::NotFound(_) => ErrorCode::AuthMissing,
            CredentialError::Malformed { .. } => ErrorCode::AuthInvalid,
            CredentialError::Keyring(_) => ErrorCode::SysPermission,
            CredentialError::Io(_) => ErrorCode::SysPermission,
        };
        PlatformError::new(code, err.to_string())
    }
}

/// Failure categories of the code space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Auth,
    Rate,
    Img,
    Net,
    Post,
    Wv,
    Sys,
}

/// Stable error codes
///
/// The string form (`AUTH-INVALID`, `WV-SUBMIT-TIMEOUT`, ...) is part of the
/// public contract. Authentication and rate-limit codes are additionally
/// qualified with a platform prefix when one is configured, e.g.
/// `BS-AUTH-EXPIRED`; see [`ErrorCode::qualified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "AUTH-INVALID")]
    AuthInvalid,
    #[serde(rename = "AUTH-EXPIRED")]
    AuthExpired,
    #[serde(rename = "AUTH-MISSING")]
    AuthMissing,
    #[serde(rename = "RATE-LIMIT")]
    RateLimit,
    #[serde(rename = "IMG-TOO-LARGE")]
    ImgTooLarge,
    #[serde(rename = "IMG-INVALID-FORMAT")]
    ImgInvalidFormat,
    #[serde(rename = "IMG-RESIZE-FAILED")]
    ImgResizeFailed,
    #[serde(rename = "IMG-UPLOAD-FAILED")]
    ImgUploadFailed,
    #[serde(rename = "IMG-NOT-FOUND")]
    ImgNotFound,
    #[serde(rename = "IMG-CORRUPT")]
    ImgCorrupt,
    #[serde(rename = "NET-TIMEOUT")]
    NetTimeout,
    #[serde(rename = "NET-CONNECTION")]
    NetConnection,
    #[serde(rename = "NET-DNS")]
    NetDns,
    #[serde(rename = "NET-SSL")]
    NetSsl,
    #[serde(rename = "POST-TEXT-TOO-LONG")]
    PostTextTooLong,
    #[serde(rename = "POST-DUPLICATE")]
    PostDuplicate,
    #[serde(rename = "POST-FAILED")]
    PostFailed,
    #[serde(rename = "POST-EMPTY")]
    PostEmpty,
    #[serde(rename = "WV-LOAD-FAILED")]
    WvLoadFailed,
    #[serde(rename = "WV-PREFILL-FAILED")]
    WvPrefillFailed,
    #[serde(rename = "WV-SUBMIT-TIMEOUT")]
    WvSubmitTimeout,
    #[serde(rename = "WV-SESSION-EXPIRED")]
    WvSessionExpired,
    #[serde(rename = "SYS-CONFIG-MISSING")]
    SysConfigMissing,
    #[serde(rename = "SYS-PERMISSION")]
    SysPermission,
    #[serde(rename = "SYS-DISK-FULL")]
    SysDiskFull,
    #[serde(rename = "SYS-UNKNOWN")]
    SysUnknown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 26] = [
        ErrorCode::AuthInvalid,
        ErrorCode::AuthExpired,
        ErrorCode::AuthMissing,
        ErrorCode::RateLimit,
        ErrorCode::ImgTooLarge,
        ErrorCode::ImgInvalidFormat,
        ErrorCode::ImgResizeFailed,
        ErrorCode::ImgUploadFailed,
        ErrorCode::ImgNotFound,
        ErrorCode::ImgCorrupt,
        ErrorCode::NetTimeout,
        ErrorCode::NetConnection,
        ErrorCode::NetDns,
        ErrorCode::NetSsl,
        ErrorCode::PostTextTooLong,
        ErrorCode::PostDuplicate,
        ErrorCode::PostFailed,
        ErrorCode::PostEmpty,
        ErrorCode::WvLoadFailed,
        ErrorCode::WvPrefillFailed,
        ErrorCode::WvSubmitTimeout,
        ErrorCode::WvSessionExpired,
        ErrorCode::SysConfigMissing,
        ErrorCode::SysPermission,
        ErrorCode::SysDiskFull,
        ErrorCode::SysUnknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthInvalid => "AUTH-INVALID",
            ErrorCode::AuthExpired => "AUTH-EXPIRED",
            ErrorCode::AuthMissing => "AUTH-MISSING",
            ErrorCode::RateLimit => "RATE-LIMIT",
            ErrorCode::ImgTooLarge => "IMG-TOO-LARGE",
            ErrorCode::ImgInvalidFormat => "IMG-INVALID-FORMAT",
            ErrorCode::ImgResizeFailed => "IMG-RESIZE-FAILED",
            ErrorCode::ImgUploadFailed => "IMG-UPLOAD-FAILED",
            ErrorCode::ImgNotFound => "IMG-NOT-FOUND",
            ErrorCode::ImgCorrupt => "IMG-CORRUPT",
            ErrorCode::NetTimeout => "NET-TIMEOUT",
            ErrorCode::NetConnection => "NET-CONNECTION",
            ErrorCode::NetDns => "NET-DNS",
            ErrorCode::NetSsl => "NET-SSL",
            ErrorCode::PostTextTooLong => "POST-TEXT-TOO-LONG",
            ErrorCode::PostDuplicate => "POST-DUPLICATE",
            ErrorCode::PostFailed => "POST-FAILED",
            ErrorCode::PostEmpty => "POST-EMPTY",
            ErrorCode::WvLoadFailed => "WV-LOAD-FAILED",
            ErrorCode::WvPrefillFailed => "WV-PREFILL-FAILED",
            ErrorCode::WvSubmitTimeout => "WV-SUBMIT-TIMEOUT",
            ErrorCode::WvSessionExpired => "WV-SESSION-EXPIRED",
            ErrorCode::SysConfigMissing => "SYS-CONFIG-MISSING",
            ErrorCode::SysPermission => "SYS-PERMISSION",
            ErrorCode::SysDiskFull => "SYS-DISK-FULL",
            ErrorCode::SysUnknown => "SYS-UNKNOWN",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::AuthInvalid | ErrorCode::AuthExpired | ErrorCode::AuthMissing => {
                ErrorCategory::Auth
            }
            ErrorCode::RateLimit => ErrorCategory::Rate,
            ErrorCode::ImgTooLarge
            | ErrorCode::ImgInvalidFormat
            | ErrorCode::ImgResizeFailed
            | ErrorCode::ImgUploadFailed
            | ErrorCode::ImgNotFound
            | ErrorCode::ImgCorrupt => ErrorCategory::Img,
            ErrorCode::NetTimeout | ErrorCode::NetConnection | ErrorCode::NetDns | ErrorCode::NetSsl => {
                ErrorCategory::Net
            }
            ErrorCode::PostTextTooLong
            | ErrorCode::PostDuplicate
            | ErrorCode::PostFailed
            | ErrorCode::PostEmpty => ErrorCategory::Post,
            ErrorCode::WvLoadFailed
            | ErrorCode::WvPrefillFailed
            | ErrorCode::WvSubmitTimeout
            | ErrorCode::WvSessionExpired => ErrorCategory::Wv,
            ErrorCode::SysConfigMissing
            | ErrorCode::SysPermission
            | ErrorCode::SysDiskFull
            | ErrorCode::SysUnknown => ErrorCategory::Sys,
        }
    }

    /// Code string qualified with a platform prefix
    ///
    /// Only credential and throttling codes are platform-qualified
    /// (`TW-RATE-LIMIT`, `BS-AUTH-EXPIRED`); `AUTH-MISSING` and every other
    /// category stay platform-neutral.
    pub fn qualified(&self, prefix: Option<&str>) -> String {
        match (prefix, self) {
            (Some(prefix), ErrorCode::AuthInvalid | ErrorCode::AuthExpired | ErrorCode::RateLimit) => {
                format!("{}-{}", prefix, self.as_str())
            }
            _ => self.as_str().to_string(),
        }
    }

    /// Technical description, stable across releases
    pub fn technical_message(&self) -> &'static str {
        match self {
            ErrorCode::AuthInvalid => "Platform credentials are invalid.",
            ErrorCode::AuthExpired => "Platform access token or session has expired.",
            ErrorCode::AuthMissing => "No credentials found for platform.",
            ErrorCode::RateLimit => "Platform rate limit exceeded.",
            ErrorCode::ImgTooLarge => "Image file size exceeds platform limits.",
            ErrorCode::ImgInvalidFormat => "Image format not supported.",
            ErrorCode::ImgResizeFailed => "Failed to resize image.",
            ErrorCode::ImgUploadFailed => "Image upload to platform failed.",
            ErrorCode::ImgNotFound => "Image file does not exist.",
            ErrorCode::ImgCorrupt => "Image file is corrupted or unreadable.",
            ErrorCode::NetTimeout => "Request timed out.",
            ErrorCode::NetConnection => "Could not connect to platform.",
            ErrorCode::NetDns => "DNS resolution failed.",
            ErrorCode::NetSsl => "SSL certificate verification failed.",
            ErrorCode::PostTextTooLong => "Post text exceeds character limit.",
            ErrorCode::PostDuplicate => "Platform rejected duplicate post.",
            ErrorCode::PostFailed => "Post submission failed.",
            ErrorCode::PostEmpty => "Post text cannot be empty.",
            ErrorCode::WvLoadFailed => "Composer page failed to load.",
            ErrorCode::WvPrefillFailed => "Composer text could not be pre-filled.",
            ErrorCode::WvSubmitTimeout => "Post was not confirmed.",
            ErrorCode::WvSessionExpired => "Browser session has expired.",
            ErrorCode::SysConfigMissing => "Configuration file not found.",
            ErrorCode::SysPermission => "Insufficient file system permissions.",
            ErrorCode::SysDiskFull => "Disk full, cannot save logs.",
            ErrorCode::SysUnknown => "Unknown system error occurred.",
        }
    }

    /// Plain-language message for the end user
    pub fn user_message(&self, platform: &str) -> String {
        match self {
            ErrorCode::AuthInvalid => format!(
                "Your {} credentials don't seem to be working. Please check them in Settings.",
                platform
            ),
            ErrorCode::AuthExpired => format!(
                "Your {} session has expired. Open Settings to reconnect.",
                platform
            ),
            ErrorCode::AuthMissing => {
                "No credentials found. Please set up your account in Settings.".to_string()
            }
            ErrorCode::RateLimit => format!(
                "{} says you're posting too fast. Try again in a few minutes.",
                platform
            ),
            ErrorCode::ImgTooLarge => {
                "This image is too big. The app will try to resize it automatically.".to_string()
            }
            ErrorCode::ImgInvalidFormat => {
                "This image format isn't supported. Please use JPEG or PNG.".to_string()
            }
            ErrorCode::ImgResizeFailed => {
                "Couldn't resize the image to fit platform requirements.".to_string()
            }
            ErrorCode::ImgUploadFailed => "Image upload failed. Please try again.".to_string(),
            ErrorCode::ImgNotFound => {
                "The selected image file can't be found. It may have been moved or deleted."
                    .to_string()
            }
            ErrorCode::ImgCorrupt => {
                "This image file appears to be corrupted. Please try a different image.".to_string()
            }
            ErrorCode::NetTimeout => {
                "The request timed out. Please check your internet and try again.".to_string()
            }
            ErrorCode::NetConnection => format!(
                "Couldn't connect to {}. Please check your internet connection.",
                platform
            ),
            ErrorCode::NetDns => {
                "DNS lookup failed. Please check your internet connection.".to_string()
            }
            ErrorCode::NetSsl => {
                "SSL error. Please check your system clock and internet connection.".to_string()
            }
            ErrorCode::PostTextTooLong => format!(
                "Your post is too long for {}. Please shorten it.",
                platform
            ),
            ErrorCode::PostDuplicate => format!(
                "{} thinks this is a duplicate post. Try changing the text slightly.",
                platform
            ),
            ErrorCode::PostFailed => "Post failed. Please try again.".to_string(),
            ErrorCode::PostEmpty => "Please enter some text before posting.".to_string(),
            ErrorCode::WvLoadFailed => format!(
                "The {} page didn't load. Check your connection and try again.",
                platform
            ),
            ErrorCode::WvPrefillFailed => format!(
                "Couldn't fill in your text on {}. You can paste it manually.",
                platform
            ),
            ErrorCode::WvSubmitTimeout => format!(
                "The {} post wasn't confirmed. Try again if it didn't go through.",
                platform
            ),
            ErrorCode::WvSessionExpired => format!(
                "You've been logged out of {}. Log in again inside the post window.",
                platform
            ),
            ErrorCode::SysConfigMissing => {
                "A configuration file is missing. Try reinstalling the app.".to_string()
            }
            ErrorCode::SysPermission => {
                "The app doesn't have permission to read or write its files.".to_string()
            }
            ErrorCode::SysDiskFull => "Your disk is full. Please free up some space.".to_string(),
            ErrorCode::SysUnknown => {
                "Something unexpected went wrong. Please send your logs for help.".to_string()
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    /// Parses both neutral (`RATE-LIMIT`) and platform-qualified
    /// (`TW-RATE-LIMIT`) forms.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        if let Some(code) = ErrorCode::ALL.iter().find(|c| c.as_str() == upper) {
            return Ok(*code);
        }
        if let Some((_, rest)) = upper.split_once('-') {
            if let Some(code) = ErrorCode::ALL
                .iter()
                .filter(|c| matches!(c.category(), ErrorCategory::Auth | ErrorCategory::Rate))
                .find(|c| c.as_str() == rest)
            {
                return Ok(*code);
            }
        }
        Err(format!("Unknown error code: '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = GaleflingError::InvalidInput("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = GaleflingError::Platform(PlatformError::new(
            ErrorCode::AuthExpired,
            "token expired",
        ));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_platform_errors() {
        for code in [ErrorCode::RateLimit, ErrorCode::NetTimeout, ErrorCode::PostFailed] {
            let error = GaleflingError::Platform(PlatformError::new(code, "test"));
            assert_eq!(error.exit_code(), 1, "{} should exit with code 1", code);
        }
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = GaleflingError::Config(ConfigError::MissingField("accounts_file".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting() {
        let error = GaleflingError::Platform(PlatformError::new(
            ErrorCode::PostDuplicate,
            "Status is a duplicate",
        ));
        assert_eq!(
            error.to_string(),
            "Platform error: POST-DUPLICATE: Status is a duplicate"
        );
    }

    #[test]
    fn test_code_strings_are_unique_and_round_trip() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::ALL {
            assert!(seen.insert(code.as_str()), "duplicate code {}", code);
            assert_eq!(code.as_str().parse::<ErrorCode>().unwrap(), code);
        }
    }

    #[test]
    fn test_serde_uses_stable_strings() {
        let json = serde_json::to_string(&ErrorCode::WvSubmitTimeout).unwrap();
        assert_eq!(json, r#""WV-SUBMIT-TIMEOUT""#);
        let parsed: ErrorCode = serde_json::from_str(r#""NET-DNS""#).unwrap();
        assert_eq!(parsed, ErrorCode::NetDns);
    }

    #[test]
    fn test_qualified_codes() {
        assert_eq!(ErrorCode::AuthExpired.qualified(Some("BS")), "BS-AUTH-EXPIRED");
        assert_eq!(ErrorCode::RateLimit.qualified(Some("TW")), "TW-RATE-LIMIT");
        assert_eq!(ErrorCode::AuthMissing.qualified(Some("TW")), "AUTH-MISSING");
        assert_eq!(ErrorCode::PostFailed.qualified(Some("BS")), "POST-FAILED");
        assert_eq!(ErrorCode::RateLimit.qualified(None), "RATE-LIMIT");
    }

    #[test]
    fn test_parse_qualified_code() {
        assert_eq!("BS-AUTH-EXPIRED".parse::<ErrorCode>().unwrap(), ErrorCode::AuthExpired);
        assert_eq!("tw-rate-limit".parse::<ErrorCode>().unwrap(), ErrorCode::RateLimit);
        assert!("XX-POST-FAILED".parse::<ErrorCode>().is_err());
        assert!("NOPE".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn test_categories() {
        assert_eq!(ErrorCode::AuthMissing.category(), ErrorCategory::Auth);
        assert_eq!(ErrorCode::RateLimit.category(), ErrorCategory::Rate);
        assert_eq!(ErrorCode::ImgCorrupt.category(), ErrorCategory::Img);
        assert_eq!(ErrorCode::NetSsl.category(), ErrorCategory::Net);
        assert_eq!(ErrorCode::PostEmpty.category(), ErrorCategory::Post);
        assert_eq!(ErrorCode::WvLoadFailed.category(), ErrorCategory::Wv);
        assert_eq!(ErrorCode::SysUnknown.category(), ErrorCategory::Sys);
    }

    #[test]
    fn test_technical_and_user_messages_differ() {
        for code in ErrorCode::ALL {
            let technical = code.technical_message();
            let user = code.user_message("Bluesky");
            assert!(!technical.is_empty());
            assert!(!user.is_empty());
            assert_ne!(technical, user, "{} conflates its messages", code);
            assert!(!user.contains(code.as_str()), "{} leaks its code", code);
        }
    }

    #[test]
    fn test_user_message_names_platform() {
        assert!(ErrorCode::RateLimit.user_message("Twitter").contains("Twitter"));
        assert!(ErrorCode::AuthInvalid.user_message("Bluesky").contains("Bluesky"));
    }

    #[test]
    fn test_credential_error_maps_to_auth_codes() {
        let missing: PlatformError = CredentialError::NotFound("bluesky_1".to_string()).into();
        assert_eq!(missing.code(), ErrorCode::AuthMissing);

        let malformed: PlatformError = CredentialError::Malformed {
            account_id: "twitter_1".to_string(),
            reason: "missing access_token".to_string(),
        }
        .into();
        assert_eq!(malformed.code(), ErrorCode::AuthInvalid);
        assert!(malformed.detail().contains("access_token"));
    }

    #[test]
    fn test_platform_error_clone() {
        let original = PlatformError::new(ErrorCode::NetConnection, "Connection refused");
        let cloned = original.clone();
        assert_eq!(original, cloned);
        assert_eq!(format!("{}", cloned), "NET-CONNECTION: Connection refused");
    }
}
