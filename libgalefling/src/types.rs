//! Core types for GaleFling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ErrorCode, PlatformError};
use crate::specs::{PlatformId, PlatformSpec};

/// One configured account on one platform
///
/// Owned by the account registry; the dispatcher only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub platform_id: PlatformId,
    /// Unique, stable identifier (e.g. `bluesky_1`)
    pub account_id: String,
    /// Human label shown next to the platform name
    #[serde(default)]
    pub profile_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AccountConfig {
    pub fn new(
        platform_id: PlatformId,
        account_id: impl Into<String>,
        profile_name: impl Into<String>,
    ) -> Self {
        Self {
            platform_id,
            account_id: account_id.into(),
            profile_name: profile_name.into(),
            enabled: true,
        }
    }

    /// "Bluesky (rin)" or just "Bluesky" when no profile name is set
    pub fn label(&self, spec: &PlatformSpec) -> String {
        if self.profile_name.is_empty() {
            spec.display_name.clone()
        } else {
            format!("{} ({})", spec.display_name, self.profile_name)
        }
    }
}

/// What the user asked to post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRequest {
    pub text: String,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    /// Selected account ids, in display order
    pub account_ids: Vec<String>,
}

impl PostRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_path: None,
            account_ids: Vec::new(),
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_accounts<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.account_ids = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Terminal outcome for one account
///
/// `success` never coexists with an error code, and a confirm-click result is
/// never successful without the user's confirmation. The constructors below
/// are the only way the crate builds results, which keeps both rules true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostResult {
    pub success: bool,
    pub platform_id: PlatformId,
    pub account_id: String,
    pub profile_name: String,
    pub post_url: Option<String>,
    pub error_code: Option<ErrorCode>,
    /// Platform-qualified code string, e.g. `BS-AUTH-EXPIRED`
    pub qualified_code: Option<String>,
    /// Plain-language message for the user
    pub error_message: Option<String>,
    /// Technical detail for logs and support
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub url_captured: bool,
    pub user_confirmed: bool,
}

impl PostResult {
    fn base(account: &AccountConfig, success: bool) -> Self {
        Self {
            success,
            platform_id: account.platform_id,
            account_id: account.account_id.clone(),
            profile_name: account.profile_name.clone(),
            post_url: None,
            error_code: None,
            qualified_code: None,
            error_message: None,
            error_detail: None,
            timestamp: Utc::now(),
            url_captured: false,
            user_confirmed: false,
        }
    }

    /// Silent-tier success; the user confirmed by pressing post
    pub fn posted(account: &AccountConfig, post_url: Option<String>) -> Self {
        let mut result = Self::base(account, true);
        result.url_captured = post_url.is_some();
        result.post_url = post_url;
        result.user_confirmed = true;
        result
    }

    /// Confirm-click success with a captured permalink
    pub fn captured(account: &AccountConfig, post_url: String) -> Self {
        let mut result = Self::base(account, true);
        result.post_url = Some(post_url);
        result.url_captured = true;
        result.user_confirmed = true;
        result
    }

    /// Confirm-click success reported by the user, link unavailable
    pub fn marked_done(account: &AccountConfig) -> Self {
        let mut result = Self::base(account, true);
        result.user_confirmed = true;
        result
    }

    pub fn failure(account: &AccountConfig, spec: &PlatformSpec, error: &PlatformError) -> Self {
        let code = error.code();
        let mut result = Self::base(account, false);
        result.error_code = Some(code);
        result.qualified_code = Some(code.qualified(spec.code_prefix.as_deref()));
        result.error_message = Some(code.user_message(&spec.display_name));
        result.error_detail = Some(error.detail().to_string());
        result
    }

    pub fn is_link_unavailable(&self) -> bool {
        self.success && !self.url_captured
    }

    /// Code and user message joined for display
    pub fn display_error(&self) -> Option<String> {
        let code = self
            .qualified_code
            .clone()
            .or_else(|| self.error_code.map(|c| c.to_string()))?;
        match &self.error_message {
            Some(message) => Some(format!("[{}] {}", code, message)),
            None => Some(format!("[{}]", code)),
        }
    }
}

/// Renders the support block a user can paste into a bug report
pub fn format_error_details(result: &PostResult, spec: &PlatformSpec) -> String {
    let mut out = String::new();
    out.push_str(&format!("Platform: {}\n", spec.display_name));
    if !result.profile_name.is_empty() {
        out.push_str(&format!("Profile: {}\n", result.profile_name));
    }
    out.push_str(&format!("Account: {}\n", result.account_id));
    let code = result
        .qualified_code
        .clone()
        .or_else(|| result.error_code.map(|c| c.to_string()));
    if let Some(code) = code {
        out.push_str(&format!("Error Code: {}\n", code));
    }
    out.push_str(&format!("Time: {}\n", result.timestamp.to_rfc3339()));
    if let Some(message) = &result.error_message {
        out.push_str(&format!("Message: {}\n", message));
    }
    if let Some(code) = result.error_code {
        out.push_str(&format!("Technical: {}\n", code.technical_message()));
    }
    if let Some(detail) = &result.error_detail {
        out.push_str(&format!("Detail: {}\n", detail));
    }
    out.push_str(&format!("App Version: {}\n", crate::VERSION));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::SpecTable;

    fn bluesky_account() -> AccountConfig {
        AccountConfig::new(PlatformId::Bluesky, "bluesky_1", "rin")
    }

    #[test]
    fn test_account_label() {
        let table = SpecTable::builtin();
        let spec = table.get(PlatformId::Bluesky);
        assert_eq!(bluesky_account().label(spec), "Bluesky (rin)");

        let bare = AccountConfig::new(PlatformId::Bluesky, "bluesky_2", "");
        assert_eq!(bare.label(spec), "Bluesky");
    }

    #[test]
    fn test_account_enabled_defaults_true() {
        let account: AccountConfig =
            toml::from_str("platform_id = \"twitter\"\naccount_id = \"twitter_1\"").unwrap();
        assert!(account.enabled);
        assert_eq!(account.profile_name, "");
    }

    #[test]
    fn test_posted_with_url() {
        let result = PostResult::posted(&bluesky_account(), Some("https://bsky.app/x".into()));
        assert!(result.success);
        assert!(result.url_captured);
        assert!(result.user_confirmed);
        assert!(result.error_code.is_none());
        assert!(result.display_error().is_none());
    }

    #[test]
    fn test_marked_done_has_no_link() {
        let account = AccountConfig::new(PlatformId::Fetlife, "fetlife_1", "");
        let result = PostResult::marked_done(&account);
        assert!(result.success);
        assert!(result.user_confirmed);
        assert!(result.is_link_unavailable());
    }

    #[test]
    fn test_failure_fills_code_and_messages() {
        let table = SpecTable::builtin();
        let error = PlatformError::new(ErrorCode::AuthExpired, "HTTP 401 ExpiredToken");
        let result =
            PostResult::failure(&bluesky_account(), table.get(PlatformId::Bluesky), &error);

        assert!(!result.success);
        assert!(!result.user_confirmed);
        assert_eq!(result.error_code, Some(ErrorCode::AuthExpired));
        assert_eq!(result.qualified_code.as_deref(), Some("BS-AUTH-EXPIRED"));
        assert_eq!(result.error_detail.as_deref(), Some("HTTP 401 ExpiredToken"));

        let display = result.display_error().unwrap();
        assert!(display.starts_with("[BS-AUTH-EXPIRED] "));
        assert!(display.contains("Bluesky"));
    }

    #[test]
    fn test_format_error_details() {
        let table = SpecTable::builtin();
        let spec = table.get(PlatformId::Twitter);
        let account = AccountConfig::new(PlatformId::Twitter, "twitter_1", "main");
        let error = PlatformError::new(ErrorCode::RateLimit, "HTTP 429");
        let result = PostResult::failure(&account, spec, &error);

        let details = format_error_details(&result, spec);
        assert!(details.contains("Platform: Twitter"));
        assert!(details.contains("Profile: main"));
        assert!(details.contains("Error Code: TW-RATE-LIMIT"));
        assert!(details.contains("Detail: HTTP 429"));
        assert!(details.contains(&format!("App Version: {}", crate::VERSION)));
    }

    #[test]
    fn test_post_request_builder() {
        let request = PostRequest::new("hello")
            .with_image("/tmp/cat.png")
            .with_accounts(["twitter_1", "bluesky_1"]);
        assert_eq!(request.account_ids, vec!["twitter_1", "bluesky_1"]);
        assert_eq!(request.image_path, Some(PathBuf::from("/tmp/cat.png")));
    }

    #[test]
    fn test_result_serializes_code_string() {
        let table = SpecTable::builtin();
        let error = PlatformError::new(ErrorCode::PostDuplicate, "dup");
        let result =
            PostResult::failure(&bluesky_account(), table.get(PlatformId::Bluesky), &error);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error_code"], "POST-DUPLICATE");
        assert_eq!(json["platform_id"], "bluesky");
    }
}
