//! Platform spec table
//!
//! Read-only registry mapping every known [`PlatformId`] to its
//! [`PlatformSpec`]. The table is built once at process start (built-in values
//! plus optional configuration overrides) and injected wherever it is needed.
//! Construction fails if any platform would end up without a spec, so
//! [`SpecTable::get`] never misses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, Result};

const MB: u64 = 1024 * 1024;

/// Identifier of a supported platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Twitter,
    Bluesky,
    Instagram,
    Fetlife,
    Snapchat,
    Onlyfans,
    Fansly,
}

impl PlatformId {
    pub const ALL: [PlatformId; 7] = [
        PlatformId::Twitter,
        PlatformId::Bluesky,
        PlatformId::Instagram,
        PlatformId::Fetlife,
        PlatformId::Snapchat,
        PlatformId::Onlyfans,
        PlatformId::Fansly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Twitter => "twitter",
            PlatformId::Bluesky => "bluesky",
            PlatformId::Instagram => "instagram",
            PlatformId::Fetlife => "fetlife",
            PlatformId::Snapchat => "snapchat",
            PlatformId::Onlyfans => "onlyfans",
            PlatformId::Fansly => "fansly",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        PlatformId::ALL
            .into_iter()
            .find(|id| id.as_str() == lowered)
            .ok_or_else(|| format!("Unknown platform '{}'", s))
    }
}

/// Encoded image formats a platform may accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormatKind {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormatKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormatKind::Jpeg => "image/jpeg",
            ImageFormatKind::Png => "image/png",
            ImageFormatKind::Gif => "image/gif",
            ImageFormatKind::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormatKind::Jpeg => "jpg",
            ImageFormatKind::Png => "png",
            ImageFormatKind::Gif => "gif",
            ImageFormatKind::Webp => "webp",
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ImageFormatKind::Jpeg),
            image::ImageFormat::Png => Some(ImageFormatKind::Png),
            image::ImageFormat::Gif => Some(ImageFormatKind::Gif),
            image::ImageFormat::WebP => Some(ImageFormatKind::Webp),
            _ => None,
        }
    }
}

/// Where and how a confirm-click composer is driven
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposerSpec {
    pub composer_url: String,
    /// CSS selector of the composer's text input
    pub text_selector: String,
    /// Regex matched against navigation URLs; a match means the post landed
    #[serde(default)]
    pub success_url_pattern: Option<String>,
    /// Element that appears once the post is published; watched after prefill
    #[serde(default)]
    pub success_selector: Option<String>,
    /// Link to the new post, read when the success element shows up
    #[serde(default)]
    pub permalink_selector: Option<String>,
}

/// How a platform's posts are completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tier {
    /// Posted synchronously through a programmatic API
    Silent,
    /// Completed by a human inside an embedded browser session
    ConfirmClick(ComposerSpec),
}

impl Tier {
    pub fn is_silent(&self) -> bool {
        matches!(self, Tier::Silent)
    }
}

/// Immutable constraints of one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub display_name: String,
    /// Maximum (width, height) in pixels
    pub max_dimensions: (u32, u32),
    /// Maximum encoded image size in bytes
    pub max_file_size: u64,
    pub allowed_formats: Vec<ImageFormatKind>,
    /// Maximum text length in characters, `None` when unlimited
    #[serde(default)]
    pub max_text_length: Option<usize>,
    pub tier: Tier,
    pub max_account_count: usize,
    /// Delay between page load and text injection (confirm-click only)
    #[serde(default, with = "duration_ms")]
    pub confirmation_delay: Duration,
    #[serde(default)]
    pub requires_facets: bool,
    #[serde(default)]
    pub requires_image: bool,
    /// Two-letter prefix qualifying auth and rate-limit codes
    #[serde(default)]
    pub code_prefix: Option<String>,
}

impl PlatformSpec {
    pub fn allows(&self, format: ImageFormatKind) -> bool {
        self.allowed_formats.contains(&format)
    }

    pub fn composer(&self) -> Option<&ComposerSpec> {
        match &self.tier {
            Tier::Silent => None,
            Tier::ConfirmClick(composer) => Some(composer),
        }
    }

    fn validate(&self, id: PlatformId) -> std::result::Result<(), ConfigError> {
        if self.max_dimensions.0 == 0 || self.max_dimensions.1 == 0 {
            return Err(ConfigError::InvalidSpec(format!(
                "{}: max_dimensions must be non-zero",
                id
            )));
        }
        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidSpec(format!(
                "{}: max_file_size must be non-zero",
                id
            )));
        }
        if self.allowed_formats.is_empty() {
            return Err(ConfigError::InvalidSpec(format!(
                "{}: allowed_formats cannot be empty",
                id
            )));
        }
        if let Some(composer) = self.composer() {
            let url = url::Url::parse(&composer.composer_url).map_err(|e| {
                ConfigError::InvalidSpec(format!("{}: bad composer_url: {}", id, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidSpec(format!(
                    "{}: composer_url must be http(s)",
                    id
                )));
            }
            if let Some(pattern) = &composer.success_url_pattern {
                regex::Regex::new(pattern).map_err(|e| {
                    ConfigError::InvalidSpec(format!("{}: bad success_url_pattern: {}", id, e))
                })?;
            }
            if composer.permalink_selector.is_some() && composer.success_selector.is_none() {
                return Err(ConfigError::InvalidSpec(format!(
                    "{}: permalink_selector needs a success_selector",
                    id
                )));
            }
            for selector in [&composer.success_selector, &composer.permalink_selector]
                .into_iter()
                .flatten()
            {
                if selector.trim().is_empty() {
                    return Err(ConfigError::InvalidSpec(format!(
                        "{}: selectors cannot be blank",
                        id
                    )));
                }
            }
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

fn confirm_click(
    composer_url: &str,
    text_selector: &str,
    success_url_pattern: Option<&str>,
) -> Tier {
    Tier::ConfirmClick(ComposerSpec {
        composer_url: composer_url.to_string(),
        text_selector: text_selector.to_string(),
        success_url_pattern: success_url_pattern.map(str::to_string),
        success_selector: None,
        permalink_selector: None,
    })
}

fn builtin_spec(id: PlatformId) -> PlatformSpec {
    use ImageFormatKind::*;

    match id {
        PlatformId::Twitter => PlatformSpec {
            display_name: "Twitter".to_string(),
            max_dimensions: (4096, 4096),
            max_file_size: 5 * MB,
            allowed_formats: vec![Jpeg, Png, Gif, Webp],
            max_text_length: Some(280),
            tier: Tier::Silent,
            max_account_count: 2,
            confirmation_delay: Duration::ZERO,
            requires_facets: false,
            requires_image: false,
            code_prefix: Some("TW".to_string()),
        },
        PlatformId::Bluesky => PlatformSpec {
            display_name: "Bluesky".to_string(),
            max_dimensions: (2000, 2000),
            max_file_size: MB,
            allowed_formats: vec![Jpeg, Png],
            max_text_length: Some(300),
            tier: Tier::Silent,
            max_account_count: 2,
            confirmation_delay: Duration::ZERO,
            requires_facets: true,
            requires_image: false,
            code_prefix: Some("BS".to_string()),
        },
        PlatformId::Instagram => PlatformSpec {
            display_name: "Instagram".to_string(),
            max_dimensions: (1440, 1800),
            max_file_size: 8 * MB,
            allowed_formats: vec![Jpeg],
            max_text_length: Some(2200),
            tier: Tier::Silent,
            max_account_count: 2,
            confirmation_delay: Duration::ZERO,
            requires_facets: false,
            requires_image: true,
            code_prefix: Some("IG".to_string()),
        },
        PlatformId::Fetlife => PlatformSpec {
            display_name: "FetLife".to_string(),
            max_dimensions: (2048, 2048),
            max_file_size: 10 * MB,
            allowed_formats: vec![Jpeg, Png, Gif],
            max_text_length: None,
            tier: confirm_click(
                "https://fetlife.com/statuses/new",
                "textarea#status_body",
                Some(r"fetlife\.com/users/\d+/statuses/\d+"),
            ),
            max_account_count: 2,
            confirmation_delay: Duration::from_millis(200),
            requires_facets: false,
            requires_image: false,
            code_prefix: None,
        },
        PlatformId::Snapchat => PlatformSpec {
            display_name: "Snapchat".to_string(),
            max_dimensions: (1080, 1920),
            max_file_size: 5 * MB,
            allowed_formats: vec![Jpeg, Png],
            max_text_length: None,
            tier: confirm_click("https://web.snapchat.com/", r#"div[contenteditable="true"]"#, None),
            max_account_count: 2,
            confirmation_delay: Duration::from_millis(500),
            requires_facets: false,
            requires_image: false,
            code_prefix: None,
        },
        PlatformId::Onlyfans => PlatformSpec {
            display_name: "OnlyFans".to_string(),
            max_dimensions: (4096, 4096),
            max_file_size: 20 * MB,
            allowed_formats: vec![Jpeg, Png, Gif],
            max_text_length: None,
            tier: confirm_click(
                "https://onlyfans.com/",
                r#"div[contenteditable="true"].b-make-post__text"#,
                None,
            ),
            max_account_count: 1,
            confirmation_delay: Duration::from_millis(1500),
            requires_facets: false,
            requires_image: false,
            code_prefix: None,
        },
        PlatformId::Fansly => PlatformSpec {
            display_name: "Fansly".to_string(),
            max_dimensions: (4096, 4096),
            max_file_size: 20 * MB,
            allowed_formats: vec![Jpeg, Png, Gif],
            max_text_length: Some(3000),
            tier: confirm_click("https://fansly.com/", "textarea", None),
            max_account_count: 1,
            confirmation_delay: Duration::from_millis(1500),
            requires_facets: false,
            requires_image: false,
            code_prefix: None,
        },
    }
}

/// Lookup table from platform id to spec
#[derive(Debug, Clone)]
pub struct SpecTable {
    specs: HashMap<PlatformId, PlatformSpec>,
}

impl SpecTable {
    pub fn builtin() -> Self {
        let specs = PlatformId::ALL
            .into_iter()
            .map(|id| (id, builtin_spec(id)))
            .collect();
        Self { specs }
    }

    /// Built-in table with whole-spec replacements applied
    pub fn with_overrides(overrides: HashMap<PlatformId, PlatformSpec>) -> Result<Self> {
        let mut table = Self::builtin();
        for (id, spec) in overrides {
            spec.validate(id)?;
            tracing::debug!(platform = %id, "Applying platform spec override");
            table.specs.insert(id, spec);
        }
        table.check_complete()?;
        Ok(table)
    }

    fn check_complete(&self) -> Result<()> {
        for id in PlatformId::ALL {
            if !self.specs.contains_key(&id) {
                return Err(ConfigError::InvalidSpec(format!("no spec for platform '{}'", id)).into());
            }
        }
        Ok(())
    }

    /// Spec for a platform
    ///
    /// # Panics
    ///
    /// Never in practice: construction guarantees every [`PlatformId`] has a
    /// spec, so a miss here is a programming error.
    pub fn get(&self, id: PlatformId) -> &PlatformSpec {
        &self.specs[&id]
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlatformId, &PlatformSpec)> {
        PlatformId::ALL.into_iter().map(move |id| (id, self.get(id)))
    }
}

impl Default for SpecTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_platform() {
        let table = SpecTable::builtin();
        for id in PlatformId::ALL {
            let spec = table.get(id);
            assert!(!spec.display_name.is_empty());
            assert!(spec.validate(id).is_ok(), "{} builtin spec invalid", id);
        }
    }

    #[test]
    fn test_tiers_partition_platforms() {
        let table = SpecTable::builtin();
        let silent: Vec<_> = table
            .iter()
            .filter(|(_, s)| s.tier.is_silent())
            .map(|(id, _)| id)
            .collect();
        assert_eq!(
            silent,
            vec![PlatformId::Twitter, PlatformId::Bluesky, PlatformId::Instagram]
        );
        for id in [
            PlatformId::Fetlife,
            PlatformId::Snapchat,
            PlatformId::Onlyfans,
            PlatformId::Fansly,
        ] {
            assert!(table.get(id).composer().is_some(), "{} should be confirm-click", id);
        }
    }

    #[test]
    fn test_known_limits() {
        let table = SpecTable::builtin();
        let twitter = table.get(PlatformId::Twitter);
        assert_eq!(twitter.max_text_length, Some(280));
        assert_eq!(twitter.max_file_size, 5 * MB);

        let bluesky = table.get(PlatformId::Bluesky);
        assert_eq!(bluesky.max_dimensions, (2000, 2000));
        assert_eq!(bluesky.max_file_size, MB);
        assert!(bluesky.requires_facets);
        assert!(!bluesky.allows(ImageFormatKind::Gif));

        assert!(table.get(PlatformId::Instagram).requires_image);
        assert_eq!(table.get(PlatformId::Onlyfans).max_account_count, 1);
        assert_eq!(
            table.get(PlatformId::Onlyfans).confirmation_delay,
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_fetlife_success_pattern_matches_status_url() {
        let table = SpecTable::builtin();
        let composer = table.get(PlatformId::Fetlife).composer().unwrap();
        let pattern = regex::Regex::new(composer.success_url_pattern.as_deref().unwrap()).unwrap();
        assert!(pattern.is_match("https://fetlife.com/users/123/statuses/456"));
        assert!(!pattern.is_match("https://fetlife.com/statuses/new"));
    }

    #[test]
    fn test_platform_id_parse() {
        assert_eq!("Bluesky".parse::<PlatformId>().unwrap(), PlatformId::Bluesky);
        assert_eq!("onlyfans".parse::<PlatformId>().unwrap(), PlatformId::Onlyfans);
        assert!("myspace".parse::<PlatformId>().is_err());
    }

    #[test]
    fn test_override_replaces_spec() {
        let mut custom = builtin_spec(PlatformId::Bluesky);
        custom.max_text_length = Some(500);

        let mut overrides = HashMap::new();
        overrides.insert(PlatformId::Bluesky, custom);

        let table = SpecTable::with_overrides(overrides).unwrap();
        assert_eq!(table.get(PlatformId::Bluesky).max_text_length, Some(500));
        assert_eq!(table.get(PlatformId::Twitter).max_text_length, Some(280));
    }

    #[test]
    fn test_override_rejects_invalid_spec() {
        let mut broken = builtin_spec(PlatformId::Twitter);
        broken.allowed_formats.clear();

        let mut overrides = HashMap::new();
        overrides.insert(PlatformId::Twitter, broken);

        let err = SpecTable::with_overrides(overrides).unwrap_err();
        assert!(err.to_string().contains("allowed_formats"));
    }

    #[test]
    fn test_override_rejects_bad_success_pattern() {
        let mut broken = builtin_spec(PlatformId::Fetlife);
        broken.tier = confirm_click("https://fetlife.com/statuses/new", "textarea", Some("(["));

        let mut overrides = HashMap::new();
        overrides.insert(PlatformId::Fetlife, broken);

        assert!(SpecTable::with_overrides(overrides).is_err());
    }

    #[test]
    fn test_override_rejects_non_http_composer() {
        let mut broken = builtin_spec(PlatformId::Fansly);
        broken.tier = confirm_click("file:///etc/passwd", "textarea", None);

        let mut overrides = HashMap::new();
        overrides.insert(PlatformId::Fansly, broken);

        let err = SpecTable::with_overrides(overrides).unwrap_err();
        assert!(err.to_string().contains("composer_url"));
    }

    #[test]
    fn test_override_rejects_permalink_without_success_selector() {
        let mut broken = builtin_spec(PlatformId::Fetlife);
        if let Tier::ConfirmClick(composer) = &mut broken.tier {
            composer.permalink_selector = Some("a.status-link".to_string());
        }

        let mut overrides = HashMap::new();
        overrides.insert(PlatformId::Fetlife, broken);

        let err = SpecTable::with_overrides(overrides).unwrap_err();
        assert!(err.to_string().contains("permalink_selector"));
    }

    #[test]
    fn test_composer_selectors_default_to_none() {
        let composer: ComposerSpec = toml::from_str(
            r#"
composer_url = "https://fetlife.com/statuses/new"
text_selector = "textarea"
success_selector = ".flash-notice"
"#,
        )
        .unwrap();
        assert_eq!(composer.success_selector.as_deref(), Some(".flash-notice"));
        assert_eq!(composer.permalink_selector, None);
        assert_eq!(composer.success_url_pattern, None);
    }

    #[test]
    fn test_spec_toml_round_trip() {
        let spec = builtin_spec(PlatformId::Snapchat);
        let encoded = toml::to_string(&spec).unwrap();
        assert!(encoded.contains("confirmation_delay = 500"));
        let decoded: PlatformSpec = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded, spec);
    }
}
