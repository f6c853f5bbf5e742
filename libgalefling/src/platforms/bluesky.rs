//! Bluesky platform implementation
//!
//! Talks XRPC directly: `createSession` with handle and app password,
//! `uploadBlob` for the image, then `createRecord` of an
//! `app.bsky.feed.post`. Links in the text are annotated with facets so they
//! render as links.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::LazyLock;

use super::http::{read_json, status_error, transport_error, truncate, Phase, MAX_DETAIL_CHARS};
use super::SilentClient;
use crate::credentials::Credentials;
use crate::error::{ErrorCode, PlatformError};
use crate::imaging::ProcessedImage;
use crate::specs::PlatformSpec;
use crate::types::AccountConfig;

const DEFAULT_PDS: &str = "https://bsky.social";
const POST_COLLECTION: &str = "app.bsky.feed.post";

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:[a-zA-Z0-9]|[$\-_@.&+]|[!*(),]|/|%[0-9a-fA-F]{2})+")
        .expect("Invalid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSlice {
    #[serde(rename = "byteStart")]
    pub byte_start: usize,
    #[serde(rename = "byteEnd")]
    pub byte_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFeature {
    #[serde(rename = "$type")]
    pub kind: String,
    pub uri: String,
}

/// Rich-text annotation over a byte range of the post text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<LinkFeature>,
}

/// Finds every HTTP(S) URL in `text` and returns one link facet per match
///
/// Offsets are UTF-8 byte offsets into `text` exactly as transmitted, so
/// `&text.as_bytes()[start..end]` is the URL even when multi-byte characters
/// precede it.
pub fn detect_link_facets(text: &str) -> Vec<Facet> {
    URL_RE
        .find_iter(text)
        .map(|m| Facet {
            // regex offsets on &str are byte offsets
            index: ByteSlice {
                byte_start: m.start(),
                byte_end: m.end(),
            },
            features: vec![LinkFeature {
                kind: "app.bsky.richtext.facet#link".to_string(),
                uri: m.as_str().to_string(),
            }],
        })
        .collect()
}

/// Map an XRPC failure to a stable error code
///
/// XRPC bodies carry an `error` name (`ExpiredToken`, `RateLimitExceeded`,
/// ...) that is more precise than the status code, so it is checked first.
fn map_bluesky_error(status: reqwest::StatusCode, body: &str, phase: Phase) -> PlatformError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, MAX_DETAIL_CHARS));
    if body.contains("ExpiredToken") {
        return PlatformError::new(ErrorCode::AuthExpired, detail);
    }
    if body.contains("RateLimitExceeded") {
        return PlatformError::new(ErrorCode::RateLimit, detail);
    }
    if body.contains("AccountTakedown")
        || (phase == Phase::Authenticate && body.contains("AuthenticationRequired"))
    {
        return PlatformError::new(ErrorCode::AuthInvalid, detail);
    }
    if body.contains("InvalidToken") || body.contains("AuthenticationRequired") {
        return PlatformError::new(ErrorCode::AuthExpired, detail);
    }
    if phase == Phase::Upload && body.contains("BlobTooLarge") {
        return PlatformError::new(ErrorCode::ImgTooLarge, detail);
    }
    status_error(status, body, phase)
}

async fn xrpc<T: for<'de> Deserialize<'de>>(
    request: reqwest::RequestBuilder,
    phase: Phase,
    context: &str,
) -> Result<T, PlatformError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(e, context))?;

    let status = response.status();
    if status.is_success() {
        return read_json(response, phase, context).await;
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, context, "Bluesky XRPC error");
    Err(map_bluesky_error(status, &body, phase))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    handle: String,
    did: String,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    blob: Value,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    uri: String,
}

/// `https://bsky.app/profile/{handle}/post/{rkey}` from an `at://` record URI
pub fn permalink(handle: &str, at_uri: &str) -> Option<String> {
    let rkey = at_uri.rsplit('/').next().filter(|k| !k.is_empty())?;
    if !at_uri.starts_with("at://") {
        return None;
    }
    Some(format!("https://bsky.app/profile/{}/post/{}", handle, rkey))
}

pub struct BlueskyClient {
    account: AccountConfig,
    spec: PlatformSpec,
    http: reqwest::Client,
    pds_url: String,
    identifier: String,
    app_password: String,
    session: Option<Session>,
}

impl BlueskyClient {
    /// Credential keys: `identifier`, `app_password`, optional `pds_url`
    pub fn new(
        account: AccountConfig,
        spec: PlatformSpec,
        credentials: &Credentials,
        http: reqwest::Client,
    ) -> Result<Self, PlatformError> {
        let identifier = credentials.require("identifier")?.to_string();
        let app_password = credentials.require("app_password")?.to_string();
        let pds_url = credentials
            .get("pds_url")
            .unwrap_or(DEFAULT_PDS)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            account,
            spec,
            http,
            pds_url,
            identifier,
            app_password,
            session: None,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.pds_url, method)
    }

    fn session(&self) -> Result<&Session, PlatformError> {
        self.session
            .as_ref()
            .ok_or_else(|| PlatformError::new(ErrorCode::AuthExpired, "no active session"))
    }

    async fn upload_blob(&self, image: &ProcessedImage) -> Result<Value, PlatformError> {
        let session = self.session()?;
        let request = self
            .http
            .post(self.endpoint("com.atproto.repo.uploadBlob"))
            .bearer_auth(&session.access_jwt)
            .header(CONTENT_TYPE, image.format.mime_type())
            .body(image.bytes().to_vec());

        let uploaded: BlobResponse = xrpc(request, Phase::Upload, "Bluesky image upload").await?;
        Ok(uploaded.blob)
    }
}

#[async_trait]
impl SilentClient for BlueskyClient {
    fn account(&self) -> &AccountConfig {
        &self.account
    }

    fn spec(&self) -> &PlatformSpec {
        &self.spec
    }

    fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    async fn authenticate(&mut self) -> Result<(), PlatformError> {
        let request = self
            .http
            .post(self.endpoint("com.atproto.server.createSession"))
            .json(&json!({
                "identifier": self.identifier,
                "password": self.app_password,
            }));

        let session: Session =
            xrpc(request, Phase::Authenticate, "Bluesky authentication").await?;
        tracing::info!(account = %self.account.account_id, handle = %session.handle, "Bluesky authenticated");
        self.session = Some(session);
        Ok(())
    }

    async fn publish(
        &mut self,
        text: &str,
        image: Option<&ProcessedImage>,
    ) -> Result<Option<String>, PlatformError> {
        let mut record = json!({
            "$type": POST_COLLECTION,
            "text": text,
            "createdAt": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        });

        let facets = detect_link_facets(text);
        if !facets.is_empty() {
            tracing::debug!(count = facets.len(), "Attaching link facets");
            record["facets"] = serde_json::to_value(&facets)
                .map_err(|e| PlatformError::new(ErrorCode::PostFailed, e.to_string()))?;
        }

        if let Some(image) = image {
            let blob = self.upload_blob(image).await?;
            record["embed"] = json!({
                "$type": "app.bsky.embed.images",
                "images": [{ "alt": "", "image": blob }],
            });
        }

        let session = self.session()?;
        let request = self
            .http
            .post(self.endpoint("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "record": record,
            }));

        let created: RecordResponse = xrpc(request, Phase::Publish, "Bluesky post").await?;
        Ok(permalink(&session.handle, &created.uri))
    }
}
