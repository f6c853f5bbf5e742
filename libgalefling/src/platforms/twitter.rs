//! Twitter/X platform implementation
//!
//! Uses the v2 API with OAuth 1.0a user-context signing (HMAC-SHA1 over the
//! app's consumer key pair and the account's access token pair). Media goes
//! through `/2/media/upload`, the post through `/2/tweets`. Only URL query
//! parameters enter the signature; JSON and multipart bodies do not.

use async_trait::async_trait;
use oauth1_request as oauth;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::json;

use super::http::{read_json, transport_error, Phase};
use super::SilentClient;
use crate::credentials::Credentials;
use crate::error::{ErrorCode, PlatformError};
use crate::imaging::ProcessedImage;
use crate::specs::PlatformSpec;
use crate::types::AccountConfig;

const DEFAULT_API: &str = "https://api.x.com";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Media {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
}

pub fn permalink(username: &str, tweet_id: &str) -> String {
    format!("https://x.com/{}/status/{}", username, tweet_id)
}

pub struct TwitterClient {
    account: AccountConfig,
    spec: PlatformSpec,
    http: reqwest::Client,
    api_url: String,
    token: oauth::Token<String, String>,
    username: Option<String>,
}

impl TwitterClient {
    /// Credential keys: `api_key`, `api_secret`, `access_token`,
    /// `access_token_secret`, optional `api_url`
    pub fn new(
        account: AccountConfig,
        spec: PlatformSpec,
        credentials: &Credentials,
        http: reqwest::Client,
    ) -> Result<Self, PlatformError> {
        let token = oauth::Token::from_parts(
            credentials.require("api_key")?.to_string(),
            credentials.require("api_secret")?.to_string(),
            credentials.require("access_token")?.to_string(),
            credentials.require("access_token_secret")?.to_string(),
        );
        let api_url = credentials
            .get("api_url")
            .unwrap_or(DEFAULT_API)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            account,
            spec,
            http,
            api_url,
            token,
            username: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/2/{}", self.api_url, path)
    }

    /// `OAuth ...` header value for a request without query parameters
    fn authorization(&self, method: &str, url: &str) -> String {
        match method {
            "GET" => oauth::get(url, &(), &self.token, oauth::HMAC_SHA1),
            _ => oauth::post(url, &(), &self.token, oauth::HMAC_SHA1),
        }
    }

    fn signed_get(&self, url: &str) -> RequestBuilder {
        self.http
            .get(url)
            .header(AUTHORIZATION, self.authorization("GET", url))
    }

    fn signed_post(&self, url: &str) -> RequestBuilder {
        self.http
            .post(url)
            .header(AUTHORIZATION, self.authorization("POST", url))
    }

    async fn upload_media(&self, image: &ProcessedImage) -> Result<String, PlatformError> {
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name())
            .mime_str(image.format.mime_type())
            .map_err(|e| PlatformError::new(ErrorCode::ImgUploadFailed, e.to_string()))?;
        let form = Form::new()
            .part("media", part)
            .text("media_category", "tweet_image");

        let response = self
            .signed_post(&self.endpoint("media/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(e, "Twitter media upload"))?;

        let media: Envelope<Media> = read_json(response, Phase::Upload, "Twitter media upload").await?;
        tracing::debug!(media_id = %media.data.id, "Twitter media uploaded");
        Ok(media.data.id)
    }
}

#[async_trait]
impl SilentClient for TwitterClient {
    fn account(&self) -> &AccountConfig {
        &self.account
    }

    fn spec(&self) -> &PlatformSpec {
        &self.spec
    }

    fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    async fn authenticate(&mut self) -> Result<(), PlatformError> {
        let response = self
            .signed_get(&self.endpoint("users/me"))
            .send()
            .await
            .map_err(|e| transport_error(e, "Twitter authentication"))?;

        let me: Envelope<User> =
            read_json(response, Phase::Authenticate, "Twitter authentication").await?;
        tracing::info!(account = %self.account.account_id, username = %me.data.username, "Twitter authenticated");
        self.username = Some(me.data.username);
        Ok(())
    }

    async fn publish(
        &mut self,
        text: &str,
        image: Option<&ProcessedImage>,
    ) -> Result<Option<String>, PlatformError> {
        let mut body = json!({ "text": text });
        if let Some(image) = image {
            let media_id = self.upload_media(image).await?;
            body["media"] = json!({ "media_ids": [media_id] });
        }

        let response = self
            .signed_post(&self.endpoint("tweets"))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, "Twitter post"))?;

        let tweet: Envelope<Tweet> = read_json(response, Phase::Publish, "Twitter post").await?;
        Ok(self
            .username
            .as_deref()
            .map(|username| permalink(username, &tweet.data.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{adapt, SourceImage};
    use crate::platforms::test_server::StubServer;
    use crate::specs::{PlatformId, SpecTable};
    use std::collections::HashMap;
    use std::time::Duration;

    const ME: &str = r#"{"data":{"id":"1","name":"Rin","username":"rin"}}"#;

    fn credentials(api_url: &str) -> HashMap<String, String> {
        HashMap::from([
            ("api_key".to_string(), "consumer-key".to_string()),
            ("api_secret".to_string(), "consumer-secret".to_string()),
            ("access_token".to_string(), "1-access-token".to_string()),
            ("access_token_secret".to_string(), "access-secret".to_string()),
            ("api_url".to_string(), api_url.to_string()),
        ])
    }

    fn build(values: HashMap<String, String>) -> Result<TwitterClient, PlatformError> {
        let table = SpecTable::builtin();
        TwitterClient::new(
            AccountConfig::new(PlatformId::Twitter, "twitter_1", "main"),
            table.get(PlatformId::Twitter).clone(),
            &Credentials::new("twitter_1", values),
            super::super::http::build_client(Duration::from_secs(5)).unwrap(),
        )
    }

    fn client(api_url: &str) -> TwitterClient {
        build(credentials(api_url)).unwrap()
    }

    fn small_png() -> ProcessedImage {
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]))
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        let source = SourceImage::from_bytes(bytes.into_inner()).unwrap();
        adapt(&source, SpecTable::builtin().get(PlatformId::Twitter)).unwrap()
    }

    #[test]
    fn test_permalink() {
        assert_eq!(
            permalink("galefling", "1790000000000000000"),
            "https://x.com/galefling/status/1790000000000000000"
        );
    }

    #[test]
    fn test_envelope_parsing() {
        let tweet: Envelope<Tweet> =
            serde_json::from_str(r#"{"data":{"id":"123","text":"hi","edit_history_tweet_ids":["123"]}}"#)
                .unwrap();
        assert_eq!(tweet.data.id, "123");

        let user: Envelope<User> = serde_json::from_str(ME).unwrap();
        assert_eq!(user.data.username, "rin");
    }

    #[test]
    fn test_endpoint_honours_api_override() {
        let client = client("http://localhost:9000/");
        assert_eq!(client.endpoint("tweets"), "http://localhost:9000/2/tweets");
    }

    #[test]
    fn test_missing_api_secret_is_auth_invalid() {
        let mut values = credentials("http://127.0.0.1:1");
        values.remove("api_secret");
        let err = build(values).err().unwrap();
        assert_eq!(err.code(), ErrorCode::AuthInvalid);
        assert!(err.detail().contains("api_secret"));
    }

    #[test]
    fn test_bearer_only_credentials_are_rejected() {
        let values = HashMap::from([("access_token".to_string(), "bearer".to_string())]);
        let err = build(values).err().unwrap();
        assert_eq!(err.code(), ErrorCode::AuthInvalid);
    }

    #[test]
    fn test_authorization_header_is_hmac_sha1_signed() {
        let client = client("https://api.x.com");
        let header = client.authorization("POST", "https://api.x.com/2/tweets");

        assert!(header.starts_with("OAuth "), "{}", header);
        assert!(header.contains(r#"oauth_consumer_key="consumer-key""#));
        assert!(header.contains(r#"oauth_token="1-access-token""#));
        assert!(header.contains(r#"oauth_signature_method="HMAC-SHA1""#));
        assert!(header.contains("oauth_signature="));
        assert!(header.contains("oauth_nonce="));
        assert!(header.contains("oauth_timestamp="));
        assert!(!header.contains("consumer-secret"));
        assert!(!header.contains("access-secret"));
    }

    #[tokio::test]
    async fn test_empty_text_never_reaches_network() {
        let mut client = client("http://127.0.0.1:1");
        let result = client.post("", None).await;
        assert_eq!(result.error_code, Some(ErrorCode::PostEmpty));
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_network_failure() {
        let mut client = client("http://127.0.0.1:1");
        let err = client.test_connection().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NetConnection);
    }

    #[tokio::test]
    async fn test_post_with_image_returns_permalink() {
        let server = StubServer::start(&[
            ("GET /2/users/me", 200, ME),
            ("POST /2/media/upload", 200, r#"{"data":{"id":"710511363345354753"}}"#),
            ("POST /2/tweets", 201, r#"{"data":{"id":"1790000000000000000","text":"hi"}}"#),
        ])
        .await;
        let mut client = client(server.url());

        let result = client.post("New set is up", Some(&small_png())).await;
        assert!(result.success, "{:?}", result.error_detail);
        assert_eq!(
            result.post_url.as_deref(),
            Some("https://x.com/rin/status/1790000000000000000")
        );

        let me = server.request_to("/2/users/me").unwrap();
        assert_eq!(me.method, "GET");
        let auth = me.header("authorization").unwrap();
        assert!(auth.starts_with("OAuth "));
        assert!(auth.contains(r#"oauth_consumer_key="consumer-key""#));

        let upload = server.request_to("/2/media/upload").unwrap();
        assert!(upload.header("content-type").unwrap().starts_with("multipart/form-data"));
        assert!(upload.body_text().contains("tweet_image"));
        assert!(upload.header("authorization").unwrap().contains("oauth_signature="));

        let tweet = server.request_to("/2/tweets").unwrap();
        let body: serde_json::Value = serde_json::from_slice(&tweet.body).unwrap();
        assert_eq!(body["text"], "New set is up");
        assert_eq!(body["media"]["media_ids"][0], "710511363345354753");
    }

    #[tokio::test]
    async fn test_rate_limit_is_qualified() {
        let server = StubServer::start(&[
            ("GET /2/users/me", 200, ME),
            ("POST /2/tweets", 429, r#"{"title":"Too Many Requests","status":429}"#),
        ])
        .await;
        let mut client = client(server.url());

        let result = client.post("hello", None).await;
        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::RateLimit));
        assert_eq!(result.qualified_code.as_deref(), Some("TW-RATE-LIMIT"));
    }

    #[tokio::test]
    async fn test_duplicate_status_is_post_duplicate() {
        let server = StubServer::start(&[
            ("GET /2/users/me", 200, ME),
            (
                "POST /2/tweets",
                403,
                r#"{"detail":"You are not allowed to create a Tweet with duplicate content.","status":403}"#,
            ),
        ])
        .await;
        let mut client = client(server.url());

        let result = client.post("hello", None).await;
        assert_eq!(result.error_code, Some(ErrorCode::PostDuplicate));
        assert_eq!(result.qualified_code.as_deref(), Some("POST-DUPLICATE"));
    }

    #[tokio::test]
    async fn test_rejected_signature_is_auth_invalid() {
        let server = StubServer::start(&[(
            "GET /2/users/me",
            401,
            r#"{"title":"Unauthorized","status":401}"#,
        )])
        .await;
        let mut client = client(server.url());

        let result = client.post("hello", None).await;
        assert_eq!(result.qualified_code.as_deref(), Some("TW-AUTH-INVALID"));
        assert!(server.request_to("/2/tweets").is_none());
    }
}
