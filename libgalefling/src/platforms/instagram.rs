//! Instagram platform implementation
//!
//! Graph API content publishing needs a public image URL, so the processed
//! image is first staged as an unpublished photo on the linked Facebook
//! Page. Its CDN URL then feeds the two-step container/publish flow.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::http::{read_json, transport_error, Phase};
use super::SilentClient;
use crate::credentials::Credentials;
use crate::error::{ErrorCode, PlatformError};
use crate::imaging::ProcessedImage;
use crate::specs::PlatformSpec;
use crate::types::AccountConfig;

const DEFAULT_GRAPH: &str = "https://graph.facebook.com/v21.0";

#[derive(Debug, Deserialize)]
struct IgUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PhotoImages {
    images: Vec<PhotoVariant>,
}

#[derive(Debug, Deserialize)]
struct PhotoVariant {
    source: String,
    #[serde(default)]
    width: u32,
}

#[derive(Debug, Deserialize)]
struct Permalink {
    permalink: Option<String>,
}

/// Widest rendition of a staged photo
fn largest_source(photo: PhotoImages) -> Option<String> {
    photo
        .images
        .into_iter()
        .max_by_key(|variant| variant.width)
        .map(|variant| variant.source)
}

pub struct InstagramClient {
    account: AccountConfig,
    spec: PlatformSpec,
    http: reqwest::Client,
    graph_url: String,
    access_token: String,
    ig_user_id: String,
    page_id: String,
    username: Option<String>,
}

impl InstagramClient {
    /// Credential keys: `access_token`, `ig_user_id`, `page_id`, optional
    /// `graph_url`
    pub fn new(
        account: AccountConfig,
        spec: PlatformSpec,
        credentials: &Credentials,
        http: reqwest::Client,
    ) -> Result<Self, PlatformError> {
        let access_token = credentials.require("access_token")?.to_string();
        let ig_user_id = credentials.require("ig_user_id")?.to_string();
        let page_id = credentials.require("page_id")?.to_string();
        let graph_url = credentials
            .get("graph_url")
            .unwrap_or(DEFAULT_GRAPH)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            account,
            spec,
            http,
            graph_url,
            access_token,
            ig_user_id,
            page_id,
            username: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.graph_url, path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        phase: Phase,
        context: &str,
    ) -> Result<T, PlatformError> {
        let response = self
            .http
            .get(self.endpoint(path))
            .query(query)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(e, context))?;
        read_json(response, phase, context).await
    }

    /// Stages the image on the Page and returns its public URL
    async fn stage_image(&self, image: &ProcessedImage) -> Result<String, PlatformError> {
        let context = "Instagram image staging";
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name())
            .mime_str(image.format.mime_type())
            .map_err(|e| PlatformError::new(ErrorCode::ImgUploadFailed, e.to_string()))?;
        let form = Form::new()
            .part("source", part)
            .text("published", "false")
            .text("access_token", self.access_token.clone());

        let response = self
            .http
            .post(self.endpoint(&format!("{}/photos", self.page_id)))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(e, context))?;
        let photo: Created = read_json(response, Phase::Upload, context).await?;

        let images: PhotoImages = self
            .get_json(&photo.id, &[("fields", "images")], Phase::Upload, context)
            .await?;
        largest_source(images).ok_or_else(|| {
            PlatformError::new(ErrorCode::ImgUploadFailed, "staged photo has no image URL")
        })
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, &str)],
        phase: Phase,
        context: &str,
    ) -> Result<Created, PlatformError> {
        let response = self
            .http
            .post(self.endpoint(path))
            .form(params)
            .send()
            .await
            .map_err(|e| transport_error(e, context))?;
        read_json(response, phase, context).await
    }
}

#[async_trait]
impl SilentClient for InstagramClient {
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
        let user: IgUser = self
            .get_json(
                &self.ig_user_id,
                &[("fields", "username")],
                Phase::Authenticate,
                "Instagram authentication",
            )
            .await?;
        tracing::info!(account = %self.account.account_id, username = %user.username, "Instagram authenticated");
        self.username = Some(user.username);
        Ok(())
    }

    async fn publish(
        &mut self,
        text: &str,
        image: Option<&ProcessedImage>,
    ) -> Result<Option<String>, PlatformError> {
        let image = image.ok_or_else(|| {
            PlatformError::new(ErrorCode::PostFailed, "Instagram requires an image")
        })?;
        let image_url = self.stage_image(image).await?;

        let container = self
            .post_form(
                &format!("{}/media", self.ig_user_id),
                &[
                    ("image_url", image_url.as_str()),
                    ("caption", text),
                    ("access_token", self.access_token.as_str()),
                ],
                Phase::Publish,
                "Instagram media container",
            )
            .await?;

        let media = self
            .post_form(
                &format!("{}/media_publish", self.ig_user_id),
                &[
                    ("creation_id", container.id.as_str()),
                    ("access_token", self.access_token.as_str()),
                ],
                Phase::Publish,
                "Instagram publish",
            )
            .await?;

        // The post exists at this point; a failed lookup only costs the link
        match self
            .get_json::<Permalink>(&media.id, &[("fields", "permalink")], Phase::Publish, "Instagram permalink")
            .await
        {
            Ok(found) => Ok(found.permalink),
            Err(e) => {
                tracing::warn!(media_id = %media.id, "Could not fetch permalink: {}", e);
                Ok(None)
            }
        }
    }
}
