//! HTTP plumbing shared by the silent backends
//!
//! Builds the `reqwest` client and turns transport failures and HTTP status
//! codes into stable [`ErrorCode`]s. Backends add their own body-pattern
//! checks on top (duplicate detection, expired-token markers).

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::error::Error as StdError;
use std::time::Duration;

use crate::error::{ErrorCode, PlatformError};

pub const USER_AGENT: &str = concat!("GaleFling/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt kept in an error detail, in chars
pub const MAX_DETAIL_CHARS: usize = 300;

pub fn build_client(timeout: Duration) -> Result<Client, PlatformError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| {
            PlatformError::new(
                ErrorCode::NetSsl,
                format!("failed to initialise HTTP client: {}", e),
            )
        })
}

/// Which leg of a post an HTTP exchange belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Authenticate,
    Upload,
    Publish,
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ").to_lowercase()
}

/// Maps a transport-level failure to a `NET-*` code
pub fn transport_error(err: reqwest::Error, context: &str) -> PlatformError {
    let chain = error_chain(&err);
    let code = if err.is_timeout() || chain.contains("timed out") {
        ErrorCode::NetTimeout
    } else if chain.contains("dns error")
        || chain.contains("failed to lookup address")
        || chain.contains("name or service not known")
        || chain.contains("no such host")
    {
        ErrorCode::NetDns
    } else if chain.contains("certificate")
        || chain.contains("tls")
        || chain.contains("ssl")
        || chain.contains("handshake")
    {
        ErrorCode::NetSsl
    } else {
        ErrorCode::NetConnection
    };
    PlatformError::new(code, format!("{} failed: {}", context, chain))
}

/// Status-code classification common to every backend
///
/// `body` is the raw response text, already lower-cased by the caller or not;
/// matching is case-insensitive.
pub fn status_error(status: StatusCode, body: &str, phase: Phase) -> PlatformError {
    let lowered = body.to_lowercase();
    let code = match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimit,
        StatusCode::UNAUTHORIZED if lowered.contains("expired") => ErrorCode::AuthExpired,
        StatusCode::UNAUTHORIZED => ErrorCode::AuthInvalid,
        StatusCode::FORBIDDEN if lowered.contains("duplicate") => ErrorCode::PostDuplicate,
        StatusCode::FORBIDDEN if phase == Phase::Authenticate => ErrorCode::AuthInvalid,
        StatusCode::FORBIDDEN if lowered.contains("token") => ErrorCode::AuthExpired,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorCode::NetTimeout,
        StatusCode::PAYLOAD_TOO_LARGE => ErrorCode::ImgTooLarge,
        _ if lowered.contains("duplicate") => ErrorCode::PostDuplicate,
        _ if phase == Phase::Upload => ErrorCode::ImgUploadFailed,
        _ if phase == Phase::Authenticate && status.is_client_error() => ErrorCode::AuthInvalid,
        _ => ErrorCode::PostFailed,
    };
    PlatformError::new(code, format!("HTTP {}: {}", status.as_u16(), truncate(body, MAX_DETAIL_CHARS)))
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Decodes a successful JSON response or classifies the failure
pub async fn read_json<T: DeserializeOwned>(
    response: Response,
    phase: Phase,
    context: &str,
) -> Result<T, PlatformError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(e, context))?;

    if !status.is_success() {
        tracing::debug!(%status, context, "Backend returned error status");
        return Err(status_error(status, &body, phase));
    }

    serde_json::from_str(&body).map_err(|e| {
        let code = match phase {
            Phase::Upload => ErrorCode::ImgUploadFailed,
            Phase::Authenticate => ErrorCode::AuthInvalid,
            Phase::Publish => ErrorCode::PostFailed,
        };
        PlatformError::new(code, format!("{}: unexpected response body: {}", context, e))
    })
}
