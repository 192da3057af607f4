//! Client-credentials token exchange.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;

use super::endpoints::CloudEndpoints;
use super::error::AzureError;

const REFRESH_MARGIN: Duration = Duration::from_secs(300);
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);
const MAX_LIFETIME: Duration = Duration::from_secs(86_400);

/// Service principal credentials.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    /// Directory (tenant) id.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Bearer token with its expiry.
#[derive(Clone)]
pub(crate) struct AccessToken {
    pub(crate) value: String,
    expires_at: Instant,
}

impl AccessToken {
    pub(crate) fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    // Some token services send this as a string.
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

fn lifetime(expires_in: Option<&Value>) -> Duration {
    expires_in
        .and_then(|value| match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        })
        .map_or(DEFAULT_LIFETIME, |secs| Duration::from_secs(secs).min(MAX_LIFETIME))
}

/// Exchanges `credentials` for a Resource Manager token.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    endpoints: &CloudEndpoints,
    credentials: &Credentials,
) -> Result<AccessToken, AzureError> {
    let url = endpoints.token_url(&credentials.tenant_id);
    tracing::debug!(%url, "requesting access token");
    let response = http
        .post(&url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("resource", endpoints.audience.as_str()),
        ])
        .send()
        .await
        .map_err(|err| AzureError::Authentication {
            status: None,
            message: err.to_string(),
        })?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let detail: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        let message = if detail.error.is_empty() {
            format!("token endpoint returned status {}", status.as_u16())
        } else {
            format!("{}: {}", detail.error, detail.error_description.trim())
        };
        return Err(AzureError::Authentication {
            status: Some(status.as_u16()),
            message,
        });
    }

    let token: TokenResponse =
        serde_json::from_str(&body).map_err(|err| AzureError::Authentication {
            status: Some(status.as_u16()),
            message: format!("malformed token response: {err}"),
        })?;
    Ok(AccessToken {
        value: token.access_token,
        expires_at: Instant::now() + lifetime(token.expires_in.as_ref()),
    })
}
