//! Resource Manager and login endpoints for public and hybrid clouds.

use serde::Deserialize;

use super::error::AzureError;

/// Resource Manager endpoint of the public cloud.
pub const PUBLIC_RESOURCE_MANAGER: &str = "https://management.azure.com";
/// Login endpoint of the public cloud.
pub const PUBLIC_LOGIN: &str = "https://login.microsoftonline.com";
/// Token audience of the public cloud.
pub const PUBLIC_AUDIENCE: &str = "https://management.core.windows.net/";

const METADATA_API_VERSION: &str = "1.0";

/// Endpoints used to authenticate and reach Resource Manager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudEndpoints {
    /// Resource Manager base URL, without a trailing slash.
    pub resource_manager: String,
    /// Login base URL, without a trailing slash.
    pub login: String,
    /// Resource tokens are requested for.
    pub audience: String,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    authentication: AuthenticationMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticationMetadata {
    login_endpoint: String,
    #[serde(default)]
    audiences: Vec<String>,
}

impl CloudEndpoints {
    /// Fixed endpoints of the public cloud.
    #[must_use]
    pub fn public() -> Self {
        Self {
            resource_manager: PUBLIC_RESOURCE_MANAGER.to_owned(),
            login: PUBLIC_LOGIN.to_owned(),
            audience: PUBLIC_AUDIENCE.to_owned(),
        }
    }

    /// Builds endpoints from a metadata document served by `resource_manager`.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Discovery`] when the document lacks a login
    /// endpoint or token audience.
    pub fn from_metadata(resource_manager: &str, body: &str) -> Result<Self, AzureError> {
        let discovery_error = |message: String| AzureError::Discovery {
            endpoint: resource_manager.to_owned(),
            message,
        };
        let metadata: Metadata =
            serde_json::from_str(body).map_err(|err| discovery_error(err.to_string()))?;
        let login = metadata.authentication.login_endpoint.trim();
        if login.is_empty() {
            return Err(discovery_error(String::from("loginEndpoint is empty")));
        }
        let audience = metadata
            .authentication
            .audiences
            .into_iter()
            .find(|audience| !audience.trim().is_empty())
            .ok_or_else(|| discovery_error(String::from("no token audience advertised")))?;

        Ok(Self {
            resource_manager: resource_manager.trim().trim_end_matches('/').to_owned(),
            login: login.trim_end_matches('/').to_owned(),
            audience,
        })
    }

    /// Fetches `{resource_manager}/metadata/endpoints` and parses it.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Discovery`] when the request fails or the
    /// document is malformed.
    pub async fn discover(
        http: &reqwest::Client,
        resource_manager: &str,
    ) -> Result<Self, AzureError> {
        let base = resource_manager.trim().trim_end_matches('/');
        let url = format!("{base}/metadata/endpoints?api-version={METADATA_API_VERSION}");
        tracing::debug!(%url, "discovering cloud endpoints");
        let discovery_error = |message: String| AzureError::Discovery {
            endpoint: base.to_owned(),
            message,
        };

        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|err| discovery_error(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| discovery_error(err.to_string()))?;
        if !status.is_success() {
            return Err(discovery_error(format!("status {}", status.as_u16())));
        }
        Self::from_metadata(base, &body)
    }

    /// Token endpoint for `tenant`.
    #[must_use]
    pub fn token_url(&self, tenant: &str) -> String {
        format!("{}/{}/oauth2/token", self.login, tenant.trim())
    }
}
