//! Azure Resource Manager implementation of [`ProviderClient`].
//!
//! Requests are authenticated with a service principal token that is cached
//! until shortly before it expires. Accepted requests are followed through
//! their `Azure-AsyncOperation` or `Location` headers, then the resource is
//! fetched until its provisioning state settles.

mod api;
mod auth;
mod endpoints;
mod error;
mod poll;

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::config::AzureConfig;
use crate::descriptor::{ResourceDescriptor, ResourceKind};
use crate::provider::{LiveResource, PowerAction, ProviderClient, ProviderFuture};
use crate::sample::CloudProfile;
use crate::template::ResourceFilter;
use auth::AccessToken;
use poll::Tracking;

pub use api::{
    ApiProfile, group_path, kind_for_type, provider_type, request_body, resource_path,
};
pub use auth::Credentials;
pub use endpoints::{CloudEndpoints, PUBLIC_AUDIENCE, PUBLIC_LOGIN, PUBLIC_RESOURCE_MANAGER};
pub use error::AzureError;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(1800);
const USER_AGENT: &str = concat!("armflow/", env!("CARGO_PKG_VERSION"));

/// Provider that drives Azure Resource Manager over HTTPS.
pub struct AzureProvider {
    http: reqwest::Client,
    credentials: Credentials,
    endpoints: CloudEndpoints,
    subscription_id: String,
    profile: ApiProfile,
    token: Mutex<Option<AccessToken>>,
    poll_interval: Duration,
    operation_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ArmResource {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(default)]
    properties: Value,
}

impl From<ArmResource> for LiveResource {
    fn from(value: ArmResource) -> Self {
        Self {
            kind: kind_for_type(&value.resource_type),
            id: value.id,
            name: value.name,
            resource_type: value.resource_type,
            properties: value.properties,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourcePage {
    #[serde(default)]
    value: Vec<ArmResource>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}

fn api_error(status: StatusCode, body: &Value) -> AzureError {
    let field = |pointer: &str| {
        body.pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_owned)
    };
    let message = field("/error/message")
        .or_else(|| body.as_str().map(str::to_owned))
        .unwrap_or_else(|| format!("status {}", status.as_u16()));
    AzureError::Api {
        status: status.as_u16(),
        code: field("/error/code").unwrap_or_else(|| String::from("Unknown")),
        message,
    }
}

fn check(status: StatusCode, body: &Value) -> Result<(), AzureError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(api_error(status, body))
    }
}

fn decode_resource(body: Value) -> Result<LiveResource, AzureError> {
    serde_json::from_value::<ArmResource>(body)
        .map(LiveResource::from)
        .map_err(|err| AzureError::Decode(err.to_string()))
}

impl AzureProvider {
    /// Builds a provider against explicit endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Transport`] when the HTTP client cannot be
    /// initialised.
    pub fn new(
        endpoints: CloudEndpoints,
        credentials: Credentials,
        subscription_id: impl Into<String>,
        profile: ApiProfile,
    ) -> Result<Self, AzureError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            credentials,
            endpoints,
            subscription_id: subscription_id.into(),
            profile,
            token: Mutex::new(None),
            poll_interval: POLL_INTERVAL,
            operation_timeout: OPERATION_TIMEOUT,
        })
    }

    /// Validates `config`, discovers hybrid endpoints when an Azure Stack
    /// endpoint is set, and builds the provider.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Config`] for invalid configuration and
    /// [`AzureError::Discovery`] when hybrid metadata cannot be read.
    pub async fn connect(config: &AzureConfig) -> Result<Self, AzureError> {
        config.validate()?;
        let credentials = Credentials {
            tenant_id: config.tenant_id.trim().to_owned(),
            client_id: config.client_id.trim().to_owned(),
            client_secret: config.client_secret.clone(),
        };
        let profile = config.profile();
        let mut provider = Self::new(
            CloudEndpoints::public(),
            credentials,
            config.subscription_id.trim(),
            ApiProfile::for_cloud(profile),
        )?;
        if profile == CloudProfile::Hybrid {
            let endpoint = config.endpoint.as_deref().unwrap_or_default();
            provider.endpoints = CloudEndpoints::discover(&provider.http, endpoint).await?;
        }
        let settings = config.workflow_settings();
        let budget = settings
            .step_timeout
            .max(settings.lifecycle_timeout)
            .max(settings.teardown_timeout);
        tracing::info!(
            resource_manager = %provider.endpoints.resource_manager,
            ?profile,
            "connected to Resource Manager"
        );
        Ok(provider.with_polling(config.poll_interval(), budget))
    }

    /// Overrides the poll interval and the per-operation poll budget.
    #[must_use]
    pub const fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.operation_timeout = timeout;
        self
    }

    /// Endpoints in use.
    #[must_use]
    pub const fn endpoints(&self) -> &CloudEndpoints {
        &self.endpoints
    }

    /// API profile in use.
    #[must_use]
    pub const fn api_profile(&self) -> ApiProfile {
        self.profile
    }

    async fn bearer(&self) -> Result<String, AzureError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh()) {
            return Ok(token.value.clone());
        }
        let fresh = auth::request_token(&self.http, &self.endpoints, &self.credentials).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{path}?api-version={api_version}",
            self.endpoints.resource_manager
        )
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Value>,
    ) -> Result<(StatusCode, HeaderMap, Value), AzureError> {
        let token = self.bearer().await?;
        tracing::debug!(%method, url, "sending request");
        let builder = self.http.request(method, url).bearer_auth(token);
        let request = match payload {
            Some(body) => builder.json(body),
            None => builder.body(Vec::new()),
        };
        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        Ok((status, headers, parse_body(&text)))
    }

    async fn send_checked(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Value>,
    ) -> Result<(StatusCode, HeaderMap, Value), AzureError> {
        let (status, headers, body) = self.send(method, url, payload).await?;
        check(status, &body)?;
        Ok((status, headers, body))
    }

    async fn get_absolute(&self, url: &str) -> Result<(StatusCode, HeaderMap, Value), AzureError> {
        self.send_checked(Method::GET, url, None).await
    }

    async fn power(&self, group: &str, vm: &str, action: PowerAction) -> Result<(), AzureError> {
        let path = format!(
            "{}/{}",
            resource_path(&self.subscription_id, group, ResourceKind::VirtualMachine, vm),
            action.as_str()
        );
        let url = self.url(&path, self.profile.api_version(ResourceKind::VirtualMachine));
        tracing::info!(vm, %action, "requesting power action");
        let (status, headers, _) = self.send_checked(Method::POST, &url, None).await?;
        self.wait_for_operation(Tracking::from_response(status, &headers), action.as_str(), vm)
            .await?;
        Ok(())
    }
}

impl ProviderClient for AzureProvider {
    type Error = AzureError;

    fn create_or_update<'a>(
        &'a self,
        group: &'a str,
        descriptor: &'a ResourceDescriptor,
    ) -> ProviderFuture<'a, LiveResource, Self::Error> {
        Box::pin(async move {
            let kind = descriptor.kind();
            let name = descriptor.name();
            let path = resource_path(&self.subscription_id, group, kind, name);
            let url = self.url(&path, self.profile.api_version(kind));
            tracing::info!(resource = name, %kind, "submitting create or update");
            let body = request_body(descriptor);
            let (status, headers, _) = self.send_checked(Method::PUT, &url, Some(&body)).await?;
            self.wait_for_operation(Tracking::from_response(status, &headers), "create", name)
                .await?;
            let settled = self.wait_for_provisioning(&url, name).await?;
            decode_resource(settled)
        })
    }

    fn delete_group<'a>(&'a self, group: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let url = self.url(
                &group_path(&self.subscription_id, group),
                self.profile.resources_version(),
            );
            tracing::info!(group, "deleting resource group");
            let (status, headers, body) = self.send(Method::DELETE, &url, None).await?;
            if status == StatusCode::NOT_FOUND {
                tracing::info!(group, "resource group already absent");
                return Ok(());
            }
            check(status, &body)?;
            self.wait_for_operation(Tracking::from_response(status, &headers), "delete", group)
                .await?;
            Ok(())
        })
    }

    fn list_resources<'a>(
        &'a self,
        group: &'a str,
    ) -> ProviderFuture<'a, Vec<LiveResource>, Self::Error> {
        Box::pin(async move {
            let path = format!("{}/resources", group_path(&self.subscription_id, group));
            let mut next = Some(self.url(&path, self.profile.resources_version()));
            let mut resources = Vec::new();
            while let Some(url) = next.take() {
                let (_, _, body) = self.get_absolute(&url).await?;
                let page: ResourcePage = serde_json::from_value(body)
                    .map_err(|err| AzureError::Decode(err.to_string()))?;
                resources.extend(page.value.into_iter().map(LiveResource::from));
                next = page.next_link.filter(|link| !link.trim().is_empty());
            }
            tracing::debug!(group, count = resources.len(), "listed resources");
            Ok(resources)
        })
    }

    fn power_off<'a>(&'a self, group: &'a str, vm: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.power(group, vm, PowerAction::PowerOff))
    }

    fn start<'a>(&'a self, group: &'a str, vm: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.power(group, vm, PowerAction::Start))
    }

    fn restart<'a>(&'a self, group: &'a str, vm: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.power(group, vm, PowerAction::Restart))
    }

    fn export_template<'a>(
        &'a self,
        group: &'a str,
        filter: &'a ResourceFilter,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let path = format!("{}/exportTemplate", group_path(&self.subscription_id, group));
            let url = self.url(&path, self.profile.resources_version());
            let request = json!({ "resources": filter.to_resource_list() });
            let (status, headers, body) =
                self.send_checked(Method::POST, &url, Some(&request)).await?;
            let result = match Tracking::from_response(status, &headers) {
                Tracking::Complete => body,
                tracking => self.wait_for_operation(tracking, "export", group).await?,
            };
            if let Some(message) = result.pointer("/error/message").and_then(Value::as_str) {
                tracing::warn!(group, message, "export reported a partial template");
            }
            let template = result.get("template").ok_or_else(|| {
                AzureError::Decode(String::from("export response carries no template"))
            })?;
            serde_json::to_string_pretty(template)
                .map_err(|err| AzureError::Decode(err.to_string()))
        })
    }
}
