//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::sample::{CloudProfile, PUBLIC_STORAGE_SUFFIX, SampleOptions};
use crate::workflow::WorkflowSettings;

/// Alternative variable naming the Azure Stack Resource Manager endpoint.
pub const ARM_ENDPOINT_ENV: &str = "ARM_ENDPOINT";

/// Blob endpoint suffix assumed for Azure Stack when none is configured.
pub const HYBRID_STORAGE_SUFFIX: &str = "local.azurestack.external";

/// Azure credentials and run settings derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AZURE",
    discovery(
        app_name = "armflow",
        env_var = "ARMFLOW_CONFIG_PATH",
        config_file_name = "armflow.toml",
        dotfile_name = ".armflow.toml",
        project_file_name = "armflow.toml"
    )
)]
pub struct AzureConfig {
    /// Directory (tenant) the service principal belongs to.
    #[ortho_config(default = String::new())]
    pub tenant_id: String,
    /// Application (client) id of the service principal.
    #[ortho_config(default = String::new())]
    pub client_id: String,
    /// Client secret of the service principal.
    #[ortho_config(default = String::new())]
    pub client_secret: String,
    /// Subscription resources are billed to.
    #[ortho_config(default = String::new())]
    pub subscription_id: String,
    /// Resource Manager endpoint of an Azure Stack deployment. When set, the
    /// hybrid profile is used and authentication endpoints are discovered
    /// from its metadata. `ARM_ENDPOINT` is read when this is unset.
    pub endpoint: Option<String>,
    /// Location override. Defaults to `westus`, or `local` for hybrid.
    pub location: Option<String>,
    /// Resource group created and deleted by the run.
    #[ortho_config(default = "armflow-sample-group".to_owned())]
    pub group_name: String,
    /// Machine name used for the sample virtual machine.
    #[ortho_config(default = "firstvm".to_owned())]
    pub vm_name: String,
    /// Blob endpoint suffix used to build the OS disk URI.
    pub storage_endpoint_suffix: Option<String>,
    /// Public key installed on the machine when present.
    #[ortho_config(default = "~/.ssh/id_rsa.pub".to_owned())]
    pub ssh_public_key_path: String,
    /// Upper bound in seconds for a single resource creation.
    #[ortho_config(default = WorkflowSettings::DEFAULT_STEP_SECS)]
    pub step_timeout_secs: u64,
    /// Upper bound in seconds for a stop, start, or restart.
    #[ortho_config(default = WorkflowSettings::DEFAULT_LIFECYCLE_SECS)]
    pub lifecycle_timeout_secs: u64,
    /// Upper bound in seconds for deleting the resource group.
    #[ortho_config(default = WorkflowSettings::DEFAULT_TEARDOWN_SECS)]
    pub teardown_timeout_secs: u64,
    /// Delay in seconds between long-running operation polls.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [azure] in armflow.toml",
            self.env_var, self.toml_key
        )
    }
}

impl AzureConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let loaded = Self::load_from_iter([std::ffi::OsString::from("armflow")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        Ok(loaded.with_endpoint_alias(std::env::var(ARM_ENDPOINT_ENV).ok()))
    }

    /// Falls back to `alias` (read from `ARM_ENDPOINT`) when no endpoint is
    /// configured under the `AZURE` prefix.
    #[must_use]
    pub fn with_endpoint_alias(mut self, alias: Option<String>) -> Self {
        let configured = self
            .endpoint
            .as_deref()
            .is_some_and(|endpoint| !endpoint.trim().is_empty());
        if !configured {
            self.endpoint = alias
                .filter(|value| !value.trim().is_empty())
                .or_else(|| self.endpoint.take());
        }
        self
    }

    /// Cloud profile implied by the endpoint setting.
    #[must_use]
    pub fn profile(&self) -> CloudProfile {
        match self.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => CloudProfile::Hybrid,
            _ => CloudProfile::Public,
        }
    }

    /// Location for every resource.
    #[must_use]
    pub fn location(&self) -> String {
        self.location
            .as_deref()
            .map(str::trim)
            .filter(|location| !location.is_empty())
            .unwrap_or_else(|| self.profile().default_location())
            .to_owned()
    }

    /// Blob endpoint suffix for the active profile.
    #[must_use]
    pub fn storage_suffix(&self) -> String {
        let fallback = match self.profile() {
            CloudProfile::Public => PUBLIC_STORAGE_SUFFIX,
            CloudProfile::Hybrid => HYBRID_STORAGE_SUFFIX,
        };
        self.storage_endpoint_suffix
            .as_deref()
            .map(|suffix| suffix.trim().trim_start_matches('.'))
            .filter(|suffix| !suffix.is_empty())
            .unwrap_or(fallback)
            .to_owned()
    }

    /// Options for the sample stack; `ssh_public_key` is the key contents.
    #[must_use]
    pub fn sample_options(&self, ssh_public_key: Option<String>) -> SampleOptions {
        SampleOptions {
            location: self.location(),
            vm_name: self.vm_name.trim().to_owned(),
            storage_suffix: self.storage_suffix(),
            ssh_public_key,
            ..SampleOptions::new(self.profile(), self.group_name.trim())
        }
    }

    /// Timeouts handed to the workflow.
    #[must_use]
    pub const fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            step_timeout: Duration::from_secs(self.step_timeout_secs),
            lifecycle_timeout: Duration::from_secs(self.lifecycle_timeout_secs),
            teardown_timeout: Duration::from_secs(self.teardown_timeout_secs),
        }
    }

    /// Delay between long-running operation polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values via environment variables or configuration
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.tenant_id,
            &FieldMetadata::new("Azure tenant ID", "AZURE_TENANT_ID", "tenant_id"),
        )?;
        Self::require_field(
            &self.client_id,
            &FieldMetadata::new("Azure client ID", "AZURE_CLIENT_ID", "client_id"),
        )?;
        Self::require_field(
            &self.client_secret,
            &FieldMetadata::new("Azure client secret", "AZURE_CLIENT_SECRET", "client_secret"),
        )?;
        Self::require_field(
            &self.subscription_id,
            &FieldMetadata::new(
                "Azure subscription ID",
                "AZURE_SUBSCRIPTION_ID",
                "subscription_id",
            ),
        )?;
        Self::require_field(
            &self.group_name,
            &FieldMetadata::new("resource group name", "AZURE_GROUP_NAME", "group_name"),
        )?;
        Self::require_field(
            &self.vm_name,
            &FieldMetadata::new("virtual machine name", "AZURE_VM_NAME", "vm_name"),
        )?;
        let malformed_endpoint = self.endpoint.as_deref().map(str::trim).filter(|endpoint| {
            !endpoint.is_empty()
                && !endpoint.starts_with("https://")
                && !endpoint.starts_with("http://")
        });
        if let Some(endpoint) = malformed_endpoint {
            return Err(ConfigError::Invalid(format!(
                "Resource Manager endpoint must be an http(s) URL, got '{endpoint}': {}",
                FieldMetadata::new("", "AZURE_ENDPOINT", "endpoint").hint()
            )));
        }
        Self::require_positive(
            self.step_timeout_secs,
            &FieldMetadata::new(
                "step timeout",
                "AZURE_STEP_TIMEOUT_SECS",
                "step_timeout_secs",
            ),
        )?;
        Self::require_positive(
            self.lifecycle_timeout_secs,
            &FieldMetadata::new(
                "lifecycle timeout",
                "AZURE_LIFECYCLE_TIMEOUT_SECS",
                "lifecycle_timeout_secs",
            ),
        )?;
        Self::require_positive(
            self.teardown_timeout_secs,
            &FieldMetadata::new(
                "teardown timeout",
                "AZURE_TEARDOWN_TIMEOUT_SECS",
                "teardown_timeout_secs",
            ),
        )?;
        Self::require_positive(
            self.poll_interval_secs,
            &FieldMetadata::new(
                "poll interval",
                "AZURE_POLL_INTERVAL_SECS",
                "poll_interval_secs",
            ),
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
