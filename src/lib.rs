//! Core library for the armflow provisioning workflow.
//!
//! The crate describes cloud resources declaratively, orders them by their
//! references, and drives a [`ProviderClient`] through provision, lifecycle,
//! inventory, export, and teardown phases. An Azure Resource Manager
//! provider and a sample virtual machine stack ship with it.

pub mod azure;
pub mod config;
pub mod descriptor;
pub mod order;
pub mod provider;
pub mod sample;
pub mod template;
pub mod test_support;
pub mod walkthrough;
pub mod workflow;

pub use azure::{AzureError, AzureProvider};
pub use config::{AzureConfig, ConfigError};
pub use descriptor::{
    PropertyValue, ResourceDescriptor, ResourceDescriptorBuilder, ResourceKind, ResourceRef,
    ValidationError,
};
pub use order::{DependencyOrderer, ExecutionOrder, OrderError};
pub use provider::{LiveResource, PowerAction, ProviderClient, ProviderFuture};
pub use sample::{CloudProfile, SampleError, SampleOptions, SampleStack};
pub use template::{ResourceFilter, TemplateExporter};
pub use walkthrough::{Step, StepReport, Walkthrough};
pub use workflow::{
    DeploymentTarget, LifecycleOp, Phase, ProvisioningWorkflow, TeardownOutcome, WorkflowError,
    WorkflowSettings, WorkflowState,
};
