//! Shared fixtures and helpers for workflow BDD scenarios.

use armflow::test_support::ScriptedProvider;
use armflow::{
    DeploymentTarget, PropertyValue, ProvisioningWorkflow, ResourceDescriptor, ResourceKind,
    ResourceRef, TeardownOutcome, ValidationError, WorkflowError, WorkflowSettings,
};
use rstest::fixture;

pub const LOCATION: &str = "westus";

/// Resource the scenario declares before planning.
#[derive(Clone, Debug)]
pub struct DeclaredResource {
    pub kind: ResourceKind,
    pub name: String,
    pub depends_on: Vec<String>,
}

impl DeclaredResource {
    pub fn new(kind: ResourceKind, name: &str, depends_on: &[&str]) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            depends_on: depends_on.iter().map(|dep| (*dep).to_owned()).collect(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkflowFailure {
    pub kind: &'static str,
    pub resource: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct WorkflowContext {
    pub provider: ScriptedProvider,
    pub workflow: ProvisioningWorkflow<ScriptedProvider>,
    pub declared: Vec<DeclaredResource>,
    pub failure: Option<WorkflowFailure>,
    pub last_teardown: Option<TeardownOutcome>,
}

#[fixture]
pub fn workflow_context() -> WorkflowContext {
    let provider = ScriptedProvider::new();
    WorkflowContext {
        workflow: ProvisioningWorkflow::new(provider.clone(), WorkflowSettings::default()),
        provider,
        declared: Vec::new(),
        failure: None,
        last_teardown: None,
    }
}

fn with_dependencies(
    mut builder: armflow::ResourceDescriptorBuilder,
    entry: &DeclaredResource,
) -> armflow::ResourceDescriptorBuilder {
    for dependency in &entry.depends_on {
        builder = builder.depends_on(dependency.as_str());
    }
    builder.location(LOCATION)
}

/// Builds the descriptor an entry stands for, filling in the properties its
/// kind requires. Machines reference their first dependency as a network
/// interface id.
pub fn build_descriptor(entry: &DeclaredResource) -> Result<ResourceDescriptor, ValidationError> {
    let base = ResourceDescriptor::builder(entry.kind, entry.name.as_str());
    let builder = match entry.kind {
        ResourceKind::VirtualNetwork => base.property(
            "addressSpace",
            PropertyValue::map([("addressPrefixes", PropertyValue::list(["10.0.0.0/16"]))]),
        ),
        ResourceKind::VirtualMachine => {
            let nic = entry.depends_on.first().cloned().unwrap_or_default();
            base.property("hardwareProfile", PropertyValue::map([("vmSize", "Basic_A0")]))
                .property("storageProfile", PropertyValue::map([("osDisk", "disk")]))
                .property("osProfile", PropertyValue::map([("computerName", entry.name.as_str())]))
                .property(
                    "networkProfile",
                    PropertyValue::map([(
                        "networkInterfaces",
                        PropertyValue::list([PropertyValue::map([("id", ResourceRef::to(nic))])]),
                    )]),
                )
        }
        _ => base,
    };
    with_dependencies(builder, entry).build()
}

pub fn target(declared: &[DeclaredResource]) -> Result<DeploymentTarget, ValidationError> {
    let group = declared
        .iter()
        .find(|entry| entry.kind == ResourceKind::ResourceGroup)
        .map(|entry| entry.name.clone())
        .unwrap_or_default();
    DeploymentTarget::new(group, LOCATION)
}

pub fn describe_failure<E>(err: &WorkflowError<E>) -> WorkflowFailure
where
    E: std::error::Error + 'static,
{
    let (kind, resource) = match err {
        WorkflowError::Validation(_) => ("validation", None),
        WorkflowError::Order(_) => ("order", None),
        WorkflowError::InvalidState { .. } => ("invalid-state", None),
        WorkflowError::NotPlanned { .. } => ("not-planned", None),
        WorkflowError::UnknownTarget { target } => ("unknown-target", Some(target.clone())),
        WorkflowError::Provider { resource, .. } => ("provider", Some(resource.clone())),
        WorkflowError::Timeout { resource, .. } => ("timeout", Some(resource.clone())),
        WorkflowError::Teardown { group, .. } => ("teardown", Some(group.clone())),
    };
    WorkflowFailure {
        kind,
        resource,
        message: err.to_string(),
    }
}
