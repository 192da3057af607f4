//! Provider abstraction for the cloud management API.
//!
//! The workflow never talks to the network directly; every side effect goes
//! through a [`ProviderClient`]. Implementations receive descriptors whose
//! references have already been resolved to provider ids.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::descriptor::{ResourceDescriptor, ResourceKind};
use crate::template::ResourceFilter;

/// Handle to a resource the provider has materialised.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveResource {
    /// Provider-assigned identifier.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Kind, when the provider type maps onto a known kind.
    pub kind: Option<ResourceKind>,
    /// Provider type string (for example `Microsoft.Network/virtualNetworks`).
    pub resource_type: String,
    /// Properties echoed back by the provider.
    pub properties: Value,
}

impl fmt::Display for LiveResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) {}", self.name, self.resource_type, self.id)
    }
}

/// Power actions supported on virtual machines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerAction {
    /// Stop the machine, keeping its allocation.
    PowerOff,
    /// Start a stopped machine.
    Start,
    /// Restart a running machine.
    Restart,
}

impl PowerAction {
    /// Action segment used by the management API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PowerOff => "powerOff",
            Self::Start => "start",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by cloud providers.
///
/// Calls resolve once the provider reports completion; long-running
/// operations are awaited inside the implementation.
pub trait ProviderClient {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates the described resource, or updates it when it already exists.
    fn create_or_update<'a>(
        &'a self,
        group: &'a str,
        descriptor: &'a ResourceDescriptor,
    ) -> ProviderFuture<'a, LiveResource, Self::Error>;

    /// Deletes the resource group and, by cascade, everything in it.
    fn delete_group<'a>(&'a self, group: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Lists every resource the provider reports inside the group.
    fn list_resources<'a>(
        &'a self,
        group: &'a str,
    ) -> ProviderFuture<'a, Vec<LiveResource>, Self::Error>;

    /// Powers a virtual machine off.
    fn power_off<'a>(&'a self, group: &'a str, vm: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Starts a virtual machine.
    fn start<'a>(&'a self, group: &'a str, vm: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Restarts a virtual machine.
    fn restart<'a>(&'a self, group: &'a str, vm: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Exports the group's template as opaque serialised text.
    fn export_template<'a>(
        &'a self,
        group: &'a str,
        filter: &'a ResourceFilter,
    ) -> ProviderFuture<'a, String, Self::Error>;
}
