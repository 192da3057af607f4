//! Resource Manager paths, API versions and request bodies.

use serde_json::{Map, Value};

use crate::descriptor::{ResourceDescriptor, ResourceKind};
use crate::sample::CloudProfile;

/// Keys lifted from a descriptor's properties to the top level of the body.
const TOP_LEVEL_KEYS: [&str; 3] = ["sku", "kind", "tags"];

/// Set of API versions a cloud supports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApiProfile {
    /// Current public cloud versions.
    Latest,
    /// The `2017-03-09` hybrid profile understood by Azure Stack.
    V2017_03_09,
}

impl ApiProfile {
    /// Profile matching a cloud flavour.
    #[must_use]
    pub const fn for_cloud(profile: CloudProfile) -> Self {
        match profile {
            CloudProfile::Public => Self::Latest,
            CloudProfile::Hybrid => Self::V2017_03_09,
        }
    }

    /// Version used for group-level calls (create, delete, list, export).
    #[must_use]
    pub const fn resources_version(self) -> &'static str {
        match self {
            Self::Latest => "2021-04-01",
            Self::V2017_03_09 => "2016-02-01",
        }
    }

    /// Version used for resources of `kind`.
    #[must_use]
    pub const fn api_version(self, kind: ResourceKind) -> &'static str {
        match (self, kind) {
            (_, ResourceKind::ResourceGroup) => self.resources_version(),
            (Self::Latest, ResourceKind::StorageAccount) => "2023-01-01",
            (
                Self::Latest,
                ResourceKind::VirtualNetwork
                | ResourceKind::PublicAddress
                | ResourceKind::NetworkInterface,
            ) => "2023-09-01",
            (Self::Latest, ResourceKind::VirtualMachine) => "2023-09-01",
            (Self::V2017_03_09, ResourceKind::StorageAccount) => "2016-01-01",
            (
                Self::V2017_03_09,
                ResourceKind::VirtualNetwork
                | ResourceKind::PublicAddress
                | ResourceKind::NetworkInterface,
            ) => "2015-06-15",
            (Self::V2017_03_09, ResourceKind::VirtualMachine) => "2016-03-30",
        }
    }
}

/// Resource Manager type of `kind`.
#[must_use]
pub const fn provider_type(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ResourceGroup => "Microsoft.Resources/resourceGroups",
        ResourceKind::StorageAccount => "Microsoft.Storage/storageAccounts",
        ResourceKind::VirtualNetwork => "Microsoft.Network/virtualNetworks",
        ResourceKind::PublicAddress => "Microsoft.Network/publicIPAddresses",
        ResourceKind::NetworkInterface => "Microsoft.Network/networkInterfaces",
        ResourceKind::VirtualMachine => "Microsoft.Compute/virtualMachines",
    }
}

/// Maps a Resource Manager type back to a kind. Type names compare
/// case-insensitively.
#[must_use]
pub fn kind_for_type(resource_type: &str) -> Option<ResourceKind> {
    ResourceKind::ALL
        .into_iter()
        .find(|kind| provider_type(*kind).eq_ignore_ascii_case(resource_type))
}

/// Path of a resource group.
#[must_use]
pub fn group_path(subscription: &str, group: &str) -> String {
    format!("/subscriptions/{subscription}/resourcegroups/{group}")
}

/// Path of a resource inside `group`.
#[must_use]
pub fn resource_path(subscription: &str, group: &str, kind: ResourceKind, name: &str) -> String {
    match kind {
        ResourceKind::ResourceGroup => group_path(subscription, name),
        other => format!(
            "{}/providers/{}/{name}",
            group_path(subscription, group),
            provider_type(other)
        ),
    }
}

/// Renders the PUT body for a resolved descriptor.
///
/// `location` and the keys `sku`, `kind` and `tags` sit at the top level;
/// every other property goes under `properties`.
#[must_use]
pub fn request_body(descriptor: &ResourceDescriptor) -> Value {
    let mut body = Map::new();
    body.insert(
        String::from("location"),
        Value::String(descriptor.location().to_owned()),
    );
    let mut properties = Map::new();
    for (key, value) in descriptor.properties() {
        if TOP_LEVEL_KEYS.contains(&key.as_str()) {
            body.insert(key.clone(), value.to_json());
        } else {
            properties.insert(key.clone(), value.to_json());
        }
    }
    if !properties.is_empty() {
        body.insert(String::from("properties"), Value::Object(properties));
    }
    Value::Object(body)
}
