//! Declarative resource descriptors.
//!
//! A [`ResourceDescriptor`] states what a single cloud resource should look
//! like: its kind, name, location, a typed property bag, and the names of the
//! resources it depends on. Descriptors are validated once, when the builder
//! runs, and are immutable afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Kinds of resources the workflow knows how to provision.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceKind {
    /// Container whose deletion cascades to every member.
    ResourceGroup,
    /// Blob storage account backing virtual machine disks.
    StorageAccount,
    /// Virtual network with its subnets.
    VirtualNetwork,
    /// Public IP address.
    PublicAddress,
    /// Network interface binding a subnet and a public address.
    NetworkInterface,
    /// Compute instance.
    VirtualMachine,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::ResourceGroup,
        Self::StorageAccount,
        Self::VirtualNetwork,
        Self::PublicAddress,
        Self::NetworkInterface,
        Self::VirtualMachine,
    ];

    /// Stable lowercase label used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResourceGroup => "resource-group",
            Self::StorageAccount => "storage-account",
            Self::VirtualNetwork => "virtual-network",
            Self::PublicAddress => "public-address",
            Self::NetworkInterface => "network-interface",
            Self::VirtualMachine => "virtual-machine",
        }
    }

    const fn rules(self) -> &'static [PropertyRule] {
        match self {
            Self::ResourceGroup => &[],
            Self::StorageAccount => STORAGE_RULES,
            Self::VirtualNetwork => NETWORK_RULES,
            Self::PublicAddress => PUBLIC_ADDRESS_RULES,
            Self::NetworkInterface => INTERFACE_RULES,
            Self::VirtualMachine => MACHINE_RULES,
        }
    }
}

const STORAGE_RULES: &[PropertyRule] = &[
    PropertyRule::new("sku", ValueShape::Map),
    PropertyRule::new("kind", ValueShape::Text),
];
const NETWORK_RULES: &[PropertyRule] = &[PropertyRule::new("addressSpace", ValueShape::Map)];
const PUBLIC_ADDRESS_RULES: &[PropertyRule] =
    &[PropertyRule::new("publicIPAllocationMethod", ValueShape::Text)];
const INTERFACE_RULES: &[PropertyRule] =
    &[PropertyRule::new("ipConfigurations", ValueShape::List)];
const MACHINE_RULES: &[PropertyRule] = &[
    PropertyRule::new("hardwareProfile", ValueShape::Map),
    PropertyRule::new("storageProfile", ValueShape::Map),
    PropertyRule::new("osProfile", ValueShape::Map),
    PropertyRule::new("networkProfile", ValueShape::Map),
];

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim())
            .ok_or_else(|| ValidationError::UnknownKind(value.trim().to_owned()))
    }
}

/// Shape a required property must have.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueShape {
    /// Plain string (or a reference, which resolves to one).
    Text,
    /// Nested mapping.
    Map,
    /// Ordered list.
    List,
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Map => "mapping",
            Self::List => "list",
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct PropertyRule {
    key: &'static str,
    shape: ValueShape,
}

impl PropertyRule {
    const fn new(key: &'static str, shape: ValueShape) -> Self {
        Self { key, shape }
    }
}

/// Property bag keyed by property name. Ordered so rendering is stable.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Points at another resource whose provider id is substituted at apply time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceRef {
    /// Name of the referenced resource.
    pub resource: String,
    /// Path appended to the resolved id (for example `/subnets/default`).
    pub suffix: Option<String>,
}

impl ResourceRef {
    /// References the id of `resource` verbatim.
    #[must_use]
    pub fn to(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            suffix: None,
        }
    }

    /// Appends `suffix` to the resolved id.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    fn render(&self, id: &str) -> String {
        self.suffix
            .as_deref()
            .map_or_else(|| id.to_owned(), |suffix| format!("{id}{suffix}"))
    }
}

/// Closed set of values a descriptor property can hold.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// String value.
    Text(String),
    /// Numeric value.
    Number(Number),
    /// Boolean value.
    Flag(bool),
    /// Ordered list of values.
    List(Vec<PropertyValue>),
    /// Nested mapping.
    Map(Properties),
    /// Id of another resource, filled in once that resource exists.
    Reference(ResourceRef),
}

impl PropertyValue {
    /// Builds a nested mapping from key/value pairs.
    #[must_use]
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Builds a list from values.
    #[must_use]
    pub fn list<V: Into<Self>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a reference to another resource's id.
    #[must_use]
    pub fn reference(resource: impl Into<String>) -> Self {
        Self::Reference(ResourceRef::to(resource))
    }

    const fn matches(&self, shape: ValueShape) -> bool {
        matches!(
            (self, shape),
            (Self::Text(_) | Self::Reference(_), ValueShape::Text)
                | (Self::Map(_), ValueShape::Map)
                | (Self::List(_), ValueShape::List)
        )
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a ResourceRef>) {
        match self {
            Self::Reference(reference) => found.push(reference),
            Self::List(items) => items
                .iter()
                .for_each(|item| item.collect_references(found)),
            Self::Map(entries) => entries
                .values()
                .for_each(|value| value.collect_references(found)),
            Self::Text(_) | Self::Number(_) | Self::Flag(_) => {}
        }
    }

    fn resolve(&self, ids: &BTreeMap<String, String>) -> Result<Self, String> {
        Ok(match self {
            Self::Reference(reference) => {
                let id = ids
                    .get(&reference.resource)
                    .ok_or_else(|| reference.resource.clone())?;
                Self::Text(reference.render(id))
            }
            Self::List(items) => Self::List(
                items
                    .iter()
                    .map(|item| item.resolve(ids))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), value.resolve(ids)?)))
                    .collect::<Result<_, String>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Renders the value as JSON. Unresolved references render as
    /// `[reference(<name>)]` so they stay visible in logs.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Number(number) => Value::Number(number.clone()),
            Self::Flag(flag) => Value::Bool(*flag),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => Value::Object(properties_to_json(entries)),
            Self::Reference(reference) => Value::String(format!(
                "[reference({}){}]",
                reference.resource,
                reference.suffix.as_deref().unwrap_or_default()
            )),
        }
    }
}

/// Renders a property bag as a JSON object.
#[must_use]
pub fn properties_to_json(properties: &Properties) -> Map<String, Value> {
    properties
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<ResourceRef> for PropertyValue {
    fn from(value: ResourceRef) -> Self {
        Self::Reference(value)
    }
}

/// Errors raised when a descriptor or a descriptor set is malformed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// Raised when a required string field is blank.
    #[error("missing or empty field: {0}")]
    EmptyField(String),
    /// Raised when a kind label is not recognised.
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),
    /// Raised when a location contains characters providers reject.
    #[error("invalid location '{location}' for resource {resource}")]
    InvalidLocation {
        /// Resource being validated.
        resource: String,
        /// Offending location string.
        location: String,
    },
    /// Raised when a descriptor lists itself as a dependency.
    #[error("resource {0} depends on itself")]
    SelfDependency(String),
    /// Raised when a kind-specific property is absent.
    #[error("{kind} {resource} is missing required property '{key}'")]
    MissingProperty {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Resource being validated.
        resource: String,
        /// Missing property key.
        key: String,
    },
    /// Raised when a kind-specific property has the wrong shape.
    #[error("property '{key}' of {resource} must be a {expected}")]
    PropertyShape {
        /// Resource being validated.
        resource: String,
        /// Property key.
        key: String,
        /// Shape the property must have.
        expected: ValueShape,
    },
    /// Raised when a property references a resource missing from `depends_on`.
    #[error("{resource} references {reference} without depending on it")]
    UndeclaredReference {
        /// Resource holding the reference.
        resource: String,
        /// Referenced resource name.
        reference: String,
    },
    /// Raised when a plan has no resource group matching its target.
    #[error("no resource-group descriptor named {group} in the plan")]
    MissingResourceGroup {
        /// Target group name.
        group: String,
    },
    /// Raised when a plan carries more than one resource group.
    #[error("plan declares more than one resource group: {groups}")]
    MultipleResourceGroups {
        /// Comma-separated group names.
        groups: String,
    },
    /// Raised when a reference cannot be resolved at apply time.
    #[error("{resource} references {reference}, which has not been created")]
    UnresolvedReference {
        /// Resource holding the reference.
        resource: String,
        /// Referenced resource name.
        reference: String,
    },
}

/// Declarative description of one cloud resource.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDescriptor {
    kind: ResourceKind,
    name: String,
    location: String,
    properties: Properties,
    depends_on: BTreeSet<String>,
}

impl ResourceDescriptor {
    /// Starts a builder for a descriptor of `kind` named `name`.
    #[must_use]
    pub fn builder(kind: ResourceKind, name: impl Into<String>) -> ResourceDescriptorBuilder {
        ResourceDescriptorBuilder::new(kind, name)
    }

    /// Kind of resource described.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Name, unique within the owning group.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider location (for example `westus`).
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Kind-specific properties.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Names of the resources that must exist first.
    #[must_use]
    pub const fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    /// Returns a copy with every reference replaced by the referenced
    /// resource's id from `ids` (keyed by resource name).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnresolvedReference`] when a referenced
    /// resource has no recorded id.
    pub fn resolve_references(
        &self,
        ids: &BTreeMap<String, String>,
    ) -> Result<Self, ValidationError> {
        let properties = self
            .properties
            .iter()
            .map(|(key, value)| Ok((key.clone(), value.resolve(ids)?)))
            .collect::<Result<Properties, String>>()
            .map_err(|reference| ValidationError::UnresolvedReference {
                resource: self.name.clone(),
                reference,
            })?;
        Ok(Self {
            properties,
            ..self.clone()
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyField(String::from("name")));
        }
        if self.location.is_empty() {
            return Err(ValidationError::EmptyField(format!(
                "location of {}",
                self.name
            )));
        }
        if !self
            .location
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        {
            return Err(ValidationError::InvalidLocation {
                resource: self.name.clone(),
                location: self.location.clone(),
            });
        }
        if self.depends_on.contains(&self.name) {
            return Err(ValidationError::SelfDependency(self.name.clone()));
        }
        if self.depends_on.iter().any(String::is_empty) {
            return Err(ValidationError::EmptyField(format!(
                "dependency name of {}",
                self.name
            )));
        }
        self.validate_rules()?;
        self.validate_references()
    }

    fn validate_rules(&self) -> Result<(), ValidationError> {
        for rule in self.kind.rules() {
            let Some(value) = self.properties.get(rule.key) else {
                return Err(ValidationError::MissingProperty {
                    kind: self.kind,
                    resource: self.name.clone(),
                    key: rule.key.to_owned(),
                });
            };
            if !value.matches(rule.shape) {
                return Err(ValidationError::PropertyShape {
                    resource: self.name.clone(),
                    key: rule.key.to_owned(),
                    expected: rule.shape,
                });
            }
        }
        Ok(())
    }

    fn validate_references(&self) -> Result<(), ValidationError> {
        let mut references = Vec::new();
        for value in self.properties.values() {
            value.collect_references(&mut references);
        }
        match references
            .into_iter()
            .find(|reference| !self.depends_on.contains(&reference.resource))
        {
            Some(reference) => Err(ValidationError::UndeclaredReference {
                resource: self.name.clone(),
                reference: reference.resource.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Builder for [`ResourceDescriptor`]; trims inputs and validates on build.
#[derive(Clone, Debug)]
pub struct ResourceDescriptorBuilder {
    kind: ResourceKind,
    name: String,
    location: String,
    properties: Properties,
    depends_on: BTreeSet<String>,
}

impl ResourceDescriptorBuilder {
    /// Creates a builder with an empty property bag.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            location: String::new(),
            properties: Properties::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Sets the location.
    #[must_use]
    pub fn location(mut self, value: impl Into<String>) -> Self {
        self.location = value.into();
        self
    }

    /// Sets one property, replacing any previous value for `key`.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Declares a dependency on another resource by name.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into().trim().to_owned());
        self
    }

    /// Builds and validates the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the name or location is blank or
    /// malformed, the descriptor depends on itself, a kind-specific property
    /// is missing or mis-shaped, or a reference names an undeclared
    /// dependency.
    pub fn build(self) -> Result<ResourceDescriptor, ValidationError> {
        let descriptor = ResourceDescriptor {
            kind: self.kind,
            name: self.name.trim().to_owned(),
            location: self.location.trim().to_owned(),
            properties: self.properties,
            depends_on: self.depends_on,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}
