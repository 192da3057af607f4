//! The sample compute stack: a group holding storage, networking and one
//! Ubuntu virtual machine.
//!
//! Two cloud profiles are supported. The public profile targets global Azure
//! with premium storage and the latest image; the hybrid profile targets an
//! Azure Stack endpoint, which only offers standard storage and a pinned
//! image version.

use std::env;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use uuid::Uuid;

use crate::descriptor::{
    PropertyValue, ResourceDescriptor, ResourceKind, ResourceRef, ValidationError,
};
use crate::workflow::DeploymentTarget;

/// Login created on the virtual machine.
pub const ADMIN_USERNAME: &str = "notAdmin";
/// Default location for the public cloud.
pub const PUBLIC_LOCATION: &str = "westus";
/// Default location for hybrid (Azure Stack) deployments.
pub const HYBRID_LOCATION: &str = "local";
/// Blob endpoint suffix of the public cloud.
pub const PUBLIC_STORAGE_SUFFIX: &str = "core.windows.net";

const VNET_NAME: &str = "sample-vnet";
const SUBNET_NAME: &str = "sample-subnet";
const PUBLIC_IP_NAME: &str = "sample-pip";
const VHD_CONTAINER: &str = "armflow";
const VM_SIZE: &str = "Standard_DS2_v2";

/// Cloud flavour the stack is shaped for.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CloudProfile {
    /// Global Azure.
    #[default]
    Public,
    /// Azure Stack reached through a custom Resource Manager endpoint.
    Hybrid,
}

impl CloudProfile {
    /// Location used when none is configured.
    #[must_use]
    pub const fn default_location(self) -> &'static str {
        match self {
            Self::Public => PUBLIC_LOCATION,
            Self::Hybrid => HYBRID_LOCATION,
        }
    }

    const fn storage_sku(self) -> (&'static str, &'static str) {
        match self {
            Self::Public => ("Premium_LRS", "Premium"),
            Self::Hybrid => ("Standard_LRS", "Standard"),
        }
    }

    const fn image(self) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            Self::Public => ("Canonical", "UbuntuServer", "16.04.0-LTS", "latest"),
            Self::Hybrid => ("Canonical", "UbuntuServer", "16.04-LTS", "16.04.201801260"),
        }
    }
}

/// Errors raised while assembling the sample stack.
#[derive(Debug, Error)]
pub enum SampleError {
    /// Raised when a generated descriptor is rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Raised when an existing SSH public key cannot be read.
    #[error("failed to read SSH public key {path}: {message}")]
    SshKey {
        /// Key path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Inputs for [`SampleStack::build`].
#[derive(Clone, Debug)]
pub struct SampleOptions {
    /// Cloud profile.
    pub profile: CloudProfile,
    /// Resource group name.
    pub group_name: String,
    /// Location for every resource.
    pub location: String,
    /// Machine name; the VM resource is `sample-vm-<name>`.
    pub vm_name: String,
    /// Blob endpoint suffix (for example `core.windows.net`).
    pub storage_suffix: String,
    /// Public key installed for [`ADMIN_USERNAME`]; disables password login.
    pub ssh_public_key: Option<String>,
    /// Lowercase alphanumeric suffix keeping global names unique.
    pub unique_suffix: String,
}

impl SampleOptions {
    /// Options with the profile's defaults and a fresh unique suffix.
    #[must_use]
    pub fn new(profile: CloudProfile, group_name: impl Into<String>) -> Self {
        Self {
            profile,
            group_name: group_name.into(),
            location: profile.default_location().to_owned(),
            vm_name: String::from("firstvm"),
            storage_suffix: String::from(PUBLIC_STORAGE_SUFFIX),
            ssh_public_key: None,
            unique_suffix: unique_suffix(),
        }
    }
}

/// Ten lowercase hex characters from a random UUID.
#[must_use]
pub fn unique_suffix() -> String {
    Uuid::new_v4().simple().to_string().chars().take(10).collect()
}

/// Descriptor set plus the details a front end prints about it.
#[derive(Clone, Debug)]
pub struct SampleStack {
    /// Group and location the stack deploys into.
    pub target: DeploymentTarget,
    /// Descriptors for every resource, group included.
    pub descriptors: Vec<ResourceDescriptor>,
    /// Name of the virtual machine resource.
    pub vm_resource: String,
    /// Name of the storage account.
    pub storage_account: String,
    /// Generated administrator password.
    pub admin_password: String,
    /// Whether password login stays enabled (no SSH key was supplied).
    pub password_login: bool,
}

impl SampleStack {
    /// Builds the six descriptors of the sample.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::Validation`] when the options produce an
    /// invalid descriptor, such as a blank group name.
    pub fn build(options: &SampleOptions) -> Result<Self, SampleError> {
        let target = DeploymentTarget::new(&options.group_name, &options.location)?;
        let group = target.group_name.clone();
        let location = target.location.clone();
        let storage = format!("armflowstor{}", options.unique_suffix);
        let nic = format!("sample-nic-{}", options.vm_name);
        let vm = format!("sample-vm-{}", options.vm_name);
        let admin_password = Uuid::new_v4().to_string();

        let descriptors = vec![
            ResourceDescriptor::builder(ResourceKind::ResourceGroup, &group)
                .location(&location)
                .build()?,
            storage_account(options, &group, &storage, &location)?,
            ResourceDescriptor::builder(ResourceKind::VirtualNetwork, VNET_NAME)
                .location(&location)
                .depends_on(&group)
                .property(
                    "addressSpace",
                    PropertyValue::map([("addressPrefixes", PropertyValue::list(["10.0.0.0/16"]))]),
                )
                .property(
                    "dhcpOptions",
                    PropertyValue::map([("dnsServers", PropertyValue::list(["8.8.8.8"]))]),
                )
                .property(
                    "subnets",
                    PropertyValue::list([PropertyValue::map([
                        ("name", PropertyValue::from(SUBNET_NAME)),
                        (
                            "properties",
                            PropertyValue::map([("addressPrefix", "10.0.0.0/24")]),
                        ),
                    ])]),
                )
                .build()?,
            ResourceDescriptor::builder(ResourceKind::PublicAddress, PUBLIC_IP_NAME)
                .location(&location)
                .depends_on(&group)
                .property("publicIPAllocationMethod", "Dynamic")
                .property(
                    "dnsSettings",
                    PropertyValue::map([(
                        "domainNameLabel",
                        format!("armflow-dns-{}", options.unique_suffix),
                    )]),
                )
                .build()?,
            ResourceDescriptor::builder(ResourceKind::NetworkInterface, &nic)
                .location(&location)
                .depends_on(VNET_NAME)
                .depends_on(PUBLIC_IP_NAME)
                .property(
                    "ipConfigurations",
                    PropertyValue::list([PropertyValue::map([
                        ("name", PropertyValue::from(nic.as_str())),
                        (
                            "properties",
                            PropertyValue::map([
                                ("privateIPAllocationMethod", PropertyValue::from("Dynamic")),
                                (
                                    "subnet",
                                    PropertyValue::map([(
                                        "id",
                                        ResourceRef::to(VNET_NAME)
                                            .with_suffix(format!("/subnets/{SUBNET_NAME}")),
                                    )]),
                                ),
                                (
                                    "publicIPAddress",
                                    PropertyValue::map([(
                                        "id",
                                        PropertyValue::reference(PUBLIC_IP_NAME),
                                    )]),
                                ),
                            ]),
                        ),
                    ])]),
                )
                .build()?,
            virtual_machine(options, &vm, &nic, &storage, &location, &admin_password)?,
        ];

        if options.ssh_public_key.is_some() {
            tracing::info!("SSH public key found, disabling password login");
        }

        Ok(Self {
            target,
            descriptors,
            vm_resource: vm,
            storage_account: storage,
            admin_password,
            password_login: options.ssh_public_key.is_none(),
        })
    }
}

fn storage_account(
    options: &SampleOptions,
    group: &str,
    name: &str,
    location: &str,
) -> Result<ResourceDescriptor, ValidationError> {
    let (sku_name, sku_tier) = options.profile.storage_sku();
    let builder = ResourceDescriptor::builder(ResourceKind::StorageAccount, name)
        .location(location)
        .depends_on(group)
        .property(
            "sku",
            PropertyValue::map([("name", sku_name), ("tier", sku_tier)]),
        )
        .property("kind", "Storage");
    let builder = match options.profile {
        CloudProfile::Public => builder.property(
            "encryption",
            PropertyValue::map([
                ("keySource", PropertyValue::from("Microsoft.Storage")),
                (
                    "services",
                    PropertyValue::map([("blob", PropertyValue::map([("enabled", false)]))]),
                ),
            ]),
        ),
        CloudProfile::Hybrid => builder,
    };
    builder.build()
}

fn virtual_machine(
    options: &SampleOptions,
    name: &str,
    nic: &str,
    storage: &str,
    location: &str,
    admin_password: &str,
) -> Result<ResourceDescriptor, ValidationError> {
    let (publisher, offer, sku, version) = options.profile.image();
    let vm_name = options.vm_name.as_str();
    let vhd_uri = format!(
        "https://{storage}.blob.{}/{VHD_CONTAINER}/{vm_name}.vhd",
        options.storage_suffix
    );

    let mut os_profile = vec![
        ("computerName", PropertyValue::from(vm_name)),
        ("adminUsername", PropertyValue::from(ADMIN_USERNAME)),
        ("adminPassword", PropertyValue::from(admin_password)),
    ];
    if let Some(key) = &options.ssh_public_key {
        os_profile.push((
            "linuxConfiguration",
            PropertyValue::map([
                ("disablePasswordAuthentication", PropertyValue::from(true)),
                (
                    "ssh",
                    PropertyValue::map([(
                        "publicKeys",
                        PropertyValue::list([PropertyValue::map([
                            ("keyData", key.trim()),
                            (
                                "path",
                                format!("/home/{ADMIN_USERNAME}/.ssh/authorized_keys").as_str(),
                            ),
                        ])]),
                    )]),
                ),
            ]),
        ));
    }

    ResourceDescriptor::builder(ResourceKind::VirtualMachine, name)
        .location(location)
        .depends_on(nic)
        .depends_on(storage)
        .property("hardwareProfile", PropertyValue::map([("vmSize", VM_SIZE)]))
        .property(
            "storageProfile",
            PropertyValue::map([
                (
                    "imageReference",
                    PropertyValue::map([
                        ("publisher", publisher),
                        ("offer", offer),
                        ("sku", sku),
                        ("version", version),
                    ]),
                ),
                (
                    "osDisk",
                    PropertyValue::map([
                        ("name", PropertyValue::from(format!("sample-os-disk-{vm_name}"))),
                        ("caching", PropertyValue::from("None")),
                        ("createOption", PropertyValue::from("FromImage")),
                        ("vhd", PropertyValue::map([("uri", vhd_uri)])),
                    ]),
                ),
            ]),
        )
        .property("osProfile", PropertyValue::map(os_profile))
        .property(
            "networkProfile",
            PropertyValue::map([(
                "networkInterfaces",
                PropertyValue::list([PropertyValue::map([("id", PropertyValue::reference(nic))])]),
            )]),
        )
        .build()
}

/// Expands a leading `~/` against `$HOME`.
#[must_use]
pub fn expand_home(path: &str) -> Utf8PathBuf {
    match (path.strip_prefix("~/"), env::var("HOME")) {
        (Some(rest), Ok(home)) => Utf8Path::new(&home).join(rest),
        _ => Utf8PathBuf::from(path),
    }
}

/// Reads the SSH public key at `path`, returning `None` when it is absent.
///
/// # Errors
///
/// Returns [`SampleError::SshKey`] when the file exists but cannot be read.
pub fn read_ssh_public_key(path: &Utf8Path) -> Result<Option<String>, SampleError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let Some(file_name) = path.file_name() else {
        return Ok(None);
    };
    let to_error = |err: io::Error| SampleError::SshKey {
        path: path.to_path_buf(),
        message: err.to_string(),
    };

    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(to_error(err)),
    };
    match dir.read_to_string(file_name) {
        Ok(contents) if contents.trim().is_empty() => Ok(None),
        Ok(contents) => {
            tracing::debug!(path = %path, "read SSH public key");
            Ok(Some(contents.trim().to_owned()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(to_error(err)),
    }
}
