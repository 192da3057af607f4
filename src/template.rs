//! Read-only export of a resource group's declared state.

use crate::provider::ProviderClient;

/// Selects which resources an export covers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ResourceFilter {
    /// Every resource in the group.
    #[default]
    All,
    /// Only the listed resource ids.
    Only(Vec<String>),
}

impl ResourceFilter {
    /// Renders the filter as the list the management API expects.
    #[must_use]
    pub fn to_resource_list(&self) -> Vec<String> {
        match self {
            Self::All => vec![String::from("*")],
            Self::Only(ids) => ids.clone(),
        }
    }
}

/// Performs a single template read through the provider.
///
/// The returned text is passed through untouched; parsing it is up to the
/// caller.
#[derive(Clone, Debug, Default)]
pub struct TemplateExporter {
    filter: ResourceFilter,
}

impl TemplateExporter {
    /// Creates an exporter with the given filter.
    #[must_use]
    pub const fn new(filter: ResourceFilter) -> Self {
        Self { filter }
    }

    /// Filter used by [`TemplateExporter::export`].
    #[must_use]
    pub const fn filter(&self) -> &ResourceFilter {
        &self.filter
    }

    /// Exports the template of `group`.
    ///
    /// # Errors
    ///
    /// Propagates the provider's error unchanged.
    pub async fn export<P: ProviderClient>(
        &self,
        provider: &P,
        group: &str,
    ) -> Result<String, P::Error> {
        tracing::debug!(group, filter = ?self.filter, "exporting template");
        provider.export_template(group, &self.filter).await
    }
}
