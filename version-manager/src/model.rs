use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The structured configuration of a release. Keys map to arbitrary structured values.
pub type Values = serde_json::Map<String, serde_json::Value>;

/// The persisted link from a release to the chart registry which supplies its upgrades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMapping {
    pub namespace: String,
    pub release_name: String,
    /// Chart name reported by the release when the mapping was set.
    pub chart_name: String,
    /// Registry reference, e.g. oci://ghcr.io/org/charts.
    pub registry: String,
}

impl RegistryMapping {
    /// Creates a new mapping.
    pub fn new<A, B, C, D>(namespace: A, release_name: B, chart_name: C, registry: D) -> Self
    where
        A: ToString,
        B: ToString,
        C: ToString,
        D: ToString,
    {
        Self {
            namespace: namespace.to_string(),
            release_name: release_name.to_string(),
            chart_name: chart_name.to_string(),
            registry: registry.to_string(),
        }
    }
}

/// A named, namespaced instance of a deployed chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub namespace: String,
    /// Chart name.
    pub chart: String,
    pub chart_version: String,
    pub app_version: String,
    pub status: String,
    pub updated: Option<DateTime<Utc>>,
    pub revision: u32,
    /// Set when listing, if the release has a registry mapping.
    #[serde(default)]
    pub has_registry: bool,
    /// User-supplied configuration values. Served separately, through the values endpoint.
    #[serde(skip)]
    pub values: Values,
}

/// One discoverable version of a chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChartVersion {
    /// A version for which only the version string is known.
    pub fn bare<T: ToString>(version: T) -> Self {
        Self {
            version: version.to_string(),
            app_version: None,
            description: None,
        }
    }
}

/// One revision of a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseHistory {
    pub revision: u32,
    pub updated: Option<DateTime<Utc>>,
    pub status: String,
    /// Chart version of the revision.
    pub chart: String,
    pub app_version: String,
    pub description: String,
}

/// A classic chart repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
}

/// Filters for release listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFilter {
    pub namespace: Option<String>,
    pub has_registry: Option<bool>,
}

impl ReleaseFilter {
    /// Checks if a release passes the filter.
    pub fn matches(&self, release: &Release) -> bool {
        if let Some(namespace) = self.namespace.as_deref() {
            if !namespace.is_empty() && release.namespace != namespace {
                return false;
            }
        }
        match self.has_registry {
            Some(has_registry) => release.has_registry == has_registry,
            None => true,
        }
    }
}

/// Request to upgrade a release to a chart version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionUpgradeRequest {
    #[serde(default)]
    pub chart_version: String,
    #[serde(default)]
    pub values: Option<Values>,
}

/// Request to change the values of a release.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValuesUpdateRequest {
    #[serde(default)]
    pub values: Option<Values>,
}

/// Request to roll a release back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackRequest {
    #[serde(default)]
    pub revision: i64,
}

/// Request to set the registry of a release.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetRegistryRequest {
    #[serde(default)]
    pub registry: String,
}

/// Request to add a chart repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddRepositoryRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}
