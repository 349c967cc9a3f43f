use crate::{
    chart::ChartSources,
    common::error::{EmptyField, InvalidRevision, MappingNotFound, MappingRequired, Result},
    helm::{values::merge_values, ReleaseEngine},
    model::{ChartVersion, RegistryMapping, Release, ReleaseFilter, ReleaseHistory, Values},
    store::MappingStore,
};
use snafu::{ensure, OptionExt};
use std::{collections::HashSet, sync::Arc};
use tracing::info;

/// Checks that a release is identified by a non-empty namespace and name.
fn validate_release_id(namespace: &str, name: &str) -> Result<()> {
    ensure!(!namespace.is_empty(), EmptyField { field: "namespace" });
    ensure!(!name.is_empty(), EmptyField { field: "name" });
    Ok(())
}

/// Composes the registry mappings, the chart sources and the deployment engine into the
/// release operations exposed by the service.
///
/// Operations which apply a chart read the release first, then its mapping, then locate the
/// chart. A release without a mapping fails with MappingRequired before any chart source is
/// contacted. Nothing is written unless every earlier step succeeded.
pub struct UpgradeOrchestrator {
    engine: Arc<dyn ReleaseEngine>,
    mappings: Arc<MappingStore>,
    sources: ChartSources,
}

impl UpgradeOrchestrator {
    pub fn new(
        engine: Arc<dyn ReleaseEngine>,
        mappings: Arc<MappingStore>,
        sources: ChartSources,
    ) -> Self {
        Self {
            engine,
            mappings,
            sources,
        }
    }

    /// The mapping of the release, which must exist.
    async fn required_mapping(&self, namespace: &str, name: &str) -> Result<RegistryMapping> {
        self.mappings
            .get(namespace, name)
            .await?
            .context(MappingRequired {
                namespace,
                release_name: name,
            })
    }

    /// Lists releases across all namespaces, marking those which have a registry mapping.
    pub async fn list_releases(&self, filter: &ReleaseFilter) -> Result<Vec<Release>> {
        let releases = self.engine.list_releases().await?;
        let mapped: HashSet<(String, String)> = self
            .mappings
            .list()
            .await?
            .into_iter()
            .map(|mapping| (mapping.namespace, mapping.release_name))
            .collect();

        Ok(releases
            .into_iter()
            .map(|mut release| {
                release.has_registry =
                    mapped.contains(&(release.namespace.clone(), release.name.clone()));
                release
            })
            .filter(|release| filter.matches(release))
            .collect())
    }

    pub async fn get_release(&self, namespace: &str, name: &str) -> Result<Release> {
        validate_release_id(namespace, name)?;
        let mut release = self.engine.get_release(namespace, name).await?;
        release.has_registry = self.mappings.get(namespace, name).await?.is_some();
        Ok(release)
    }

    /// Lists the versions of the release's chart which its registry offers.
    pub async fn list_versions(&self, namespace: &str, name: &str) -> Result<Vec<ChartVersion>> {
        validate_release_id(namespace, name)?;
        let release = self.engine.get_release(namespace, name).await?;
        let mapping = self.required_mapping(namespace, name).await?;

        self.sources
            .resolve(mapping.registry.as_str(), release.chart.as_str())
            .await
    }

    /// Upgrades the release to chart_version of its chart, from its registry. Overrides replace
    /// the release's values key by key; all other values are kept.
    pub async fn upgrade_to_version(
        &self,
        namespace: &str,
        name: &str,
        chart_version: &str,
        overrides: Option<&Values>,
    ) -> Result<Release> {
        validate_release_id(namespace, name)?;
        ensure!(
            !chart_version.is_empty(),
            EmptyField {
                field: "chartVersion"
            }
        );

        let release = self.engine.get_release(namespace, name).await?;
        let mapping = self.required_mapping(namespace, name).await?;
        let chart = self
            .sources
            .locate(
                mapping.registry.as_str(),
                release.chart.as_str(),
                chart_version,
            )
            .await?;

        let values = merge_values(&release.values, overrides);
        let mut upgraded = self
            .engine
            .upgrade(namespace, name, &chart, &values, true)
            .await?;
        upgraded.has_registry = true;

        info!(
            %namespace,
            %name,
            from = %release.chart_version,
            to = %chart_version,
            revision = upgraded.revision,
            "Upgraded release"
        );
        Ok(upgraded)
    }

    pub async fn get_history(&self, namespace: &str, name: &str) -> Result<Vec<ReleaseHistory>> {
        validate_release_id(namespace, name)?;
        self.engine.get_history(namespace, name).await
    }

    pub async fn get_values(&self, namespace: &str, name: &str) -> Result<Values> {
        validate_release_id(namespace, name)?;
        self.engine.get_values(namespace, name).await
    }

    /// Re-applies the release's current chart version with changed values. An empty delta is a
    /// valid no-op change, but the delta itself is required.
    pub async fn update_values(
        &self,
        namespace: &str,
        name: &str,
        delta: Option<&Values>,
    ) -> Result<Release> {
        validate_release_id(namespace, name)?;
        let delta = delta.context(EmptyField { field: "values" })?;

        let release = self.engine.get_release(namespace, name).await?;
        let mapping = self.required_mapping(namespace, name).await?;
        let chart = self
            .sources
            .locate(
                mapping.registry.as_str(),
                release.chart.as_str(),
                release.chart_version.as_str(),
            )
            .await?;

        let values = merge_values(&release.values, Some(delta));
        let mut updated = self
            .engine
            .upgrade(namespace, name, &chart, &values, true)
            .await?;
        updated.has_registry = true;

        info!(
            %namespace,
            %name,
            keys = delta.len(),
            revision = updated.revision,
            "Updated release values"
        );
        Ok(updated)
    }

    /// Rolls the release back to a previous revision. Registry mappings are not involved.
    pub async fn rollback(&self, namespace: &str, name: &str, revision: i64) -> Result<Release> {
        validate_release_id(namespace, name)?;
        let target = u32::try_from(revision)
            .ok()
            .filter(|revision| *revision >= 1)
            .context(InvalidRevision { revision })?;

        self.engine.rollback(namespace, name, target).await?;
        let release = self.engine.get_release(namespace, name).await?;

        info!(%namespace, %name, to = target, revision = release.revision, "Rolled back release");
        Ok(release)
    }

    /// The registry mapping of the release.
    pub async fn get_mapping(&self, namespace: &str, name: &str) -> Result<RegistryMapping> {
        validate_release_id(namespace, name)?;
        self.mappings
            .get(namespace, name)
            .await?
            .context(MappingNotFound {
                namespace,
                release_name: name,
            })
    }

    /// Sets the registry of an existing release. The chart name is taken from the release.
    pub async fn set_mapping(
        &self,
        namespace: &str,
        name: &str,
        registry: &str,
    ) -> Result<RegistryMapping> {
        validate_release_id(namespace, name)?;
        ensure!(!registry.is_empty(), EmptyField { field: "registry" });

        let release = self.engine.get_release(namespace, name).await?;
        let mapping = RegistryMapping::new(namespace, name, release.chart, registry);
        self.mappings.set(mapping.clone()).await?;

        Ok(mapping)
    }

    /// Deletes the registry mapping of the release, if there is one.
    pub async fn delete_mapping(&self, namespace: &str, name: &str) -> Result<()> {
        validate_release_id(namespace, name)?;
        self.mappings.delete(namespace, name).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::UpgradeOrchestrator;
    use crate::{
        chart::{CachedChart, ChartSource, ChartSources},
        common::error::{ErrorKind, ReleaseNotFound, Result},
        helm::ReleaseEngine,
        model::{ChartVersion, RegistryMapping, Release, ReleaseFilter, ReleaseHistory, Values},
        store::{InMemoryRecordStore, MappingStore},
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::{
        collections::HashMap,
        path::PathBuf,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    pub(crate) fn values(value: Value) -> Values {
        match value {
            Value::Object(map) => map,
            _ => panic!("test values must be a JSON object"),
        }
    }

    pub(crate) fn release(namespace: &str, name: &str, version: &str, revision: u32) -> Release {
        Release {
            name: name.to_string(),
            namespace: namespace.to_string(),
            chart: name.to_string(),
            chart_version: version.to_string(),
            app_version: String::new(),
            status: "deployed".to_string(),
            updated: None,
            revision,
            has_registry: false,
            values: Values::new(),
        }
    }

    /// A deployment engine which keeps releases in memory. Upgrades bump the revision and store
    /// the applied values; rollbacks restore a revision's chart version and values.
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        releases: Mutex<HashMap<(String, String), Vec<Release>>>,
        pub(crate) upgrades: AtomicUsize,
    }

    impl FakeEngine {
        pub(crate) fn with_release(self, release: Release) -> Self {
            self.releases
                .lock()
                .unwrap()
                .insert((release.namespace.clone(), release.name.clone()), vec![release]);
            self
        }

        fn current(&self, namespace: &str, name: &str) -> Result<Release> {
            self.releases
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .and_then(|revisions| revisions.last().cloned())
                .ok_or_else(|| {
                    ReleaseNotFound {
                        name,
                        namespace,
                        std_err: "Error: release: not found",
                    }
                    .build()
                })
        }
    }

    #[async_trait]
    impl ReleaseEngine for FakeEngine {
        async fn list_releases(&self) -> Result<Vec<Release>> {
            let mut releases: Vec<Release> = self
                .releases
                .lock()
                .unwrap()
                .values()
                .filter_map(|revisions| revisions.last().cloned())
                .collect();
            releases.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(releases)
        }

        async fn get_release(&self, namespace: &str, name: &str) -> Result<Release> {
            self.current(namespace, name)
        }

        async fn get_history(&self, namespace: &str, name: &str) -> Result<Vec<ReleaseHistory>> {
            self.current(namespace, name)?;
            let releases = self.releases.lock().unwrap();
            Ok(releases[&(namespace.to_string(), name.to_string())]
                .iter()
                .map(|release| ReleaseHistory {
                    revision: release.revision,
                    updated: None,
                    status: release.status.clone(),
                    chart: release.chart_version.clone(),
                    app_version: release.app_version.clone(),
                    description: String::new(),
                })
                .collect())
        }

        async fn get_values(&self, namespace: &str, name: &str) -> Result<Values> {
            Ok(self.current(namespace, name)?.values)
        }

        async fn upgrade(
            &self,
            namespace: &str,
            name: &str,
            chart: &CachedChart,
            values: &Values,
            reuse_values: bool,
        ) -> Result<Release> {
            assert!(reuse_values);
            self.upgrades.fetch_add(1, Ordering::SeqCst);

            let mut next = self.current(namespace, name)?;
            next.chart_version = chart.version().to_string();
            next.revision += 1;
            next.values = values.clone();
            self.releases
                .lock()
                .unwrap()
                .entry((namespace.to_string(), name.to_string()))
                .or_default()
                .push(next.clone());
            Ok(next)
        }

        async fn rollback(&self, namespace: &str, name: &str, revision: u32) -> Result<()> {
            let mut releases = self.releases.lock().unwrap();
            let revisions = releases
                .get_mut(&(namespace.to_string(), name.to_string()))
                .ok_or_else(|| {
                    ReleaseNotFound {
                        name,
                        namespace,
                        std_err: "Error: release: not found",
                    }
                    .build()
                })?;
            let mut restored = revisions
                .iter()
                .find(|release| release.revision == revision)
                .cloned()
                .ok_or_else(|| {
                    ReleaseNotFound {
                        name,
                        namespace,
                        std_err: format!("Error: release: not found: revision {revision}"),
                    }
                    .build()
                })?;
            restored.revision = revisions.last().map_or(0, |last| last.revision) + 1;
            revisions.push(restored);
            Ok(())
        }
    }

    /// A chart source which serves fixed versions of any chart, and counts its calls.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub(crate) versions: Vec<&'static str>,
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl ChartSource for FakeSource {
        fn handles(&self, _registry: &str) -> bool {
            true
        }

        async fn resolve(&self, _registry: &str, _chart_name: &str) -> Result<Vec<ChartVersion>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.versions.iter().map(ChartVersion::bare).collect())
        }

        async fn locate(
            &self,
            _registry: &str,
            chart_name: &str,
            version: &str,
        ) -> Result<CachedChart> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CachedChart::new(
                PathBuf::from(format!("/cache/{chart_name}-{version}.tgz")),
                chart_name,
                version,
            ))
        }
    }

    pub(crate) struct Fixture {
        pub(crate) orchestrator: UpgradeOrchestrator,
        pub(crate) engine: Arc<FakeEngine>,
        pub(crate) source: Arc<FakeSource>,
        pub(crate) mappings: Arc<MappingStore>,
    }

    /// payments/checkout at chart version 1.0.0, revision 3, values {"replicas": 2, "image": ...}.
    pub(crate) fn fixture() -> Fixture {
        let mut checkout = release("payments", "checkout", "1.0.0", 3);
        checkout.values = values(json!({"replicas": 2, "image": {"tag": "1.0.0"}}));

        let engine = Arc::new(
            FakeEngine::default()
                .with_release(checkout)
                .with_release(release("billing", "ledger", "2.0.0", 1)),
        );
        let source = Arc::new(FakeSource {
            versions: vec!["1.1.0", "1.0.0"],
            ..Default::default()
        });
        let mappings = Arc::new(MappingStore::new(Arc::new(InMemoryRecordStore::new())));
        let orchestrator = UpgradeOrchestrator::new(
            engine.clone(),
            mappings.clone(),
            ChartSources::new().with_source(source.clone()),
        );

        Fixture {
            orchestrator,
            engine,
            source,
            mappings,
        }
    }

    #[tokio::test]
    async fn test_upgrade_to_version() {
        let fixture = fixture();
        fixture
            .orchestrator
            .set_mapping("payments", "checkout", "oci://example.com/charts")
            .await
            .unwrap();

        let overrides = values(json!({"replicas": 3}));
        let upgraded = fixture
            .orchestrator
            .upgrade_to_version("payments", "checkout", "1.1.0", Some(&overrides))
            .await
            .unwrap();

        assert_eq!(upgraded.chart_version, "1.1.0");
        assert_eq!(upgraded.revision, 4);
        assert_eq!(
            upgraded.values,
            values(json!({"replicas": 3, "image": {"tag": "1.0.0"}}))
        );
        assert!(upgraded.has_registry);
    }

    #[tokio::test]
    async fn test_mapping_required_before_chart_sources() {
        let fixture = fixture();

        let error = fixture
            .orchestrator
            .upgrade_to_version("payments", "checkout", "1.1.0", None)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MappingRequired);
        assert!(error.to_string().contains("please set registry first"));

        let error = fixture
            .orchestrator
            .list_versions("payments", "checkout")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MappingRequired);

        let error = fixture
            .orchestrator
            .update_values("payments", "checkout", Some(&Values::new()))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MappingRequired);

        assert_eq!(fixture.source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.engine.upgrades.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_values_keeps_version_and_siblings() {
        let fixture = fixture();
        let mut release = release("payments", "cart", "1.0.0", 1);
        release.values = values(json!({"x": 1, "y": 2}));
        let engine = Arc::new(FakeEngine::default().with_release(release));
        let orchestrator = UpgradeOrchestrator::new(
            engine.clone(),
            fixture.mappings.clone(),
            ChartSources::new().with_source(fixture.source.clone()),
        );
        orchestrator
            .set_mapping("payments", "cart", "oci://example.com/charts")
            .await
            .unwrap();

        let updated = orchestrator
            .update_values("payments", "cart", Some(&values(json!({"x": 5}))))
            .await
            .unwrap();
        assert_eq!(updated.chart_version, "1.0.0");
        assert_eq!(updated.revision, 2);
        assert_eq!(updated.values, values(json!({"x": 5, "y": 2})));

        // An empty delta is a valid change.
        let updated = orchestrator
            .update_values("payments", "cart", Some(&Values::new()))
            .await
            .unwrap();
        assert_eq!(updated.values, values(json!({"x": 5, "y": 2})));

        let error = orchestrator
            .update_values("payments", "cart", None)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_validation() {
        let fixture = fixture();
        let orchestrator = &fixture.orchestrator;

        let error = orchestrator
            .upgrade_to_version("payments", "checkout", "", None)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);

        let error = orchestrator.get_release("", "checkout").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);

        let error = orchestrator
            .set_mapping("payments", "checkout", "")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);

        for revision in [0, -1, i64::from(u32::MAX) + 1] {
            let error = orchestrator
                .rollback("payments", "checkout", revision)
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Validation, "{revision}");
        }
    }

    #[tokio::test]
    async fn test_list_versions() {
        let fixture = fixture();
        fixture
            .orchestrator
            .set_mapping("payments", "checkout", "oci://example.com/charts")
            .await
            .unwrap();

        let versions = fixture
            .orchestrator
            .list_versions("payments", "checkout")
            .await
            .unwrap();
        assert_eq!(
            versions,
            vec![ChartVersion::bare("1.1.0"), ChartVersion::bare("1.0.0")]
        );
    }

    #[tokio::test]
    async fn test_rollback() {
        let fixture = fixture();
        fixture
            .orchestrator
            .set_mapping("payments", "checkout", "oci://example.com/charts")
            .await
            .unwrap();
        fixture
            .orchestrator
            .upgrade_to_version("payments", "checkout", "1.1.0", None)
            .await
            .unwrap();

        let release = fixture
            .orchestrator
            .rollback("payments", "checkout", 3)
            .await
            .unwrap();
        assert_eq!(release.chart_version, "1.0.0");
        assert_eq!(release.revision, 5);

        let history = fixture
            .orchestrator
            .get_history("payments", "checkout")
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_mapping_operations() {
        let fixture = fixture();
        let orchestrator = &fixture.orchestrator;

        let error = orchestrator
            .get_mapping("payments", "checkout")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        let mapping = orchestrator
            .set_mapping("payments", "checkout", "oci://example.com/charts")
            .await
            .unwrap();
        assert_eq!(
            mapping,
            RegistryMapping::new("payments", "checkout", "checkout", "oci://example.com/charts")
        );
        assert_eq!(
            orchestrator.get_mapping("payments", "checkout").await.unwrap(),
            mapping
        );

        // The release must exist, so that its chart name can be recorded.
        let error = orchestrator
            .set_mapping("payments", "missing", "oci://example.com/charts")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        orchestrator.delete_mapping("payments", "checkout").await.unwrap();
        orchestrator.delete_mapping("payments", "checkout").await.unwrap();
        assert!(orchestrator.get_mapping("payments", "checkout").await.is_err());
    }

    #[tokio::test]
    async fn test_list_releases() {
        let fixture = fixture();
        fixture
            .orchestrator
            .set_mapping("payments", "checkout", "oci://example.com/charts")
            .await
            .unwrap();

        let releases = fixture
            .orchestrator
            .list_releases(&ReleaseFilter::default())
            .await
            .unwrap();
        let flags: Vec<(&str, bool)> = releases
            .iter()
            .map(|release| (release.name.as_str(), release.has_registry))
            .collect();
        assert_eq!(flags, vec![("checkout", true), ("ledger", false)]);

        let filter = ReleaseFilter {
            namespace: None,
            has_registry: Some(false),
        };
        let releases = fixture.orchestrator.list_releases(&filter).await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].name, "ledger");

        let filter = ReleaseFilter {
            namespace: Some("payments".to_string()),
            has_registry: None,
        };
        let releases = fixture.orchestrator.list_releases(&filter).await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].name, "checkout");
    }
}
