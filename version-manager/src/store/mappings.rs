use crate::{
    common::{
        constants::MAPPINGS_RECORD_KEY,
        error::{DeserializeMappings, EmptyField, Result, SerializeMappings},
    },
    model::RegistryMapping,
    store::RecordStore,
};
use snafu::{ensure, ResultExt};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// The whole mapping set, keyed by "<namespace>/<release-name>".
type MappingSet = BTreeMap<String, RegistryMapping>;

/// Generates the document key of the mapping for a release.
fn mapping_key(namespace: &str, release_name: &str) -> String {
    format!("{namespace}/{release_name}")
}

/// This is the only authority on which registry supplies upgrades for a release. The full
/// mapping set is one JSON document inside a single shared record; every operation reads (and
/// for writers, rewrites) the whole document.
///
/// Readers (get, list) share the lock. Writers (set, delete) hold it exclusively across the
/// read-modify-write. This serializes callers inside this process only: two processes writing
/// the same record may still overwrite each other's changes (last write wins). Run a single
/// replica if that is not acceptable.
pub struct MappingStore {
    record_store: Arc<dyn RecordStore>,
    record_key: String,
    lock: RwLock<()>,
}

impl MappingStore {
    /// Creates a store over the mappings record of record_store.
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self {
            record_store,
            record_key: MAPPINGS_RECORD_KEY.to_string(),
            lock: RwLock::new(()),
        }
    }

    /// Returns the mapping for the release, if there is one.
    pub async fn get(
        &self,
        namespace: &str,
        release_name: &str,
    ) -> Result<Option<RegistryMapping>> {
        let _guard = self.lock.read().await;

        let mut mappings = self.load().await?;
        Ok(mappings.remove(&mapping_key(namespace, release_name)))
    }

    /// Replaces the mapping for mapping's release.
    pub async fn set(&self, mapping: RegistryMapping) -> Result<()> {
        ensure!(!mapping.namespace.is_empty(), EmptyField { field: "namespace" });
        ensure!(
            !mapping.release_name.is_empty(),
            EmptyField {
                field: "releaseName"
            }
        );
        ensure!(!mapping.registry.is_empty(), EmptyField { field: "registry" });

        let _guard = self.lock.write().await;

        let mut mappings = self.load().await?;
        let key = mapping_key(&mapping.namespace, &mapping.release_name);
        info!(%key, registry = %mapping.registry, "Setting registry mapping");
        mappings.insert(key, mapping);

        self.save(&mappings).await
    }

    /// Removes the mapping for the release. Removing an absent mapping succeeds.
    pub async fn delete(&self, namespace: &str, release_name: &str) -> Result<()> {
        let _guard = self.lock.write().await;

        let mut mappings = self.load().await?;
        let key = mapping_key(namespace, release_name);
        if mappings.remove(&key).is_none() {
            debug!(%key, "No registry mapping to delete");
            return Ok(());
        }

        self.save(&mappings).await?;
        info!(%key, "Deleted registry mapping");
        Ok(())
    }

    /// Returns all mappings, in no particular order.
    pub async fn list(&self) -> Result<Vec<RegistryMapping>> {
        let _guard = self.lock.read().await;

        Ok(self.load().await?.into_values().collect())
    }

    /// Reads the mapping set. A missing or empty record is an empty set.
    async fn load(&self) -> Result<MappingSet> {
        match self.record_store.read_record(&self.record_key).await? {
            Some(document) if !document.trim().is_empty() => {
                serde_json::from_str(document.as_str()).context(DeserializeMappings)
            }
            _ => Ok(MappingSet::new()),
        }
    }

    /// Writes the whole mapping set back.
    async fn save(&self, mappings: &MappingSet) -> Result<()> {
        let document = serde_json::to_string(mappings).context(SerializeMappings)?;
        self.record_store
            .write_record(&self.record_key, document)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::MappingStore;
    use crate::{
        common::{
            constants::MAPPINGS_RECORD_KEY,
            error::{ErrorKind, HttpStatus, Result},
        },
        model::RegistryMapping,
        store::{InMemoryRecordStore, RecordStore},
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    fn checkout(registry: &str) -> RegistryMapping {
        RegistryMapping::new("payments", "checkout", "checkout", registry)
    }

    /// A record store whose backing object cannot be reached.
    struct UnreachableRecordStore;

    #[async_trait]
    impl RecordStore for UnreachableRecordStore {
        async fn read_record(&self, _key: &str) -> Result<Option<String>> {
            HttpStatus {
                url: "https://kube-apiserver",
                status: 503u16,
            }
            .fail()
        }

        async fn write_record(&self, _key: &str, _document: String) -> Result<()> {
            unreachable!("nothing is written without a successful read")
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MappingStore::new(Arc::new(InMemoryRecordStore::new()));
        let mapping = checkout("oci://example.com/charts");

        store.set(mapping.clone()).await.unwrap();
        assert_eq!(
            store.get("payments", "checkout").await.unwrap(),
            Some(mapping)
        );
        assert_eq!(store.get("payments", "other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MappingStore::new(Arc::new(InMemoryRecordStore::new()));
        let first = checkout("oci://example.com/charts");
        let second = RegistryMapping::new("payments", "checkout", "checkout-v2", "oci://ghcr.io/x");

        store.set(first).await.unwrap();
        store.set(second.clone()).await.unwrap();
        assert_eq!(
            store.get("payments", "checkout").await.unwrap(),
            Some(second)
        );
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_requires_registry() {
        let store = MappingStore::new(Arc::new(InMemoryRecordStore::new()));

        let error = store.set(checkout("")).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(store.list().await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MappingStore::new(Arc::new(InMemoryRecordStore::new()));
        store.set(checkout("oci://example.com/charts")).await.unwrap();

        store.delete("payments", "checkout").await.unwrap();
        store.delete("payments", "checkout").await.unwrap();
        assert_eq!(store.get("payments", "checkout").await.unwrap(), None);

        // Deleting from a store which has never been written to.
        let empty = MappingStore::new(Arc::new(InMemoryRecordStore::new()));
        empty.delete("payments", "checkout").await.unwrap();
    }

    #[tokio::test]
    async fn test_list() {
        let store = MappingStore::new(Arc::new(InMemoryRecordStore::new()));
        assert!(store.list().await.unwrap().is_empty());

        store.set(checkout("oci://example.com/charts")).await.unwrap();
        store
            .set(RegistryMapping::new("billing", "ledger", "ledger", "bitnami"))
            .await
            .unwrap();

        let mut names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.release_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["checkout".to_string(), "ledger".to_string()]);
    }

    #[tokio::test]
    async fn test_reads_existing_document() {
        let record_store = Arc::new(InMemoryRecordStore::new());
        record_store
            .write_record(
                MAPPINGS_RECORD_KEY,
                r#"{"payments/checkout":{"namespace":"payments","releaseName":"checkout","chartName":"checkout","registry":"oci://example.com/charts"}}"#.to_string(),
            )
            .await
            .unwrap();

        let store = MappingStore::new(record_store.clone());
        assert_eq!(
            store.get("payments", "checkout").await.unwrap(),
            Some(checkout("oci://example.com/charts"))
        );

        record_store
            .write_record(MAPPINGS_RECORD_KEY, String::new())
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_record_is_an_error() {
        let store = MappingStore::new(Arc::new(UnreachableRecordStore));

        let error = store.get("payments", "checkout").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Upstream);
        assert!(store.list().await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writers_in_one_process() {
        let store = Arc::new(MappingStore::new(Arc::new(InMemoryRecordStore::new())));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set(RegistryMapping::new(
                            "payments",
                            format!("release-{i}"),
                            "checkout",
                            "oci://example.com/charts",
                        ))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // The lock serializes the read-modify-write cycles, so no write is lost.
        assert_eq!(store.list().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_writers_in_separate_processes_race() {
        // Two store instances over one backing record model two replicas. Their locks are
        // independent, so interleaved read-modify-write cycles lose updates.
        let record_store = Arc::new(InMemoryRecordStore::new());
        let replica_a = MappingStore::new(record_store.clone());
        let replica_b = MappingStore::new(record_store.clone());

        let mut snapshot_b = replica_b.load().await.unwrap();

        replica_a.set(checkout("oci://example.com/charts")).await.unwrap();

        snapshot_b.insert(
            "billing/ledger".to_string(),
            RegistryMapping::new("billing", "ledger", "ledger", "bitnami"),
        );
        replica_b.save(&snapshot_b).await.unwrap();

        assert_eq!(replica_a.get("payments", "checkout").await.unwrap(), None);
        assert!(replica_a.get("billing", "ledger").await.unwrap().is_some());
    }
}
