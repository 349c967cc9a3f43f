use crate::common::{
    constants::{SERVICE_NAME, STORE_LABEL_KEY},
    error::{K8sClientGeneration, ReadRecord, Result, WriteRecord},
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{Api, Patch, PatchParams},
    core::ObjectMeta,
    Client,
};
use snafu::ResultExt;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

/// The registry mapping store.
pub mod mappings;

pub use mappings::MappingStore;

/// A shared key-value configuration primitive, owned outside this process. Reading an absent
/// record is not an error.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Reads the document stored under key, if any.
    async fn read_record(&self, key: &str) -> Result<Option<String>>;

    /// Replaces the document stored under key.
    async fn write_record(&self, key: &str, document: String) -> Result<()>;
}

/// Records stored as data keys of a single Kubernetes ConfigMap.
#[derive(Clone)]
pub struct ConfigMapRecordStore {
    api: Api<ConfigMap>,
    name: String,
    namespace: String,
}

impl ConfigMapRecordStore {
    /// Creates a store over the ConfigMap name in namespace, using the default kube config.
    pub async fn new<A, B>(namespace: A, name: B) -> Result<Self>
    where
        A: ToString,
        B: ToString,
    {
        let client = Client::try_default().await.context(K8sClientGeneration)?;
        Ok(Self::with_client(client, namespace, name))
    }

    /// Creates a store using an existing kube::Client.
    pub fn with_client<A, B>(client: Client, namespace: A, name: B) -> Self
    where
        A: ToString,
        B: ToString,
    {
        let namespace = namespace.to_string();
        Self {
            api: Api::namespaced(client, namespace.as_str()),
            name: name.to_string(),
            namespace,
        }
    }
}

#[async_trait]
impl RecordStore for ConfigMapRecordStore {
    async fn read_record(&self, key: &str) -> Result<Option<String>> {
        let maybe_cm = self
            .api
            .get_opt(self.name.as_str())
            .await
            .context(ReadRecord {
                key,
                name: self.name.as_str(),
                namespace: self.namespace.as_str(),
            })?;

        Ok(maybe_cm
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(key)))
    }

    async fn write_record(&self, key: &str, document: String) -> Result<()> {
        let mut labels = BTreeMap::new();
        labels.insert(STORE_LABEL_KEY.to_string(), SERVICE_NAME.to_string());
        let mut data = BTreeMap::new();
        data.insert(key.to_string(), document);

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        // Server-side apply creates the ConfigMap if it does not exist yet.
        let ssapply = PatchParams::apply(SERVICE_NAME).force();
        self.api
            .patch(self.name.as_str(), &ssapply, &Patch::Apply(&cm))
            .await
            .context(WriteRecord {
                key,
                name: self.name.as_str(),
                namespace: self.namespace.as_str(),
            })?;

        debug!(name = %self.name, namespace = %self.namespace, %key, "Wrote ConfigMap record");
        Ok(())
    }
}

/// Records held in process memory. Used for local runs without a cluster, and in tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<String, String>>,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn read_record(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn write_record(&self, key: &str, document: String) -> Result<()> {
        self.records.lock().await.insert(key.to_string(), document);
        Ok(())
    }
}
