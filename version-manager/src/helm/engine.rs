use crate::{
    chart::CachedChart,
    common::error::Result,
    model::{Release, ReleaseHistory, Values},
};
use async_trait::async_trait;

/// The deployment engine's release primitives. Each call is treated as atomic.
#[async_trait]
pub trait ReleaseEngine: Send + Sync {
    /// Lists releases across all namespaces.
    async fn list_releases(&self) -> Result<Vec<Release>>;

    /// Gets the current state of a release, including its user-supplied values.
    async fn get_release(&self, namespace: &str, name: &str) -> Result<Release>;

    /// Gets the most recent revisions of a release.
    async fn get_history(&self, namespace: &str, name: &str) -> Result<Vec<ReleaseHistory>>;

    /// Gets the user-supplied values of a release.
    async fn get_values(&self, namespace: &str, name: &str) -> Result<Values>;

    /// Upgrades a release to the chart artifact, applying values. With reuse_values, values of
    /// the previous revision which are not in values are carried over.
    async fn upgrade(
        &self,
        namespace: &str,
        name: &str,
        chart: &CachedChart,
        values: &Values,
        reuse_values: bool,
    ) -> Result<Release>;

    /// Rolls a release back to revision.
    async fn rollback(&self, namespace: &str, name: &str, revision: u32) -> Result<()>;
}
