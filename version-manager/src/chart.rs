use crate::{
    common::{
        constants::MAX_REGISTRY_VERSIONS,
        error::{
            ChartVersionNotFound, CreateDirectory, HttpRequest, HttpResponseBody, HttpStatus,
            Result, UnsupportedRegistry,
        },
        file::write_atomically,
    },
    model::ChartVersion,
};
use async_trait::async_trait;
use snafu::{ensure, ResultExt};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

/// Chart sources which serve classic repository index files.
pub mod index;
/// Chart sources which are OCI registries.
pub mod oci;

pub use index::IndexChartSource;
pub use oci::OciChartSource;

/// A chart artifact in the local cache, ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedChart {
    path: PathBuf,
    chart_name: String,
    version: String,
}

impl CachedChart {
    /// Creates a handle to a cached chart archive.
    pub fn new<A, B>(path: PathBuf, chart_name: A, version: B) -> Self
    where
        A: ToString,
        B: ToString,
    {
        Self {
            path,
            chart_name: chart_name.to_string(),
            version: version.to_string(),
        }
    }

    /// Path of the chart archive.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn chart_name(&self) -> &str {
        self.chart_name.as_str()
    }

    pub fn version(&self) -> &str {
        self.version.as_str()
    }
}

/// The cache location of a chart archive. The same chart name and version always map to the
/// same file.
pub fn cache_path(cache_dir: &Path, chart_name: &str, version: &str) -> PathBuf {
    let name = chart_name.rsplit('/').next().unwrap_or(chart_name);
    cache_dir.join(format!("{name}-{version}.tgz"))
}

/// Writes a downloaded chart archive to the cache, replacing an earlier copy. The archive only
/// appears at its cache path once it is complete.
pub(crate) async fn write_chart(
    cache_dir: &Path,
    chart_name: &str,
    version: &str,
    content: &[u8],
) -> Result<CachedChart> {
    tokio::fs::create_dir_all(cache_dir)
        .await
        .context(CreateDirectory { path: cache_dir })?;

    let path = cache_path(cache_dir, chart_name, version);
    write_atomically(path.as_path(), content)?;

    debug!(path = %path.display(), bytes = content.len(), "Cached chart archive");
    Ok(CachedChart::new(path, chart_name, version))
}

/// GETs url and returns the response body.
pub(crate) async fn download(http: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    debug!(%url, "Downloading");
    let response = http.get(url).send().await.context(HttpRequest { url })?;
    let status = response.status();
    ensure!(
        status.is_success(),
        HttpStatus {
            url,
            status: status.as_u16()
        }
    );

    let body = response.bytes().await.context(HttpResponseBody { url })?;
    Ok(body.to_vec())
}

/// Reverses the upstream tag order so that the most recently pushed tags come first, and keeps
/// at most MAX_REGISTRY_VERSIONS of them.
pub(crate) fn newest_first(mut tags: Vec<String>) -> Vec<String> {
    tags.reverse();
    tags.truncate(MAX_REGISTRY_VERSIONS);
    tags
}

/// A strategy for finding the versions of a chart and fetching chart archives.
#[async_trait]
pub trait ChartSource: Send + Sync {
    /// Checks if this source serves the registry reference.
    fn handles(&self, registry: &str) -> bool;

    /// Lists the available versions of the chart.
    async fn resolve(&self, registry: &str, chart_name: &str) -> Result<Vec<ChartVersion>>;

    /// Fetches the chart archive of the version, or reuses a cached copy.
    async fn locate(&self, registry: &str, chart_name: &str, version: &str) -> Result<CachedChart>;
}

/// The chart sources of the service, in order of preference. The first source which handles a
/// registry reference serves it.
#[derive(Clone, Default)]
pub struct ChartSources {
    sources: Vec<Arc<dyn ChartSource>>,
}

impl ChartSources {
    /// Creates an empty set of sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source. Sources added earlier take precedence.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ChartSource>) -> Self {
        self.sources.push(source);
        self
    }

    fn select(&self, registry: &str) -> Result<&dyn ChartSource> {
        self.sources
            .iter()
            .find(|source| source.handles(registry))
            .map(|source| source.as_ref())
            .ok_or_else(|| UnsupportedRegistry { registry }.build())
    }

    /// Lists the available versions of the chart at the registry.
    pub async fn resolve(&self, registry: &str, chart_name: &str) -> Result<Vec<ChartVersion>> {
        self.select(registry)?.resolve(registry, chart_name).await
    }

    /// Fetches the chart archive of the version from the registry.
    pub async fn locate(
        &self,
        registry: &str,
        chart_name: &str,
        version: &str,
    ) -> Result<CachedChart> {
        ensure!(
            !version.is_empty(),
            ChartVersionNotFound {
                chart_name,
                version,
                registry
            }
        );

        self.select(registry)?
            .locate(registry, chart_name, version)
            .await
    }
}
