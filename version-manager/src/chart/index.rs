use crate::{
    chart::{cache_path, download, write_chart, CachedChart, ChartSource},
    common::{
        constants::INDEX_FILE_NAME,
        error::{
            ChartUrlParse, ChartVersionNotFound, CreateDirectory, HttpClientBuild,
            InvalidRepositoryUrl, ReadingFile, Result, YamlParseFromFile, YamlParseFromUrl,
            YamlSerialize,
        },
        file::write_atomically,
    },
    model::ChartVersion,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::{
    collections::BTreeMap,
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};
use url::Url;

/// Helm's repository file, usually '$HOME/.config/helm/repositories.yaml'. Fields this service
/// does not use are carried over unchanged when the file is rewritten.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RepositoryFile {
    #[serde(default)]
    repositories: Option<Vec<RepositoryEntry>>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// One chart repository in the repository file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl RepositoryEntry {
    /// Creates an entry with only a name and a URL.
    pub fn new<A, B>(name: A, url: B) -> Self
    where
        A: ToString,
        B: ToString,
    {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl RepositoryFile {
    /// Reads the repository file. A missing file has no repositories.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(error) if error.kind() == IoErrorKind::NotFound => {
                debug!(path = %path.display(), "No repository file");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(error).context(ReadingFile { filepath: path });
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(content.as_str()).context(YamlParseFromFile { filepath: path })
    }

    /// Writes the repository file, creating its directory if needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .context(CreateDirectory { path: dir })?;
        }
        let content = serde_yaml::to_string(self).context(YamlSerialize { filepath: path })?;
        write_atomically(path, content.as_bytes())
    }

    /// The repositories, in file order.
    pub fn repositories(&self) -> &[RepositoryEntry] {
        self.repositories.as_deref().unwrap_or_default()
    }

    /// Finds a repository by name.
    pub fn get(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories().iter().find(|entry| entry.name == name)
    }

    /// Appends a repository.
    pub fn push(&mut self, entry: RepositoryEntry) {
        self.repositories.get_or_insert_with(Vec::new).push(entry);
    }

    /// Removes a repository by name. Returns false if there was none.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.repositories.as_mut() {
            Some(repositories) => {
                let before = repositories.len();
                repositories.retain(|entry| entry.name != name);
                repositories.len() != before
            }
            None => false,
        }
    }
}

/// The index document of a chart repository.
#[derive(Debug, Default, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: Option<BTreeMap<String, Vec<IndexEntry>>>,
}

/// One chart version in an index document.
#[derive(Debug, Clone, Deserialize)]
struct IndexEntry {
    #[serde(default)]
    version: String,
    #[serde(default, rename = "appVersion")]
    app_version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
}

impl IndexFile {
    /// The versions of the chart, matched by full name or by the last segment of a
    /// '<repository>/<chart>' name, in the index's order.
    fn versions_of<'a>(&'a self, chart_name: &'a str) -> impl Iterator<Item = &'a IndexEntry> {
        let short_name = chart_name.rsplit('/').next().unwrap_or(chart_name);
        self.entries
            .iter()
            .flatten()
            .filter(move |(name, _)| name.as_str() == chart_name || name.as_str() == short_name)
            .flat_map(|(_, versions)| versions.iter())
    }
}

impl From<&IndexEntry> for ChartVersion {
    fn from(entry: &IndexEntry) -> Self {
        ChartVersion {
            version: entry.version.clone(),
            app_version: entry.app_version.clone().filter(|value| !value.is_empty()),
            description: entry.description.clone().filter(|value| !value.is_empty()),
        }
    }
}

/// The cache location of a repository's index document, as Helm lays it out.
pub fn index_path(cache_dir: &Path, repository_name: &str) -> PathBuf {
    cache_dir.join(format!("{repository_name}-index.yaml"))
}

/// Downloads '<repository_url>/index.yaml' into the cache. The document is checked to be a
/// valid index before it is written.
pub(crate) async fn download_index(
    http: &reqwest::Client,
    cache_dir: &Path,
    repository_name: &str,
    repository_url: &str,
) -> Result<PathBuf> {
    let url = format!(
        "{}/{}",
        repository_url.trim_end_matches('/'),
        INDEX_FILE_NAME
    );
    let content = download(http, url.as_str()).await?;
    serde_yaml::from_slice::<IndexFile>(content.as_slice())
        .context(YamlParseFromUrl { url: url.as_str() })?;

    tokio::fs::create_dir_all(cache_dir)
        .await
        .context(CreateDirectory { path: cache_dir })?;
    let path = index_path(cache_dir, repository_name);
    write_atomically(path.as_path(), content.as_slice())?;

    info!(repository = %repository_name, %url, "Downloaded repository index");
    Ok(path)
}

/// Resolves a chart URL from an index, which may be relative to the repository URL.
fn chart_url(repository_url: &str, chart_url: &str) -> Result<String> {
    if let Ok(absolute) = Url::parse(chart_url) {
        return Ok(absolute.into());
    }

    let base = format!("{}/", repository_url.trim_end_matches('/'));
    let base = Url::parse(base.as_str()).context(InvalidRepositoryUrl { url: repository_url })?;
    base.join(chart_url)
        .map(String::from)
        .context(ChartUrlParse { url: chart_url })
}

/// Resolves versions from the cached index documents of the configured chart repositories, and
/// downloads chart archives from those repositories.
pub struct IndexChartSource {
    http: reqwest::Client,
    repository_config: PathBuf,
    repository_cache: PathBuf,
}

impl IndexChartSource {
    /// Creates a source over Helm's repository file and repository cache directory. Chart
    /// archives are cached in the repository cache too.
    pub fn new(
        repository_config: PathBuf,
        repository_cache: PathBuf,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(HttpClientBuild)?;

        Ok(Self {
            http,
            repository_config,
            repository_cache,
        })
    }

    /// Reads the cached index of a repository. A missing index is skipped with a warning.
    async fn load_index(&self, repository: &RepositoryEntry) -> Result<Option<IndexFile>> {
        let path = index_path(self.repository_cache.as_path(), repository.name.as_str());
        let content = match tokio::fs::read_to_string(path.as_path()).await {
            Ok(content) => content,
            Err(error) if error.kind() == IoErrorKind::NotFound => {
                warn!(
                    repository = %repository.name,
                    path = %path.display(),
                    "Repository index not found in cache, skipping"
                );
                return Ok(None);
            }
            Err(error) => return Err(error).context(ReadingFile { filepath: path }),
        };

        serde_yaml::from_str(content.as_str())
            .context(YamlParseFromFile { filepath: path })
            .map(Some)
    }
}

#[async_trait]
impl ChartSource for IndexChartSource {
    /// Any reference which is not claimed by an earlier source is looked up in the configured
    /// repositories.
    fn handles(&self, _registry: &str) -> bool {
        true
    }

    async fn resolve(&self, registry: &str, chart_name: &str) -> Result<Vec<ChartVersion>> {
        let repositories = RepositoryFile::load(self.repository_config.as_path()).await?;

        let mut versions = Vec::new();
        for repository in repositories.repositories() {
            if let Some(index) = self.load_index(repository).await? {
                versions.extend(index.versions_of(chart_name).map(ChartVersion::from));
            }
        }

        debug!(
            %registry,
            %chart_name,
            count = versions.len(),
            "Resolved versions from repository indexes"
        );
        Ok(versions)
    }

    async fn locate(&self, registry: &str, chart_name: &str, version: &str) -> Result<CachedChart> {
        let cached = cache_path(self.repository_cache.as_path(), chart_name, version);
        if tokio::fs::try_exists(cached.as_path()).await.unwrap_or(false) {
            debug!(path = %cached.display(), "Using cached chart");
            return Ok(CachedChart::new(cached, chart_name, version));
        }

        let repositories = RepositoryFile::load(self.repository_config.as_path()).await?;
        for repository in repositories.repositories() {
            let Some(index) = self.load_index(repository).await? else {
                continue;
            };
            let Some(url) = index
                .versions_of(chart_name)
                .find(|entry| entry.version == version)
                .and_then(|entry| entry.urls.first())
            else {
                continue;
            };

            let url = chart_url(repository.url.as_str(), url.as_str())?;
            let archive = download(&self.http, url.as_str()).await?;
            let chart =
                write_chart(self.repository_cache.as_path(), chart_name, version, &archive).await?;
            info!(repository = %repository.name, %chart_name, %version, %url, "Downloaded chart");
            return Ok(chart);
        }

        ChartVersionNotFound {
            chart_name,
            version,
            registry,
        }
        .fail()
    }
}
