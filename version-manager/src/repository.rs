use crate::{
    chart::index::{download_index, index_path, RepositoryEntry, RepositoryFile},
    common::error::{
        EmptyField, HttpClientBuild, InvalidRepositoryUrl, RemovingFile, RepositoryExists,
        RepositoryNotFound, Result,
    },
    model::Repository,
};
use snafu::{ensure, ResultExt};
use std::{io::ErrorKind as IoErrorKind, path::PathBuf, time::Duration};
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

impl From<&RepositoryEntry> for Repository {
    fn from(entry: &RepositoryEntry) -> Self {
        Repository {
            name: entry.name.clone(),
            url: entry.url.clone(),
        }
    }
}

/// Manages the classic chart repositories in Helm's repository file, and their cached index
/// documents. Changes to the file are serialized by an in-process lock.
pub struct RepositoryManager {
    http: reqwest::Client,
    repository_config: PathBuf,
    repository_cache: PathBuf,
    lock: RwLock<()>,
}

impl RepositoryManager {
    /// Creates a manager over the repository file and the repository cache directory.
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
            lock: RwLock::new(()),
        })
    }

    /// Lists the configured repositories, in file order.
    pub async fn list(&self) -> Result<Vec<Repository>> {
        let _guard = self.lock.read().await;

        let file = RepositoryFile::load(self.repository_config.as_path()).await?;
        Ok(file.repositories().iter().map(Repository::from).collect())
    }

    /// Adds a repository and downloads its index. Nothing is recorded if the index cannot be
    /// downloaded.
    pub async fn add(&self, name: &str, url: &str) -> Result<Repository> {
        ensure!(!name.is_empty(), EmptyField { field: "name" });
        ensure!(!url.is_empty(), EmptyField { field: "url" });
        Url::parse(url).context(InvalidRepositoryUrl { url })?;

        let _guard = self.lock.write().await;

        let mut file = RepositoryFile::load(self.repository_config.as_path()).await?;
        ensure!(file.get(name).is_none(), RepositoryExists { name });

        download_index(&self.http, self.repository_cache.as_path(), name, url).await?;

        file.push(RepositoryEntry::new(name, url));
        file.save(self.repository_config.as_path()).await?;

        info!(repository = %name, %url, "Added chart repository");
        Ok(Repository {
            name: name.to_string(),
            url: url.to_string(),
        })
    }

    /// Removes a repository and its cached index.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.lock.write().await;

        let mut file = RepositoryFile::load(self.repository_config.as_path()).await?;
        ensure!(file.remove(name), RepositoryNotFound { name });
        file.save(self.repository_config.as_path()).await?;

        let index = index_path(self.repository_cache.as_path(), name);
        match tokio::fs::remove_file(index.as_path()).await {
            Err(error) if error.kind() != IoErrorKind::NotFound => {
                return Err(error).context(RemovingFile { filepath: index });
            }
            _ => {}
        }

        info!(repository = %name, "Removed chart repository");
        Ok(())
    }

    /// Downloads the index of a repository again.
    pub async fn update(&self, name: &str) -> Result<()> {
        // Exclusive, the cached index is rewritten.
        let _guard = self.lock.write().await;

        let file = RepositoryFile::load(self.repository_config.as_path()).await?;
        let entry = file
            .get(name)
            .ok_or_else(|| RepositoryNotFound { name }.build())?;

        download_index(
            &self.http,
            self.repository_cache.as_path(),
            name,
            entry.url.as_str(),
        )
        .await?;

        info!(repository = %name, "Updated chart repository");
        Ok(())
    }
}
