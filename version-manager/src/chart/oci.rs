use crate::{
    chart::{newest_first, write_chart, CachedChart, ChartSource},
    common::{
        constants::{
            HELM_CHART_LAYER_MEDIA_TYPE, MANIFEST_ACCEPT, OCI_SCHEME, TAR_GZIP_LAYER_MEDIA_TYPE,
        },
        error::{
            ChartLayerNotFound, ChartVersionNotFound, HttpClientBuild, HttpRequest,
            HttpResponseBody, HttpStatus, InvalidOciReference, MalformedManifest, RegistryAuth,
            Result,
        },
    },
    model::ChartVersion,
};
use async_trait::async_trait;
use reqwest::{
    header::{ACCEPT, LINK, WWW_AUTHENTICATE},
    RequestBuilder, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize};
use snafu::{ensure, ResultExt};
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info};
use url::Url;

/// The location of a chart inside an OCI registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    host: String,
    repository: String,
}

impl OciReference {
    /// Parses 'oci://<host>[/<path>]' and appends the chart name to the path.
    pub fn parse(registry: &str, chart_name: &str) -> Result<Self> {
        let without_scheme = registry
            .strip_prefix(OCI_SCHEME)
            .ok_or_else(|| InvalidOciReference { reference: registry }.build())?
            .trim_end_matches('/');

        let (host, path) = without_scheme
            .split_once('/')
            .unwrap_or((without_scheme, ""));
        ensure!(
            !host.is_empty() && !chart_name.is_empty(),
            InvalidOciReference {
                reference: registry
            }
        );

        let repository = match path {
            "" => chart_name.to_string(),
            path => format!("{path}/{chart_name}"),
        };

        Ok(Self {
            host: host.to_string(),
            repository,
        })
    }

    /// Loopback registries are served over plain HTTP.
    fn scheme(&self) -> &'static str {
        let bare_host = self.host.split(':').next().unwrap_or(self.host.as_str());
        match bare_host {
            "localhost" | "127.0.0.1" => "http",
            _ => "https",
        }
    }

    /// Base URL of the repository's distribution API.
    fn api_url(&self) -> String {
        format!("{}://{}/v2/{}", self.scheme(), self.host, self.repository)
    }
}

impl std::fmt::Display for OciReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}/{}", OCI_SCHEME, self.host, self.repository)
    }
}

/// Parameters of a 'WWW-Authenticate: Bearer ...' challenge.
#[derive(Debug, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

/// How requests to a registry are authorized, once a challenge has been answered.
#[derive(Clone)]
enum Authorization {
    Bearer(String),
    Basic,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    digest: String,
}

/// Either an image manifest (with layers) or an image index (with manifests).
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    manifests: Vec<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

impl Manifest {
    fn is_index(&self) -> bool {
        self.layers.is_empty() && !self.manifests.is_empty()
    }

    /// The Helm chart content layer, or a plain tar+gzip layer for older pushes.
    fn chart_layer(&self) -> Option<&Descriptor> {
        self.layers
            .iter()
            .find(|layer| layer.media_type == HELM_CHART_LAYER_MEDIA_TYPE)
            .or_else(|| {
                self.layers
                    .iter()
                    .find(|layer| layer.media_type == TAR_GZIP_LAYER_MEDIA_TYPE)
            })
    }
}

/// Parses the parameters of a Bearer challenge. Values may or may not be quoted.
fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let params = header.trim().strip_prefix("Bearer ")?;

    let mut realm = None;
    let mut service = None;
    let mut remaining = params;
    loop {
        remaining = remaining.trim_start_matches([' ', ',']);
        if remaining.is_empty() {
            break;
        }

        let (key, rest) = remaining.split_once('=')?;
        let (value, rest) = match rest.strip_prefix('"') {
            Some(quoted) => {
                let (value, rest) = quoted.split_once('"')?;
                (value, rest)
            }
            None => {
                let end = rest.find([',', ' ']).unwrap_or(rest.len());
                rest.split_at(end)
            }
        };
        match key.trim() {
            "realm" => realm = Some(value.to_string()),
            "service" => service = Some(value.to_string()),
            _ => {}
        }
        remaining = rest;
    }

    realm.map(|realm| BearerChallenge { realm, service })
}

/// Finds the 'rel="next"' target of a Link header, resolved against the request URL.
fn next_link(header: &str, request_url: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let (target, params) = link.trim().split_once(';')?;
        if !params.contains("rel=\"next\"") && !params.contains("rel=next") {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(request_url)
            .and_then(|base| base.join(target))
            .ok()
            .map(String::from)
    })
}

/// OCI tags may not contain '+', so Helm pushes build metadata with '_' instead.
fn version_to_tag(version: &str) -> String {
    version.replace('+', "_")
}

/// Resolves versions from the tags of an OCI repository, and pulls chart archives from it.
pub struct OciChartSource {
    http: reqwest::Client,
    cache_dir: PathBuf,
    credentials: Option<(String, String)>,
}

impl OciChartSource {
    /// Creates a source which caches chart archives in cache_dir. Registry requests time out
    /// after timeout.
    pub fn new(cache_dir: PathBuf, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(HttpClientBuild)?;

        Ok(Self {
            http,
            cache_dir,
            credentials: None,
        })
    }

    /// Credentials for registries which do not hand out anonymous pull tokens.
    #[must_use]
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.credentials = username.map(|username| (username, password.unwrap_or_default()));
        self
    }

    fn authorize(&self, request: RequestBuilder, auth: Option<&Authorization>) -> RequestBuilder {
        match (auth, self.credentials.as_ref()) {
            (Some(Authorization::Bearer(token)), _) => request.bearer_auth(token),
            (Some(Authorization::Basic), Some((username, password))) => {
                request.basic_auth(username, Some(password))
            }
            _ => request,
        }
    }

    async fn send(
        &self,
        url: &str,
        accept: Option<&str>,
        auth: Option<&Authorization>,
    ) -> Result<Response> {
        debug!(%url, "Registry request");
        let mut request = self.http.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        self.authorize(request, auth)
            .send()
            .await
            .context(HttpRequest { url })
    }

    /// Sends a GET to the registry. An unauthorized response is answered once, by fetching a
    /// pull token for the repository (or by switching to basic auth), and the request is sent
    /// again. The authorization is kept in auth for subsequent requests.
    async fn get(
        &self,
        reference: &OciReference,
        url: &str,
        accept: Option<&str>,
        auth: &mut Option<Authorization>,
    ) -> Result<Response> {
        let response = self.send(url, accept, auth.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || auth.is_some() {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let authorization = self.answer_challenge(reference, url, challenge.as_str()).await?;

        let response = self.send(url, accept, Some(&authorization)).await?;
        *auth = Some(authorization);
        Ok(response)
    }

    async fn answer_challenge(
        &self,
        reference: &OciReference,
        url: &str,
        challenge: &str,
    ) -> Result<Authorization> {
        if challenge.starts_with("Basic") {
            ensure!(
                self.credentials.is_some(),
                RegistryAuth {
                    url,
                    reason: "registry requires credentials"
                }
            );
            return Ok(Authorization::Basic);
        }

        let challenge = parse_bearer_challenge(challenge).ok_or_else(|| {
            RegistryAuth {
                url,
                reason: format!("unsupported challenge '{challenge}'"),
            }
            .build()
        })?;

        let scope = format!("repository:{}:pull", reference.repository);
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = challenge.service.as_deref() {
            query.push(("service", service));
        }
        let realm = challenge.realm.as_str();
        let request = self.http.get(realm).query(&query);
        let request = match self.credentials.as_ref() {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        };

        debug!(%realm, %scope, "Fetching registry token");
        let response = request.send().await.context(HttpRequest { url: realm })?;
        ensure!(
            response.status().is_success(),
            RegistryAuth {
                url: realm,
                reason: format!("token request returned status {}", response.status())
            }
        );
        let token: TokenResponse = response
            .json()
            .await
            .context(HttpResponseBody { url: realm })?;

        token
            .token
            .or(token.access_token)
            .filter(|token| !token.is_empty())
            .map(Authorization::Bearer)
            .ok_or_else(|| {
                RegistryAuth {
                    url: realm,
                    reason: "token response has no token",
                }
                .build()
            })
    }

    async fn json<T>(url: &str, response: Response) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        ensure!(
            status.is_success(),
            HttpStatus {
                url,
                status: status.as_u16()
            }
        );
        response.json().await.context(HttpResponseBody { url })
    }

    /// Lists all tags of the repository, following pagination, in registry order.
    async fn list_tags(&self, reference: &OciReference) -> Result<Vec<String>> {
        let mut auth = None;
        let mut tags = Vec::new();
        let mut next = Some(format!("{}/tags/list", reference.api_url()));

        while let Some(url) = next.take() {
            let response = self.get(reference, url.as_str(), None, &mut auth).await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(|link| next_link(link, url.as_str()));

            let page: TagList = Self::json(url.as_str(), response).await?;
            tags.extend(page.tags.unwrap_or_default());
        }

        Ok(tags)
    }

    /// Fetches the manifest for reference_or_digest. A missing manifest is a missing version.
    async fn manifest(
        &self,
        reference: &OciReference,
        reference_or_digest: &str,
        version: &str,
        auth: &mut Option<Authorization>,
    ) -> Result<Manifest> {
        let url = format!("{}/manifests/{reference_or_digest}", reference.api_url());
        let response = self
            .get(reference, url.as_str(), Some(MANIFEST_ACCEPT), auth)
            .await?;
        ensure!(
            response.status() != StatusCode::NOT_FOUND,
            ChartVersionNotFound {
                chart_name: reference.repository.as_str(),
                version,
                registry: reference.to_string(),
            }
        );

        Self::json(url.as_str(), response).await
    }

    /// Pulls the chart archive tagged with version.
    async fn pull(&self, reference: &OciReference, version: &str) -> Result<Vec<u8>> {
        let mut auth = None;
        let tag = version_to_tag(version);

        let mut manifest = self
            .manifest(reference, tag.as_str(), version, &mut auth)
            .await?;
        if manifest.is_index() {
            let digest = manifest
                .manifests
                .first()
                .map(|descriptor| descriptor.digest.clone())
                .unwrap_or_default();
            manifest = self
                .manifest(reference, digest.as_str(), version, &mut auth)
                .await?;
            ensure!(
                !manifest.is_index(),
                MalformedManifest {
                    reference: format!("{reference}:{tag}"),
                    reason: "nested image index"
                }
            );
        }

        let layer = manifest.chart_layer().ok_or_else(|| {
            ChartLayerNotFound {
                reference: format!("{reference}:{tag}"),
            }
            .build()
        })?;

        let url = format!("{}/blobs/{}", reference.api_url(), layer.digest);
        let response = self.get(reference, url.as_str(), None, &mut auth).await?;
        let status = response.status();
        ensure!(
            status.is_success(),
            HttpStatus {
                url: url.as_str(),
                status: status.as_u16()
            }
        );
        let blob = response
            .bytes()
            .await
            .context(HttpResponseBody { url: url.as_str() })?;

        Ok(blob.to_vec())
    }
}

#[async_trait]
impl ChartSource for OciChartSource {
    fn handles(&self, registry: &str) -> bool {
        registry.starts_with(OCI_SCHEME)
    }

    async fn resolve(&self, registry: &str, chart_name: &str) -> Result<Vec<ChartVersion>> {
        let reference = OciReference::parse(registry, chart_name)?;
        let tags = self.list_tags(&reference).await?;
        debug!(%reference, count = tags.len(), "Listed registry tags");

        Ok(newest_first(tags)
            .into_iter()
            .map(ChartVersion::bare)
            .collect())
    }

    async fn locate(&self, registry: &str, chart_name: &str, version: &str) -> Result<CachedChart> {
        let reference = OciReference::parse(registry, chart_name)?;
        let archive = self.pull(&reference, version).await?;

        let chart = write_chart(self.cache_dir.as_path(), chart_name, version, &archive).await?;
        info!(%reference, %version, path = %chart.path().display(), "Pulled chart");
        Ok(chart)
    }
}
