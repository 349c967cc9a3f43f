use crate::{
    chart::CachedChart,
    common::{
        constants::{DEFAULT_HELM_BINARY, MAX_HISTORY, RELEASE_ABSENT_MESSAGES},
        error::{
            HelmCommand, HelmCommandFailed, HelmOutputParse, ReleaseNotFound, Result,
        },
        file::write_values_file,
    },
    helm::engine::ReleaseEngine,
    model::{Release, ReleaseHistory, Values},
    vec_to_strings,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{de::DeserializeOwned, Deserialize};
use snafu::{ensure, ResultExt};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// This struct is used to deserialize the output of `helm list -o json`.
#[derive(Clone, Deserialize)]
struct HelmReleaseElement {
    name: String,
    namespace: String,
    revision: String,
    updated: String,
    status: String,
    /// This is '<chart-name>-<chart-version>'.
    chart: String,
    app_version: String,
}

impl From<HelmReleaseElement> for Release {
    fn from(element: HelmReleaseElement) -> Self {
        let (chart, chart_version) = split_chart_ref(element.chart.as_str());
        Release {
            name: element.name,
            namespace: element.namespace,
            chart,
            chart_version,
            app_version: element.app_version,
            status: element.status,
            updated: parse_list_timestamp(element.updated.as_str()),
            revision: element.revision.parse().unwrap_or_default(),
            has_registry: false,
            values: Values::new(),
        }
    }
}

/// This struct is used to deserialize a release object, as printed by `helm status -o json`
/// and `helm upgrade -o json`.
#[derive(Deserialize)]
struct HelmRelease {
    name: String,
    namespace: String,
    version: u32,
    #[serde(default)]
    info: HelmReleaseInfo,
    chart: HelmChart,
    #[serde(default)]
    config: Option<Values>,
}

#[derive(Default, Deserialize)]
struct HelmReleaseInfo {
    #[serde(default)]
    last_deployed: Option<DateTime<Utc>>,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct HelmChart {
    metadata: HelmChartMetadata,
}

#[derive(Deserialize)]
struct HelmChartMetadata {
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default, rename = "appVersion")]
    app_version: String,
}

impl From<HelmRelease> for Release {
    fn from(release: HelmRelease) -> Self {
        Release {
            name: release.name,
            namespace: release.namespace,
            chart: release.chart.metadata.name,
            chart_version: release.chart.metadata.version,
            app_version: release.chart.metadata.app_version,
            status: release.info.status,
            updated: release.info.last_deployed,
            revision: release.version,
            has_registry: false,
            values: release.config.unwrap_or_default(),
        }
    }
}

/// This struct is used to deserialize the output of `helm history -o json`.
#[derive(Deserialize)]
struct HelmHistoryElement {
    revision: u32,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    status: String,
    chart: String,
    #[serde(default)]
    app_version: String,
    #[serde(default)]
    description: String,
}

impl From<HelmHistoryElement> for ReleaseHistory {
    fn from(element: HelmHistoryElement) -> Self {
        let (_, chart_version) = split_chart_ref(element.chart.as_str());
        ReleaseHistory {
            revision: element.revision,
            updated: element.updated,
            status: element.status,
            chart: chart_version,
            app_version: element.app_version,
            description: element.description,
        }
    }
}

/// Splits '<chart-name>-<chart-version>' at the first '-' which is followed by a valid semantic
/// version. Chart names may contain '-', and so may pre-release versions, e.g.
/// 'cert-manager-1.2.3-rc.1' is ("cert-manager", "1.2.3-rc.1"). If no version is found, the
/// whole string is the chart name.
fn split_chart_ref(chart: &str) -> (String, String) {
    for (idx, _) in chart.match_indices('-') {
        let (name, version) = (&chart[..idx], &chart[idx + 1..]);
        if !name.is_empty() && Version::parse(version.trim_start_matches('v')).is_ok() {
            return (name.to_string(), version.to_string());
        }
    }
    (chart.to_string(), String::new())
}

/// Parses the 'updated' column of `helm list`, e.g. '2024-01-02 10:00:00.123456 +0000 UTC'.
fn parse_list_timestamp(updated: &str) -> Option<DateTime<Utc>> {
    // The trailing zone abbreviation is redundant with the numeric offset.
    let without_zone_name: Vec<&str> = updated.split_whitespace().take(3).collect();
    DateTime::parse_from_str(without_zone_name.join(" ").as_str(), "%Y-%m-%d %H:%M:%S%.f %z")
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

/// Checks if helm's stderr says that the targeted release does not exist, as opposed to some
/// other object not being found while the command ran.
fn is_release_absent(std_err: &str) -> bool {
    RELEASE_ABSENT_MESSAGES
        .iter()
        .any(|message| std_err.contains(message))
}

/// This is a builder for HelmReleaseClient.
#[derive(Default)]
pub struct HelmReleaseClientBuilder {
    binary: Option<String>,
    driver: Option<String>,
    values_dir: Option<PathBuf>,
}

impl HelmReleaseClientBuilder {
    /// This is a builder option to use a specific helm binary. Defaults to 'helm' from $PATH.
    #[must_use]
    pub fn with_binary<J>(mut self, binary: J) -> Self
    where
        J: ToString,
    {
        self.binary = Some(binary.to_string());
        self
    }

    /// This is a builder option to set the helm storage driver, e.g. secret, configmap, sql.
    #[must_use]
    pub fn with_driver(mut self, driver: Option<String>) -> Self {
        self.driver = driver.filter(|driver| !driver.is_empty());
        self
    }

    /// This is a builder option to set the directory for temporary values files.
    #[must_use]
    pub fn with_values_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.values_dir = dir;
        self
    }

    /// Build the HelmReleaseClient.
    pub fn build(self) -> HelmReleaseClient {
        HelmReleaseClient {
            binary: self
                .binary
                .unwrap_or_else(|| DEFAULT_HELM_BINARY.to_string()),
            driver: self.driver,
            values_dir: self.values_dir,
        }
    }
}

/// This type has functions which execute helm commands to fetch info about and modify helm
/// releases.
#[derive(Clone)]
pub struct HelmReleaseClient {
    binary: String,
    driver: Option<String>,
    values_dir: Option<PathBuf>,
}

impl HelmReleaseClient {
    /// This creates an empty builder.
    pub fn builder() -> HelmReleaseClientBuilder {
        HelmReleaseClientBuilder::default()
    }

    /// Runs the helm binary with args and returns its standard output. For commands which target
    /// a release, a failure which reports the release itself as absent is a missing release.
    async fn run(&self, args: Vec<String>, release: Option<(&str, &str)>) -> Result<Vec<u8>> {
        let command = self.binary.as_str();
        debug!(%command, ?args, "Helm command");

        let mut cmd = Command::new(command);
        cmd.args(args.as_slice());
        if let Some(driver) = self.driver.as_deref() {
            cmd.env("HELM_DRIVER", driver);
        }
        let output = cmd.output().await.context(HelmCommand {
            command,
            args: args.clone(),
        })?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let std_err = String::from_utf8_lossy(output.stderr.as_slice())
            .trim()
            .to_string();

        if let Some((namespace, name)) = release {
            ensure!(
                !is_release_absent(std_err.as_str()),
                ReleaseNotFound {
                    name,
                    namespace,
                    std_err
                }
            );
        }

        HelmCommandFailed {
            command,
            args,
            std_err,
        }
        .fail()
    }

    /// Runs a helm command with JSON output and deserializes it.
    async fn run_json<T>(&self, args: Vec<String>, release: Option<(&str, &str)>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let stdout = self.run(args.clone(), release).await?;
        serde_json::from_slice(stdout.as_slice()).context(HelmOutputParse {
            command: self.binary.as_str(),
            args,
        })
    }
}

#[async_trait]
impl ReleaseEngine for HelmReleaseClient {
    /// Runs command `helm list --all-namespaces --all -o json`.
    async fn list_releases(&self) -> Result<Vec<Release>> {
        let args = vec_to_strings!["list", "--all-namespaces", "--all", "-o", "json"];
        let elements: Vec<HelmReleaseElement> = self.run_json(args, None).await?;

        Ok(elements.into_iter().map(Release::from).collect())
    }

    /// Runs command `helm status <name> -n <namespace> -o json`.
    async fn get_release(&self, namespace: &str, name: &str) -> Result<Release> {
        let args = vec_to_strings!["status", name, "-n", namespace, "-o", "json"];
        let release: HelmRelease = self.run_json(args, Some((namespace, name))).await?;

        Ok(release.into())
    }

    /// Runs command `helm history <name> -n <namespace> --max 10 -o json`.
    async fn get_history(&self, namespace: &str, name: &str) -> Result<Vec<ReleaseHistory>> {
        let args = vec_to_strings![
            "history",
            name,
            "-n",
            namespace,
            "--max",
            MAX_HISTORY,
            "-o",
            "json"
        ];
        let elements: Vec<HelmHistoryElement> =
            self.run_json(args, Some((namespace, name))).await?;

        Ok(elements.into_iter().map(ReleaseHistory::from).collect())
    }

    /// Runs command `helm get values <name> -n <namespace> -o json`.
    async fn get_values(&self, namespace: &str, name: &str) -> Result<Values> {
        let args = vec_to_strings!["get", "values", name, "-n", namespace, "-o", "json"];
        // Helm prints 'null' for a release without user-supplied values.
        let values: Option<Values> = self.run_json(args, Some((namespace, name))).await?;

        Ok(values.unwrap_or_default())
    }

    /// Runs command `helm upgrade <name> <chart> -n <namespace> -f <values> -o json`, adding
    /// `--reuse-values` when asked to.
    async fn upgrade(
        &self,
        namespace: &str,
        name: &str,
        chart: &CachedChart,
        values: &Values,
        reuse_values: bool,
    ) -> Result<Release> {
        // Lives until the command returns.
        let values_file =
            write_values_file(self.values_dir.as_deref(), values, namespace, name)?;

        let mut args = vec_to_strings![
            "upgrade",
            name,
            chart.path().to_string_lossy(),
            "-n",
            namespace,
            "-f",
            values_file.path().to_string_lossy()
        ];
        if reuse_values {
            args.push("--reuse-values".to_string());
        }
        args.extend(vec_to_strings!["-o", "json"]);

        let release: HelmRelease = self.run_json(args, Some((namespace, name))).await?;
        info!(
            %namespace,
            %name,
            chart = %chart.chart_name(),
            version = %chart.version(),
            revision = release.version,
            "Upgraded Helm release"
        );

        Ok(release.into())
    }

    /// Runs command `helm rollback <name> <revision> -n <namespace>`.
    async fn rollback(&self, namespace: &str, name: &str, revision: u32) -> Result<()> {
        let args = vec_to_strings!["rollback", name, revision, "-n", namespace];
        self.run(args, Some((namespace, name))).await?;

        info!(%namespace, %name, revision, "Rolled back Helm release");
        Ok(())
    }
}
