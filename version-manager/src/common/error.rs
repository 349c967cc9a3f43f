use serde::Serialize;
use snafu::Snafu;
use std::{fmt, path::PathBuf};

/// The kind of failure, as reported to API callers. Each error variant belongs to exactly one
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// A required input is missing, empty or malformed.
    #[serde(rename = "ValidationError")]
    Validation,
    /// The release, mapping, chart version or repository does not exist.
    #[serde(rename = "NotFoundError")]
    NotFound,
    /// The operation needs a registry mapping which has not been set for the release.
    #[serde(rename = "MappingRequired")]
    MappingRequired,
    /// The deployment engine, the configuration store or a registry call failed.
    #[serde(rename = "UpstreamError")]
    Upstream,
    /// The entry being created already exists.
    #[serde(rename = "ConflictError")]
    Conflict,
}

impl ErrorKind {
    /// The name of the kind, as it appears in API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::MappingRequired => "MappingRequired",
            Self::Upstream => "UpstreamError",
            Self::Conflict => "ConflictError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// For use with multiple fallible operations which may fail for different reasons, but are
/// defined withing the same scope and must return to the outer scope (calling scope) using
/// the try operator -- '?'.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    /// Error for when a required input is empty.
    #[snafu(display("{} is required", field))]
    EmptyField { field: String },

    /// Error for when a request body or query string cannot be read.
    #[snafu(display("Invalid request: {}", reason))]
    InvalidRequest { reason: String },

    /// Error for when a rollback target is not a valid revision number.
    #[snafu(display("revision must be a positive integer, got {}", revision))]
    InvalidRevision { revision: i64 },

    /// Error for when a chart repository URL cannot be parsed.
    #[snafu(display("Failed to parse chart repository URL {}: {}", url, source))]
    InvalidRepositoryUrl {
        source: url::ParseError,
        url: String,
    },

    /// Error for when a registry reference cannot be split into host and repository.
    #[snafu(display("Invalid OCI registry reference '{}'", reference))]
    InvalidOciReference { reference: String },

    /// Error for when no chart source accepts a registry reference.
    #[snafu(display("No chart source handles registry '{}'", registry))]
    UnsupportedRegistry { registry: String },

    /// Error for when the Helm release does not exist.
    #[snafu(display("Helm release {} not found in Namespace {}: {}", name, namespace, std_err))]
    ReleaseNotFound {
        name: String,
        namespace: String,
        std_err: String,
    },

    /// Error for when a registry mapping was requested and there is none.
    #[snafu(display("registry mapping not found for release {}/{}", namespace, release_name))]
    MappingNotFound {
        namespace: String,
        release_name: String,
    },

    /// Error for when an operation needs the release's registry mapping and there is none.
    #[snafu(display(
        "registry mapping not found for release {}/{}, please set registry first",
        namespace,
        release_name
    ))]
    MappingRequired {
        namespace: String,
        release_name: String,
    },

    /// Error for when a chart version cannot be found at its source.
    #[snafu(display(
        "Chart {} version '{}' not found in {}",
        chart_name,
        version,
        registry
    ))]
    ChartVersionNotFound {
        chart_name: String,
        version: String,
        registry: String,
    },

    /// Error for when a chart repository is not configured.
    #[snafu(display("repository {} not found", name))]
    RepositoryNotFound { name: String },

    /// Error for when a chart repository with the same name is already configured.
    #[snafu(display("repository {} already exists", name))]
    RepositoryExists { name: String },

    /// Error for when Kubernetes API client generation fails.
    #[snafu(display("Failed to generate kubernetes client: {}", source))]
    K8sClientGeneration { source: kube::Error },

    /// Error for when the configuration record cannot be read.
    #[snafu(display(
        "Failed to read record {} from ConfigMap {} in Namespace {}: {}",
        key,
        name,
        namespace,
        source
    ))]
    ReadRecord {
        source: kube::Error,
        key: String,
        name: String,
        namespace: String,
    },

    /// Error for when the configuration record cannot be written.
    #[snafu(display(
        "Failed to write record {} to ConfigMap {} in Namespace {}: {}",
        key,
        name,
        namespace,
        source
    ))]
    WriteRecord {
        source: kube::Error,
        key: String,
        name: String,
        namespace: String,
    },

    /// Error for when the stored mappings document is not valid JSON.
    #[snafu(display("Failed to deserialize registry mappings: {}", source))]
    DeserializeMappings { source: serde_json::Error },

    /// Error for when the mappings document cannot be serialized.
    #[snafu(display("Failed to serialize registry mappings: {}", source))]
    SerializeMappings { source: serde_json::Error },

    /// Error for when a Helm command fails to execute.
    #[snafu(display(
        "Failed to run Helm command,\ncommand: {},\nargs: {:?},\ncommand_error: {}",
        command,
        args,
        source
    ))]
    HelmCommand {
        source: std::io::Error,
        command: String,
        args: Vec<String>,
    },

    /// Error for when a Helm command execution succeeds, but with an error.
    #[snafu(display(
        "Helm command returned an error,\ncommand: {},\nargs: {:?},\nstd_err: {}",
        command,
        args,
        std_err,
    ))]
    HelmCommandFailed {
        command: String,
        args: Vec<String>,
        std_err: String,
    },

    /// Error for when the JSON output of a Helm command cannot be parsed.
    #[snafu(display("Failed to parse output of '{} {:?}': {}", command, args, source))]
    HelmOutputParse {
        source: serde_json::Error,
        command: String,
        args: Vec<String>,
    },

    /// Error for when a temporary file cannot be created.
    #[snafu(display("Failed to create temporary file: {}", source))]
    TempFileCreation { source: std::io::Error },

    /// Error for when a temporary file cannot be written to.
    #[snafu(display("Failed to write to temporary file {}: {}", filepath.display(), source))]
    WriteToTempFile {
        source: std::io::Error,
        filepath: PathBuf,
    },

    /// Error for when the values for an upgrade cannot be serialized.
    #[snafu(display(
        "Failed to serialize values for release {}/{}: {}",
        namespace,
        name,
        source
    ))]
    SerializeValues {
        source: serde_json::Error,
        namespace: String,
        name: String,
    },

    /// Error for when the HTTP client cannot be built.
    #[snafu(display("Failed to build HTTP client: {}", source))]
    HttpClientBuild { source: reqwest::Error },

    /// Error for when an HTTP request to a registry or chart repository fails.
    #[snafu(display("HTTP request to {} failed: {}", url, source))]
    HttpRequest { source: reqwest::Error, url: String },

    /// Error for when a registry or chart repository answers with an unexpected status.
    #[snafu(display("HTTP request to {} returned status {}", url, status))]
    HttpStatus { url: String, status: u16 },

    /// Error for when the body of an HTTP response cannot be read or parsed.
    #[snafu(display("Failed to read response from {}: {}", url, source))]
    HttpResponseBody { source: reqwest::Error, url: String },

    /// Error for when a registry refuses to hand out a pull token.
    #[snafu(display("Failed to authenticate with registry at {}: {}", url, reason))]
    RegistryAuth { url: String, reason: String },

    /// Error for when an OCI manifest does not contain a chart layer.
    #[snafu(display("No Helm chart layer found in manifest for {}", reference))]
    ChartLayerNotFound { reference: String },

    /// Error for when an OCI manifest cannot be interpreted.
    #[snafu(display("Malformed manifest for {}: {}", reference, reason))]
    MalformedManifest { reference: String, reason: String },

    /// Error for when a chart download URL in a repository index cannot be resolved.
    #[snafu(display("Failed to resolve chart URL {}: {}", url, source))]
    ChartUrlParse {
        source: url::ParseError,
        url: String,
    },

    /// Error for when a directory cannot be created.
    #[snafu(display("Failed to create directory {}: {}", path.display(), source))]
    CreateDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when a file cannot be read.
    #[snafu(display("Failed to read file {}: {}", filepath.display(), source))]
    ReadingFile {
        source: std::io::Error,
        filepath: PathBuf,
    },

    /// Error for when a file cannot be written.
    #[snafu(display("Failed to write file {}: {}", filepath.display(), source))]
    WritingFile {
        source: std::io::Error,
        filepath: PathBuf,
    },

    /// Error for when a file cannot be removed.
    #[snafu(display("Failed to remove file {}: {}", filepath.display(), source))]
    RemovingFile {
        source: std::io::Error,
        filepath: PathBuf,
    },

    /// Error for when yaml could not be parsed from a file.
    #[snafu(display("Failed to parse YAML at {}: {}", filepath.display(), source))]
    YamlParseFromFile {
        source: serde_yaml::Error,
        filepath: PathBuf,
    },

    /// Error for when yaml could not be parsed from a downloaded document.
    #[snafu(display("Failed to parse YAML from {}: {}", url, source))]
    YamlParseFromUrl {
        source: serde_yaml::Error,
        url: String,
    },

    /// Error for when yaml could not be serialized.
    #[snafu(display("Failed to serialize YAML for {}: {}", filepath.display(), source))]
    YamlSerialize {
        source: serde_yaml::Error,
        filepath: PathBuf,
    },
}

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyField { .. }
            | Self::InvalidRequest { .. }
            | Self::InvalidRevision { .. }
            | Self::InvalidRepositoryUrl { .. }
            | Self::InvalidOciReference { .. }
            | Self::UnsupportedRegistry { .. } => ErrorKind::Validation,

            Self::ReleaseNotFound { .. }
            | Self::MappingNotFound { .. }
            | Self::ChartVersionNotFound { .. }
            | Self::RepositoryNotFound { .. } => ErrorKind::NotFound,

            Self::MappingRequired { .. } => ErrorKind::MappingRequired,

            Self::RepositoryExists { .. } => ErrorKind::Conflict,

            Self::K8sClientGeneration { .. }
            | Self::ReadRecord { .. }
            | Self::WriteRecord { .. }
            | Self::DeserializeMappings { .. }
            | Self::SerializeMappings { .. }
            | Self::HelmCommand { .. }
            | Self::HelmCommandFailed { .. }
            | Self::HelmOutputParse { .. }
            | Self::TempFileCreation { .. }
            | Self::WriteToTempFile { .. }
            | Self::SerializeValues { .. }
            | Self::HttpClientBuild { .. }
            | Self::HttpRequest { .. }
            | Self::HttpStatus { .. }
            | Self::HttpResponseBody { .. }
            | Self::RegistryAuth { .. }
            | Self::ChartLayerNotFound { .. }
            | Self::MalformedManifest { .. }
            | Self::ChartUrlParse { .. }
            | Self::CreateDirectory { .. }
            | Self::ReadingFile { .. }
            | Self::WritingFile { .. }
            | Self::RemovingFile { .. }
            | Self::YamlParseFromFile { .. }
            | Self::YamlParseFromUrl { .. }
            | Self::YamlSerialize { .. } => ErrorKind::Upstream,
        }
    }
}

/// A wrapper type to remove repeated Result<T, Error> returns.
pub type Result<T, E = Error> = std::result::Result<T, E>;
