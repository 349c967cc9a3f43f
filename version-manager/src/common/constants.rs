/// This is the name of the service, used as the server-side apply field manager and in logs.
pub const SERVICE_NAME: &str = "helm-version-manager";

/// Default name of the ConfigMap which holds the registry mappings.
pub const DEFAULT_MAPPINGS_CONFIG_MAP: &str = "helm-version-manager-registry-mappings";

/// Data key of the mappings document inside the ConfigMap.
pub const MAPPINGS_RECORD_KEY: &str = "mappings";

/// Default Kubernetes Namespace for the mappings ConfigMap.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Label key set on the mappings ConfigMap.
pub const STORE_LABEL_KEY: &str = "app.kubernetes.io/managed-by";

/// Scheme prefix of content-addressed (OCI) registry references.
pub const OCI_SCHEME: &str = "oci://";

/// Upper bound of the version list returned for a content registry.
pub const MAX_REGISTRY_VERSIONS: usize = 10;

/// Maximum number of revisions returned by a release history request.
pub const MAX_HISTORY: usize = 10;

/// Media type of the Helm chart content layer in an OCI manifest.
pub const HELM_CHART_LAYER_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

/// Legacy media type some registries use for the chart tarball layer.
pub const TAR_GZIP_LAYER_MEDIA_TYPE: &str = "application/tar+gzip";

/// Accept header for manifest requests.
pub const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.oci.image.manifest.v1+json,",
    "application/vnd.docker.distribution.manifest.v2+json,",
    "application/vnd.oci.image.index.v1+json"
);

/// Name of the index document served by classic chart repositories.
pub const INDEX_FILE_NAME: &str = "index.yaml";

/// Fragments of helm's stderr which mean that the targeted release does not exist.
pub const RELEASE_ABSENT_MESSAGES: [&str; 2] = ["release: not found", "has no deployed releases"];

/// Default Helm binary.
pub const DEFAULT_HELM_BINARY: &str = "helm";

/// Repository file location relative to $HOME, as used by Helm.
pub const DEFAULT_REPOSITORY_CONFIG: &str = ".config/helm/repositories.yaml";

/// Repository cache location relative to $HOME, as used by Helm.
pub const DEFAULT_REPOSITORY_CACHE: &str = ".cache/helm/repository";

/// Methods which browser clients of the API may use, as answered to CORS preflight requests.
pub const CORS_ALLOWED_METHODS: &str = "GET, HEAD, PUT, PATCH, POST, DELETE";
