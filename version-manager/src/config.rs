use crate::common::constants::{
    DEFAULT_HELM_BINARY, DEFAULT_MAPPINGS_CONFIG_MAP, DEFAULT_NAMESPACE,
    DEFAULT_REPOSITORY_CACHE, DEFAULT_REPOSITORY_CONFIG,
};
use clap::Parser;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

/// These are the supported cli configuration options for the service. Each option may also be
/// set through its environment variable.
#[derive(Parser, Debug)]
#[command(author, version, about = "Tracks chart registries for Helm releases, and upgrades them")]
pub struct CliArgs {
    /// The address the HTTP server binds to.
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    bind_address: IpAddr,

    /// The port the HTTP server listens on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// This is the Kubernetes Namespace of the registry mappings ConfigMap.
    #[arg(short, long, env = "NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// This is the name of the registry mappings ConfigMap.
    #[arg(long, env = "MAPPINGS_CONFIG_MAP", default_value = DEFAULT_MAPPINGS_CONFIG_MAP)]
    mappings_config_map: String,

    /// Keep registry mappings in memory instead of the ConfigMap. Mappings are lost on exit.
    #[arg(long, env = "IN_MEMORY_STORE", default_value_t = false)]
    in_memory_store: bool,

    /// The Helm binary.
    #[arg(long, env = "HELM_BINARY", default_value = DEFAULT_HELM_BINARY)]
    helm_binary: String,

    /// This is the helm storage driver, e.g. secret, configmap, memory, etc.
    #[arg(long, env = "HELM_DRIVER")]
    helm_driver: Option<String>,

    /// Helm's repository file. Defaults to $HOME/.config/helm/repositories.yaml.
    #[arg(long, env = "HELM_REPOSITORY_CONFIG", value_name = "FILE_PATH")]
    repository_config: Option<PathBuf>,

    /// Helm's repository cache directory, which also holds downloaded charts. Defaults to
    /// $HOME/.cache/helm/repository.
    #[arg(long, env = "HELM_REPOSITORY_CACHE", value_name = "DIR_PATH")]
    repository_cache: Option<PathBuf>,

    /// Timeout for requests to chart registries and repositories.
    #[arg(long, env = "REGISTRY_TIMEOUT", default_value = "60s")]
    registry_timeout: humantime::Duration,

    /// Username for registries which do not hand out anonymous pull tokens.
    #[arg(long, env = "REGISTRY_USERNAME")]
    registry_username: Option<String>,

    /// Password for registries which do not hand out anonymous pull tokens.
    #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,
}

/// $HOME/relative, if $HOME is set.
fn home_relative(relative: &str) -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(relative))
}

impl CliArgs {
    /// Parses the command line and the environment.
    pub fn args() -> Self {
        CliArgs::parse()
    }

    /// This returns the address the HTTP server binds to.
    pub fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// This returns the Kubernetes Namespace of the registry mappings ConfigMap.
    pub fn namespace(&self) -> String {
        self.namespace.clone()
    }

    /// This returns the name of the registry mappings ConfigMap.
    pub fn mappings_config_map(&self) -> String {
        self.mappings_config_map.clone()
    }

    /// This is a predicate to decide if registry mappings are kept in process memory.
    pub fn in_memory_store(&self) -> bool {
        self.in_memory_store
    }

    pub fn helm_binary(&self) -> String {
        self.helm_binary.clone()
    }

    pub fn helm_driver(&self) -> Option<String> {
        self.helm_driver.clone()
    }

    /// This returns the path to Helm's repository file.
    pub fn repository_config(&self) -> PathBuf {
        self.repository_config
            .clone()
            .or_else(|| home_relative(DEFAULT_REPOSITORY_CONFIG))
            .unwrap_or_else(|| std::env::temp_dir().join("helm/repositories.yaml"))
    }

    /// This returns the path to Helm's repository cache, falling back to the OS temp directory.
    pub fn repository_cache(&self) -> PathBuf {
        self.repository_cache
            .clone()
            .or_else(|| home_relative(DEFAULT_REPOSITORY_CACHE))
            .unwrap_or_else(|| std::env::temp_dir().join("helm/repository"))
    }

    pub fn registry_timeout(&self) -> Duration {
        *self.registry_timeout
    }

    pub fn registry_username(&self) -> Option<String> {
        self.registry_username.clone()
    }

    pub fn registry_password(&self) -> Option<String> {
        self.registry_password.clone()
    }
}
