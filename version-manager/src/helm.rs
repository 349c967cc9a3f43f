/// Contains the Helm CLI client.
pub mod client;

/// Contains the deployment engine contract.
pub mod engine;

/// Contains tools to merge release values.
pub mod values;

pub use client::HelmReleaseClient;
pub use engine::ReleaseEngine;
