/// Chart sources: version resolution and chart artifact location.
pub mod chart;
/// Common code being used in the crate.
pub mod common;
/// Configuration options for the service.
pub mod config;
/// Deployment engine contract and its Helm implementation.
pub mod helm;
/// Records exchanged with the REST layer.
pub mod model;
/// Release operations composed from the store, the chart sources and the deployment engine.
pub mod orchestrator;
/// Management of classic chart repositories.
pub mod repository;
/// HTTP surface.
pub mod rest;
/// Persistence of registry mappings.
pub mod store;
