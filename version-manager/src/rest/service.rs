use crate::{
    common::{constants::CORS_ALLOWED_METHODS, error::Error},
    model::{
        AddRepositoryRequest, ReleaseFilter, RollbackRequest, SetRegistryRequest,
        ValuesUpdateRequest, VersionUpgradeRequest,
    },
    orchestrator::UpgradeOrchestrator,
    repository::RepositoryManager,
    rest::json_config,
};
use actix_web::{
    delete, get, guard,
    http::header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_REQUEST_HEADERS,
    },
    post, put, web, HttpRequest, HttpResponse, Responder,
};
use serde::Deserialize;
use serde_json::json;

type Orchestrator = web::Data<UpgradeOrchestrator>;
type Repositories = web::Data<RepositoryManager>;
type ReleasePath = web::Path<(String, String)>;

/// Query string of release listings. An empty hasRegistry does not filter; any value other
/// than "true" selects releases without a registry.
#[derive(Debug, Default, Deserialize)]
struct ReleaseQuery {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default, rename = "hasRegistry")]
    has_registry: Option<String>,
}

impl From<ReleaseQuery> for ReleaseFilter {
    fn from(query: ReleaseQuery) -> Self {
        ReleaseFilter {
            namespace: query.namespace.filter(|namespace| !namespace.is_empty()),
            has_registry: query
                .has_registry
                .filter(|value| !value.is_empty())
                .map(|value| value == "true"),
        }
    }
}

/// Registers all routes, with the orchestrator and the repository manager as app data. OPTIONS
/// requests to any path are CORS preflights.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(health)
        .service(list_releases)
        .service(get_release)
        .service(upgrade_release)
        .service(list_versions)
        .service(get_history)
        .service(get_values)
        .service(update_values)
        .service(rollback)
        .service(get_registry)
        .service(set_registry)
        .service(delete_registry)
        .service(list_repositories)
        .service(add_repository)
        .service(remove_repository)
        .service(update_repository)
        .service(
            web::resource("/{tail:.*}")
                .guard(guard::Options())
                .to(preflight),
        );
}

/// Answers a CORS preflight. Requested headers are all allowed.
async fn preflight(request: HttpRequest) -> HttpResponse {
    let mut response = HttpResponse::NoContent();
    response.insert_header((ACCESS_CONTROL_ALLOW_METHODS, CORS_ALLOWED_METHODS));
    if let Some(headers) = request.headers().get(ACCESS_CONTROL_REQUEST_HEADERS) {
        response.insert_header((ACCESS_CONTROL_ALLOW_HEADERS, headers.clone()));
    }
    response.finish()
}

/// Get health.
#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Get releases across all namespaces.
#[get("/api/releases")]
async fn list_releases(
    orchestrator: Orchestrator,
    query: web::Query<ReleaseQuery>,
) -> Result<HttpResponse, Error> {
    let filter = ReleaseFilter::from(query.into_inner());
    let releases = orchestrator.list_releases(&filter).await?;
    Ok(HttpResponse::Ok().json(releases))
}

#[get("/api/releases/{namespace}/{name}")]
async fn get_release(orchestrator: Orchestrator, path: ReleasePath) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let release = orchestrator.get_release(&namespace, &name).await?;
    Ok(HttpResponse::Ok().json(release))
}

/// Put request to upgrade a release to a chart version.
#[put("/api/releases/{namespace}/{name}")]
async fn upgrade_release(
    orchestrator: Orchestrator,
    path: ReleasePath,
    body: web::Json<VersionUpgradeRequest>,
) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let request = body.into_inner();
    let release = orchestrator
        .upgrade_to_version(
            &namespace,
            &name,
            &request.chart_version,
            request.values.as_ref(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(release))
}

#[get("/api/releases/{namespace}/{name}/versions")]
async fn list_versions(
    orchestrator: Orchestrator,
    path: ReleasePath,
) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let versions = orchestrator.list_versions(&namespace, &name).await?;
    Ok(HttpResponse::Ok().json(versions))
}

#[get("/api/releases/{namespace}/{name}/history")]
async fn get_history(orchestrator: Orchestrator, path: ReleasePath) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let history = orchestrator.get_history(&namespace, &name).await?;
    Ok(HttpResponse::Ok().json(history))
}

#[get("/api/releases/{namespace}/{name}/values")]
async fn get_values(orchestrator: Orchestrator, path: ReleasePath) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let values = orchestrator.get_values(&namespace, &name).await?;
    Ok(HttpResponse::Ok().json(values))
}

/// Put request to change the values of a release.
#[put("/api/releases/{namespace}/{name}/values")]
async fn update_values(
    orchestrator: Orchestrator,
    path: ReleasePath,
    body: web::Json<ValuesUpdateRequest>,
) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let release = orchestrator
        .update_values(&namespace, &name, body.values.as_ref())
        .await?;
    Ok(HttpResponse::Ok().json(release))
}

#[post("/api/releases/{namespace}/{name}/rollback")]
async fn rollback(
    orchestrator: Orchestrator,
    path: ReleasePath,
    body: web::Json<RollbackRequest>,
) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let release = orchestrator
        .rollback(&namespace, &name, body.revision)
        .await?;
    Ok(HttpResponse::Ok().json(release))
}

#[get("/api/releases/{namespace}/{name}/registry")]
async fn get_registry(
    orchestrator: Orchestrator,
    path: ReleasePath,
) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let mapping = orchestrator.get_mapping(&namespace, &name).await?;
    Ok(HttpResponse::Ok().json(mapping))
}

#[put("/api/releases/{namespace}/{name}/registry")]
async fn set_registry(
    orchestrator: Orchestrator,
    path: ReleasePath,
    body: web::Json<SetRegistryRequest>,
) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    let mapping = orchestrator
        .set_mapping(&namespace, &name, &body.registry)
        .await?;
    Ok(HttpResponse::Ok().json(mapping))
}

#[delete("/api/releases/{namespace}/{name}/registry")]
async fn delete_registry(
    orchestrator: Orchestrator,
    path: ReleasePath,
) -> Result<HttpResponse, Error> {
    let (namespace, name) = path.into_inner();
    orchestrator.delete_mapping(&namespace, &name).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/api/repositories")]
async fn list_repositories(repositories: Repositories) -> Result<HttpResponse, Error> {
    let list = repositories.list().await?;
    Ok(HttpResponse::Ok().json(list))
}

#[post("/api/repositories")]
async fn add_repository(
    repositories: Repositories,
    body: web::Json<AddRepositoryRequest>,
) -> Result<HttpResponse, Error> {
    let repository = repositories.add(&body.name, &body.url).await?;
    Ok(HttpResponse::Created().json(repository))
}

#[delete("/api/repositories/{name}")]
async fn remove_repository(
    repositories: Repositories,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    repositories.remove(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/repositories/{name}/update")]
async fn update_repository(
    repositories: Repositories,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let name = path.into_inner();
    repositories.update(&name).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": format!("repository {name} updated") })))
}
