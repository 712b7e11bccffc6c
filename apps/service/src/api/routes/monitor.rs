use actix_web::http::header;
use actix_web::{HttpResponse, get, post, web};

use crate::api::ApiError;
use crate::monitoring::RegisterSite;
use crate::orchestrator::Registry;

/// Page size of every listing
pub const LIST_LIMIT: usize = 20;

/// Register a site and start monitoring it
#[post("/monitor")]
pub async fn register_route(
    registry: web::Data<Registry>,
    payload: web::Json<RegisterSite>,
) -> Result<HttpResponse, ApiError> {
    let site = registry.register(payload.into_inner()).await?;

    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, format!("/monitor/{}", site.id)))
        .json(site))
}

/// Most recently registered sites
#[get("/monitor")]
pub async fn list_sites_route(registry: web::Data<Registry>) -> Result<HttpResponse, ApiError> {
    let sites = registry.store().list_sites(LIST_LIMIT).await?;
    Ok(HttpResponse::Ok().json(sites))
}

/// Latest results of one site, newest first
#[get("/monitor/{id}/results")]
pub async fn list_results_route(
    registry: web::Data<Registry>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let results = registry.store().list_results_for_site(path.into_inner(), LIST_LIMIT).await?;
    Ok(HttpResponse::Ok().json(results))
}

/// Stop monitoring a site. The site and its results are kept.
#[post("/monitor/{id}/stop")]
pub async fn stop_route(
    registry: web::Data<Registry>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    registry.stop(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
