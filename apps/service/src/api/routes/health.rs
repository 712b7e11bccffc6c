use actix_web::{HttpResponse, Responder, get};

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/ping")]
pub async fn ping_route() -> impl Responder {
    HttpResponse::Ok()
}
