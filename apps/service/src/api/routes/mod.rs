use actix_web::web;

pub mod health;
pub mod monitor;

/// Mount every route on the app
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health::ping_route)
        .service(monitor::register_route)
        .service(monitor::list_sites_route)
        .service(monitor::list_results_route)
        .service(monitor::stop_route);
}
