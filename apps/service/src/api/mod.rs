//! HTTP registration and query API.

mod error;
pub mod routes;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::{App, HttpServer, middleware, web};

use crate::config::ServerConfig;
use crate::orchestrator::Registry;

/// Build the API server.
///
/// Signals are left to the caller, which stops the server as part of the
/// shutdown protocol; open connections then get `grace` to finish.
pub fn server(
    registry: Arc<Registry>,
    config: &ServerConfig,
    grace: Duration,
) -> std::io::Result<Server> {
    let registry = web::Data::from(registry);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(registry.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::routes)
    })
    .disable_signals()
    .shutdown_timeout(grace.as_secs())
    .bind(&config.addr)?
    .run();

    Ok(server)
}
