//! Tracing setup shared by the workspace binaries.
//!
//! Output format is picked with `RUST_LOG_FORMAT` (`json`, `pretty`, anything
//! else is compact) and filtering with the usual `RUST_LOG` directives.

use std::env::var;

use tracing::{debug, level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber at `INFO` unless `RUST_LOG` says otherwise.
pub fn init(service: &'static str) {
    init_with_level(service, LevelFilter::INFO);
}

/// Install the global subscriber with an explicit default level.
///
/// Calling this twice is harmless: the second subscriber is dropped and a
/// warning is emitted through the first one.
pub fn init_with_level(service: &'static str, level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();

    let log_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer().pretty().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(log_layer).try_init() {
        Ok(()) => debug!(service, format = %log_format, "logging initialised"),
        Err(error) => warn!(service, "tracing subscriber already installed: {error}"),
    }
}
