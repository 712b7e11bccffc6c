pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod monitoring;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
