use std::io::Error as IoError;

use thiserror::Error;

use crate::config;

/// Errors that end the process
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),

    #[error("configuration error: {0}")]
    Config(#[from] config::Error),

    #[error("{0:#}")]
    Setup(#[from] anyhow::Error),
}
