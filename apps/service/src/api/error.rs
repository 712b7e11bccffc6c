use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::database::StoreError;
use crate::orchestrator::RegistryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Registry(RegistryError::Duplicate(_) | RegistryError::AlreadyMonitored(_)) => {
                StatusCode::CONFLICT
            }
            Self::Registry(RegistryError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Registry(RegistryError::NotMonitored(_))
            | Self::Store(StoreError::SiteNotFound(_) | StoreError::ResultNotFound(_))
            | Self::Registry(RegistryError::Store(
                StoreError::SiteNotFound(_) | StoreError::ResultNotFound(_),
            )) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(status).json(ErrorBody { error: message })
    }
}
