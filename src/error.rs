use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    gateway::GatewayError,
    response::{ApiResponse, Meta},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Signature verification failed: {0}")]
    Security(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{}", .source.user_message())]
    Gateway {
        #[source]
        source: GatewayError,
        /// Order that was persisted before the gateway call failed.
        order_id: Option<Uuid>,
    },

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl From<GatewayError> for AppError {
    fn from(source: GatewayError) -> Self {
        AppError::Gateway {
            source,
            order_id: None,
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Security(_) | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::OrmError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Gateway { .. })
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_id: Option<Uuid>,
    /// Set when the same request may succeed later.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = self.is_retryable();
        match &self {
            AppError::OrmError(err) => tracing::error!(error = %err, "database error"),
            AppError::Internal(err) => tracing::error!(error = ?err, "internal error"),
            AppError::Gateway { source, .. } => {
                tracing::warn!(error = %source, category = ?source.category(), retryable, "gateway error")
            }
            _ => {}
        }

        let order_id = match &self {
            AppError::Gateway { order_id, .. } => *order_id,
            _ => None,
        };
        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
                order_id,
                retryable,
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
