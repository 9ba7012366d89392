use serde::Serialize;
use utoipa::ToSchema;

/// Pagination block. Every response carries one; single-resource and error
/// responses leave it empty.
#[derive(Debug, Serialize, ToSchema, Clone, Default)]
pub struct Meta {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub total: Option<i64>,
}

impl Meta {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// `{ "message": ..., "data": ..., "meta": ... }`, shared by success and error bodies.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: Option<T>,
    pub meta: Option<Meta>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T, meta: Option<Meta>) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            meta,
        }
    }
}
