use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// 请求路径上的错误，只终止当前请求
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Please provide a service domain in the Host header, current Host header: ")]
    MissingHost,
    #[error("Please provide a service domain in the Host header, current Host header: {0}")]
    UnknownDomain(String),
    #[error("{0}")]
    InvalidPolicy(String),
    #[error("No server available for the service domain {0}")]
    NoPeer(String),
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("Failed to read request body: {0}")]
    Body(#[from] axum::Error),
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingHost | ProxyError::UnknownDomain(_) => StatusCode::BAD_REQUEST,
            ProxyError::InvalidPolicy(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::NoPeer(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Body(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
