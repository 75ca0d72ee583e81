//! HTTP surface for the monitoring engine.
//!
//! Handlers own status codes and response envelopes; the engine below them
//! never fails a request. The only caller-visible failures are the two
//! precondition errors (unknown patient, nothing to score) plus input
//! validation on writes.

pub mod handlers;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("patient not found")]
    PatientNotFound,
    #[error("patient with this medical record number already exists")]
    DuplicateRecordNumber,
    #[error("no vital signs data available for this patient")]
    NoReadings,
    #[error("{0}")]
    Validation(String),
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::PatientNotFound => StatusCode::NOT_FOUND,
            ApiError::DuplicateRecordNumber => StatusCode::CONFLICT,
            ApiError::NoReadings => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(source) = self {
            error!(error = ?source, "request failed");
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::health)).service(
        web::scope("/api/v1")
            .route("/patients", web::post().to(handlers::create_patient))
            .route("/patients", web::get().to(handlers::list_patients))
            .route("/patients/{id}", web::get().to(handlers::get_patient))
            .route("/patients/{id}/metrics", web::post().to(handlers::log_metrics))
            .route("/patients/{id}/copilot", web::post().to(handlers::copilot))
            .route("/predictions", web::post().to(handlers::create_prediction))
            .route("/triage", web::get().to(handlers::triage)),
    );
}
