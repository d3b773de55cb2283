use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use thiserror::Error;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Failure taxonomy for the orchestration layer.
///
/// `Validation` is a client-input error and carries its message verbatim.
/// The other variants wrap the underlying cause of an external-service,
/// staging, or fetch failure under the error kind of the operation that
/// observed it.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Error analyzing document: {0}")]
    Analysis(String),

    #[error("Error generating bilan: {0}")]
    Bilan(String),

    #[error("Error processing bilan: {0}")]
    Processing(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Analysis(_) | AppError::Bilan(_) | AppError::Processing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

fn get_trace_id() -> Option<String> {
    let span = Span::current();
    let context = span.context();
    let span_ref = context.span();
    let span_context = span_ref.span_context();

    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %error_message, "request failed");
        }

        let body = if let Some(trace_id) = get_trace_id() {
            json!({
                "error": error_message,
                "status": status.as_u16(),
                "trace_id": trace_id,
            })
        } else {
            json!({
                "error": error_message,
                "status": status.as_u16(),
            })
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
