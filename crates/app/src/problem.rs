use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::cascade::{CascadeError, ErrorClass};
use crate::reconcile::ReconcileError;
use crate::state::StateError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "storage failure; see server logs",
        )
    }
}

impl From<CascadeError> for ProblemResponse {
    fn from(err: CascadeError) -> Self {
        match err.class() {
            ErrorClass::Precondition => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "precondition_failed",
                err.to_string(),
            ),
            ErrorClass::Reference => {
                Self::new(StatusCode::NOT_FOUND, "unknown_reference", err.to_string())
            }
            ErrorClass::Conflict => Self::new(StatusCode::CONFLICT, "conflict", err.to_string()),
            ErrorClass::Internal => Self::internal(),
        }
    }
}

impl From<StateError> for ProblemResponse {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            StateError::Storage(_) => Self::internal(),
        }
    }
}

impl From<ReconcileError> for ProblemResponse {
    fn from(err: ReconcileError) -> Self {
        tracing::error!(stage = "reconcile", error = %err, "reconcile request failed");
        Self::internal()
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
