use super::state::AppState;
use crate::error::{AuthError, Error};
use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_LENGTH;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::error::Error as _;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full error chain, attached to 500 responses for development mode
#[derive(Debug, Clone)]
struct ErrorDetail(String);

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Auth(AuthError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Storage(_) | Error::PartialIngestion { .. } | Error::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show any caller
    fn public_message(&self) -> String {
        match self {
            Error::Storage(_) => "Video storage is unavailable".to_string(),
            Error::Server(_) => "Internal server error".to_string(),
            Error::PartialIngestion { file_name, source } => format!(
                "Video {file_name} was saved but its record was not ({}); resubmit the details for this file",
                source.public_message()
            ),
            other => other.to_string(),
        }
    }
}

fn error_chain(error: &Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let file_name = match &self {
            Error::PartialIngestion { file_name, .. } => Some(file_name.clone()),
            _ => None,
        };

        let detail = if status.is_server_error() {
            let chain = error_chain(&self);
            error!("{} {}", self.code(), chain);
            Some(chain)
        } else {
            warn!("Request rejected ({}): {}", status, self);
            None
        };

        let body = ErrorResponse {
            code: self.code(),
            message: self.public_message(),
            file_name,
            detail: None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(detail) = detail {
            response.extensions_mut().insert(ErrorDetail(detail));
        }
        response
    }
}

/// Add `detail` to 500 bodies when the server runs in development mode
pub async fn expose_error_detail(State(state): State<AppState>, response: Response) -> Response {
    if !state.expose_error_detail {
        return response;
    }
    let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to buffer error body: {}", e);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let mut value = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => value,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };
    if let Some(object) = value.as_object_mut() {
        object.insert("detail".to_string(), serde_json::Value::String(detail));
    }

    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(Error::Auth(AuthError::MissingToken).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::Auth(AuthError::InvalidToken).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Storage("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let error = Error::Storage("/secret/path is read-only".into());
        assert!(!error.public_message().contains("/secret/path"));
        assert!(error_chain(&error).contains("/secret/path"));
    }

    #[test]
    fn test_partial_ingestion_names_file() {
        let error = Error::PartialIngestion {
            file_name: "v.webm".into(),
            source: Box::new(Error::Conflict("UHID U1 already exists".into())),
        };
        let message = error.public_message();
        assert!(message.contains("v.webm"));
        assert!(message.contains("UHID U1 already exists"));
    }
}
