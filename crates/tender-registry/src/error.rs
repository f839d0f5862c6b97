use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::BTreeMap;

/// Validation messages grouped by the request field they concern.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_owned())
            .or_default()
            .push(message.into());
    }

    pub fn extend(&mut self, field: &str, messages: impl IntoIterator<Item = String>) {
        for message in messages {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Store: {0}")]
    Store(#[from] tender_db::Error),
    #[error("Credentials: {0}")]
    Credentials(#[from] crate::credentials::Error),
    #[error("Time arithmetic: {0}")]
    Time(#[from] jiff::Error),
}

impl ApiError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ApiError::Validation(FieldErrors::single(field, message))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid("non_field_errors", rejection.body_text())
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))).into_response()
            }
            ApiError::Store(tender_db::Error::Duplicate { field }) => {
                ApiError::invalid(field, format!("this {field} is already in use")).into_response()
            }
            ApiError::Unauthorized(message) => error_body(StatusCode::UNAUTHORIZED, message),
            ApiError::Forbidden(message) => error_body(StatusCode::FORBIDDEN, message),
            ApiError::NotFound(message) => error_body(StatusCode::NOT_FOUND, message),
            ApiError::Store(tender_db::Error::NotFound) => {
                error_body(StatusCode::NOT_FOUND, "not found")
            }
            err => {
                tracing::error!("Request failed: {err:?}");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_groups_messages_by_field() {
        let mut errors = FieldErrors::new();
        errors.add("password", "too short");
        errors.add("password", "entirely numeric");
        errors.add("email", "required");
        assert_eq!(errors.get("password").map(<[String]>::len), Some(2));
        assert_eq!(
            serde_json::to_value(&errors).expect("serializes"),
            json!({"email": ["required"], "password": ["too short", "entirely numeric"]})
        );
    }

    #[test]
    fn it_maps_store_failures_to_statuses() {
        let duplicate = ApiError::Store(tender_db::Error::Duplicate { field: "email" });
        assert_eq!(duplicate.into_response().status(), StatusCode::BAD_REQUEST);
        let missing = ApiError::Store(tender_db::Error::NotFound);
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
        let broken = ApiError::Store(tender_db::Error::OtherGeneral("boom".into()));
        assert_eq!(
            broken.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
