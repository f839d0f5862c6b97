use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde_json::{json, Value};
use tender_db::models;

use crate::{credentials, error::ApiError, views::AccountView, AppState};

/// The account behind the bearer token of the current request.
#[derive(Clone, Debug)]
pub struct Principal(pub models::Account);

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .ok_or(ApiError::Unauthorized(
                "authentication credentials were not provided",
            ))?;
        let account = state
            .store
            .load_account_by_auth_token(&credentials::digest(secret))
            .await?
            .ok_or(ApiError::Unauthorized("invalid token"))?;
        if account.status.ends_sessions() {
            return Err(ApiError::Unauthorized("account is blocked or declined"));
        }
        Ok(Principal(account))
    }
}

/// Rotates the bearer token of the account and stamps its last login.
pub async fn open_session(
    state: &AppState,
    account_id: i32,
) -> Result<(String, models::Account), ApiError> {
    let token = credentials::issue_token();
    state.store.issue_auth_token(account_id, token.digest).await?;
    let stamp = tender_db::now();
    let account = state
        .store
        .update_account(
            account_id,
            models::AccountChanges {
                last_login: Some(Some(stamp)),
                updated: Some(stamp),
                ..Default::default()
            },
        )
        .await?;
    Ok((token.secret, account))
}

pub mod login {
    use super::*;
    use crate::error::FieldErrors;

    #[derive(Debug, serde::Deserialize)]
    pub struct Credentials {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    }

    #[tracing::instrument(skip_all)]
    pub async fn post(
        State(state): State<AppState>,
        body: Result<Json<Credentials>, JsonRejection>,
    ) -> Result<Json<Value>, ApiError> {
        let Json(Credentials { username, password }) = body?;
        let mut errors = FieldErrors::new();
        crate::validation::required(&mut errors, "username", &username);
        crate::validation::required(&mut errors, "password", &password);
        errors.into_result()?;
        let account = state
            .store
            .load_account_by_login(username.trim())
            .await?;
        let account = match account {
            Some(account)
                if credentials::verify_password(&password, account.password_hash.as_deref())? =>
            {
                account
            }
            _ => {
                tracing::info!("Rejected login");
                return Err(ApiError::invalid("non_field_errors", "invalid credentials"));
            }
        };
        if !account.is_activated {
            return Err(ApiError::invalid(
                "non_field_errors",
                "account is not activated",
            ));
        }
        if account.status.ends_sessions() {
            return Err(ApiError::invalid(
                "non_field_errors",
                "account is blocked or declined",
            ));
        }
        let (token, account) = open_session(&state, account.id).await?;
        tracing::info!(account_id = account.id, "Logged in");
        let user = AccountView::load(state.store.as_ref(), account).await?;
        Ok(Json(json!({ "token": token, "user": user })))
    }
}

pub mod logout {
    use super::*;

    pub async fn post(
        State(state): State<AppState>,
        Principal(account): Principal,
    ) -> Result<Json<Value>, ApiError> {
        state.store.revoke_auth_token(account.id).await?;
        tracing::info!(account_id = account.id, "Logged out");
        Ok(Json(json!({ "message": "logged out" })))
    }
}
