//! Public endpoints an applicant uses before and around having a session.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tender_db::models;

use crate::{
    credentials,
    error::{ApiError, FieldErrors},
    login::open_session,
    validation,
    views::AccountView,
    AppState,
};

const INVALID_ACTIVATION_TOKEN: &str = "invalid or expired activation token";

const INVALID_RESET_TOKEN: &str = "invalid or expired password reset token";

fn parse_secret(value: &str) -> Option<uuid::Uuid> {
    uuid::Uuid::parse_str(value.trim()).ok()
}

fn check_confirmation(errors: &mut FieldErrors, password: &str, password_confirm: &str) {
    if password != password_confirm {
        errors.add("password_confirm", "passwords do not match");
    }
}

pub mod register {
    use super::*;

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    pub struct Registration {
        tender_number: String,
        department: Option<i32>,
        company_name: String,
        edrpou: String,
        legal_address: String,
        actual_address: String,
        director_name: String,
        contact_person: String,
        email: String,
        phone: String,
    }

    #[tracing::instrument(skip_all)]
    pub async fn post(
        State(state): State<AppState>,
        body: Result<Json<Registration>, JsonRejection>,
    ) -> Result<(StatusCode, Json<Value>), ApiError> {
        let Json(registration) = body?;
        let tender_number = registration.tender_number.trim().to_owned();
        let email = registration.email.trim().to_lowercase();
        let mut errors = FieldErrors::new();
        validation::required(&mut errors, "tender_number", &tender_number);
        validation::max_length(&mut errors, "tender_number", &tender_number, 100);
        validation::max_length(&mut errors, "company_name", &registration.company_name, 500);
        validation::edrpou(&mut errors, "edrpou", registration.edrpou.trim());
        validation::max_length(&mut errors, "director_name", &registration.director_name, 255);
        validation::max_length(&mut errors, "contact_person", &registration.contact_person, 255);
        validation::email(&mut errors, "email", &email);
        validation::max_length(&mut errors, "phone", &registration.phone, 20);
        if let Some(department_id) = registration.department {
            if !state.store.department_exists(department_id).await? {
                errors.add("department", "department does not exist");
            }
        }
        errors.into_result()?;
        let stamp = tender_db::now();
        let account = state
            .store
            .register_account(models::NewAccount {
                username: tender_number.clone(),
                email,
                password_hash: None,
                first_name: String::new(),
                last_name: String::new(),
                phone: registration.phone,
                company_name: registration.company_name,
                edrpou: registration.edrpou.trim().to_owned(),
                legal_address: registration.legal_address,
                actual_address: registration.actual_address,
                director_name: registration.director_name,
                contact_person: registration.contact_person,
                tender_number: Some(tender_number.clone()),
                department_id: registration.department,
                status: models::AccountStatus::New,
                role: models::Role::User,
                is_activated: false,
                created: stamp,
                updated: stamp,
            })
            .await
            .map_err(|err| match err {
                tender_db::Error::Duplicate {
                    field: "username" | "tender_number",
                } => ApiError::invalid(
                    "tender_number",
                    "an account with this tender number already exists",
                ),
                tender_db::Error::Duplicate { field: "email" } => {
                    ApiError::invalid("email", "an account with this email already exists")
                }
                err => err.into(),
            })?;
        tracing::info!(account_id = account.id, %tender_number, "Registered applicant");
        Ok((
            StatusCode::CREATED,
            Json(json!({
                "message": "registration received, wait for an administrator to review it",
                "tender_number": tender_number,
                "user_id": account.id,
            })),
        ))
    }
}

pub mod activate {
    use super::*;

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    pub struct Activation {
        token: String,
        password: String,
        password_confirm: String,
        new_username: Option<String>,
    }

    fn is_usable(account: &models::Account, now: jiff::Timestamp) -> bool {
        !account.is_activated
            && !account.status.ends_sessions()
            && account
                .activation_expires
                .is_some_and(|expires| tender_db::to_jiff(expires) > now)
    }

    #[tracing::instrument(skip_all)]
    pub async fn post(
        State(state): State<AppState>,
        body: Result<Json<Activation>, JsonRejection>,
    ) -> Result<Json<Value>, ApiError> {
        let Json(activation) = body?;
        let new_username = activation
            .new_username
            .as_deref()
            .map(str::trim)
            .filter(|username| !username.is_empty())
            .map(str::to_owned);
        let mut errors = FieldErrors::new();
        check_confirmation(&mut errors, &activation.password, &activation.password_confirm);
        if let Some(username) = &new_username {
            validation::max_length(&mut errors, "new_username", username, 150);
        }
        let account = match parse_secret(&activation.token) {
            Some(secret) => state.store.load_account_by_activation_token(secret).await?,
            None => None,
        }
        .filter(|account| is_usable(account, jiff::Timestamp::now()));
        let (username, email) = account
            .as_ref()
            .map(|account| (account.username.as_str(), account.email.as_str()))
            .unwrap_or_default();
        let username = new_username.as_deref().unwrap_or(username);
        errors.extend(
            "password",
            state
                .password_policy()
                .check(&activation.password, username, email),
        );
        let Some(account) = account else {
            errors.add("token", INVALID_ACTIVATION_TOKEN);
            return Err(ApiError::Validation(errors));
        };
        errors.into_result()?;
        let password_hash = credentials::hash_password(&activation.password)?;
        state
            .store
            .update_account(
                account.id,
                models::AccountChanges {
                    username: new_username,
                    password_hash: Some(Some(password_hash)),
                    is_activated: Some(true),
                    activation_token: Some(None),
                    activation_expires: Some(None),
                    updated: Some(tender_db::now()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| match err {
                tender_db::Error::Duplicate { field: "username" } => {
                    ApiError::invalid("new_username", "this username is already taken")
                }
                err => err.into(),
            })?;
        let (token, account) = open_session(&state, account.id).await?;
        tracing::info!(account_id = account.id, "Activated account");
        let user = AccountView::load(state.store.as_ref(), account).await?;
        Ok(Json(json!({
            "message": "account activated",
            "token": token,
            "user": user,
        })))
    }
}

pub mod password_reset {
    use super::*;

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    pub struct ResetRequest {
        email: String,
    }

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    pub struct ResetConfirmation {
        token: String,
        password: String,
        password_confirm: String,
    }

    /// Answers the same way whether or not the address is known.
    #[tracing::instrument(skip_all)]
    pub async fn request(
        State(state): State<AppState>,
        body: Result<Json<ResetRequest>, JsonRejection>,
    ) -> Result<Json<Value>, ApiError> {
        let Json(ResetRequest { email }) = body?;
        let email = email.trim().to_lowercase();
        let mut errors = FieldErrors::new();
        validation::email(&mut errors, "email", &email);
        errors.into_result()?;
        if let Some(account) = state
            .store
            .load_account_by_email(&email)
            .await?
            .filter(|account| account.is_activated)
        {
            let secret = uuid::Uuid::new_v4();
            let stamp = tender_db::now();
            state
                .store
                .create_password_reset(
                    models::NewPasswordResetToken {
                        account_id: account.id,
                        token: secret,
                        used: false,
                        created: stamp,
                    },
                    models::NewNotification {
                        account_id: account.id,
                        kind: models::NotificationKind::PasswordReset,
                        recipient: account.email.clone(),
                        tender_number: account.tender_number.unwrap_or(account.username),
                        link: Some(state.settings.link("reset-password", &secret)),
                        reason: None,
                        created: stamp,
                    },
                )
                .await?;
            tracing::info!(account_id = account.id, "Queued password reset");
        }
        Ok(Json(json!({
            "message": "if the address is registered, a password reset link has been sent"
        })))
    }

    #[tracing::instrument(skip_all)]
    pub async fn confirm(
        State(state): State<AppState>,
        body: Result<Json<ResetConfirmation>, JsonRejection>,
    ) -> Result<Json<Value>, ApiError> {
        let Json(confirmation) = body?;
        let mut errors = FieldErrors::new();
        check_confirmation(
            &mut errors,
            &confirmation.password,
            &confirmation.password_confirm,
        );
        let now = jiff::Timestamp::now();
        let reset = match parse_secret(&confirmation.token) {
            Some(secret) => state.store.load_password_reset(secret).await?,
            None => None,
        };
        let reset = match reset {
            Some(reset)
                if !reset.used
                    && tender_db::to_jiff(reset.created)
                        .checked_add(state.settings.password_reset_validity)?
                        > now =>
            {
                Some(reset)
            }
            _ => None,
        };
        let account = match &reset {
            Some(reset) => state.store.load_account_by_id(reset.account_id).await?,
            None => None,
        };
        let (Some(reset), Some(account)) = (reset, account) else {
            errors.add("token", INVALID_RESET_TOKEN);
            return Err(ApiError::Validation(errors));
        };
        errors.extend(
            "password",
            state.password_policy().check(
                &confirmation.password,
                &account.username,
                &account.email,
            ),
        );
        errors.into_result()?;
        let password_hash = credentials::hash_password(&confirmation.password)?;
        state
            .store
            .complete_password_reset(reset.token, password_hash)
            .await
            .map_err(|err| match err {
                tender_db::Error::NotFound => ApiError::invalid("token", INVALID_RESET_TOKEN),
                err => err.into(),
            })?;
        tracing::info!(account_id = account.id, "Password reset completed");
        Ok(Json(json!({ "message": "password has been changed" })))
    }
}
