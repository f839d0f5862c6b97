use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tender_db::models::{self, AccountStatus, Role};

use crate::{
    credentials,
    error::{ApiError, FieldErrors},
    login::Principal,
    validation,
    views::AccountView,
    workflow::{self, resolve_scope},
    AppState,
};

fn parse_status(value: &str) -> Result<AccountStatus, ApiError> {
    value
        .parse::<AccountStatus>()
        .map_err(|err| ApiError::invalid("status", err.to_string()))
}

pub mod list {
    use super::*;

    #[derive(Debug, Default, serde::Deserialize)]
    pub struct ListQuery {
        department: Option<String>,
        status: Option<String>,
    }

    pub async fn get(
        State(state): State<AppState>,
        Principal(principal): Principal,
        Query(query): Query<ListQuery>,
    ) -> Result<Json<Vec<AccountView>>, ApiError> {
        let department = match query.department.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(value.parse::<i32>().map_err(|_| {
                ApiError::invalid("department", "department must be a number")
            })?),
        };
        let status = match query.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(parse_status(value)?),
        };
        let scope = resolve_scope(state.store.as_ref(), &principal).await?;
        let Some(filter) = scope.applicant_filter(department, status) else {
            return Ok(Json(Vec::new()));
        };
        let accounts = state.store.list_applicants(&filter).await?;
        Ok(Json(
            AccountView::load_all(state.store.as_ref(), accounts).await?,
        ))
    }
}

pub mod detail {
    use super::*;

    /// Distinguishes an absent field from an explicit `null`.
    fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: serde::Deserialize<'de>,
    {
        <Option<T> as serde::Deserialize>::deserialize(deserializer).map(Some)
    }

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    pub struct AccountPatch {
        company_name: Option<String>,
        edrpou: Option<String>,
        legal_address: Option<String>,
        actual_address: Option<String>,
        director_name: Option<String>,
        contact_person: Option<String>,
        email: Option<String>,
        phone: Option<String>,
        #[serde(deserialize_with = "nullable")]
        department: Option<Option<i32>>,
        status: Option<String>,
        is_activated: Option<bool>,
    }

    async fn load_visible(
        state: &AppState,
        principal: &models::Account,
        account_id: i32,
    ) -> Result<(models::Account, workflow::AccessScope), ApiError> {
        let scope = resolve_scope(state.store.as_ref(), principal).await?;
        let account = state
            .store
            .load_account_by_id(account_id)
            .await?
            .filter(|account| scope.can_view(account))
            .ok_or(ApiError::NotFound("user not found"))?;
        Ok((account, scope))
    }

    pub async fn get(
        State(state): State<AppState>,
        Principal(principal): Principal,
        Path(account_id): Path<i32>,
    ) -> Result<Json<AccountView>, ApiError> {
        let (account, _) = load_visible(&state, &principal, account_id).await?;
        Ok(Json(AccountView::load(state.store.as_ref(), account).await?))
    }

    #[tracing::instrument(skip(state, principal, body))]
    pub async fn patch(
        State(state): State<AppState>,
        Principal(principal): Principal,
        Path(account_id): Path<i32>,
        body: Result<Json<AccountPatch>, JsonRejection>,
    ) -> Result<Json<AccountView>, ApiError> {
        let Json(patch) = body?;
        let (account, scope) = load_visible(&state, &principal, account_id).await?;
        let staff_fields =
            patch.department.is_some() || patch.status.is_some() || patch.is_activated.is_some();
        if staff_fields && !principal.is_admin() {
            return Err(ApiError::Forbidden(
                "only staff may change department, status or activation",
            ));
        }
        let email = patch.email.map(|email| email.trim().to_lowercase());
        let edrpou = patch.edrpou.map(|edrpou| edrpou.trim().to_owned());
        let mut errors = FieldErrors::new();
        if let Some(company_name) = &patch.company_name {
            validation::max_length(&mut errors, "company_name", company_name, 500);
        }
        if let Some(edrpou) = &edrpou {
            validation::edrpou(&mut errors, "edrpou", edrpou);
        }
        if let Some(director_name) = &patch.director_name {
            validation::max_length(&mut errors, "director_name", director_name, 255);
        }
        if let Some(contact_person) = &patch.contact_person {
            validation::max_length(&mut errors, "contact_person", contact_person, 255);
        }
        if let Some(email) = &email {
            validation::email(&mut errors, "email", email);
        }
        if let Some(phone) = &patch.phone {
            validation::max_length(&mut errors, "phone", phone, 20);
        }
        if let Some(Some(department_id)) = patch.department {
            if !state.store.department_exists(department_id).await? {
                errors.add("department", "department does not exist");
            }
        }
        let status = match patch.status.as_deref().map(str::parse::<AccountStatus>).transpose() {
            Ok(status) => status,
            Err(err) => {
                errors.add("status", err.to_string());
                None
            }
        };
        errors.into_result()?;
        if let Some(department_id) = patch.department {
            if department_id != account.department_id && !scope.can_assign(department_id) {
                return Err(ApiError::Forbidden(
                    "accounts can only be moved into a granted department",
                ));
            }
        }
        if let Some(status) = status {
            workflow::check_review_update(account.status, status)?;
        }
        let updated = state
            .store
            .update_account(
                account.id,
                models::AccountChanges {
                    email,
                    phone: patch.phone,
                    company_name: patch.company_name,
                    edrpou,
                    legal_address: patch.legal_address,
                    actual_address: patch.actual_address,
                    director_name: patch.director_name,
                    contact_person: patch.contact_person,
                    department_id: patch.department,
                    status,
                    is_activated: patch.is_activated,
                    updated: Some(tender_db::now()),
                    ..Default::default()
                },
            )
            .await?;
        if status.is_some_and(|status| status != account.status) {
            tracing::info!(
                principal_id = principal.id,
                account_id,
                from = %account.status,
                to = %updated.status,
                "Changed account status"
            );
        }
        Ok(Json(AccountView::load(state.store.as_ref(), updated).await?))
    }
}

pub mod create_admin {
    use super::*;

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    pub struct NewAdmin {
        username: String,
        email: String,
        password: String,
        first_name: String,
        last_name: String,
        departments: Vec<i32>,
    }

    #[tracing::instrument(skip_all)]
    pub async fn post(
        State(state): State<AppState>,
        Principal(principal): Principal,
        body: Result<Json<NewAdmin>, JsonRejection>,
    ) -> Result<(StatusCode, Json<Value>), ApiError> {
        if !principal.is_superadmin() {
            return Err(ApiError::Forbidden("superadmin role required"));
        }
        let Json(new_admin) = body?;
        let username = new_admin.username.trim().to_owned();
        let email = new_admin.email.trim().to_lowercase();
        let mut errors = FieldErrors::new();
        validation::required(&mut errors, "username", &username);
        validation::max_length(&mut errors, "username", &username, 150);
        validation::email(&mut errors, "email", &email);
        validation::required(&mut errors, "first_name", &new_admin.first_name);
        validation::required(&mut errors, "last_name", &new_admin.last_name);
        if new_admin.password.is_empty() {
            errors.add("password", "this field is required");
        } else {
            errors.extend(
                "password",
                state
                    .password_policy()
                    .check(&new_admin.password, &username, &email),
            );
        }
        errors.into_result()?;
        let password_hash = credentials::hash_password(&new_admin.password)?;
        let stamp = tender_db::now();
        let (account, granted) = state
            .store
            .create_admin(
                models::NewAccount {
                    username,
                    email,
                    password_hash: Some(password_hash),
                    first_name: new_admin.first_name.trim().to_owned(),
                    last_name: new_admin.last_name.trim().to_owned(),
                    phone: String::new(),
                    company_name: String::new(),
                    edrpou: String::new(),
                    legal_address: String::new(),
                    actual_address: String::new(),
                    director_name: String::new(),
                    contact_person: String::new(),
                    tender_number: None,
                    department_id: None,
                    status: AccountStatus::New,
                    role: Role::Admin,
                    is_activated: true,
                    created: stamp,
                    updated: stamp,
                },
                &new_admin.departments,
            )
            .await?;
        tracing::info!(
            principal_id = principal.id,
            account_id = account.id,
            ?granted,
            "Created administrator"
        );
        Ok((
            StatusCode::CREATED,
            Json(json!({
                "message": "administrator created",
                "user_id": account.id,
                "username": account.username,
            })),
        ))
    }
}
