use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use tender_db::models;

use crate::{
    error::{ApiError, FieldErrors},
    login::Principal,
    validation,
    views::DepartmentView,
    AppState,
};

pub mod list {
    use super::*;

    pub async fn get(State(state): State<AppState>) -> Result<Json<Vec<DepartmentView>>, ApiError> {
        let departments = state.store.list_active_departments().await?;
        Ok(Json(departments.into_iter().map(Into::into).collect()))
    }
}

pub mod create {
    use super::*;

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    pub struct NewDepartment {
        name: String,
        code: String,
        description: String,
    }

    #[tracing::instrument(skip_all)]
    pub async fn post(
        State(state): State<AppState>,
        Principal(principal): Principal,
        body: Result<Json<NewDepartment>, JsonRejection>,
    ) -> Result<(StatusCode, Json<DepartmentView>), ApiError> {
        if !principal.is_superadmin() {
            return Err(ApiError::Forbidden("superadmin role required"));
        }
        let Json(NewDepartment {
            name,
            code,
            description,
        }) = body?;
        let name = name.trim().to_owned();
        let code = code.trim().to_owned();
        let mut errors = FieldErrors::new();
        validation::required(&mut errors, "name", &name);
        validation::max_length(&mut errors, "name", &name, 255);
        validation::required(&mut errors, "code", &code);
        validation::max_length(&mut errors, "code", &code, 50);
        errors.into_result()?;
        let department = state
            .store
            .create_department(models::NewDepartment {
                name,
                code,
                description,
                is_active: true,
                created: tender_db::now(),
            })
            .await
            .map_err(|err| match err {
                tender_db::Error::Duplicate { field: "code" } => {
                    ApiError::invalid("code", "a department with this code already exists")
                }
                err => err.into(),
            })?;
        tracing::info!(department_id = department.id, code = %department.code, "Created department");
        Ok((StatusCode::CREATED, Json(department.into())))
    }
}
