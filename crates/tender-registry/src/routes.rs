use axum::routing::{get, post};

use crate::{accounts, departments, login, registration, workflow};

pub(super) fn setup(app_state: super::AppState) -> axum::Router {
    axum::Router::new()
        .route("/register", post(registration::register::post))
        .route("/activate", post(registration::activate::post))
        .route("/login", post(login::login::post))
        .route("/logout", post(login::logout::post))
        .route("/password-reset", post(registration::password_reset::request))
        .route(
            "/password-reset/confirm",
            post(registration::password_reset::confirm),
        )
        .route(
            "/departments",
            get(departments::list::get).post(departments::create::post),
        )
        .route("/users", get(accounts::list::get))
        .route(
            "/users/{id}",
            get(accounts::detail::get).patch(accounts::detail::patch),
        )
        .route("/users/{id}/approve", post(workflow::approve::post))
        .route("/users/{id}/decline", post(workflow::decline::post))
        .route("/users/{id}/block", post(workflow::block::post))
        .route("/create-admin", post(accounts::create_admin::post))
        .fallback(fallback)
        .with_state(app_state)
}

pub async fn fallback(_uri: axum::http::Uri) -> impl axum::response::IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "error": "not found" })),
    )
}
