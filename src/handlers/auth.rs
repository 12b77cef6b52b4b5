// src/handlers/auth.rs

use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::admin::{Admin, LoginRequest},
    utils::{
        hash::verify_password,
        jwt::{ADMIN_ROLE, sign_jwt},
    },
};

/// Authenticates an administrator and returns a JWT token.
///
/// Unknown usernames and wrong passwords get the same 401 so the response
/// does not reveal which accounts exist.
pub async fn login(
    State(pool): State<SqlitePool>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let admin = sqlx::query_as::<_, Admin>(
        "SELECT id, username, password, created_at FROM admins WHERE username = ?1",
    )
    .bind(&payload.username)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Login DB error: {:?}", e);
        AppError::from(e)
    })?
    .ok_or(AppError::AuthError("Invalid username or password".to_string()))?;

    if !verify_password(&payload.password, &admin.password)? {
        tracing::warn!(username = %admin.username, "Rejected admin login");
        return Err(AppError::AuthError("Invalid username or password".to_string()));
    }

    let token = sign_jwt(
        admin.id,
        ADMIN_ROLE,
        &config.jwt_secret,
        config.jwt_expiration,
    )?;

    tracing::info!(username = %admin.username, "Admin logged in");

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
    })))
}
