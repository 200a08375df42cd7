use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::auth::{password, tokens};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::requests::{self, LoginRequest, RegisterRequest};
use crate::social::users::{self, NewUser};
use crate::state::AppState;

/// Token name recorded for the issuing client.
fn client_name(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .chars()
        .take(255)
        .collect()
}

/// bcrypt is deliberately slow; keep it off the async workers.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {}", e)))
}

/// POST /auth/register - create an account and issue a token
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    req.name = requests::trimmed(req.name);
    req.email = requests::trimmed(req.email).to_lowercase();
    requests::validate(&req)?;

    let cost = state.config.auth.bcrypt_cost;
    let plain = req.password.clone();
    let password_hash = blocking(move || password::hash_password(&plain, cost)).await??;

    let conn = state.db.get()?;
    let user = users::create_user(
        &conn,
        &NewUser {
            name: req.name,
            email: req.email,
            password_hash,
        },
    )?;
    let token = tokens::issue_token(
        &conn,
        user.id,
        &client_name(&headers),
        state.config.auth.token_hours,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": user, "token": token })),
    ))
}

/// POST /auth/login - exchange credentials for a token
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    req.email = requests::trimmed(req.email).to_lowercase();
    requests::validate(&req)?;

    let user = {
        let conn = state.db.get()?;
        users::find_by_email(&conn, &req.email)?
    };
    let invalid = || AppError::validation("password", "The selected password is invalid.");
    let user = user.ok_or_else(invalid)?;

    let hash = user.password_hash.clone();
    let plain = req.password;
    if !blocking(move || password::verify_password(&plain, &hash)).await? {
        tracing::warn!(user = user.id, "Rejected login");
        return Err(invalid());
    }

    let conn = state.db.get()?;
    let token = tokens::issue_token(
        &conn,
        user.id,
        &client_name(&headers),
        state.config.auth.token_hours,
    )?;
    tracing::info!(user = user.id, "Logged in");

    Ok(Json(json!({ "user": user, "token": token })))
}

/// GET /auth/me - the authenticated user
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let user = users::find_user(&conn, user.id)?;
    Ok(Json(json!({ "user": user })))
}

/// POST /auth/logout - revoke the presented token
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    tokens::revoke_token(&conn, &user.token)?;
    tracing::info!(user = user.id, "Logged out");
    Ok(Json(json!({ "message": "Logged out." })))
}
