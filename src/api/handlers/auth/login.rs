//! Email + password login.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    password::{dummy_verify, verify_password},
    session::session_cookie,
    state::AuthState,
    types::{non_empty, present, AuthResponse, ErrorResponse, LoginRequest, UserResponse},
    utils::normalize_email,
};
use crate::api::error::ApiError;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in, session cookie set", body = AuthResponse),
        (status = 400, description = "Missing email or password", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let (Some(email), Some(password)) = (non_empty(request.email), present(request.password))
    else {
        return Err(ApiError::BadRequest("Email and password are required"));
    };
    let remember = request.remember.unwrap_or(false);
    let email = normalize_email(&email);

    let Some(user) = auth_state.users().find_by_email(&email).await? else {
        // Same cost as a wrong password so unknown emails are not distinguishable.
        tokio::task::spawn_blocking(move || dummy_verify(&password))
            .await
            .map_err(anyhow::Error::from)?;
        debug!("login for unknown email");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    };

    let digest = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &digest))
        .await
        .map_err(anyhow::Error::from)?;
    if !verified {
        debug!(user_id = user.id, "login with wrong password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    }

    let token = auth_state.sessions().create_session(user.id, remember).await?;
    let cookie = session_cookie(&auth_state, &token, remember).map_err(anyhow::Error::from)?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);

    info!(user_id = user.id, remember, "user logged in");

    Ok((
        StatusCode::OK,
        headers,
        Json(AuthResponse {
            success: true,
            user: UserResponse::from(&user),
        }),
    ))
}
