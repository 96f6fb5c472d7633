//! Account creation. A successful signup also signs the user in.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::{
    password::{hash_password, MIN_PASSWORD_LEN},
    session::session_cookie,
    state::AuthState,
    storage::{CreateUserOutcome, NewUser},
    types::{non_empty, present, AuthResponse, ErrorResponse, SignupRequest, UserResponse},
    utils::{normalize_email, valid_email},
};
use crate::api::error::ApiError;

const EMAIL_TAKEN: &str = "A user with this email already exists";

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Account created, session cookie set", body = AuthResponse),
        (status = 400, description = "Missing or invalid fields", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let (Some(name), Some(email), Some(password)) = (
        non_empty(request.name),
        non_empty(request.email),
        present(request.password),
    ) else {
        return Err(ApiError::BadRequest("Name, email, and password are required"));
    };
    let remember = request.remember.unwrap_or(false);

    // Length in UTF-16 code units, as browsers count it.
    if password.encode_utf16().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(
            "Password must be at least 8 characters long",
        ));
    }

    let email = normalize_email(&email);
    if !valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email format"));
    }

    // Cheap pre-check; the unique constraint still decides concurrent signups.
    if auth_state.users().find_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict(EMAIL_TAKEN));
    }

    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(anyhow::Error::from)??;

    let new_user = NewUser {
        email,
        name: name.trim().to_string(),
        password_hash,
    };
    let user = match auth_state.users().create(new_user).await? {
        CreateUserOutcome::Created(user) => user,
        CreateUserOutcome::Conflict => return Err(ApiError::Conflict(EMAIL_TAKEN)),
    };

    let token = auth_state.sessions().create_session(user.id, remember).await?;
    let cookie = session_cookie(&auth_state, &token, remember).map_err(anyhow::Error::from)?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);

    info!(user_id = user.id, "user signed up");

    Ok((
        StatusCode::OK,
        headers,
        Json(AuthResponse {
            success: true,
            user: UserResponse::from(&user),
        }),
    ))
}
