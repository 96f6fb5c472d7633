//! Session cookie handling and the "who am I" endpoint.

use anyhow::Result;
use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, warn};

use super::{
    sessions::SessionManager,
    state::{AuthConfig, AuthState},
    types::{SessionResponse, UserResponse},
};

pub const SESSION_COOKIE_NAME: &str = "session_token";

/// Build the `HttpOnly` session cookie. `Max-Age` follows the remember-me choice.
pub(crate) fn session_cookie(
    auth_state: &AuthState,
    token: &str,
    remember: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = auth_state.sessions().ttl_seconds(remember);
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    );
    if auth_state.config().session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Expire the session cookie on the client.
pub(crate) fn clear_session_cookie(
    auth_config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if auth_config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Read the session token from the `Cookie` header(s).
#[must_use]
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == SESSION_COOKIE_NAME).then(|| val.trim().to_string())
        })
        .find(|token| !token.is_empty())
}

/// Resolve the current user id from the request cookies.
///
/// Entry point for any endpoint that needs the caller's identity.
///
/// # Errors
/// Returns an error if the session lookup fails.
pub async fn current_user_id(headers: &HeaderMap, sessions: &SessionManager) -> Result<Option<i64>> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    sessions.validate_session(&token).await
}

fn with_cleared_cookie(auth_state: &AuthState) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        headers.insert(SET_COOKIE, cookie);
    }
    headers
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Current user, or null when signed out", body = SessionResponse),
        (status = 429, description = "Rate limited", body = super::types::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let anonymous = || Json(SessionResponse { user: None });

    // Lookup failures degrade to "signed out" instead of surfacing a 500.
    let user_id = match current_user_id(&headers, auth_state.sessions()).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return (StatusCode::OK, anonymous()).into_response(),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            return (StatusCode::OK, anonymous()).into_response();
        }
    };

    match auth_state.users().find_by_id(user_id).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(SessionResponse {
                user: Some(UserResponse::from(&user)),
            }),
        )
            .into_response(),
        Ok(None) => {
            // The session outlived its user; drop both the row and the cookie.
            warn!(user_id, "session points to a missing user");
            if let Some(token) = extract_session_token(&headers) {
                auth_state.sessions().delete_session(&token).await;
            }
            (StatusCode::OK, with_cleared_cookie(&auth_state), anonymous()).into_response()
        }
        Err(err) => {
            error!("Failed to lookup session user: {err}");
            (StatusCode::OK, anonymous()).into_response()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{
        memory::MemoryStore,
        rate_limit::MemoryCounterStore,
        state::Environment,
    };

    fn state(environment: Environment) -> AuthState {
        let store = Arc::new(MemoryStore::new());
        AuthState::new(
            AuthConfig::new(environment),
            store.clone(),
            store,
            Arc::new(MemoryCounterStore::new()),
        )
    }

    #[test]
    fn cookie_attributes_in_development() {
        let cookie = session_cookie(&state(Environment::Development), "abc", false).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert_eq!(
            cookie,
            "session_token=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=43200"
        );
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn cookie_remember_me_and_production() {
        let cookie = session_cookie(&state(Environment::Production), "abc", true).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.ends_with("; Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(&AuthConfig::new(Environment::Development)).unwrap();
        assert_eq!(
            cookie.to_str().unwrap(),
            "session_token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
        );
    }

    #[test]
    fn extract_token_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; session_token=tok123 ; lang=en"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok123"));
    }

    #[test]
    fn extract_token_across_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("session_token=tok456"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok456"));
    }

    #[test]
    fn extract_token_missing_or_empty() {
        assert!(extract_session_token(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("session_token=; other=1"));
        assert!(extract_session_token(&headers).is_none());
    }

    #[tokio::test]
    async fn current_user_id_resolves_cookie() {
        let state = state(Environment::Development);
        let token = state.sessions().create_session(8, false).await.unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("session_token={token}")).unwrap(),
        );
        assert_eq!(
            current_user_id(&headers, state.sessions()).await.unwrap(),
            Some(8)
        );
        assert_eq!(
            current_user_id(&HeaderMap::new(), state.sessions())
                .await
                .unwrap(),
            None
        );
    }
}
