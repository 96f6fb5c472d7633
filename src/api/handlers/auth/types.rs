//! Request/response types for auth endpoints.
//!
//! Request fields are optional so a missing field and an empty one produce the
//! same 400 message instead of a deserialization rejection.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::storage::UserRecord;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub remember: Option<bool>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct SignupRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub remember: Option<bool>,
}

/// Public projection of a user. Never carries the password hash.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub name: String,
}

impl From<&UserRecord> for UserResponse {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub success: bool,
    pub user: UserResponse,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutResponse {
    pub success: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user: Option<UserResponse>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

/// Treat blank strings the same as absent fields.
pub(super) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Passwords are taken verbatim: only the empty string counts as missing.
pub(super) fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn login_request_tolerates_missing_fields() -> Result<()> {
        let request: LoginRequest = serde_json::from_str(r#"{"email":"a@example.com"}"#)?;
        assert_eq!(request.email.as_deref(), Some("a@example.com"));
        assert!(request.password.is_none());
        assert!(request.remember.is_none());
        Ok(())
    }

    #[test]
    fn user_projection_drops_password_hash() -> Result<()> {
        let record = UserRecord {
            id: 7,
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            password_hash: "$argon2id$secret".to_string(),
        };
        let value = serde_json::to_value(UserResponse::from(&record))?;
        assert_eq!(value["id"], 7);
        assert!(value.get("password_hash").is_none());
        assert!(!value.to_string().contains("argon2id"));
        Ok(())
    }

    #[test]
    fn session_response_serializes_null_user() -> Result<()> {
        let value = serde_json::to_value(SessionResponse { user: None })?;
        assert_eq!(value.to_string(), r#"{"user":null}"#);
        Ok(())
    }

    #[test]
    fn non_empty_filters_blank() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("x".to_string())), Some("x".to_string()));
    }

    #[test]
    fn present_keeps_whitespace() {
        assert_eq!(present(Some(String::new())), None);
        assert_eq!(present(None), None);
        assert_eq!(present(Some("  ".to_string())), Some("  ".to_string()));
    }
}
