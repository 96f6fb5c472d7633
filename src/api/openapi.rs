use crate::api::handlers::{
    auth::{login, logout, session, signup, types},
    health,
};
use utoipa::{
    openapi::{Contact, License},
    OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        login::login,
        signup::signup,
        logout::logout,
        session::session
    ),
    components(schemas(
        health::Health,
        types::LoginRequest,
        types::SignupRequest,
        types::UserResponse,
        types::AuthResponse,
        types::LogoutResponse,
        types::SessionResponse,
        types::ErrorResponse
    )),
    tags(
        (name = "auth", description = "Email and password sessions"),
        (name = "health", description = "Liveness and store reachability"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    // Cargo.toml is the source of truth for the document info.
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
    doc.info.contact = cargo_contact();
    doc.info.license = cargo_license();

    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated when passed through env!.
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(':').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }

    match author.find('<') {
        Some(start) => (
            non_empty(&author[..start]),
            non_empty(author[start + 1..].trim_end_matches('>')),
        ),
        None => (non_empty(author), None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn info_comes_from_cargo() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            doc.info.license.as_ref().map(|license| license.name.as_str()),
            Some("BSD-3-Clause")
        );
        let contact = doc.info.contact.unwrap();
        assert_eq!(contact.email.as_deref(), Some("team@streamauth.dev"));
    }

    #[test]
    fn documents_every_route() {
        let doc = openapi();
        for path in [
            "/health",
            "/api/auth/login",
            "/api/auth/signup",
            "/api/auth/logout",
            "/api/auth/session",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemas = doc.components.unwrap().schemas;
        assert!(schemas.contains_key("ErrorResponse"));
        assert!(schemas.contains_key("SessionResponse"));
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Jane Doe <jane@example.com>"),
            (Some("Jane Doe"), Some("jane@example.com"))
        );
        assert_eq!(parse_author("Jane Doe"), (Some("Jane Doe"), None));
        assert_eq!(
            parse_author("<ops@example.com>"),
            (None, Some("ops@example.com"))
        );
        assert_eq!(parse_author("  <  >"), (None, None));
    }
}
