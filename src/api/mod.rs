use crate::api::{
    handlers::{
        auth::{login, logout, session, signup, AuthState},
        health,
    },
    pipeline::{Pipeline, RateLimit},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Json, Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle, time::MissedTickBehavior};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use url::Url;

pub mod error;
pub mod handlers;
mod openapi;
pub mod pipeline;

pub use openapi::openapi;

/// Build the application router.
///
/// Every auth route carries its own pipeline; `/health` and the `OpenAPI`
/// document are not rate limited.
pub fn router(auth_state: Arc<AuthState>) -> Router {
    let limits = auth_state.rate_limits().clone();

    Router::new()
        .route(
            "/api/auth/login",
            pipeline::layer(
                post(login::login),
                Pipeline::new().with(RateLimit::new(limits.login)),
            ),
        )
        .route(
            "/api/auth/signup",
            pipeline::layer(
                post(signup::signup),
                Pipeline::new().with(RateLimit::new(limits.signup)),
            ),
        )
        .route(
            "/api/auth/logout",
            pipeline::layer(
                post(logout::logout),
                Pipeline::new().with(RateLimit::new(limits.logout)),
            ),
        )
        .route(
            "/api/auth/session",
            pipeline::layer(
                get(session::session),
                Pipeline::new().with(RateLimit::new(limits.session)),
            ),
        )
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span)),
        )
        .route("/health", get(health::health))
        .layer(Extension(auth_state))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

/// Start the server
/// # Errors
/// Return error if the origin is invalid or the listener fails
pub async fn new(
    port: u16,
    auth_state: Arc<AuthState>,
    allowed_origin: Option<String>,
    sweep_interval: Option<Duration>,
) -> Result<()> {
    let mut app = router(auth_state.clone());

    if let Some(origin) = allowed_origin {
        let cors = CorsLayer::new()
            .allow_headers([CONTENT_TYPE])
            .allow_methods([Method::GET, Method::POST])
            .allow_origin(AllowOrigin::exact(origin_header(&origin)?))
            .allow_credentials(true);
        app = app.layer(cors);
    }

    let sweeper = sweep_interval.map(|every| spawn_session_sweeper(auth_state, every));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    Ok(())
}

/// Periodically remove expired sessions. Failures are logged and retried on the next tick.
pub fn spawn_session_sweeper(auth_state: Arc<AuthState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match auth_state.sessions().cleanup_expired_sessions().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "expired sessions removed"),
                Err(err) => error!("session sweep failed: {err}"),
            }
        }
    })
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn origin_header(allowed_origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(allowed_origin)
        .with_context(|| format!("Invalid allowed origin: {allowed_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Allowed origin must include a valid host: {allowed_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build allowed origin header")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{
        memory::MemoryStore, rate_limit::MemoryCounterStore, AuthConfig, Environment,
    };

    #[test]
    fn origin_header_strips_path() {
        let origin = origin_header("https://watch.example.com/app/").unwrap();
        assert_eq!(origin, "https://watch.example.com");

        let origin = origin_header("http://localhost:3000").unwrap();
        assert_eq!(origin, "http://localhost:3000");
    }

    #[test]
    fn origin_header_rejects_garbage() {
        assert!(origin_header("not a url").is_err());
    }

    #[tokio::test]
    async fn sweeper_removes_expired_sessions() {
        use crate::api::handlers::auth::storage::{NewSession, SessionStore};

        let store = Arc::new(MemoryStore::new());
        store
            .insert(NewSession {
                session_hash: vec![1; 32],
                user_id: 1,
                expires_at: chrono::Utc::now() - chrono::Duration::seconds(1),
            })
            .await
            .unwrap();
        let auth_state = Arc::new(AuthState::new(
            AuthConfig::new(Environment::Development),
            store.clone(),
            store.clone(),
            Arc::new(MemoryCounterStore::new()),
        ));

        let handle = spawn_session_sweeper(auth_state, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(store.session_count().await, 0);
    }
}
