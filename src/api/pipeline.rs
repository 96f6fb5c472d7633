//! Per-route request pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`]s evaluated against an
//! immutable [`RequestContext`]. Each step either continues with a (possibly
//! rebuilt) context or halts with a terminal response; the first halt wins and
//! later steps never run. When every step continues, the final context is
//! inserted as a request extension and the handler runs.
//!
//! ```text
//! Pending -> Middleware[0] -> ... -> Middleware[n] -> HandlerInvoked(response)
//!                 \                       \
//!                  ShortCircuited(response)
//! ```

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts, RawPathParams, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, fmt, marker::PhantomData, net::SocketAddr, sync::Arc};
use tracing::{debug, error};

use crate::api::{
    error::ApiError,
    handlers::auth::{
        rate_limit::{RateLimitDecision, RateLimiter},
        session::current_user_id,
        utils::client_identifier,
        AuthState,
    },
};

/// Snapshot of a request as seen by middlewares. Rebuilt, never mutated.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    peer: Option<SocketAddr>,
    headers: HeaderMap,
    query: HashMap<String, String>,
    params: HashMap<String, String>,
    validated_query: Option<Value>,
    validated_params: Option<Value>,
    user_id: Option<i64>,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        peer: Option<SocketAddr>,
        headers: HeaderMap,
        query: HashMap<String, String>,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            peer,
            headers,
            query,
            params,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_validated_query(self, value: Value) -> Self {
        Self {
            validated_query: Some(value),
            ..self
        }
    }

    #[must_use]
    pub fn with_validated_params(self, value: Value) -> Self {
        Self {
            validated_params: Some(value),
            ..self
        }
    }

    #[must_use]
    pub fn with_user_id(self, user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..self
        }
    }

    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    #[must_use]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    #[must_use]
    pub fn validated_query(&self) -> Option<&Value> {
        self.validated_query.as_ref()
    }

    #[must_use]
    pub fn validated_params(&self) -> Option<&Value> {
        self.validated_params.as_ref()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    /// Identifier used by rate limiting: peer address, forwarded address, or `anonymous`.
    #[must_use]
    pub fn client_identifier(&self) -> String {
        client_identifier(self.peer, &self.headers)
    }
}

/// Outcome of a single middleware step.
#[derive(Debug)]
pub enum Flow {
    Continue(RequestContext),
    Halt(Response),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: RequestContext) -> Flow;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the middlewares in order, stopping at the first halt.
    pub async fn evaluate(&self, ctx: RequestContext) -> Flow {
        let mut ctx = ctx;
        for middleware in &self.middlewares {
            match middleware.handle(ctx).await {
                Flow::Continue(next) => ctx = next,
                halt @ Flow::Halt(_) => return halt,
            }
        }
        Flow::Continue(ctx)
    }
}

/// Wrap a method router in `pipeline`. Only matched methods run it, so a 405
/// does not count against the route's limiter.
pub fn layer<S>(route: MethodRouter<S>, pipeline: Pipeline) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(middleware::from_fn_with_state(Arc::new(pipeline), run))
}

async fn run(State(pipeline): State<Arc<Pipeline>>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    // The extractor also honours `MockConnectInfo`.
    let peer = ConnectInfo::<SocketAddr>::from_request_parts(&mut parts, &())
        .await
        .ok()
        .map(|ConnectInfo(addr)| addr);
    let query = parts
        .uri
        .query()
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();
    let params = RawPathParams::from_request_parts(&mut parts, &())
        .await
        .map(|raw| {
            raw.iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let ctx = RequestContext::new(peer, parts.headers.clone(), query, params);
    match pipeline.evaluate(ctx).await {
        Flow::Continue(ctx) => {
            let mut request = Request::from_parts(parts, body);
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Flow::Halt(response) => response,
    }
}

/// Fixed-window limit keyed by client identifier. Halts with 429.
#[derive(Debug)]
pub struct RateLimit {
    limiter: RateLimiter,
}

impl RateLimit {
    #[must_use]
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimit {
    async fn handle(&self, ctx: RequestContext) -> Flow {
        match self.limiter.check(&ctx.client_identifier()) {
            RateLimitDecision::Allowed => Flow::Continue(ctx),
            RateLimitDecision::Limited => Flow::Halt(ApiError::TooManyRequests.into_response()),
        }
    }
}

/// Semantic checks run after a query or params map deserialized successfully.
pub trait Validate {
    /// Return one message per violated rule; empty means valid.
    fn validate(&self) -> Vec<String> {
        Vec::new()
    }
}

fn string_map(values: &HashMap<String, String>) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect::<Map<String, Value>>(),
    )
}

fn check<T>(values: &HashMap<String, String>) -> Result<Value, Vec<String>>
where
    T: DeserializeOwned + Serialize + Validate,
{
    let parsed: T = serde_json::from_value(string_map(values)).map_err(|err| vec![err.to_string()])?;
    let issues = parsed.validate();
    if !issues.is_empty() {
        return Err(issues);
    }
    serde_json::to_value(&parsed).map_err(|err| vec![err.to_string()])
}

/// Validate the query string against `T`. Halts with 400 `Validation error`.
pub struct QueryValidation<T> {
    _schema: PhantomData<fn() -> T>,
}

impl<T> QueryValidation<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _schema: PhantomData,
        }
    }
}

impl<T> Default for QueryValidation<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Middleware for QueryValidation<T>
where
    T: DeserializeOwned + Serialize + Validate + 'static,
{
    async fn handle(&self, ctx: RequestContext) -> Flow {
        match check::<T>(ctx.query()) {
            Ok(value) => Flow::Continue(ctx.with_validated_query(value)),
            Err(details) => {
                debug!(?details, "query validation failed");
                Flow::Halt(
                    ApiError::Validation {
                        message: "Validation error",
                        details,
                    }
                    .into_response(),
                )
            }
        }
    }
}

/// Validate route parameters against `T`. Halts with 400 `Invalid parameters`.
pub struct ParamsValidation<T> {
    _schema: PhantomData<fn() -> T>,
}

impl<T> ParamsValidation<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _schema: PhantomData,
        }
    }
}

impl<T> Default for ParamsValidation<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Middleware for ParamsValidation<T>
where
    T: DeserializeOwned + Serialize + Validate + 'static,
{
    async fn handle(&self, ctx: RequestContext) -> Flow {
        match check::<T>(ctx.params()) {
            Ok(value) => Flow::Continue(ctx.with_validated_params(value)),
            Err(details) => {
                debug!(?details, "params validation failed");
                Flow::Halt(
                    ApiError::Validation {
                        message: "Invalid parameters",
                        details,
                    }
                    .into_response(),
                )
            }
        }
    }
}

/// Resolve the session cookie into a user id. Halts with 401 when there is none.
pub struct RequireSession {
    auth_state: Arc<AuthState>,
}

impl RequireSession {
    #[must_use]
    pub fn new(auth_state: Arc<AuthState>) -> Self {
        Self { auth_state }
    }
}

#[async_trait]
impl Middleware for RequireSession {
    async fn handle(&self, ctx: RequestContext) -> Flow {
        match current_user_id(ctx.headers(), self.auth_state.sessions()).await {
            Ok(Some(user_id)) => Flow::Continue(ctx.with_user_id(user_id)),
            Ok(None) => Flow::Halt(ApiError::Unauthorized("Unauthorized").into_response()),
            Err(err) => {
                error!("Failed to resolve session: {err}");
                Flow::Halt(ApiError::Internal(err).into_response())
            }
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
        state::{AuthConfig, Environment},
    };
    use axum::{
        body::{to_bytes, Body},
        extract::{connect_info::MockConnectInfo, Extension},
        http::{header::COOKIE, HeaderValue, StatusCode},
        routing::get,
        Router,
    };
    use serde::Deserialize;
    use std::{sync::Mutex, time::Duration};
    use tower::ServiceExt;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Record {
        async fn handle(&self, ctx: RequestContext) -> Flow {
            self.log.lock().unwrap().push(self.name);
            Flow::Continue(ctx)
        }
    }

    struct Stop;

    #[async_trait]
    impl Middleware for Stop {
        async fn handle(&self, _ctx: RequestContext) -> Flow {
            Flow::Halt(StatusCode::IM_A_TEAPOT.into_response())
        }
    }

    #[derive(Deserialize, Serialize)]
    struct IdParams {
        id: String,
    }

    impl Validate for IdParams {
        fn validate(&self) -> Vec<String> {
            if self.id.chars().all(|c| c.is_ascii_digit()) && !self.id.is_empty() {
                Vec::new()
            } else {
                vec!["id: ID must be a number".to_string()]
            }
        }
    }

    #[derive(Deserialize, Serialize)]
    struct SearchQuery {
        q: String,
        page: Option<String>,
    }

    impl Validate for SearchQuery {}

    fn ctx_with_params(params: &[(&str, &str)]) -> RequestContext {
        RequestContext::new(
            None,
            HeaderMap::new(),
            HashMap::new(),
            params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    fn limiter(limit: u32) -> RateLimiter {
        RateLimiter::new(
            "test",
            limit,
            Duration::from_secs(60),
            Arc::new(MemoryCounterStore::new()),
        )
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn middlewares_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(Record {
                name: "first",
                log: log.clone(),
            })
            .with(Record {
                name: "second",
                log: log.clone(),
            });
        assert!(matches!(
            pipeline.evaluate(RequestContext::default()).await,
            Flow::Continue(_)
        ));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn halt_short_circuits_later_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new().with(Stop).with(Record {
            name: "never",
            log: log.clone(),
        });
        let Flow::Halt(response) = pipeline.evaluate(RequestContext::default()).await else {
            panic!("expected halt");
        };
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_pipeline_continues() {
        let pipeline = Pipeline::new();
        assert!(pipeline.is_empty());
        assert!(matches!(
            pipeline.evaluate(RequestContext::default()).await,
            Flow::Continue(_)
        ));
    }

    #[tokio::test]
    async fn rate_limit_halts_with_429() {
        let pipeline = Pipeline::new().with(RateLimit::new(limiter(1)));
        assert!(matches!(
            pipeline.evaluate(RequestContext::default()).await,
            Flow::Continue(_)
        ));
        let Flow::Halt(response) = pipeline.evaluate(RequestContext::default()).await else {
            panic!("expected halt");
        };
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            json_body(response).await["error"],
            "Too many requests. Please try again later."
        );
    }

    #[tokio::test]
    async fn params_validation_accepts_and_records() {
        let pipeline = Pipeline::new().with(ParamsValidation::<IdParams>::new());
        let Flow::Continue(ctx) = pipeline.evaluate(ctx_with_params(&[("id", "42")])).await else {
            panic!("expected continue");
        };
        assert_eq!(ctx.validated_params().unwrap()["id"], "42");
    }

    #[tokio::test]
    async fn params_validation_rejects_with_details() {
        let pipeline = Pipeline::new().with(ParamsValidation::<IdParams>::new());
        let Flow::Halt(response) = pipeline.evaluate(ctx_with_params(&[("id", "abc")])).await
        else {
            panic!("expected halt");
        };
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Invalid parameters");
        assert_eq!(body["details"][0], "id: ID must be a number");
    }

    #[tokio::test]
    async fn query_validation_reports_missing_fields() {
        let pipeline = Pipeline::new().with(QueryValidation::<SearchQuery>::new());
        let Flow::Halt(response) = pipeline.evaluate(RequestContext::default()).await else {
            panic!("expected halt");
        };
        let body = json_body(response).await;
        assert_eq!(body["error"], "Validation error");
        assert!(body["details"][0].as_str().unwrap().contains("missing field"));
    }

    fn auth_state() -> Arc<AuthState> {
        let store = Arc::new(MemoryStore::new());
        Arc::new(AuthState::new(
            AuthConfig::new(Environment::Development),
            store.clone(),
            store,
            Arc::new(MemoryCounterStore::new()),
        ))
    }

    #[tokio::test]
    async fn require_session_resolves_user() {
        let state = auth_state();
        let token = state.sessions().create_session(11, false).await.unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("session_token={token}")).unwrap(),
        );
        let ctx = RequestContext::new(None, headers, HashMap::new(), HashMap::new());

        let pipeline = Pipeline::new().with(RequireSession::new(state));
        let Flow::Continue(ctx) = pipeline.evaluate(ctx).await else {
            panic!("expected continue");
        };
        assert_eq!(ctx.user_id(), Some(11));
    }

    #[tokio::test]
    async fn require_session_rejects_anonymous() {
        let pipeline = Pipeline::new().with(RequireSession::new(auth_state()));
        let Flow::Halt(response) = pipeline.evaluate(RequestContext::default()).await else {
            panic!("expected halt");
        };
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Unauthorized");
    }

    async fn echo(Extension(ctx): Extension<RequestContext>) -> String {
        format!(
            "{}|{}|{}",
            ctx.client_identifier(),
            ctx.params().get("id").cloned().unwrap_or_default(),
            ctx.query().get("q").cloned().unwrap_or_default()
        )
    }

    #[tokio::test]
    async fn layer_builds_context_from_request() {
        let route = layer(
            get(echo),
            Pipeline::new().with(ParamsValidation::<IdParams>::new()),
        );
        let app = Router::new()
            .route("/items/:id", route)
            .layer(MockConnectInfo(SocketAddr::from(([192, 0, 2, 7], 5000))));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/items/42?q=hello%20world")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"192.0.2.7|42|hello world");
    }

    #[tokio::test]
    async fn layer_halts_before_handler() {
        let route = layer(
            get(echo),
            Pipeline::new().with(ParamsValidation::<IdParams>::new()),
        );
        let app = Router::new().route("/items/:id", route);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/items/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_method_skips_pipeline() {
        let route = layer(
            axum::routing::post(|| async { "ok" }),
            Pipeline::new().with(RateLimit::new(limiter(1))),
        );
        let app = Router::new().route("/login", route);
        let request = |method: axum::http::Method| {
            axum::http::Request::builder()
                .method(method)
                .uri("/login")
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request(axum::http::Method::GET))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
        let response = app
            .clone()
            .oneshot(request(axum::http::Method::POST))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app
            .oneshot(request(axum::http::Method::POST))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
