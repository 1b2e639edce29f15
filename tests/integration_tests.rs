use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use cloud_throttler::algorithms::CounterSnapshot;
use cloud_throttler::rate_limit_config::RateLimitConfig;
use cloud_throttler::{
    create_app, AuthenticatedUser, CounterStore, InMemoryCounterStore, PolicyRegistry, QuotaStatus,
    RouteThrottle, ThrottleGuard, ThrottlerError, ThrottlerResult,
};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use tower::ServiceExt;

const SESSION_HEADER: &str = "x-test-session";

/// Stands in for the session layer: a known session header becomes a
/// verified user on the request.
async fn fake_session(mut request: Request, next: Next) -> Response {
    let user = request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(AuthenticatedUser::new);
    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

struct FixedStore(ThrottlerResult<CounterSnapshot>);

#[async_trait]
impl CounterStore for FixedStore {
    async fn increment(&self, _key: &str, _window: Duration) -> ThrottlerResult<CounterSnapshot> {
        self.0.clone()
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        self.0.clone().map(|_| ())
    }

    fn backend(&self) -> &'static str {
        "fixed"
    }
}

fn guard_with(store: Arc<dyn CounterStore>) -> ThrottleGuard {
    let registry = PolicyRegistry::from_config(&RateLimitConfig::default()).unwrap();
    ThrottleGuard::new(Arc::new(registry), store)
}

fn routes(guard: &ThrottleGuard) -> Router {
    let throttled = RouteThrottle::throttled();
    let throttled_group = Router::new()
        .route(
            "/throttled/default",
            get(|| async { "default" }).route_layer(guard.layer(RouteThrottle::undeclared().inherit(&throttled)).unwrap()),
        )
        .route(
            "/throttled/strict",
            get(|| async { "strict" }).route_layer(guard.layer(RouteThrottle::policy("strict").inherit(&throttled)).unwrap()),
        )
        .route(
            "/throttled/skip",
            get(|| async { "skip" }).route_layer(guard.layer(RouteThrottle::skip().inherit(&throttled)).unwrap()),
        );

    let open_group = Router::new()
        .route(
            "/nonthrottled/skip",
            get(|| async { "skip" }).route_layer(guard.layer(RouteThrottle::skip()).unwrap()),
        )
        .route(
            "/nonthrottled/default",
            get(|| async { "default" }).route_layer(guard.layer(RouteThrottle::undeclared()).unwrap()),
        )
        .route(
            "/nonthrottled/strict",
            get(|| async { "strict" }).route_layer(guard.layer(RouteThrottle::policy("strict")).unwrap()),
        );

    let api = throttled_group
        .merge(open_group)
        .layer(middleware::from_fn(fake_session));

    create_app(guard, api).unwrap()
}

fn app() -> Router {
    routes(&guard_with(Arc::new(InMemoryCounterStore::new())))
}

fn get_request(uri: &str, user: Option<&str>) -> Request {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header(SESSION_HEADER, user);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("203.0.113.9:40000".parse::<SocketAddr>().unwrap()));
    request
}

async fn send(app: &Router, uri: &str, user: Option<&str>) -> Response {
    assert_ok!(app.clone().oneshot(get_request(uri, user)).await)
}

fn assert_no_quota_headers(response: &Response) {
    for name in ["x-ratelimit-limit", "x-ratelimit-remaining", "x-ratelimit-reset"] {
        assert!(response.headers().get(name).is_none(), "unexpected {} header", name);
    }
}

fn quota(response: &Response) -> QuotaStatus {
    QuotaStatus::from_headers(response.headers()).expect("quota headers present")
}

#[tokio::test]
async fn test_rejects_when_store_reports_overflow() {
    let app = routes(&guard_with(Arc::new(FixedStore(Ok(CounterSnapshot::new(21, 10))))));

    let response = send(&app, "/nonthrottled/strict", None).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "10");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(body["code"], 429);
}

#[tokio::test]
async fn test_default_policy_for_anonymous_when_unspecified() {
    let response = send(&app(), "/nonthrottled/default", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(quota(&response), QuotaStatus::new(120, 119, 60));
}

#[tokio::test]
async fn test_skip_for_anonymous() {
    let response = send(&app(), "/nonthrottled/skip", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_no_quota_headers(&response);
}

#[tokio::test]
async fn test_named_policy_for_anonymous() {
    let response = send(&app(), "/nonthrottled/strict", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(quota(&response), QuotaStatus::new(20, 19, 60));
}

#[tokio::test]
async fn test_undeclared_routes_do_not_throttle_authenticated_users() {
    let response = send(&app(), "/nonthrottled/default", Some("u1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_no_quota_headers(&response);
}

#[tokio::test]
async fn test_default_policy_for_authenticated_when_unspecified() {
    let response = send(&app(), "/throttled/default", Some("u1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(quota(&response), QuotaStatus::new(120, 119, 60));
}

#[tokio::test]
async fn test_skip_for_authenticated() {
    let response = send(&app(), "/throttled/skip", Some("u1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_no_quota_headers(&response);
}

#[tokio::test]
async fn test_named_policy_for_authenticated() {
    let response = send(&app(), "/throttled/strict", Some("u1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(quota(&response), QuotaStatus::new(20, 19, 60));
}

#[tokio::test]
async fn test_anonymous_and_authenticated_buckets_are_separate() {
    let app = app();

    let authenticated = send(&app, "/throttled/default", Some("u1")).await;
    let anonymous = send(&app, "/nonthrottled/default", None).await;

    assert_eq!(quota(&authenticated), QuotaStatus::new(120, 119, 60));
    assert_eq!(quota(&anonymous), QuotaStatus::new(120, 119, 60));
}

#[tokio::test]
async fn test_routes_sharing_a_policy_share_the_bucket() {
    let app = app();

    send(&app, "/throttled/default", None).await;
    let second = send(&app, "/nonthrottled/default", None).await;

    assert_eq!(quota(&second).remaining, 118);
}

#[tokio::test]
async fn test_skip_route_never_rejected_after_quota_exhausted() {
    let app = app();

    for _ in 0..20 {
        assert_eq!(send(&app, "/throttled/strict", Some("u1")).await.status(), StatusCode::OK);
    }
    assert_eq!(
        send(&app, "/throttled/strict", Some("u1")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let skipped = send(&app, "/throttled/skip", Some("u1")).await;
    assert_eq!(skipped.status(), StatusCode::OK);
    assert_no_quota_headers(&skipped);

    let default = send(&app, "/throttled/default", Some("u1")).await;
    assert_eq!(quota(&default), QuotaStatus::new(120, 119, 60));
}

#[tokio::test]
async fn test_storage_failure_is_server_error() {
    let app = routes(&guard_with(Arc::new(FixedStore(Err(ThrottlerError::StorageUnavailable(
        "connection refused".into(),
    ))))));

    let response = send(&app, "/throttled/default", Some("u1")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(header::RETRY_AFTER).is_none());

    let skipped = send(&app, "/throttled/skip", Some("u1")).await;
    assert_eq!(skipped.status(), StatusCode::OK);

    let ready = send(&app, "/ready", None).await;
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_admit_exactly_the_limit() {
    let app = app();

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { send(&app, "/nonthrottled/strict", None).await })
        })
        .collect();

    let mut admitted = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        let response = handle.await.unwrap();
        match response.status() {
            StatusCode::OK => admitted.push(quota(&response).remaining),
            StatusCode::TOO_MANY_REQUESTS => rejected += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    admitted.sort_unstable();
    assert_eq!(admitted, (0..20).collect::<Vec<u64>>());
    assert_eq!(rejected, 30);
}

#[tokio::test]
async fn test_service_endpoints_are_unthrottled() {
    let app = app();

    let health = send(&app, "/health", None).await;
    assert_eq!(health.status(), StatusCode::OK);
    assert_no_quota_headers(&health);

    send(&app, "/nonthrottled/strict", None).await;
    let metrics = send(&app, "/metrics", None).await;
    assert_eq!(metrics.status(), StatusCode::OK);

    let body = metrics.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["policies"]["strict"]["admitted_requests"], 1);
    assert_eq!(body["global"]["total_requests"], 1);
}

#[test]
fn test_unknown_policy_fails_registration() {
    let guard = guard_with(Arc::new(InMemoryCounterStore::new()));

    let err = guard.layer(RouteThrottle::policy("lenient")).err().unwrap();
    assert!(matches!(err, ThrottlerError::UnknownPolicy(name) if name == "lenient"));
}
