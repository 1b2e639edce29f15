use crate::route::ResolvedRoute;
use crate::throttler::{Admission, ThrottleGuard};
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{info, Instrument};
use uuid::Uuid;

/// Applies a resolved route declaration to the wrapped service.
///
/// Built by [`ThrottleGuard::layer`]; attach with `route_layer` on a single
/// method router or on a group `Router`.
#[derive(Clone)]
pub struct ThrottleLayer {
    guard: ThrottleGuard,
    route: Arc<ResolvedRoute>,
}

impl ThrottleLayer {
    pub(crate) fn new(guard: ThrottleGuard, route: ResolvedRoute) -> Self {
        Self {
            guard,
            route: Arc::new(route),
        }
    }

    pub fn route(&self) -> &ResolvedRoute {
        &self.route
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            guard: self.guard.clone(),
            route: self.route.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ThrottleService<S> {
    inner: S,
    guard: ThrottleGuard,
    route: Arc<ResolvedRoute>,
}

impl<S> Service<Request> for ThrottleService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.route.is_skipped() {
            return Box::pin(inner.call(request));
        }

        let guard = self.guard.clone();
        let route = self.route.clone();
        let caller = guard.caller(&request);

        Box::pin(async move {
            match guard.admit(&route, &caller).await {
                Ok(Admission::Unthrottled) => inner.call(request).await,
                Ok(Admission::Throttled(quota)) => {
                    let mut response = inner.call(request).await?;
                    quota.apply(response.headers_mut());
                    Ok(response)
                }
                Err(err) => Ok(err.into_response()),
            }
        })
    }
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    let span = tracing::info_span!(
        target: "cloud_throttler::middleware",
        "request",
        %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        info!(target: "cloud_throttler::middleware", "Incoming request");

        let response = next.run(request).await;

        info!(
            target: "cloud_throttler::middleware",
            status = %response.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );

        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AuthenticatedUser;
    use crate::policy::{Policy, PolicyRegistry, DEFAULT_POLICY};
    use crate::route::RouteThrottle;
    use crate::storage::InMemoryCounterStore;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn guard() -> ThrottleGuard {
        let registry = PolicyRegistry::new(Policy::new(DEFAULT_POLICY, 60, 2).unwrap());
        ThrottleGuard::new(Arc::new(registry), Arc::new(InMemoryCounterStore::new()))
    }

    fn request(user: Option<&str>) -> Request {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("127.0.0.1:5000".parse::<SocketAddr>().unwrap()));
        if let Some(id) = user {
            request.extensions_mut().insert(AuthenticatedUser::new(id));
        }
        request
    }

    #[tokio::test]
    async fn test_layer_rejects_after_limit() {
        let guard = guard();
        let app = Router::new().route("/", get(|| async { "ok" }).route_layer(guard.layer(RouteThrottle::throttled()).unwrap()));

        for remaining in ["1", "0"] {
            let response = app.clone().oneshot(request(None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), remaining);
        }

        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("retry-after").is_some());
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    #[tokio::test]
    async fn test_layer_leaves_authenticated_alone_on_undeclared_route() {
        let guard = guard();
        let app = Router::new().route("/", get(|| async { "ok" }).route_layer(guard.layer(RouteThrottle::undeclared()).unwrap()));

        for _ in 0..5 {
            let response = app.clone().oneshot(request(Some("u1"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }
    }

    #[tokio::test]
    async fn test_logging_middleware_passes_response_through() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::ACCEPTED }))
            .layer(axum::middleware::from_fn(logging_middleware));

        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
