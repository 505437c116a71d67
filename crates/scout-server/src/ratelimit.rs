//! Fixed-window rate limiting for the submission surface.
//!
//! Two limiters run in front of the job routes: a per-route window and a
//! global window partitioned by client. Health endpoints are mounted outside
//! the layer. Rejections carry a structured payload plus a `Retry-After`
//! header.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

pub const WINDOW: Duration = Duration::from_secs(60);

struct WindowState {
    window_start: Instant,
    count: u32,
}

/// In-memory fixed-window counter keyed by an arbitrary partition string.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    inner: Arc<Mutex<HashMap<String, WindowState>>>,
    max_requests: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Admit or reject one request for `key`. On rejection returns the whole
    /// seconds until the window rolls over.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        let mut windows = self.inner.lock().expect("limiter mutex");
        let state = windows.entry(key.to_string()).or_insert(WindowState {
            window_start: now,
            count: 0,
        });
        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }
        if state.count >= self.max_requests {
            let remaining = self.window - now.duration_since(state.window_start);
            return Err(remaining.as_secs_f64().ceil() as u64);
        }
        state.count += 1;
        Ok(())
    }
}

/// Tower [`Layer`](tower::Layer) enforcing both windows.
#[derive(Clone)]
pub struct RateLimitLayer {
    per_route: FixedWindowLimiter,
    global: FixedWindowLimiter,
}

impl RateLimitLayer {
    pub fn new(per_route_max: u32, global_max: u32) -> Self {
        Self {
            per_route: FixedWindowLimiter::new(per_route_max, WINDOW),
            global: FixedWindowLimiter::new(global_max, WINDOW),
        }
    }
}

impl<S> tower::Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            per_route: self.per_route.clone(),
            global: self.global.clone(),
            inner,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    per_route: FixedWindowLimiter,
    global: FixedWindowLimiter,
    inner: S,
}

fn client_key(req: &Request<Body>) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        return forwarded.trim().to_string();
    }
    req.extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

fn throttled(retry_after: u64) -> Response {
    let body = serde_json::json!({
        "error": "rate_limited",
        "message": format!("Too many requests. Retry in {} seconds.", retry_after),
        "retryAfter": retry_after,
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from_str(&retry_after.to_string()).expect("numeric header"),
    );
    response
}

impl<S> tower::Service<Request<Body>> for RateLimitService<S>
where
    S: tower::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let route_key = format!("route:{}", req.uri().path());
        let global_key = format!("client:{}", client_key(&req));
        let per_route = self.per_route.clone();
        let global = self.global.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Err(retry_after) = per_route.check(&route_key) {
                return Ok(throttled(retry_after));
            }
            if let Err(retry_after) = global.check(&global_key) {
                return Ok(throttled(retry_after));
            }
            inner.call(req).await
        })
    }
}
