//! Per-user rate limiting: a request quota per minute plus a cap on
//! concurrently open streaming sessions.

use std::num::NonZeroU32;
use std::sync::Arc;

use config::RateLimitConfig;
use context::Authentication;
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, keyed::DefaultKeyedStateStore},
};
use http::{Request, Response, StatusCode};
use tower::Layer;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;
type GlobalLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// Shared limiter state. Anonymous callers (no OIDC) share one bucket.
pub(crate) struct Limits {
    per_user: Option<KeyedLimiter>,
    anonymous: Option<GlobalLimiter>,
    streams: DashMap<String, usize>,
    max_streams: usize,
    enabled: bool,
}

impl Limits {
    pub(crate) fn new(config: &RateLimitConfig) -> Self {
        let quota = NonZeroU32::new(config.requests_per_minute)
            .map(Quota::per_minute);

        Self {
            per_user: quota.map(RateLimiter::keyed),
            anonymous: quota.map(RateLimiter::direct),
            streams: DashMap::new(),
            max_streams: config.concurrent_streams as usize,
            enabled: config.enabled,
        }
    }

    fn check(&self, user: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }

        match user {
            Some(user) => self
                .per_user
                .as_ref()
                .map(|limiter| limiter.check_key(&user.to_string()).is_ok())
                .unwrap_or(true),
            None => self
                .anonymous
                .as_ref()
                .map(|limiter| limiter.check().is_ok())
                .unwrap_or(true),
        }
    }

    /// Reserves one concurrent-stream slot; the returned guard releases it.
    pub fn acquire_stream(self: &Arc<Self>, user: &str) -> Option<StreamPermit> {
        if !self.enabled {
            return Some(StreamPermit {
                limits: self.clone(),
                user: user.to_string(),
                counted: false,
            });
        }

        let mut entry = self.streams.entry(user.to_string()).or_insert(0);
        if *entry >= self.max_streams {
            return None;
        }
        *entry += 1;

        Some(StreamPermit {
            limits: self.clone(),
            user: user.to_string(),
            counted: true,
        })
    }
}

impl orchestrator::TurnQuota for Limits {
    fn check(&self, user_id: &str) -> bool {
        Limits::check(self, Some(user_id))
    }
}

/// RAII slot for one open stream. Dropping it (client disconnect included)
/// frees the slot.
pub(crate) struct StreamPermit {
    limits: Arc<Limits>,
    user: String,
    counted: bool,
}

impl Drop for StreamPermit {
    fn drop(&mut self) {
        if !self.counted {
            return;
        }

        if let Some(mut entry) = self.limits.streams.get_mut(&self.user) {
            *entry = entry.saturating_sub(1);
        }
    }
}

/// Tower layer enforcing the per-request quota in front of every route.
#[derive(Clone)]
pub(crate) struct RateLimitLayer {
    limits: Arc<Limits>,
}

impl RateLimitLayer {
    /// Wraps the shared limiter also consulted by the chat route for
    /// stream permits.
    pub fn new(limits: Arc<Limits>) -> Self {
        Self { limits }
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            limits: self.limits.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct RateLimitService<Service> {
    next: Service,
    limits: Arc<Limits>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<axum::body::Body>> + Send + Clone + 'static,
    Service::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = Response<axum::body::Body>;
    type Error = Service::Error;
    type Future = std::pin::Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let limits = self.limits.clone();

        Box::pin(async move {
            let subject = req
                .extensions()
                .get::<Authentication>()
                .and_then(|auth| auth.subject())
                .map(str::to_string);

            if !limits.check(subject.as_deref()) {
                log::debug!("rate limited request from {:?}", subject.as_deref().unwrap_or("anonymous"));

                let response = Response::builder()
                    .status(StatusCode::TOO_MANY_REQUESTS)
                    .header("Content-Type", "application/json")
                    .body(axum::body::Body::from(
                        r#"{"kind":"rate_limited","message":"request quota exceeded","retryable":true}"#,
                    ))
                    .unwrap_or_else(|_| {
                        let mut fallback = Response::new(axum::body::Body::empty());
                        *fallback.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                        fallback
                    });

                return Ok(response);
            }

            next.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(requests_per_minute: u32, concurrent_streams: u32) -> Arc<Limits> {
        Arc::new(Limits::new(&RateLimitConfig {
            enabled: true,
            requests_per_minute,
            concurrent_streams,
        }))
    }

    #[test]
    fn quota_exhausts_per_user() {
        let limits = limits(2, 4);

        assert!(limits.check(Some("alice")));
        assert!(limits.check(Some("alice")));
        assert!(!limits.check(Some("alice")));

        // Another user keeps their own bucket.
        assert!(limits.check(Some("bob")));
    }

    #[test]
    fn stream_permits_release_on_drop() {
        let limits = limits(100, 1);

        let permit = limits.acquire_stream("alice").expect("first stream fits");
        assert!(limits.acquire_stream("alice").is_none());

        drop(permit);
        assert!(limits.acquire_stream("alice").is_some());
    }

    #[test]
    fn disabled_limits_pass_everything() {
        let limits = Arc::new(Limits::new(&RateLimitConfig {
            enabled: false,
            requests_per_minute: 0,
            concurrent_streams: 0,
        }));

        for _ in 0..100 {
            assert!(limits.check(Some("alice")));
        }
        assert!(limits.acquire_stream("alice").is_some());
    }
}
