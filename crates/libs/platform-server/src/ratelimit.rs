use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

type IpRateLimiter = RateLimiter<std::net::IpAddr, DashMapStateStore<std::net::IpAddr>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitConfig {
    limiter: Arc<IpRateLimiter>,
    enabled: bool,
}

impl RateLimitConfig {
    /// Per-IP token bucket: `rps` steady-state requests per second,
    /// `burst` tokens available up front. Disabled entirely lets local
    /// development and tests run without throttling.
    pub fn new(rps: u32, burst: u32, enabled: bool) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::new(100).unwrap()))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::new(200).unwrap()));

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            enabled,
        }
    }
}

pub async fn rate_limit_middleware(
    State(config): State<RateLimitConfig>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !config.enabled {
        return Ok(next.run(req).await);
    }

    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok())
        .unwrap_or(peer.ip());

    match config.limiter.check_key(&ip) {
        Ok(_) => Ok(next.run(req).await),
        Err(_) => {
            warn!(%ip, "rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}
