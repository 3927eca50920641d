use crate::{config::Config, error::AppError, state::AppState};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

type KeyedRateLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;
static RATE_LIMITER: OnceCell<KeyedRateLimiter> = OnceCell::const_new();

static AUTH_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("rainbow-reader/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build auth client")
});

/// 请求方身份, 即 IndieAuth 校验出的 me 地址
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub me: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    me: String,
    #[allow(dead_code)]
    scope: Option<String>,
}

/// 认证中间件: Bearer token 交给外部 token endpoint 校验
pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

    let response = AUTH_CLIENT
        .get(&app_state.config.auth_token_endpoint)
        .header("Authorization", format!("Bearer {}", token))
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| {
            warn!("Token endpoint unreachable: {}", e);
            AppError::unauthorized("Token verification failed")
        })?;

    if !response.status().is_success() {
        return Err(AppError::unauthorized("Invalid token"));
    }

    let info: TokenInfo = response
        .json()
        .await
        .map_err(|_| AppError::unauthorized("Malformed token endpoint response"))?;

    debug!("Authenticated {}", info.me);
    request.extensions_mut().insert(Owner { me: info.me });

    Ok(next.run(request).await)
}

/// 按 key 限流, webmention 接收端用
pub async fn check_rate_limit(config: &Config, key: &str) -> Result<(), AppError> {
    let limiter = RATE_LIMITER
        .get_or_init(|| async {
            let burst = NonZeroU32::new(config.rate_limit_requests.max(1))
                .unwrap_or(NonZeroU32::MIN);
            let quota = Quota::with_period(Duration::from_secs(config.rate_limit_window.max(1)))
                .unwrap_or_else(|| Quota::per_minute(burst))
                .allow_burst(burst);
            RateLimiter::keyed(quota)
        })
        .await;

    limiter
        .check_key(&key.to_string())
        .map_err(|_| AppError::RateLimitExceeded)
}
