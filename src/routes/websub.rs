use crate::{error::AppError, error::Result, state::AppState};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/:feed_id", get(verify).post(receive))
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.topic")]
    topic: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    lease_seconds: Option<String>,
}

/// hub 的订阅验证回调, 必须公网可达
async fn verify(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Result<Response> {
    let feed = state
        .feed_service
        .get_feed(&feed_id)
        .await?
        .ok_or_else(|| AppError::not_found("Feed"))?;

    let topic = params
        .topic
        .as_deref()
        .ok_or_else(|| AppError::validation("Missing hub.topic"))?;
    let challenge = params
        .challenge
        .ok_or_else(|| AppError::validation("Missing hub.challenge"))?;

    if params.mode.as_deref() == Some("unsubscribe") {
        debug!("Hub verifying unsubscribe for {}", feed.url);
        return Ok(challenge.into_response());
    }

    let lease_seconds = params.lease_seconds.as_deref().and_then(|v| v.parse().ok());
    state
        .websub_service
        .confirm_subscription(&feed, topic, lease_seconds)
        .await?;

    // challenge 原样回去, text/plain
    Ok(challenge.into_response())
}

/// hub 的内容推送: 先应答, 再后台解析入库
/// 签名不符直接 401 丢弃
async fn receive(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let feed = state
        .feed_service
        .get_feed(&feed_id)
        .await?
        .ok_or_else(|| AppError::not_found("Feed"))?;

    let signature_256 = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    let signature_1 = headers.get("x-hub-signature").and_then(|v| v.to_str().ok());

    crate::services::websub::verify_signature(&feed, signature_256, signature_1, &body)?;

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    // 确认应答不等待处理结果, hub 不会被拖住
    let processor = state.processor_service.clone();
    let payload = body.to_vec();
    tokio::spawn(async move {
        if let Err(e) = processor
            .process_pushed_content(&feed, &payload, content_type.as_deref())
            .await
        {
            warn!("Pushed content for {} failed: {}", feed.url, e);
        }
    });

    Ok(StatusCode::OK.into_response())
}
