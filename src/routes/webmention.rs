use crate::{
    error::{AppError, Result},
    models::notification::WebmentionRequest,
    state::AppState,
    utils::middleware::check_rate_limit,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Form, Router,
};
use std::sync::Arc;
use url::Url;
use validator::Validate;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(receive))
}

/// webmention 接收端: 校验参数后立即 202, 验证在后台完成
async fn receive(
    State(state): State<Arc<AppState>>,
    Form(request): Form<WebmentionRequest>,
) -> Result<Response> {
    request
        .validate()
        .map_err(|_| AppError::validation("source and target must be absolute URLs"))?;

    let source = Url::parse(&request.source)
        .map_err(|_| AppError::validation("Invalid source URL"))?;
    let target = Url::parse(&request.target)
        .map_err(|_| AppError::validation("Invalid target URL"))?;
    if !matches!(source.scheme(), "http" | "https") || !matches!(target.scheme(), "http" | "https")
    {
        return Err(AppError::validation("source and target must be http or https"));
    }
    if source == target {
        return Err(AppError::validation("source and target must differ"));
    }

    // 按来源主机限流
    let key = source.host_str().unwrap_or("unknown").to_string();
    check_rate_limit(&state.config, &key).await?;

    let webmention = state.webmention_service.clone();
    tokio::spawn(async move {
        webmention
            .process_mention(request.source, request.target)
            .await;
    });

    Ok(StatusCode::ACCEPTED.into_response())
}
