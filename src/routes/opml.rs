use crate::{error::Result, state::AppState, utils::middleware::Owner, utils::opml};
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(export))
}

/// 订阅导出, OPML 2.0
async fn export(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
) -> Result<Response> {
    let channels = state.channel_service.list_channels(&owner.me).await?;

    let mut export = Vec::with_capacity(channels.len());
    for channel in channels {
        let feeds = state.feed_service.list_feeds(&channel.id).await?;
        export.push((channel, feeds));
    }

    let xml = opml::render_opml(&export);
    Ok((
        [
            (header::CONTENT_TYPE, "text/x-opml; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"subscriptions.opml\"",
            ),
        ],
        xml,
    )
        .into_response())
}
