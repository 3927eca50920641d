use crate::{
    error::{AppError, Result},
    models::channel::UpdateChannelRequest,
    services::item::TimelineQuery,
    state::AppState,
    utils::middleware::Owner,
};
use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::form_urlencoded;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(handle_get).post(handle_post))
}

/// Microsub 的动作参数, 查询串和表单共用一种解析
#[derive(Debug, Default)]
struct ActionParams {
    action: Option<String>,
    method: Option<String>,
    channel: Option<String>,
    url: Option<String>,
    name: Option<String>,
    uid: Option<String>,
    query: Option<String>,
    before: Option<String>,
    after: Option<String>,
    limit: Option<usize>,
    show_read: bool,
    entries: Vec<String>,
    channels: Vec<String>,
}

fn parse_params(raw: &str) -> ActionParams {
    let mut params = ActionParams {
        show_read: true,
        ..Default::default()
    };

    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        let value = value.into_owned();
        match key.as_ref() {
            "action" => params.action = Some(value),
            "method" => params.method = Some(value),
            "channel" => params.channel = Some(value),
            "url" => params.url = Some(value),
            "name" => params.name = Some(value),
            "uid" => params.uid = Some(value),
            "query" | "q" => params.query = Some(value),
            "before" => params.before = Some(value),
            "after" => params.after = Some(value),
            "limit" => params.limit = value.parse().ok(),
            "show_read" => params.show_read = value != "false" && value != "0",
            // 数组参数兼容带与不带 [] 两种写法
            "entry" | "entry[]" => params.entries.push(value),
            "channels" | "channels[]" => params.channels.push(value),
            "last_read_entry" => params.entries.push(value),
            _ => {}
        }
    }

    params
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let params = parse_params(query.as_deref().unwrap_or(""));
    let action = params
        .action
        .clone()
        .ok_or_else(|| AppError::validation("Missing action parameter"))?;

    debug!("Microsub GET {} for {}", action, owner.me);

    match action.as_str() {
        "channels" => Ok(Json(list_channels(&state, &owner).await?).into_response()),
        "timeline" => Ok(Json(get_timeline(&state, &owner, &params).await?).into_response()),
        "search" => Ok(Json(search(&state, &owner, &params).await?).into_response()),
        "preview" => Ok(Json(preview(&state, &params).await?).into_response()),
        "events" => Ok(events(&state, &owner).into_response()),
        _ => Err(AppError::validation("Unknown action")),
    }
}

async fn handle_post(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<Owner>,
    body: String,
) -> Result<Response> {
    let params = parse_params(&body);
    let action = params
        .action
        .clone()
        .ok_or_else(|| AppError::validation("Missing action parameter"))?;

    debug!(
        "Microsub POST {} (method {:?}) for {}",
        action, params.method, owner.me
    );

    match action.as_str() {
        "channels" => channels_post(&state, &owner, &params).await,
        "timeline" => Ok(Json(timeline_post(&state, &owner, &params).await?).into_response()),
        "follow" => follow(&state, &owner, &params).await,
        "unfollow" => Ok(Json(unfollow(&state, &owner, &params).await?).into_response()),
        "refresh" => Ok(Json(refresh(&state, &owner, &params).await?).into_response()),
        "search" => Ok(Json(search(&state, &owner, &params).await?).into_response()),
        "preview" => Ok(Json(preview(&state, &params).await?).into_response()),
        "mute" => Ok(Json(mute(&state, &owner, &params, true).await?).into_response()),
        "unmute" => Ok(Json(mute(&state, &owner, &params, false).await?).into_response()),
        "block" => Ok(Json(block(&state, &owner, &params, true).await?).into_response()),
        "unblock" => Ok(Json(block(&state, &owner, &params, false).await?).into_response()),
        _ => Err(AppError::validation("Unknown action")),
    }
}

// ==================== channels ====================

async fn list_channels(state: &AppState, owner: &Owner) -> Result<Value> {
    // 通知频道按需存在
    state
        .channel_service
        .ensure_notifications_channel(&owner.me)
        .await?;

    let channels = state.channel_service.list_channels(&owner.me).await?;
    let mut out = Vec::with_capacity(channels.len());
    for channel in &channels {
        let unread = state.item_service.unread_count(channel, &owner.me).await?;
        out.push(json!({
            "uid": channel.uid,
            "name": channel.name,
            "unread": unread,
        }));
    }

    Ok(json!({ "channels": out }))
}

async fn channels_post(state: &AppState, owner: &Owner, params: &ActionParams) -> Result<Response> {
    match params.method.as_deref() {
        Some("delete") => {
            let uid = require(&params.uid, "uid")?;
            let feeds = state.channel_service.delete_channel(&owner.me, uid).await?;
            // 被级联删除的订阅逐个退订 hub
            for feed in feeds {
                let websub = state.websub_service.clone();
                tokio::spawn(async move {
                    if let Err(e) = websub.unsubscribe(&feed).await {
                        warn!("Unsubscribe after channel delete failed: {}", e);
                    }
                });
            }
            Ok(Json(json!({ "result": "ok" })).into_response())
        }
        Some("order") => {
            if params.channels.is_empty() {
                return Err(AppError::validation("Missing channels parameter"));
            }
            state
                .channel_service
                .reorder_channels(&owner.me, &params.channels)
                .await?;
            Ok(Json(list_channels(state, owner).await?).into_response())
        }
        _ => {
            if let Some(uid) = &params.uid {
                // 带 uid 即更新
                let request = UpdateChannelRequest {
                    name: params.name.clone(),
                    exclude_types: None,
                    exclude_regex: None,
                };
                let channel = state
                    .channel_service
                    .update_channel(&owner.me, uid, request)
                    .await?;
                Ok(Json(json!({ "uid": channel.uid, "name": channel.name })).into_response())
            } else {
                let name = require(&params.name, "name")?;
                let channel = state.channel_service.create_channel(&owner.me, name).await?;
                Ok(Json(json!({ "uid": channel.uid, "name": channel.name })).into_response())
            }
        }
    }
}

// ==================== timeline ====================

async fn get_timeline(state: &AppState, owner: &Owner, params: &ActionParams) -> Result<Value> {
    let channel_uid = require(&params.channel, "channel")?;
    let channel = state
        .channel_service
        .resolve_channel(&owner.me, channel_uid)
        .await?;

    let query = TimelineQuery {
        before: params.before.clone(),
        after: params.after.clone(),
        limit: params.limit,
        owner: owner.me.clone(),
        show_read: params.show_read,
    };
    let page = state.item_service.get_timeline(&channel, &query).await?;

    let items: Vec<Value> = page.items.iter().map(|i| i.to_jf2(&owner.me)).collect();
    let mut paging = json!({});
    if let Some(before) = page.before {
        paging["before"] = json!(before);
    }
    if let Some(after) = page.after {
        paging["after"] = json!(after);
    }

    Ok(json!({ "items": items, "paging": paging }))
}

async fn timeline_post(state: &AppState, owner: &Owner, params: &ActionParams) -> Result<Value> {
    let channel_uid = require(&params.channel, "channel")?;
    let channel = state
        .channel_service
        .resolve_channel(&owner.me, channel_uid)
        .await?;

    if params.entries.is_empty() {
        return Err(AppError::validation("Missing entry parameter"));
    }

    match params.method.as_deref() {
        Some("mark_read") => {
            let updated = state
                .item_service
                .mark_read(&channel, &owner.me, &params.entries)
                .await?;
            Ok(json!({ "result": "ok", "updated": updated }))
        }
        Some("mark_unread") => {
            let updated = state
                .item_service
                .mark_unread(&channel, &owner.me, &params.entries)
                .await?;
            Ok(json!({ "result": "ok", "updated": updated }))
        }
        Some("remove") => {
            let removed = state
                .item_service
                .remove_items(&channel, &params.entries)
                .await?;
            Ok(json!({ "result": "ok", "removed": removed }))
        }
        _ => Err(AppError::validation("Unknown timeline method")),
    }
}

// ==================== follow / unfollow ====================

async fn follow(state: &AppState, owner: &Owner, params: &ActionParams) -> Result<Response> {
    let channel_uid = require(&params.channel, "channel")?;
    let url = require(&params.url, "url")?;
    validate_http_url(url)?;

    let channel = state
        .channel_service
        .resolve_channel(&owner.me, channel_uid)
        .await?;
    let feed = state.feed_service.create_feed(&channel.id, url).await?;

    Ok((StatusCode::CREATED, Json(feed.to_descriptor())).into_response())
}

async fn unfollow(state: &AppState, owner: &Owner, params: &ActionParams) -> Result<Value> {
    let channel_uid = require(&params.channel, "channel")?;
    let url = require(&params.url, "url")?;

    let channel = state
        .channel_service
        .resolve_channel(&owner.me, channel_uid)
        .await?;

    if let Some(feed) = state.feed_service.delete_feed(&channel.id, url).await? {
        let websub = state.websub_service.clone();
        tokio::spawn(async move {
            if let Err(e) = websub.unsubscribe(&feed).await {
                warn!("Unsubscribe failed: {}", e);
            }
        });
    }

    Ok(json!({ "result": "ok" }))
}

/// 调度周期之外的手动刷新
async fn refresh(state: &AppState, owner: &Owner, params: &ActionParams) -> Result<Value> {
    let channel_uid = require(&params.channel, "channel")?;
    let url = require(&params.url, "url")?;

    let channel = state
        .channel_service
        .resolve_channel(&owner.me, channel_uid)
        .await?;
    let feed = state
        .feed_service
        .get_feed_by_url(&channel.id, url)
        .await?
        .ok_or_else(|| AppError::not_found("Feed"))?;

    state.scheduler_service.refresh_feed_now(&feed.id).await?;
    Ok(json!({ "result": "ok" }))
}

// ==================== search / preview ====================

async fn search(state: &AppState, owner: &Owner, params: &ActionParams) -> Result<Value> {
    let query = require(&params.query, "query")?;

    // 带 channel 参数时在该频道内做条目全文检索, 否则是 feed 发现
    if let Some(channel_uid) = &params.channel {
        let channel = state
            .channel_service
            .resolve_channel(&owner.me, channel_uid)
            .await?;
        let items = state.item_service.search_items(&channel, query, 20).await?;
        let results: Vec<Value> = items.iter().map(|i| i.to_jf2(&owner.me)).collect();
        return Ok(json!({ "results": results }));
    }

    let results = state.discovery_service.search(query).await?;
    Ok(json!({ "results": results }))
}

async fn preview(state: &AppState, params: &ActionParams) -> Result<Value> {
    let url = require(&params.url, "url")?;
    validate_http_url(url)?;
    state.discovery_service.preview(url).await
}

// ==================== mute / block ====================

async fn mute(state: &AppState, owner: &Owner, params: &ActionParams, enable: bool) -> Result<Value> {
    let url = require(&params.url, "url")?;

    // channel 缺省或 "global" 都是全局静音
    let channel_id = match params.channel.as_deref() {
        None | Some("global") => None,
        Some(uid) => Some(
            state
                .channel_service
                .resolve_channel(&owner.me, uid)
                .await?
                .id,
        ),
    };

    if enable {
        state
            .channel_service
            .mute(&owner.me, channel_id.as_deref(), url)
            .await?;
    } else {
        state
            .channel_service
            .unmute(&owner.me, channel_id.as_deref(), url)
            .await?;
    }

    Ok(json!({ "result": "ok" }))
}

async fn block(state: &AppState, owner: &Owner, params: &ActionParams, enable: bool) -> Result<Value> {
    let url = require(&params.url, "url")?;

    if enable {
        state.channel_service.block(&owner.me, url).await?;
        // 拉黑作者级联清理其已入库条目
        let removed = state.item_service.delete_by_author(&owner.me, url).await?;
        Ok(json!({ "result": "ok", "removed": removed }))
    } else {
        state.channel_service.unblock(&owner.me, url).await?;
        Ok(json!({ "result": "ok" }))
    }
}

// ==================== events ====================

fn events(state: &AppState, owner: &Owner) -> impl IntoResponse {
    let receiver = state.realtime_service.subscribe();
    let me = owner.me.clone();

    let stream = futures::stream::unfold(receiver, move |mut receiver| {
        let me = me.clone();
        async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        // 只转发属于当前用户的事件
                        if event["owner"].as_str() != Some(me.as_str()) {
                            continue;
                        }
                        match Event::default().json_data(&event) {
                            Ok(sse_event) => {
                                return Some((
                                    Ok::<_, std::convert::Infallible>(sse_event),
                                    receiver,
                                ))
                            }
                            Err(_) => continue,
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ==================== 辅助 ====================

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("Missing {} parameter", name)))
}

fn validate_http_url(raw: &str) -> Result<()> {
    let url = url::Url::parse(raw).map_err(|_| AppError::validation("Invalid URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::validation("URL must be http or https"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params_arrays() {
        let params = parse_params(
            "action=timeline&method=mark_read&channel=abcd1234&entry[]=a&entry[]=b&entry=c",
        );
        assert_eq!(params.action.as_deref(), Some("timeline"));
        assert_eq!(params.method.as_deref(), Some("mark_read"));
        assert_eq!(params.entries, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_params_show_read() {
        assert!(parse_params("action=timeline").show_read);
        assert!(!parse_params("action=timeline&show_read=false").show_read);
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("https://example.com/feed").is_ok());
        assert!(validate_http_url("ftp://example.com").is_err());
        assert!(validate_http_url("not a url").is_err());
    }
}
