use std::time::Duration;

use axum::{
    extract::Path,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config;
use crate::handler::ApiJsonResult;
use crate::manager;
use crate::media::types::{ChannelStatus, PlaybackStatus};
use crate::playlist;
use crate::store::{self, Channel, VideoEntry};

pub fn channel_router() -> Router {
    Router::new()
        .route("/", get(list_channels).post(create_channel))
        .route("/start-all", post(start_all))
        .route("/stop-all", post(stop_all))
        .route(
            "/{id}",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/{id}/videos", post(add_video))
        .route("/{id}/videos/{filename}", delete(remove_video))
        .route("/{id}/start", post(start_channel))
        .route("/{id}/stop", post(stop_channel))
        .route("/{id}/status", get(channel_status))
        .route("/{id}/playback", get(playback_status))
}

#[derive(Deserialize)]
struct ChannelCreate {
    name: Option<String>,
}

#[derive(Deserialize)]
struct ChannelUpdate {
    name: Option<String>,
    enabled: Option<bool>,
    #[serde(rename = "scheduledStart")]
    scheduled_start: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct VideoAdd {
    filename: String,
    #[serde(rename = "originalName")]
    original_name: String,
    size: u64,
}

async fn list_channels() -> ApiJsonResult<Vec<Channel>> {
    Ok(Json(store::store().channels().await?))
}

async fn get_channel(Path(id): Path<u32>) -> ApiJsonResult<Option<Channel>> {
    Ok(Json(store::store().channel(id).await?))
}

async fn create_channel(Json(req): Json<ChannelCreate>) -> ApiJsonResult<Channel> {
    Ok(Json(store::store().create(req.name).await?))
}

async fn update_channel(
    Path(id): Path<u32>,
    Json(req): Json<ChannelUpdate>,
) -> ApiJsonResult<Option<Channel>> {
    let updated = store::store()
        .update(id, |c| {
            if let Some(name) = req.name {
                c.name = name;
            }
            if let Some(enabled) = req.enabled {
                c.enabled = enabled;
            }
            if let Some(at) = req.scheduled_start {
                c.scheduled_start = Some(at);
            }
        })
        .await?;

    if let Some(channel) = &updated {
        if !channel.videos.is_empty() {
            regenerate_playlist(channel).await?;
            if manager::channel_status(id).await.running {
                // the live loop picks the new list up at the next clip
                // boundary, no restart involved
                log::info!("channel {}: playlist updated while live", id);
            }
        }
    }
    Ok(Json(updated))
}

async fn delete_channel(Path(id): Path<u32>) -> ApiJsonResult<bool> {
    manager::stop_channel(id).await;
    let cfg = config::config();
    playlist::remove(&cfg.playlist_path(id)).await;
    let _ = tokio::fs::remove_file(cfg.log_path(id)).await;
    Ok(Json(store::store().delete(id).await?))
}

async fn add_video(
    Path(id): Path<u32>,
    Json(req): Json<VideoAdd>,
) -> ApiJsonResult<Option<Channel>> {
    let updated = store::store()
        .update(id, |c| {
            c.videos.push(VideoEntry {
                filename: req.filename,
                original_name: req.original_name,
                size: req.size,
                added_at: Utc::now(),
            });
        })
        .await?;
    if let Some(channel) = &updated {
        regenerate_playlist(channel).await?;
    }
    Ok(Json(updated))
}

async fn remove_video(
    Path((id, filename)): Path<(u32, String)>,
) -> ApiJsonResult<Option<Channel>> {
    let was_running = manager::channel_status(id).await.running;
    let updated = store::store()
        .update(id, |c| c.videos.retain(|v| v.filename != filename))
        .await?;

    if let Some(channel) = &updated {
        if channel.videos.is_empty() {
            if was_running {
                log::info!("channel {}: no videos left, stopping", id);
                manager::stop_channel(id).await;
            }
        } else {
            regenerate_playlist(channel).await?;
            if was_running {
                // the removed file must never play again, even if it is the
                // current clip; a restart guarantees that
                log::info!("channel {}: restarting without removed video", id);
                manager::stop_channel(id).await;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if let Err(e) = manager::start_channel(id).await {
                        log::error!("channel {}: restart failed: {}", id, e);
                    }
                });
            }
        }
    }
    Ok(Json(updated))
}

async fn start_channel(Path(id): Path<u32>) -> ApiJsonResult<String> {
    manager::start_channel(id).await?;
    Ok(Json("success".to_string()))
}

async fn stop_channel(Path(id): Path<u32>) -> ApiJsonResult<String> {
    manager::stop_channel(id).await;
    Ok(Json("success".to_string()))
}

async fn channel_status(Path(id): Path<u32>) -> ApiJsonResult<ChannelStatus> {
    Ok(Json(manager::channel_status(id).await))
}

async fn playback_status(Path(id): Path<u32>) -> ApiJsonResult<PlaybackStatus> {
    Ok(Json(manager::playback_status(id).await))
}

async fn start_all() -> ApiJsonResult<usize> {
    let mut started = 0;
    for channel in store::store().channels().await? {
        if channel.enabled && !channel.videos.is_empty() {
            match manager::start_channel(channel.id).await {
                Ok(()) => started += 1,
                Err(e) => log::error!("channel {}: start failed: {}", channel.id, e),
            }
        }
    }
    Ok(Json(started))
}

async fn stop_all() -> ApiJsonResult<String> {
    manager::stop_all().await;
    Ok(Json("success".to_string()))
}

async fn regenerate_playlist(channel: &Channel) -> std::io::Result<()> {
    let cfg = config::config();
    playlist::generate(channel, &cfg.playlist_path(channel.id), &cfg.videos_dir()).await
}
