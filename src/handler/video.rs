use std::io;
use std::path::{Component, Path, PathBuf};

use axum::{
    extract::Multipart,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;
use tokio::{fs::File, io::BufWriter};
use tokio_util::io::StreamReader;

use crate::config;
use crate::handler::ApiJsonResult;
use crate::manager;
use crate::playlist;
use crate::store;

const ALLOWED_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mov", "mkv", "flv"];

pub fn video_router() -> Router {
    Router::new()
        .route("/", get(list_videos))
        .route("/{filename}", delete(delete_video))
}

#[derive(Serialize)]
pub struct VideoFile {
    pub filename: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct UploadedFile {
    pub filename: String,
    #[serde(rename = "originalName")]
    pub original_name: String,
    pub size: u64,
}

async fn list_videos() -> ApiJsonResult<Vec<VideoFile>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(config::config().videos_dir()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !has_allowed_extension(&name) {
            continue;
        }
        let meta = entry.metadata().await?;
        files.push(VideoFile {
            filename: name,
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::from),
        });
    }
    Ok(Json(files))
}

pub async fn upload_video(mut multipart: Multipart) -> ApiJsonResult<Vec<UploadedFile>> {
    let videos_dir = config::config().videos_dir();
    let mut uploaded = Vec::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        let Some(original_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if !filename_is_safe(&original_name) {
            return Err(anyhow::anyhow!("invalid file name: {}", original_name).into());
        }
        if !has_allowed_extension(&original_name) {
            return Err(anyhow::anyhow!("only video files are allowed").into());
        }

        let filename = format!("{}-{}", Utc::now().timestamp_millis(), original_name);
        let path = videos_dir.join(&filename);
        let size = stream_to_file(&path, field).await?;
        log::info!("uploaded {} ({} bytes)", filename, size);
        uploaded.push(UploadedFile {
            filename,
            original_name,
            size,
        });
    }
    Ok(Json(uploaded))
}

async fn delete_video(
    axum::extract::Path(filename): axum::extract::Path<String>,
) -> ApiJsonResult<usize> {
    if !filename_is_safe(&filename) {
        return Err(anyhow::anyhow!("invalid file name: {}", filename).into());
    }
    let cfg = config::config();
    let video_path = cfg.videos_dir().join(&filename);
    if !video_path.exists() {
        return Err(anyhow::anyhow!("video file not found: {}", filename).into());
    }

    let touched = store::store().detach_video(&filename).await?;
    for channel in &touched {
        if channel.videos.is_empty() {
            manager::stop_channel(channel.id).await;
            playlist::remove(&cfg.playlist_path(channel.id)).await;
        } else {
            playlist::generate(channel, &cfg.playlist_path(channel.id), &cfg.videos_dir())
                .await?;
        }
    }

    tokio::fs::remove_file(&video_path).await?;
    Ok(Json(touched.len()))
}

/// Streams a multipart field to disk, returning the byte count.
async fn stream_to_file<S, E>(path: &Path, stream: S) -> io::Result<u64>
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>>,
    E: Into<axum::BoxError>,
{
    let reader = StreamReader::new(stream.map_err(io::Error::other));
    futures::pin_mut!(reader);
    let mut file = BufWriter::new(File::create(path).await?);
    let written = tokio::io::copy(&mut reader, &mut file).await?;
    Ok(written)
}

fn has_allowed_extension(name: &str) -> bool {
    PathBuf::from(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn filename_is_safe(name: &str) -> bool {
    let path = Path::new(name);
    path.components().count() == 1
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
}
