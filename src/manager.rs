use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::error::{StreamError, StreamResult};
use crate::media::fifo::Fifo;
use crate::media::logbuf::LogBuffer;
use crate::media::playout::Playout;
use crate::media::pusher::Pusher;
use crate::media::types::{ChannelStatus, OutputMode, PlaybackStatus, StreamConfig};
use crate::media::KILL_GRACE;
use crate::playlist;
use crate::reconcile;
use crate::store;

/// Everything a live channel owns. Dropping the runtime after
/// `teardown_runtime` leaves no pipe, no processes and no bookkeeping.
pub(crate) struct ChannelRuntime {
    cancel: CancellationToken,
    playout: Arc<Playout>,
    fifo: Option<Arc<Fifo>>,
    pusher: Option<Arc<Pusher>>,
}

static CHANNELS: LazyLock<RwLock<HashMap<u32, ChannelRuntime>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

pub async fn start_channel(id: u32) -> StreamResult<()> {
    if let Some(rt) = CHANNELS.read().await.get(&id) {
        if rt.playout.is_running() {
            log::info!("channel {}: already running", id);
            return Ok(());
        }
    }
    // a loop that stopped itself leaves a dead runtime behind; clear it
    if let Some(rt) = CHANNELS.write().await.remove(&id) {
        teardown_runtime(rt).await;
    }

    let channel = store::store()
        .channel(id)
        .await
        .map_err(|e| StreamError::Io(std::io::Error::other(e)))?
        .filter(|c| !c.videos.is_empty())
        .ok_or(StreamError::NoVideos(id))?;

    let cfg = config::config();
    playlist::generate(&channel, &cfg.playlist_path(id), &cfg.videos_dir()).await?;

    let cancel = CancellationToken::new();
    let logbuf = Arc::new(LogBuffer::new(cfg.log_path(id)));
    let mode = cfg.output_mode(id);
    let stream_config = {
        let builder = StreamConfig::builder()
            .channel_id(id)
            .playlist_path(cfg.playlist_path(id));
        match &mode {
            OutputMode::Pipe => builder.pipe_output(),
            OutputMode::Direct { url } => builder.direct_output(url.clone()),
        }
        .build()
    };

    let (fifo, pusher) = match mode {
        OutputMode::Pipe => {
            let fifo = Arc::new(Fifo::new(id, cfg.pipe_dir()));
            fifo.create().await?;
            let pusher = Pusher::spawn(
                id,
                fifo.path().to_path_buf(),
                cfg.rtmp_url(id),
                stream_config.ffmpeg_bin.clone(),
                cfg.pid_path(id),
                cancel.clone(),
                Arc::clone(&logbuf),
            );
            (Some(fifo), Some(pusher))
        }
        OutputMode::Direct { .. } => (None, None),
    };

    let playout = Arc::new(Playout::new(stream_config, fifo.clone(), cancel.clone()));
    if let Err(e) = playout.start().await {
        // roll back whatever was already wired up
        cancel.cancel();
        if let Some(pusher) = &pusher {
            pusher.stop();
        }
        if let Some(fifo) = &fifo {
            fifo.destroy();
        }
        return Err(e);
    }

    if let Err(e) = store::store().set_started_at(id, Some(Utc::now())).await {
        log::warn!("channel {}: could not record start time: {:#}", id, e);
    }
    CHANNELS.write().await.insert(
        id,
        ChannelRuntime {
            cancel,
            playout,
            fifo,
            pusher,
        },
    );
    log::info!("channel {}: live", id);
    Ok(())
}

pub async fn stop_channel(id: u32) {
    log::info!("channel {}: stopping", id);
    if let Some(rt) = CHANNELS.write().await.remove(&id) {
        teardown_runtime(rt).await;
    }

    // pid file fallback: a pusher started by a previous supervisor process
    let cfg = config::config();
    let pid_path = cfg.pid_path(id);
    if let Ok(raw) = tokio::fs::read_to_string(&pid_path).await {
        if let Ok(pid) = raw.trim().parse::<u32>() {
            crate::media::kill_pid(pid, KILL_GRACE).await;
        }
        let _ = tokio::fs::remove_file(&pid_path).await;
    }

    if let Err(e) = store::store().set_started_at(id, None).await {
        log::warn!("channel {}: could not clear start time: {:#}", id, e);
    }
    purge_hls_artifacts(id).await;
    log::info!("channel {}: stopped", id);
}

async fn teardown_runtime(rt: ChannelRuntime) {
    rt.cancel.cancel();
    rt.playout.stop().await;
    if let Some(pusher) = &rt.pusher {
        pusher.stop();
    }
    if let Some(fifo) = &rt.fifo {
        fifo.destroy();
    }
}

/// Removes leftover transport segments so a restarted channel does not
/// serve yesterday's content.
async fn purge_hls_artifacts(id: u32) {
    let dir = config::config().hls_dir().join(format!("live{}", id));
    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".ts") || name.ends_with(".m3u8") {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
    log::info!("channel {}: purged stale transport artifacts", id);
}

pub async fn channel_status(id: u32) -> ChannelStatus {
    let mode = config::config().output_mode(id);
    if let Some(rt) = CHANNELS.read().await.get(&id) {
        if rt.playout.is_running() {
            let pid = rt
                .pusher
                .as_ref()
                .and_then(|p| p.pid())
                .or_else(|| rt.playout.current_pid());
            return ChannelStatus {
                running: true,
                mode: mode.name(),
                pid,
            };
        }
    }

    // cross-process recovery: trust a pid file if its process is alive
    let pid_path = config::config().pid_path(id);
    if let Ok(raw) = std::fs::read_to_string(&pid_path) {
        if let Ok(pid) = raw.trim().parse::<u32>() {
            if reconcile::pid_alive(pid) {
                return ChannelStatus {
                    running: true,
                    mode: mode.name(),
                    pid: Some(pid),
                };
            }
        }
        let _ = std::fs::remove_file(&pid_path);
    }

    ChannelStatus {
        running: false,
        mode: mode.name(),
        pid: None,
    }
}

pub async fn playback_status(id: u32) -> PlaybackStatus {
    match CHANNELS.read().await.get(&id) {
        Some(rt) => rt.playout.status(),
        None => PlaybackStatus::default(),
    }
}

pub async fn stop_all() {
    let ids: Vec<u32> = CHANNELS.read().await.keys().copied().collect();
    join_all(ids.into_iter().map(stop_channel)).await;
}

/// Pids the supervisor believes it owns right now.
pub(crate) async fn tracked_pids() -> HashSet<u32> {
    let channels = CHANNELS.read().await;
    let mut pids = HashSet::new();
    for rt in channels.values() {
        if let Some(pid) = rt.playout.current_pid() {
            pids.insert(pid);
        }
        if let Some(pid) = rt.pusher.as_ref().and_then(|p| p.pid()) {
            pids.insert(pid);
        }
    }
    pids
}

pub(crate) async fn active_channel_count() -> usize {
    CHANNELS
        .read()
        .await
        .values()
        .filter(|rt| rt.playout.is_running())
        .count()
}

/// Drops recorded pids whose processes are gone; the audit pass feeds in
/// the authoritative live set.
pub(crate) async fn forget_dead_pids(alive: &HashSet<u32>) {
    let channels = CHANNELS.read().await;
    for rt in channels.values() {
        rt.playout.forget_dead_pid(|pid| alive.contains(&pid));
        if let Some(pusher) = &rt.pusher {
            pusher.forget_dead_pid(|pid| alive.contains(&pid));
        }
    }
}
