use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{StreamError, StreamResult};
use crate::media::encode::{EncodeOutcome, EncodeStep};
use crate::media::fifo::Fifo;
use crate::media::types::{PlaybackStatus, PlayoutShared, StreamConfig};
use crate::media::KILL_GRACE;
use crate::playlist;

const EMPTY_PLAYLIST_POLL: Duration = Duration::from_secs(5);
const MISSING_FILE_BACKOFF: Duration = Duration::from_secs(1);
const BUSY_BACKOFF: Duration = Duration::from_secs(10);
const LEFTOVER_KILL_PAUSE: Duration = Duration::from_millis(500);

/// After this many clips in a row fail for want of a pipe reader, the
/// consumer is considered gone for good and the loop stops itself.
const MAX_CONSECUTIVE_PIPE_LOSSES: u32 = 5;

/// Drives one channel's endless clip sequence.
///
/// The loop task is the only writer of the channel's playback state;
/// `status()` hands out snapshots. Playlist edits are picked up between
/// clips by raw-byte comparison of the artifact, and the playback
/// position survives edits by clip identity, not by numeric index.
pub struct Playout {
    config: StreamConfig,
    fifo: Option<Arc<Fifo>>,
    cancel: CancellationToken,
    running: AtomicBool,
    shared: Mutex<PlayoutShared>,
}

impl Playout {
    pub fn new(config: StreamConfig, fifo: Option<Arc<Fifo>>, cancel: CancellationToken) -> Self {
        Self {
            config,
            fifo,
            cancel,
            running: AtomicBool::new(false),
            shared: Mutex::new(PlayoutShared::default()),
        }
    }

    /// Loads the playlist and spawns the loop task. An empty (or
    /// unreadable) playlist fails the start and leaves the channel
    /// stopped.
    pub async fn start(self: &Arc<Self>) -> StreamResult<()> {
        let channel_id = self.config.channel_id;
        let (raw, entries) = playlist::load(&self.config.playlist_path).await;
        if entries.is_empty() {
            return Err(StreamError::EmptyPlaylist(channel_id));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("channel {}: playout already running", channel_id);
            return Ok(());
        }

        self.shared.lock().unwrap().playlist_len = entries.len();
        log::info!("channel {}: starting playout with {} videos", channel_id, entries.len());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(raw, entries).await;
        });
        Ok(())
    }

    async fn run(self: Arc<Self>, mut raw: Vec<u8>, mut entries: Vec<PathBuf>) {
        let channel_id = self.config.channel_id;
        let clip_gap = Duration::from_millis(self.config.clip_gap_ms);
        let mut index = 0usize;
        let mut last_played: Option<PathBuf> = None;
        let mut pipe_losses = 0u32;

        while !self.cancel.is_cancelled() {
            // pick up playlist edits between clips, keeping the position
            // anchored to the clip that just played
            if playlist::changed(&self.config.playlist_path, &raw).await {
                let (new_raw, new_entries) = playlist::load(&self.config.playlist_path).await;
                log::info!(
                    "channel {}: playlist changed, {} -> {} videos",
                    channel_id,
                    entries.len(),
                    new_entries.len(),
                );
                index = resume_index(&new_entries, last_played.as_deref());
                raw = new_raw;
                entries = new_entries;
                self.shared.lock().unwrap().playlist_len = entries.len();
            }

            if entries.is_empty() {
                log::info!("channel {}: empty playlist, waiting", channel_id);
                if super::sleep_unless_cancelled(&self.cancel, EMPTY_PLAYLIST_POLL).await {
                    break;
                }
                let (new_raw, new_entries) = playlist::load(&self.config.playlist_path).await;
                raw = new_raw;
                entries = new_entries;
                self.shared.lock().unwrap().playlist_len = entries.len();
                continue;
            }

            if index >= entries.len() {
                index = 0;
            }
            let clip = entries[index].clone();

            if !clip.exists() {
                log::warn!("channel {}: video not found: {}", channel_id, clip.display());
                last_played = Some(clip);
                index = (index + 1) % entries.len();
                if super::sleep_unless_cancelled(&self.cancel, MISSING_FILE_BACKOFF).await {
                    break;
                }
                continue;
            }

            // at most one encoder per channel: a step that ignored its own
            // watchdog is put down before the next one starts
            let leftover = self.shared.lock().unwrap().pid;
            if let Some(pid) = leftover {
                log::warn!("channel {}: leftover encoder pid {}, killing", channel_id, pid);
                super::kill_pid(pid, KILL_GRACE).await;
                self.shared.lock().unwrap().pid = None;
                if super::sleep_unless_cancelled(&self.cancel, LEFTOVER_KILL_PAUSE).await {
                    break;
                }
            }

            {
                let mut state = self.shared.lock().unwrap();
                state.index = index;
                state.clip = clip
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
            }
            log::info!(
                "channel {}: playing ({}/{}) {}",
                channel_id,
                index + 1,
                entries.len(),
                clip.display(),
            );

            let step = EncodeStep::new(&self.config, &clip, self.fifo.as_deref(), &self.cancel);
            let outcome = step.run(&self.shared).await;

            match outcome {
                EncodeOutcome::PipeLost => {
                    pipe_losses += 1;
                    if pipe_losses >= MAX_CONSECUTIVE_PIPE_LOSSES {
                        log::error!(
                            "channel {}: pipe reader gone for {} clips, stopping",
                            channel_id,
                            pipe_losses,
                        );
                        break;
                    }
                }
                EncodeOutcome::Busy => {
                    pipe_losses = 0;
                    log::warn!("channel {}: broadcast slot busy, backing off", channel_id);
                    if super::sleep_unless_cancelled(&self.cancel, BUSY_BACKOFF).await {
                        break;
                    }
                }
                _ => pipe_losses = 0,
            }

            last_played = Some(clip);
            index = (index + 1) % entries.len();
            if index == 0 {
                log::debug!("channel {}: looping back to start", channel_id);
            }
            // give the downstream transport a beat to resynchronize
            if super::sleep_unless_cancelled(&self.cancel, clip_gap).await {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        *self.shared.lock().unwrap() = PlayoutShared::default();
        // when the loop dies on its own the rest of the channel (pusher)
        // must come down with it
        self.cancel.cancel();
        log::info!("channel {}: playout stopped", channel_id);
    }

    /// Flags the loop down and terminates any active encoder. Returns
    /// promptly; the loop task unwinds on its own.
    pub async fn stop(&self) {
        log::info!("channel {}: stopping playout", self.config.channel_id);
        self.cancel.cancel();
        let pid = self.shared.lock().unwrap().pid;
        if let Some(pid) = pid {
            super::kill_pid(pid, KILL_GRACE).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn current_pid(&self) -> Option<u32> {
        self.shared.lock().unwrap().pid
    }

    /// Drops the recorded encoder pid when the process is no longer
    /// alive; used by the reconciler to heal bookkeeping drift.
    pub fn forget_dead_pid(&self, alive: impl Fn(u32) -> bool) {
        let mut state = self.shared.lock().unwrap();
        if let Some(pid) = state.pid {
            if !alive(pid) {
                log::debug!(
                    "channel {}: dropping dead encoder pid {}",
                    self.config.channel_id,
                    pid,
                );
                state.pid = None;
            }
        }
    }

    /// Non-blocking snapshot for status queries.
    pub fn status(&self) -> PlaybackStatus {
        let state = self.shared.lock().unwrap();
        let is_playing = self.is_running();
        let elapsed = state
            .started_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        let total = state.duration.unwrap_or(0.0).round() as u64;
        PlaybackStatus {
            is_playing,
            current_index: state.index,
            current_clip: state.clip.clone(),
            elapsed_seconds: elapsed,
            total_seconds: total,
            remaining_seconds: total.saturating_sub(elapsed),
            playlist_length: state.playlist_len,
        }
    }
}

/// Position to continue from after a reload: right after the clip that
/// just played, located by value in the new list; the head of the list
/// when that clip is gone.
fn resume_index(entries: &[PathBuf], last_played: Option<&Path>) -> usize {
    if entries.is_empty() {
        return 0;
    }
    match last_played.and_then(|p| entries.iter().position(|e| e == p)) {
        Some(pos) => (pos + 1) % entries.len(),
        None => 0,
    }
}

#[cfg(test)]
#[path = "playout_test.rs"]
mod playout_test;
