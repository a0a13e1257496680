//! Channel playout internals.
//!
//! ```text
//! playlist artifact ──► Playout loop ──► EncodeStep (one ffmpeg per clip)
//!                                             │
//!                            pipe mode        │        direct mode
//!                       ┌─────────────────────┴──────────────────┐
//!                       ▼                                        ▼
//!                 Fifo (named pipe) ──► Pusher ──► RTMP     RTMP endpoint
//! ```
//!
//! One playout loop per channel; the loop owns all per-channel mutable
//! state and everything else only reads snapshots.

pub mod encode;
pub mod fifo;
pub mod logbuf;
pub mod playout;
pub mod pusher;
pub mod types;

use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Grace window between a polite terminate and a forced kill.
pub(crate) const KILL_GRACE: Duration = Duration::from_secs(2);

/// Sleeps for `dur`, waking early on cancellation. Returns true when the
/// sleep was interrupted by cancellation.
pub(crate) async fn sleep_unless_cancelled(cancel: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(dur) => false,
    }
}

async fn signal_pid(pid: u32, forced: bool) {
    let mut cmd = Command::new("kill");
    if forced {
        cmd.arg("-9");
    }
    let _ = cmd.arg(pid.to_string()).status().await;
}

async fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Terminate by pid: TERM first, then KILL once the grace window runs out.
pub(crate) async fn kill_pid(pid: u32, grace: Duration) {
    signal_pid(pid, false).await;
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !pid_alive(pid).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    signal_pid(pid, true).await;
}

/// Immediate KILL, no grace. For orphans that nobody owns a handle to.
pub(crate) async fn force_kill_pid(pid: u32) {
    signal_pid(pid, true).await;
}

/// Terminate an owned child: TERM, wait out the grace window, then KILL.
pub(crate) async fn terminate_child(child: &mut tokio::process::Child, grace: Duration) {
    if let Some(pid) = child.id() {
        signal_pid(pid, false).await;
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}
