use std::collections::HashSet;

use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::manager;

const TRANSCODER_NAME: &str = "ffmpeg";

/// Periodic audit of OS-level transcoder processes against the
/// supervisor's bookkeeping. Heals two kinds of drift: recorded pids
/// whose processes died, and live transcoders nobody is tracking.
pub fn spawn(cancel: CancellationToken) {
    tokio::spawn(async move {
        let interval = config::config().audit_interval();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            audit().await;
        }
        log::info!("process audit stopped");
    });
}

async fn audit() {
    let live = tokio::task::spawn_blocking(live_transcoders)
        .await
        .unwrap_or_default();
    let live_set: HashSet<u32> = live.iter().copied().collect();

    manager::forget_dead_pids(&live_set).await;

    let tracked = manager::tracked_pids().await;
    let active = manager::active_channel_count().await;
    let cfg = config::config();
    let plan = audit_plan(
        &live,
        &tracked,
        active,
        cfg.kill_multiplier(),
        cfg.kill_slack(),
        cfg.warn_multiplier(),
    );

    if plan.warn {
        log::warn!(
            "transcoder count elevated: {} live for {} active channels",
            live.len(),
            active,
        );
    }
    for pid in plan.kill {
        log::warn!("killing orphan transcoder pid {}", pid);
        crate::media::force_kill_pid(pid).await;
    }
}

fn live_transcoders() -> Vec<u32> {
    let system = System::new_all();
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.name() == TRANSCODER_NAME)
        .map(|(pid, _)| pid.as_u32())
        .collect()
}

pub(crate) fn pid_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}

struct AuditPlan {
    kill: Vec<u32>,
    warn: bool,
}

/// Clip transitions briefly overlap, so both thresholds carry generous
/// headroom; only the higher one is allowed to kill.
fn audit_plan(
    live: &[u32],
    tracked: &HashSet<u32>,
    active_channels: usize,
    kill_multiplier: usize,
    kill_slack: usize,
    warn_multiplier: usize,
) -> AuditPlan {
    let kill_threshold = active_channels * kill_multiplier + kill_slack;
    let warn_threshold = active_channels * warn_multiplier + kill_slack;

    if live.len() > kill_threshold {
        AuditPlan {
            kill: live
                .iter()
                .copied()
                .filter(|pid| !tracked.contains(pid))
                .collect(),
            warn: false,
        }
    } else {
        AuditPlan {
            kill: Vec::new(),
            warn: live.len() > warn_threshold,
        }
    }
}
