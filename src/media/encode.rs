use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::media::fifo::Fifo;
use crate::media::types::{OutputMode, PlayoutShared, StreamConfig};
use crate::media::KILL_GRACE;

/// Assumed length of a clip whose duration could not be probed. Long on
/// purpose: the watchdog must not cut off a healthy encode.
const FALLBACK_DURATION_SECS: f64 = 3600.0;

const STDERR_TAIL_LINES: usize = 40;

/// Broadcast servers reject a second publisher on a busy slot with this
/// phrase in the tool's diagnostic output.
const BUSY_MARKER: &str = "already publishing";

/// How a single clip's transcode run ended. None of these stop the
/// channel; the playout loop decides how long to back off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Exit code 0, the tool's soft-failure code 255, or interrupted by
    /// a deliberate stop.
    Completed,
    /// Non-zero exit; diagnostic tail has been logged.
    Failed(i32),
    /// The child could not be spawned at all.
    SpawnFailed,
    /// Watchdog expired and the child was force-terminated.
    TimedOut,
    /// The broadcast slot is occupied by another publisher.
    Busy,
    /// The pipe reader disappeared mid-write.
    PipeLost,
}

/// Transcodes exactly one source file into the channel's continuous
/// stream, either onto the FIFO write end or straight to the endpoint.
pub(crate) struct EncodeStep<'a> {
    config: &'a StreamConfig,
    source: &'a Path,
    fifo: Option<&'a Fifo>,
    cancel: &'a CancellationToken,
}

impl<'a> EncodeStep<'a> {
    pub fn new(
        config: &'a StreamConfig,
        source: &'a Path,
        fifo: Option<&'a Fifo>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            source,
            fifo,
            cancel,
        }
    }

    pub async fn run(&self, shared: &Mutex<PlayoutShared>) -> EncodeOutcome {
        let channel_id = self.config.channel_id;
        let duration = probe_duration(&self.config.ffprobe_bin, self.source).await;
        let watchdog = watchdog_timeout(duration);

        let stdout = match (&self.config.mode, self.fifo) {
            (OutputMode::Pipe, Some(fifo)) => match fifo.write_end() {
                Ok(handle) => Stdio::from(handle),
                Err(e) => {
                    log::warn!("channel {}: no usable pipe write end: {}", channel_id, e);
                    return EncodeOutcome::PipeLost;
                }
            },
            _ => Stdio::null(),
        };

        let mut child = match Command::new(&self.config.ffmpeg_bin)
            .args(encode_args(self.source, &self.config.mode))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                log::error!("channel {}: failed to spawn encoder: {}", channel_id, e);
                return EncodeOutcome::SpawnFailed;
            }
        };

        {
            let mut state = shared.lock().unwrap();
            state.pid = child.id();
            state.started_at = Some(Instant::now());
            state.duration = duration;
        }

        // Drain stderr concurrently so a chatty child never blocks; keep
        // only the tail for diagnostics.
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = tail.lock().unwrap();
                    if tail.len() >= STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        // the child handle may only be touched again once the select has
        // released its wait future
        let waited = tokio::select! {
            status = tokio::time::timeout(watchdog, child.wait()) => Some(status),
            _ = self.cancel.cancelled() => None,
        };

        let outcome = match waited {
            Some(Ok(status)) => {
                if let Some(task) = stderr_task {
                    let _ = task.await;
                }
                let tail = drain_tail(&tail);
                match status {
                    Ok(status) => {
                        let outcome = classify_exit(status.code(), exit_signal(&status), &tail);
                        if let EncodeOutcome::Failed(code) = &outcome {
                            log::error!(
                                "channel {}: encoder failed for {} (code {}): {}",
                                channel_id,
                                self.source.display(),
                                code,
                                tail_excerpt(&tail),
                            );
                        }
                        outcome
                    }
                    Err(e) => {
                        log::error!("channel {}: encoder wait error: {}", channel_id, e);
                        EncodeOutcome::Failed(-1)
                    }
                }
            }
            Some(Err(_elapsed)) => {
                log::warn!(
                    "channel {}: encoder exceeded watchdog ({}s) for {}, killing",
                    channel_id,
                    watchdog.as_secs(),
                    self.source.display(),
                );
                super::terminate_child(&mut child, KILL_GRACE).await;
                EncodeOutcome::TimedOut
            }
            None => {
                super::terminate_child(&mut child, KILL_GRACE).await;
                EncodeOutcome::Completed
            }
        };

        shared.lock().unwrap().pid = None;
        outcome
    }
}

/// Advisory duration probe; a failure never fails the step.
pub(crate) async fn probe_duration(ffprobe_bin: &str, source: &Path) -> Option<f64> {
    let output = Command::new(ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(source)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| *d > 0.0)
}

/// Watchdog budget: 30% headroom over the clip plus a fixed minute.
pub(crate) fn watchdog_timeout(duration: Option<f64>) -> Duration {
    let secs = duration.unwrap_or(FALLBACK_DURATION_SECS);
    Duration::from_secs((secs * 1.3).ceil() as u64 + 60)
}

/// Normalization arguments: every source is converted to the same frame
/// rate, geometry and audio envelope so clips concatenate cleanly on the
/// consumer side.
pub(crate) fn encode_args(source: &Path, mode: &OutputMode) -> Vec<String> {
    let mut args = Vec::new();
    if matches!(mode, OutputMode::Direct { .. }) {
        // pace in real time when publishing directly; in pipe mode the
        // pusher does the pacing
        args.push("-re".to_string());
    }
    args.extend([
        "-i".to_string(),
        source.display().to_string(),
        "-vf".to_string(),
        "fps=30,scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2"
            .to_string(),
        "-af".to_string(),
        "aresample=44100".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-tune".to_string(),
        "zerolatency".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-ar".to_string(),
        "44100".to_string(),
    ]);
    match mode {
        OutputMode::Pipe => {
            args.extend(["-f".to_string(), "mpegts".to_string(), "-".to_string()]);
        }
        OutputMode::Direct { url } => {
            args.extend(["-f".to_string(), "flv".to_string(), url.clone()]);
        }
    }
    args
}

pub(crate) fn classify_exit(
    code: Option<i32>,
    signal: Option<i32>,
    stderr_tail: &[String],
) -> EncodeOutcome {
    match code {
        // 255 is the tool's soft-failure code, e.g. a clean abort on TERM
        Some(0) | Some(255) => EncodeOutcome::Completed,
        _ => {
            if stderr_tail
                .iter()
                .any(|l| l.to_lowercase().contains(BUSY_MARKER))
            {
                EncodeOutcome::Busy
            } else if signal == Some(SIGPIPE) {
                EncodeOutcome::PipeLost
            } else {
                EncodeOutcome::Failed(code.unwrap_or(-1))
            }
        }
    }
}

fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

const SIGPIPE: i32 = 13;

fn drain_tail(tail: &Mutex<VecDeque<String>>) -> Vec<String> {
    tail.lock().unwrap().iter().cloned().collect()
}

fn tail_excerpt(tail: &[String]) -> String {
    let start = tail.len().saturating_sub(5);
    tail[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn watchdog_adds_headroom_to_probed_duration() {
        assert_eq!(watchdog_timeout(Some(10.0)), Duration::from_secs(73));
        assert_eq!(watchdog_timeout(Some(20.0)), Duration::from_secs(86));
    }

    #[test]
    fn watchdog_fallback_is_long() {
        // unknown duration is treated as a one-hour clip
        assert_eq!(watchdog_timeout(None), Duration::from_secs(4740));
    }

    #[test]
    fn pipe_args_write_mpegts_to_stdout() {
        let args = encode_args(&PathBuf::from("/v/a.mp4"), &OutputMode::Pipe);
        assert_eq!(args.last().unwrap(), "-");
        assert!(args.windows(2).any(|w| w == ["-f", "mpegts"]));
        assert!(!args.contains(&"-re".to_string()));
    }

    #[test]
    fn direct_args_publish_flv_in_real_time() {
        let mode = OutputMode::Direct {
            url: "rtmp://localhost/live7/stream".into(),
        };
        let args = encode_args(&PathBuf::from("/v/a.mp4"), &mode);
        assert_eq!(args.first().unwrap(), "-re");
        assert!(args.windows(2).any(|w| w == ["-f", "flv"]));
        assert_eq!(args.last().unwrap(), "rtmp://localhost/live7/stream");
    }

    #[test]
    fn exit_zero_and_soft_failure_complete() {
        assert_eq!(classify_exit(Some(0), None, &[]), EncodeOutcome::Completed);
        assert_eq!(classify_exit(Some(255), None, &[]), EncodeOutcome::Completed);
    }

    #[test]
    fn nonzero_exit_is_recoverable_failure() {
        assert_eq!(classify_exit(Some(1), None, &[]), EncodeOutcome::Failed(1));
        assert_eq!(classify_exit(None, Some(9), &[]), EncodeOutcome::Failed(-1));
    }

    #[test]
    fn busy_endpoint_is_detected_in_stderr() {
        let tail = vec!["rtmp server error: Already publishing".to_string()];
        assert_eq!(classify_exit(Some(1), None, &tail), EncodeOutcome::Busy);
    }

    #[test]
    fn sigpipe_means_reader_gone() {
        assert_eq!(classify_exit(None, Some(13), &[]), EncodeOutcome::PipeLost);
    }

    #[tokio::test]
    async fn probe_failure_is_none() {
        assert!(probe_duration("false", &PathBuf::from("/nope.mp4")).await.is_none());
        assert!(probe_duration("true", &PathBuf::from("/nope.mp4")).await.is_none());
    }
}
