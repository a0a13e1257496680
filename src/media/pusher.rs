use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;

use crate::media::logbuf::LogBuffer;
use crate::media::KILL_GRACE;

const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Persistent forwarder for pipe-mode channels: reads the FIFO and
/// republishes it to the broadcast endpoint as one continuous stream,
/// remuxing only. Respawns itself after unexpected exits for as long as
/// the channel is meant to be streaming.
pub struct Pusher {
    channel_id: u32,
    fifo_path: PathBuf,
    rtmp_url: String,
    ffmpeg_bin: String,
    pid_path: PathBuf,
    cancel: CancellationToken,
    pid: Mutex<Option<u32>>,
    logbuf: Arc<LogBuffer>,
}

impl Pusher {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        channel_id: u32,
        fifo_path: PathBuf,
        rtmp_url: String,
        ffmpeg_bin: String,
        pid_path: PathBuf,
        cancel: CancellationToken,
        logbuf: Arc<LogBuffer>,
    ) -> Arc<Self> {
        let pusher = Arc::new(Self {
            channel_id,
            fifo_path,
            rtmp_url,
            ffmpeg_bin,
            pid_path,
            cancel,
            pid: Mutex::new(None),
            logbuf,
        });
        let this = Arc::clone(&pusher);
        tokio::spawn(async move {
            this.run().await;
        });
        pusher
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap()
    }

    /// Drops the recorded pid when the process died behind our back.
    pub fn forget_dead_pid(&self, alive: impl Fn(u32) -> bool) {
        let mut pid = self.pid.lock().unwrap();
        if let Some(p) = *pid {
            if !alive(p) {
                *pid = None;
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.spawn_child() {
                Ok(mut child) => {
                    let pid = child.id();
                    *self.pid.lock().unwrap() = pid;
                    if let Some(pid) = pid {
                        if let Err(e) =
                            tokio::fs::write(&self.pid_path, pid.to_string()).await
                        {
                            log::warn!(
                                "channel {}: could not write pid file: {}",
                                self.channel_id,
                                e,
                            );
                        }
                        log::info!("channel {}: pusher started, pid {}", self.channel_id, pid);
                    }

                    let log_task = child.stderr.take().map(|stderr| {
                        let logbuf = Arc::clone(&self.logbuf);
                        tokio::spawn(drain_stderr(stderr, logbuf))
                    });

                    let waited = tokio::select! {
                        status = child.wait() => Some(status),
                        _ = self.cancel.cancelled() => None,
                    };
                    match waited {
                        Some(Ok(status)) => log::warn!(
                            "channel {}: pusher exited with {}",
                            self.channel_id,
                            status,
                        ),
                        Some(Err(e)) => log::error!(
                            "channel {}: pusher wait error: {}",
                            self.channel_id,
                            e,
                        ),
                        None => super::terminate_child(&mut child, KILL_GRACE).await,
                    }

                    if let Some(task) = log_task {
                        let _ = task.await;
                    }
                    self.logbuf.flush().await;
                    *self.pid.lock().unwrap() = None;
                }
                Err(e) => {
                    log::error!("channel {}: pusher spawn failed: {}", self.channel_id, e);
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            log::info!(
                "channel {}: pusher down, restarting in {}s",
                self.channel_id,
                RESTART_DELAY.as_secs(),
            );
            if super::sleep_unless_cancelled(&self.cancel, RESTART_DELAY).await {
                break;
            }
        }

        let _ = tokio::fs::remove_file(&self.pid_path).await;
        *self.pid.lock().unwrap() = None;
        log::info!("channel {}: pusher stopped", self.channel_id);
    }

    fn spawn_child(&self) -> std::io::Result<tokio::process::Child> {
        Command::new(&self.ffmpeg_bin)
            .args(pusher_args(&self.fifo_path, &self.rtmp_url))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
    }
}

/// Remux only: the encode steps already normalized the stream.
pub(crate) fn pusher_args(fifo_path: &std::path::Path, rtmp_url: &str) -> Vec<String> {
    vec![
        "-re".to_string(),
        "-i".to_string(),
        fifo_path.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "flv".to_string(),
        rtmp_url.to_string(),
    ]
}

async fn drain_stderr(stderr: ChildStderr, logbuf: Arc<LogBuffer>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        logbuf.push(&line).await;
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use super::*;

    fn stub_pusher_bin(dir: &Path) -> PathBuf {
        let path = dir.join("fake-pusher.sh");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn args_remux_the_fifo_to_the_endpoint() {
        let args = pusher_args(Path::new("/tmp/stream_live3.pipe"), "rtmp://localhost/live3/stream");
        assert_eq!(args[0], "-re");
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/tmp/stream_live3.pipe"]));
        assert_eq!(args.last().unwrap(), "rtmp://localhost/live3/stream");
    }

    #[tokio::test]
    async fn lifecycle_writes_and_removes_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let bin = stub_pusher_bin(dir.path());
        let pid_path = dir.path().join("live1.pid");
        let logbuf = Arc::new(LogBuffer::new(dir.path().join("live1.log")));
        let cancel = CancellationToken::new();

        let pusher = Pusher::spawn(
            1,
            dir.path().join("stream_live1.pipe"),
            "rtmp://localhost/live1/stream".to_string(),
            bin.to_str().unwrap().to_string(),
            pid_path.clone(),
            cancel.clone(),
            logbuf,
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while pusher.pid().is_none() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(pusher.pid().is_some());
        assert!(pid_path.exists());

        pusher.stop();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(4);
        while pid_path.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!pid_path.exists());
        assert!(pusher.pid().is_none());
    }
}
