use std::env;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::media::types::OutputMode;

/// Process-wide configuration, resolved once from the environment.
pub struct PlayoutConfig {
    base_dir: PathBuf,
    pipe_dir: PathBuf,
    hls_dir: PathBuf,
    rtmp_base: String,
    bind_addr: String,
    direct_output: bool,
    audit_interval: Duration,
    kill_multiplier: usize,
    kill_slack: usize,
    warn_multiplier: usize,
}

impl PlayoutConfig {
    fn from_env() -> Self {
        Self {
            base_dir: env_path("PLAYOUT_DATA_DIR", "."),
            pipe_dir: env_path("PLAYOUT_PIPE_DIR", "/tmp"),
            hls_dir: env_path("PLAYOUT_HLS_DIR", "/var/www/hls"),
            rtmp_base: env_str("PLAYOUT_RTMP_BASE", "rtmp://localhost"),
            bind_addr: env_str("PLAYOUT_BIND", "0.0.0.0:8080"),
            direct_output: env_str("PLAYOUT_OUTPUT_MODE", "pipe") == "direct",
            audit_interval: Duration::from_secs(env_num("PLAYOUT_AUDIT_INTERVAL_SECS", 30)),
            kill_multiplier: env_num("PLAYOUT_KILL_MULTIPLIER", 3) as usize,
            kill_slack: env_num("PLAYOUT_KILL_SLACK", 2) as usize,
            warn_multiplier: env_num("PLAYOUT_WARN_MULTIPLIER", 2) as usize,
        }
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.base_dir.join("videos")
    }

    pub fn playlists_dir(&self) -> PathBuf {
        self.base_dir.join("playlists")
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.base_dir.join("pids")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn channels_file(&self) -> PathBuf {
        self.base_dir.join("channels-config.json")
    }

    pub fn pipe_dir(&self) -> &Path {
        &self.pipe_dir
    }

    pub fn hls_dir(&self) -> &Path {
        &self.hls_dir
    }

    pub fn playlist_path(&self, channel_id: u32) -> PathBuf {
        self.playlists_dir().join(format!("playlist{}.txt", channel_id))
    }

    pub fn pid_path(&self, channel_id: u32) -> PathBuf {
        self.pids_dir().join(format!("live{}.pid", channel_id))
    }

    pub fn log_path(&self, channel_id: u32) -> PathBuf {
        self.logs_dir().join(format!("live{}.log", channel_id))
    }

    /// Broadcast ingest address for a channel: `{base}/live{id}/stream`.
    pub fn rtmp_url(&self, channel_id: u32) -> String {
        format!("{}/live{}/stream", self.rtmp_base, channel_id)
    }

    pub fn output_mode(&self, channel_id: u32) -> OutputMode {
        if self.direct_output {
            OutputMode::Direct {
                url: self.rtmp_url(channel_id),
            }
        } else {
            OutputMode::Pipe
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn audit_interval(&self) -> Duration {
        self.audit_interval
    }

    pub fn kill_multiplier(&self) -> usize {
        self.kill_multiplier
    }

    pub fn kill_slack(&self) -> usize {
        self.kill_slack
    }

    pub fn warn_multiplier(&self) -> usize {
        self.warn_multiplier
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.videos_dir(),
            self.playlists_dir(),
            self.pids_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_str(key, default))
}

fn env_num(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn config() -> &'static PlayoutConfig {
    static CONFIG: LazyLock<PlayoutConfig> = LazyLock::new(PlayoutConfig::from_env);
    &CONFIG
}
