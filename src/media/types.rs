use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

/// Where a channel's normalized stream is delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Staged through the channel's named pipe; a pusher process drains
    /// the pipe and republishes to the broadcast endpoint.
    Pipe,
    /// Muxed by each encode step straight to the broadcast endpoint.
    Direct { url: String },
}

impl OutputMode {
    pub fn name(&self) -> &'static str {
        match self {
            OutputMode::Pipe => "pipe",
            OutputMode::Direct { .. } => "direct",
        }
    }
}

/// Per-channel playout wiring, resolved by the supervisor at start time.
#[derive(Clone)]
pub struct StreamConfig {
    pub channel_id: u32,
    pub playlist_path: PathBuf,
    pub mode: OutputMode,
    /// Transcoder binaries; overridable so tests can substitute stubs.
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Pause between consecutive clips, letting the transport resync.
    pub clip_gap_ms: u64,
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct StreamConfigBuilder {
    channel_id: Option<u32>,
    playlist_path: Option<PathBuf>,
    mode: Option<OutputMode>,
    ffmpeg_bin: Option<String>,
    ffprobe_bin: Option<String>,
    clip_gap_ms: Option<u64>,
}

impl StreamConfigBuilder {
    pub fn channel_id(mut self, id: u32) -> Self {
        self.channel_id = Some(id);
        self
    }

    pub fn playlist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.playlist_path = Some(path.into());
        self
    }

    pub fn pipe_output(mut self) -> Self {
        self.mode = Some(OutputMode::Pipe);
        self
    }

    pub fn direct_output(mut self, url: impl Into<String>) -> Self {
        self.mode = Some(OutputMode::Direct { url: url.into() });
        self
    }

    pub fn ffmpeg_bin(mut self, bin: impl Into<String>) -> Self {
        self.ffmpeg_bin = Some(bin.into());
        self
    }

    pub fn ffprobe_bin(mut self, bin: impl Into<String>) -> Self {
        self.ffprobe_bin = Some(bin.into());
        self
    }

    pub fn clip_gap_ms(mut self, ms: u64) -> Self {
        self.clip_gap_ms = Some(ms);
        self
    }

    pub fn build(self) -> StreamConfig {
        StreamConfig {
            channel_id: self.channel_id.expect("channel_id is required"),
            playlist_path: self.playlist_path.expect("playlist_path is required"),
            mode: self.mode.unwrap_or(OutputMode::Pipe),
            ffmpeg_bin: self.ffmpeg_bin.unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_bin: self.ffprobe_bin.unwrap_or_else(|| "ffprobe".to_string()),
            clip_gap_ms: self.clip_gap_ms.unwrap_or(500),
        }
    }
}

/// Mutable playback telemetry owned by one channel's playout loop.
/// Other tasks only ever see copies taken under the lock.
#[derive(Debug, Default)]
pub(crate) struct PlayoutShared {
    pub index: usize,
    pub playlist_len: usize,
    pub clip: Option<String>,
    pub started_at: Option<Instant>,
    pub duration: Option<f64>,
    pub pid: Option<u32>,
}

/// Point-in-time view of a channel's playback, safe to serve while the
/// loop keeps running.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PlaybackStatus {
    #[serde(rename = "isPlaying")]
    pub is_playing: bool,
    #[serde(rename = "currentIndex")]
    pub current_index: usize,
    #[serde(rename = "currentClipName")]
    pub current_clip: Option<String>,
    #[serde(rename = "elapsedSeconds")]
    pub elapsed_seconds: u64,
    #[serde(rename = "totalSeconds")]
    pub total_seconds: u64,
    #[serde(rename = "remainingSeconds")]
    pub remaining_seconds: u64,
    #[serde(rename = "playlistLength")]
    pub playlist_length: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChannelStatus {
    pub running: bool,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = StreamConfig::builder()
            .channel_id(3)
            .playlist_path("/tmp/playlist3.txt")
            .build();

        assert_eq!(config.channel_id, 3);
        assert_eq!(config.mode, OutputMode::Pipe);
        assert_eq!(config.ffmpeg_bin, "ffmpeg");
        assert_eq!(config.ffprobe_bin, "ffprobe");
        assert_eq!(config.clip_gap_ms, 500);
    }

    #[test]
    fn builder_direct_output() {
        let config = StreamConfig::builder()
            .channel_id(1)
            .playlist_path("/tmp/playlist1.txt")
            .direct_output("rtmp://localhost/live1/stream")
            .build();

        match &config.mode {
            OutputMode::Direct { url } => assert_eq!(url, "rtmp://localhost/live1/stream"),
            _ => panic!("expected Direct mode"),
        }
        assert_eq!(config.mode.name(), "direct");
    }

    #[test]
    #[should_panic(expected = "playlist_path is required")]
    fn builder_missing_playlist_panics() {
        let _ = StreamConfig::builder().channel_id(1).build();
    }
}
