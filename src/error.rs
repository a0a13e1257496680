use std::path::PathBuf;

use thiserror::Error;

/// Errors that can cross the channel start/stop boundary.
///
/// Per-clip failures (encode errors, timeouts, a briefly absent pipe
/// reader) never surface here; the playout loop absorbs them and keeps
/// going. Only conditions that prevent a channel from starting at all
/// are reported to the caller.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("pipe resource at {path} failed: {reason}")]
    Resource { path: PathBuf, reason: String },

    #[error("channel {0} has no videos")]
    NoVideos(u32),

    #[error("playlist for channel {0} is empty")]
    EmptyPlaylist(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;
