use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::process::Command;

use crate::error::{StreamError, StreamResult};

/// One named pipe (FIFO) per active channel, at a fixed path derived from
/// the channel id. The resource holds a read+write handle open for its
/// entire life, so the pusher on the read side never observes end-of-stream
/// while clip writers attach and detach between encode steps.
pub struct Fifo {
    channel_id: u32,
    path: PathBuf,
    keepalive: Mutex<Option<File>>,
}

impl Fifo {
    pub fn new(channel_id: u32, pipe_dir: &Path) -> Self {
        Self {
            channel_id,
            path: pipe_dir.join(format!("stream_live{}.pipe", channel_id)),
            keepalive: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Removes any stale file at the fixed path, creates a fresh FIFO and
    /// opens the keep-alive handle.
    pub async fn create(&self) -> StreamResult<()> {
        self.destroy();

        let status = Command::new("mkfifo")
            .arg(&self.path)
            .status()
            .await
            .map_err(|e| self.resource_err(e))?;
        if !status.success() {
            return Err(self.resource_err(format!("mkfifo exited with {}", status)));
        }

        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| self.resource_err(e))?;
        *self.keepalive.lock().unwrap() = Some(handle);

        log::info!("channel {}: fifo created at {}", self.channel_id, self.path.display());
        Ok(())
    }

    /// Stable write handle for the currently running encode step.
    ///
    /// Reopened transparently if the previous handle is gone. A
    /// `BrokenPipe` on this handle means no reader is attached right now
    /// (the pusher may be mid-restart) and is not fatal.
    pub fn write_end(&self) -> StreamResult<File> {
        let mut guard = self.keepalive.lock().unwrap();
        if guard.is_none() {
            let handle = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.path)
                .map_err(|e| self.resource_err(e))?;
            *guard = Some(handle);
        }
        guard
            .as_ref()
            .unwrap()
            .try_clone()
            .map_err(|e| self.resource_err(e))
    }

    /// Closes all handles and removes the FIFO file. Safe to call any
    /// number of times.
    pub fn destroy(&self) {
        self.keepalive.lock().unwrap().take();
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::error!("channel {}: failed to remove fifo: {}", self.channel_id, e);
            } else {
                log::info!("channel {}: fifo destroyed", self.channel_id);
            }
        }
    }

    fn resource_err(&self, reason: impl ToString) -> StreamError {
        StreamError::Resource {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Drop for Fifo {
    fn drop(&mut self) {
        self.destroy();
    }
}
