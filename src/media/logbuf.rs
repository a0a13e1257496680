use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

const MAX_BUFFERED_LINES: usize = 64;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Append-only per-channel diagnostic log with batched writes.
///
/// Child-process output arrives line by line for days on end; buffering
/// and flushing in batches keeps both memory and write amplification
/// bounded.
pub struct LogBuffer {
    path: PathBuf,
    state: Mutex<BufferState>,
    max_lines: usize,
    flush_interval: Duration,
}

struct BufferState {
    lines: Vec<String>,
    last_flush: Instant,
}

impl LogBuffer {
    pub fn new(path: PathBuf) -> Self {
        Self::with_limits(path, MAX_BUFFERED_LINES, FLUSH_INTERVAL)
    }

    pub fn with_limits(path: PathBuf, max_lines: usize, flush_interval: Duration) -> Self {
        Self {
            path,
            state: Mutex::new(BufferState {
                lines: Vec::new(),
                last_flush: Instant::now(),
            }),
            max_lines,
            flush_interval,
        }
    }

    pub async fn push(&self, line: &str) {
        let batch = {
            let mut state = self.state.lock().unwrap();
            state.lines.push(line.to_string());
            if state.lines.len() >= self.max_lines
                || state.last_flush.elapsed() >= self.flush_interval
            {
                state.last_flush = Instant::now();
                Some(std::mem::take(&mut state.lines))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.write(batch).await;
        }
    }

    pub async fn flush(&self) {
        let batch = {
            let mut state = self.state.lock().unwrap();
            state.last_flush = Instant::now();
            std::mem::take(&mut state.lines)
        };
        if !batch.is_empty() {
            self.write(batch).await;
        }
    }

    async fn write(&self, lines: Vec<String>) {
        let open = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await;
        match open {
            Ok(mut file) => {
                let mut chunk = lines.join("\n");
                chunk.push('\n');
                if let Err(e) = file.write_all(chunk.as_bytes()).await {
                    log::error!("log write to {} failed: {}", self.path.display(), e);
                } else if let Err(e) = file.flush().await {
                    log::error!("log flush to {} failed: {}", self.path.display(), e);
                }
            }
            Err(e) => log::error!("log open {} failed: {}", self.path.display(), e),
        }
    }
}
