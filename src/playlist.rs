use std::path::{Path, PathBuf};

use crate::store::Channel;

/// Playlist artifacts use the ffmpeg concat format, one entry per line:
/// `file '/absolute/path/to/video.mp4'`. The artifact is the only channel
/// state the playout loop ever reads; change detection compares the raw
/// bytes, so any rewrite counts as a change.

pub async fn generate(channel: &Channel, playlist_path: &Path, videos_dir: &Path) -> std::io::Result<()> {
    let content = channel
        .videos
        .iter()
        .map(|v| format!("file '{}'", videos_dir.join(&v.filename).display()))
        .collect::<Vec<_>>()
        .join("\n");
    tokio::fs::write(playlist_path, content).await
}

pub fn parse(raw: &[u8]) -> Vec<PathBuf> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|line| {
            line.trim()
                .strip_prefix("file '")
                .and_then(|rest| rest.strip_suffix('\''))
                .map(PathBuf::from)
        })
        .collect()
}

/// Reads the artifact and returns its raw bytes plus the parsed entries.
/// A missing artifact reads as empty.
pub async fn load(path: &Path) -> (Vec<u8>, Vec<PathBuf>) {
    match tokio::fs::read(path).await {
        Ok(raw) => {
            let entries = parse(&raw);
            (raw, entries)
        }
        Err(_) => (Vec::new(), Vec::new()),
    }
}

/// Byte-for-byte comparison against the last loaded copy. A missing
/// artifact never reports a change; the loop keeps its current list.
pub async fn changed(path: &Path, last_raw: &[u8]) -> bool {
    match tokio::fs::read(path).await {
        Ok(raw) => raw != last_raw,
        Err(_) => false,
    }
}

pub async fn remove(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::VideoEntry;

    fn channel_with(filenames: &[&str]) -> Channel {
        Channel {
            id: 1,
            name: "test".into(),
            enabled: true,
            videos: filenames
                .iter()
                .map(|f| VideoEntry {
                    filename: f.to_string(),
                    original_name: f.to_string(),
                    size: 0,
                    added_at: Utc::now(),
                })
                .collect(),
            scheduled_start: None,
            started_at: None,
        }
    }

    #[test]
    fn parse_extracts_quoted_paths() {
        let raw = b"file '/v/a.mp4'\nfile '/v/b.mp4'\n# junk\nother line";
        let entries = parse(raw);
        assert_eq!(entries, vec![PathBuf::from("/v/a.mp4"), PathBuf::from("/v/b.mp4")]);
    }

    #[test]
    fn parse_empty_input() {
        assert!(parse(b"").is_empty());
    }

    #[tokio::test]
    async fn generate_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("playlist1.txt");
        let channel = channel_with(&["a.mp4", "b.mp4"]);

        generate(&channel, &playlist, Path::new("/videos")).await.unwrap();
        let (raw, entries) = load(&playlist).await;
        assert!(!raw.is_empty());
        assert_eq!(
            entries,
            vec![PathBuf::from("/videos/a.mp4"), PathBuf::from("/videos/b.mp4")]
        );
    }

    #[tokio::test]
    async fn changed_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("playlist1.txt");
        let channel = channel_with(&["a.mp4"]);
        generate(&channel, &playlist, Path::new("/videos")).await.unwrap();
        let (raw, _) = load(&playlist).await;

        assert!(!changed(&playlist, &raw).await);

        // identical entries, different whitespace: still a change
        tokio::fs::write(&playlist, b"file '/videos/a.mp4'\n").await.unwrap();
        assert!(changed(&playlist, &raw).await);
    }

    #[tokio::test]
    async fn missing_artifact_reads_empty_and_unchanged() {
        let path = Path::new("/nonexistent/playlist.txt");
        let (raw, entries) = load(path).await;
        assert!(raw.is_empty());
        assert!(entries.is_empty());
        assert!(!changed(path, b"file '/v/a.mp4'").await);
    }
}
