// ============================================================================
// Playout loop tests. Encoder binaries are substituted with stubs so the
// loop mechanics can be exercised without a real transcoder installed.
// ============================================================================

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use super::*;

fn write_playlist(path: &Path, clips: &[&Path]) {
    let content = clips
        .iter()
        .map(|c| format!("file '{}'", c.display()))
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(path, content).unwrap();
}

fn touch(path: &Path) {
    std::fs::write(path, b"x").unwrap();
}

fn stub_encoder(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-encoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn test_config(playlist: &Path, ffmpeg_bin: &str) -> StreamConfig {
    StreamConfig::builder()
        .channel_id(1)
        .playlist_path(playlist)
        .direct_output("rtmp://localhost/live1/stream")
        .ffmpeg_bin(ffmpeg_bin)
        .ffprobe_bin("true")
        .clip_gap_ms(10)
        .build()
}

async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}

// ------------------------------------------------------------------------
// resume_index
// ------------------------------------------------------------------------

#[test]
fn resume_continues_after_the_same_clip_when_reordered() {
    let old_b = PathBuf::from("/v/b.mp4");
    let new_list = vec![
        PathBuf::from("/v/c.mp4"),
        PathBuf::from("/v/b.mp4"),
        PathBuf::from("/v/a.mp4"),
    ];
    // b sits at index 1 in the new order; playback continues right after it
    assert_eq!(resume_index(&new_list, Some(&old_b)), 2);
}

#[test]
fn resume_wraps_when_the_clip_moved_to_the_end() {
    let last = PathBuf::from("/v/a.mp4");
    let new_list = vec![PathBuf::from("/v/b.mp4"), PathBuf::from("/v/a.mp4")];
    assert_eq!(resume_index(&new_list, Some(&last)), 0);
}

#[test]
fn resume_resets_when_the_clip_was_removed() {
    let gone = PathBuf::from("/v/b.mp4");
    let new_list = vec![PathBuf::from("/v/a.mp4"), PathBuf::from("/v/c.mp4")];
    assert_eq!(resume_index(&new_list, Some(&gone)), 0);
}

#[test]
fn resume_from_scratch_starts_at_the_head() {
    let list = vec![PathBuf::from("/v/a.mp4")];
    assert_eq!(resume_index(&list, None), 0);
    assert_eq!(resume_index(&[], None), 0);
}

// ------------------------------------------------------------------------
// Start failures
// ------------------------------------------------------------------------

#[tokio::test]
async fn start_fails_on_empty_playlist() {
    let dir = tempfile::tempdir().unwrap();
    let playlist = dir.path().join("playlist1.txt");
    std::fs::write(&playlist, "").unwrap();

    let playout = Arc::new(Playout::new(
        test_config(&playlist, "true"),
        None,
        CancellationToken::new(),
    ));
    let err = playout.start().await.unwrap_err();
    assert!(matches!(err, StreamError::EmptyPlaylist(1)));
    assert!(!playout.is_running());
}

#[tokio::test]
async fn start_fails_on_missing_playlist() {
    let dir = tempfile::tempdir().unwrap();
    let playlist = dir.path().join("does-not-exist.txt");

    let playout = Arc::new(Playout::new(
        test_config(&playlist, "true"),
        None,
        CancellationToken::new(),
    ));
    assert!(playout.start().await.is_err());
    assert!(!playout.is_running());
}

// ------------------------------------------------------------------------
// Loop behavior
// ------------------------------------------------------------------------

#[tokio::test]
async fn loop_runs_and_reports_status() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.mp4");
    let b = dir.path().join("b.mp4");
    touch(&a);
    touch(&b);
    let playlist = dir.path().join("playlist1.txt");
    write_playlist(&playlist, &[&a, &b]);

    let playout = Arc::new(Playout::new(
        test_config(&playlist, "true"),
        None,
        CancellationToken::new(),
    ));
    playout.start().await.unwrap();

    let playing = {
        let p = Arc::clone(&playout);
        wait_until(Duration::from_secs(2), move || {
            let status = p.status();
            status.is_playing && status.current_clip.is_some()
        })
        .await
    };
    assert!(playing);
    assert_eq!(playout.status().playlist_length, 2);

    playout.stop().await;
    let stopped = {
        let p = Arc::clone(&playout);
        wait_until(Duration::from_secs(3), move || !p.is_running()).await
    };
    assert!(stopped);
    assert!(playout.current_pid().is_none());
}

#[tokio::test]
async fn loop_survives_clips_that_always_fail() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.mp4");
    let b = dir.path().join("b.mp4");
    touch(&a);
    touch(&b);
    let playlist = dir.path().join("playlist1.txt");
    write_playlist(&playlist, &[&a, &b]);

    // every encode exits 1; the loop must keep cycling regardless
    let playout = Arc::new(Playout::new(
        test_config(&playlist, "false"),
        None,
        CancellationToken::new(),
    ));
    playout.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(playout.is_running());

    playout.stop().await;
    let stopped = {
        let p = Arc::clone(&playout);
        wait_until(Duration::from_secs(3), move || !p.is_running()).await
    };
    assert!(stopped);
}

#[tokio::test]
async fn loop_skips_missing_files_without_stopping() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.mp4");
    touch(&a);
    let ghost = dir.path().join("ghost.mp4");
    let playlist = dir.path().join("playlist1.txt");
    write_playlist(&playlist, &[&ghost, &a]);

    let playout = Arc::new(Playout::new(
        test_config(&playlist, "true"),
        None,
        CancellationToken::new(),
    ));
    playout.start().await.unwrap();

    // the missing head entry is skipped and the existing clip plays
    let reached_real_clip = {
        let p = Arc::clone(&playout);
        wait_until(Duration::from_secs(3), move || {
            p.status().current_clip.as_deref() == Some("a.mp4")
        })
        .await
    };
    assert!(reached_real_clip);
    assert!(playout.is_running());

    playout.stop().await;
}

#[tokio::test]
async fn hot_reload_applies_between_clips() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.mp4");
    let b = dir.path().join("b.mp4");
    let c = dir.path().join("c.mp4");
    touch(&a);
    touch(&b);
    touch(&c);
    let playlist = dir.path().join("playlist1.txt");
    write_playlist(&playlist, &[&a, &b]);

    let playout = Arc::new(Playout::new(
        test_config(&playlist, "true"),
        None,
        CancellationToken::new(),
    ));
    playout.start().await.unwrap();
    assert_eq!(playout.status().playlist_length, 2);

    write_playlist(&playlist, &[&c, &b, &a]);
    let reloaded = {
        let p = Arc::clone(&playout);
        wait_until(Duration::from_secs(3), move || p.status().playlist_length == 3).await
    };
    assert!(reloaded);
    assert!(playout.is_running());

    playout.stop().await;
}

#[tokio::test]
async fn stop_mid_clip_terminates_the_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.mp4");
    touch(&a);
    let playlist = dir.path().join("playlist1.txt");
    write_playlist(&playlist, &[&a]);
    let encoder = stub_encoder(dir.path(), "exec sleep 30");

    let playout = Arc::new(Playout::new(
        test_config(&playlist, encoder.to_str().unwrap()),
        None,
        CancellationToken::new(),
    ));
    playout.start().await.unwrap();

    let mid_clip = {
        let p = Arc::clone(&playout);
        wait_until(Duration::from_secs(2), move || p.current_pid().is_some()).await
    };
    assert!(mid_clip);

    playout.stop().await;
    let stopped = {
        let p = Arc::clone(&playout);
        wait_until(Duration::from_secs(4), move || !p.is_running()).await
    };
    assert!(stopped);
    assert!(playout.current_pid().is_none());
}
