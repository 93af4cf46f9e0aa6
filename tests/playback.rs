mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use tempfile::TempDir;
use tokio::sync::Notify;

use common::{eventually, quick_stop, FakeLauncher, FakeWorker};
use visor_video::config::PollConfig;
use visor_video::job::JobRequest;
use visor_video::playback::{
    CacheKey, LocalCache, PlayOutcome, PlaybackManager, PlaybackSupervisor, PlayerState,
    RenderLocks, RENDER_LOCK_NAME,
};
use visor_video::server::control::{self, ControlState};
use visor_video::store::ContentStore;

fn supervisor(launcher: Arc<FakeLauncher>) -> PlaybackSupervisor {
    PlaybackSupervisor::new(launcher, RenderLocks::new(), quick_stop())
}

struct Harness {
    dir: TempDir,
    worker: Arc<FakeWorker>,
    launcher: Arc<FakeLauncher>,
    manager: PlaybackManager,
}

fn harness() -> Harness {
    harness_with(FakeWorker::new(b"device ready frames"))
}

fn harness_with(worker: FakeWorker) -> Harness {
    let dir = TempDir::new().unwrap();
    let worker = Arc::new(worker);
    let launcher = Arc::new(FakeLauncher::default());
    let manager = PlaybackManager::new(
        worker.clone(),
        LocalCache::open(dir.path().join("player.sqlite")).unwrap(),
        ContentStore::new(dir.path().join("videos"), "mp4"),
        supervisor(launcher.clone()),
        PollConfig {
            tick_ms: 5,
            ticks_per_check: 1,
        },
        Duration::from_secs(300),
    );
    Harness {
        dir,
        worker,
        launcher,
        manager,
    }
}

#[tokio::test]
async fn replacing_playback_keeps_one_process_and_one_lock() {
    let launcher = Arc::new(FakeLauncher::default());
    let supervisor = supervisor(launcher.clone());

    supervisor.start_playback("/videos/x.mp4").await.unwrap();
    supervisor.start_playback("/videos/y.mp4").await.unwrap();

    assert_eq!(launcher.launched(), vec!["/videos/x.mp4", "/videos/y.mp4"]);
    assert_eq!(launcher.live(), 1);
    assert_eq!(supervisor.current_source().as_deref(), Some("/videos/y.mp4"));
    assert_eq!(supervisor.state(), PlayerState::Running);
    assert_eq!(supervisor.locks().held(), vec![RENDER_LOCK_NAME.to_string()]);
    assert_eq!(launcher.force_kills.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn player_ignoring_terminate_is_force_killed() {
    let launcher = Arc::new(FakeLauncher::stubborn());
    let supervisor = supervisor(launcher.clone());

    supervisor.start_playback("/videos/x.mp4").await.unwrap();
    supervisor.kill_and_await().await;

    assert_eq!(launcher.force_kills.load(Ordering::SeqCst), 1);
    assert!(!supervisor.is_playing());
    assert_eq!(supervisor.state(), PlayerState::Idle);
    assert!(!supervisor.locks().is_locked());

    supervisor.start_playback("/videos/y.mp4").await.unwrap();
    assert!(eventually(|| launcher.live() == 1).await);
    assert!(supervisor.locks().holds(RENDER_LOCK_NAME));
    assert_eq!(supervisor.current_source().as_deref(), Some("/videos/y.mp4"));
}

#[tokio::test]
async fn natural_exit_releases_the_render_lock() {
    let launcher = Arc::new(FakeLauncher::default());
    let supervisor = supervisor(launcher.clone());

    assert!(!supervisor.kill());
    supervisor.start_playback("/videos/x.mp4").await.unwrap();
    assert!(supervisor.locks().holds(RENDER_LOCK_NAME));

    launcher.finish_all();
    assert!(eventually(|| !supervisor.is_playing()).await);
    assert!(!supervisor.locks().is_locked());
    assert_eq!(supervisor.state(), PlayerState::Idle);
}

#[tokio::test]
async fn declined_start_leaves_current_player_alone() {
    let launcher = Arc::new(FakeLauncher::default());
    let supervisor = supervisor(launcher.clone());

    supervisor.start_playback("/videos/x.mp4").await.unwrap();
    let started = supervisor
        .start_playback_if("/videos/y.mp4", || false)
        .await
        .unwrap();

    assert!(!started);
    assert_eq!(launcher.launched(), vec!["/videos/x.mp4"]);
    assert_eq!(supervisor.current_source().as_deref(), Some("/videos/x.mp4"));
    assert!(supervisor.locks().holds(RENDER_LOCK_NAME));
}

#[tokio::test]
async fn launch_failure_leaves_display_unlocked() {
    let launcher = Arc::new(FakeLauncher {
        fail_launch: true,
        ..FakeLauncher::default()
    });
    let supervisor = supervisor(launcher);

    assert!(supervisor.start_playback("/videos/x.mp4").await.is_err());
    assert!(!supervisor.locks().is_locked());
    assert_eq!(supervisor.state(), PlayerState::Idle);
}

#[tokio::test]
async fn repeat_request_plays_from_cache_without_worker_calls() {
    let h = harness();
    let request = JobRequest::new("https://example.com/a", false, false);

    let outcome = h.manager.play_video_cached(&request).await.unwrap();
    assert!(matches!(outcome, PlayOutcome::Job { .. }));
    h.manager.check_job().await;

    let hash = h.worker.artifact_hash();
    assert_eq!(h.worker.calls(), (1, 1, 1));
    assert!(h.manager.mirror().contains(&hash));
    let key = CacheKey::new(&request.url, false, false);
    assert_eq!(h.manager.cache().lookup(&key).unwrap().unwrap().hash, hash);
    assert_eq!(h.launcher.launched().len(), 1);

    let outcome = h.manager.play_video_cached(&request).await.unwrap();
    assert_eq!(outcome, PlayOutcome::Cache { hash: hash.clone() });
    assert_eq!(h.worker.calls(), (1, 1, 1));
    assert_eq!(h.launcher.launched().len(), 2);
    assert_eq!(h.launcher.live(), 1);
    assert!(h.launcher.launched()[1].ends_with(&format!("{}.mp4", hash)));
}

#[tokio::test]
async fn different_settings_miss_the_cache() {
    let h = harness();
    h.manager
        .play_video_cached(&JobRequest::new("https://example.com/a", false, false))
        .await
        .unwrap();
    h.manager.check_job().await;

    let outcome = h
        .manager
        .play_video_cached(&JobRequest::new("https://example.com/a", true, false))
        .await
        .unwrap();
    assert!(matches!(outcome, PlayOutcome::Job { .. }));
    assert_eq!(h.worker.calls().0, 2);
}

#[tokio::test]
async fn stop_before_completion_suppresses_playback() {
    let h = harness();
    h.manager
        .play_video(&JobRequest::new("https://example.com/a", false, false))
        .await
        .unwrap();

    assert!(h.manager.status().has_download_job);

    assert!(!h.manager.stop());
    assert!(!h.manager.status().has_download_job);
    h.manager.check_job().await;

    assert_eq!(h.worker.calls(), (1, 0, 0));
    assert!(h.launcher.launched().is_empty());
}

/// Puts `hash` in the mirror and the cache for `request`, as a past play would have.
fn seed_cache(h: &Harness, request: &JobRequest, hash: &str) {
    let path = h.manager.mirror().path_for(hash);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"earlier frames").unwrap();
    let key = CacheKey::new(&request.url, request.mirror_video, request.flip_video);
    h.manager.cache().insert(&key, hash, "earlier-job").unwrap();
}

#[tokio::test]
async fn newer_cached_request_wins_over_job_finishing_later() {
    let gate = Arc::new(Notify::new());
    let h = harness_with(FakeWorker::with_download_gate(b"slow job frames", gate.clone()));
    let cached = JobRequest::new("https://example.com/b", false, false);
    let cached_hash = "b".repeat(64);
    seed_cache(&h, &cached, &cached_hash);

    h.manager
        .play_video(&JobRequest::new("https://example.com/a", false, false))
        .await
        .unwrap();
    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.check_job().await });
    assert!(eventually(|| h.worker.calls().2 == 1).await);

    let outcome = h.manager.play_video_cached(&cached).await.unwrap();
    assert_eq!(outcome, PlayOutcome::Cache { hash: cached_hash.clone() });

    gate.notify_one();
    pending.await.unwrap();

    assert_eq!(h.launcher.launched().len(), 1);
    assert_eq!(h.launcher.live(), 1);
    let current = h.manager.supervisor().current_source().unwrap();
    assert!(current.ends_with(&format!("{}.mp4", cached_hash)));

    let finished = CacheKey::new("https://example.com/a", false, false);
    assert_eq!(
        h.manager.cache().lookup(&finished).unwrap().unwrap().hash,
        h.worker.artifact_hash()
    );
}

#[tokio::test]
async fn stream_started_during_download_stays_on_screen() {
    let gate = Arc::new(Notify::new());
    let h = harness_with(FakeWorker::with_download_gate(b"slow job frames", gate.clone()));

    h.manager
        .play_video(&JobRequest::new("https://example.com/a", false, false))
        .await
        .unwrap();
    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.check_job().await });
    assert!(eventually(|| h.worker.calls().2 == 1).await);

    h.manager
        .stream_video("https://example.com/live.m3u8")
        .await
        .unwrap();
    gate.notify_one();
    pending.await.unwrap();

    assert_eq!(h.launcher.launched(), vec!["https://example.com/live.m3u8"]);
    assert_eq!(
        h.manager.supervisor().current_source().as_deref(),
        Some("https://example.com/live.m3u8")
    );
}

#[tokio::test]
async fn stop_during_download_keeps_display_dark() {
    let gate = Arc::new(Notify::new());
    let h = harness_with(FakeWorker::with_download_gate(b"slow job frames", gate.clone()));

    h.manager
        .play_video(&JobRequest::new("https://example.com/a", false, false))
        .await
        .unwrap();
    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.check_job().await });
    assert!(eventually(|| h.worker.calls().2 == 1).await);

    h.manager.stop();
    gate.notify_one();
    pending.await.unwrap();

    assert!(h.launcher.launched().is_empty());
    assert!(!h.manager.supervisor().locks().is_locked());
    assert!(h.manager.mirror().contains(&h.worker.artifact_hash()));
}

#[tokio::test]
async fn clearing_the_mirror_drops_cache_entries() {
    let h = harness();
    let request = JobRequest::new("https://example.com/a", false, false);
    h.manager.play_video_cached(&request).await.unwrap();
    h.manager.check_job().await;
    h.manager.supervisor().kill_and_await().await;

    assert_eq!(h.manager.clear_cache().await.unwrap(), 1);
    assert!(h.manager.cache().entries().unwrap().is_empty());

    let outcome = h.manager.play_video_cached(&request).await.unwrap();
    assert!(matches!(outcome, PlayOutcome::Job { .. }));
}

#[tokio::test]
async fn run_loop_picks_up_new_jobs() {
    let h = harness();
    let manager = h.manager.clone();
    let runner = tokio::spawn(async move { manager.run().await });

    h.manager
        .play_video(&JobRequest::new("https://example.com/a", false, false))
        .await
        .unwrap();
    assert!(eventually(|| h.launcher.launched().len() == 1).await);
    assert!(!h.manager.status().has_download_job);
    runner.abort();
}

async fn call(state: &ControlState, method: Method, uri: &str, body: &'static str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap();
    let response = control::handle(state.clone(), req).await;
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn control_surface_routes() {
    let h = harness();
    let state = ControlState {
        manager: h.manager.clone(),
        max_url_length: 1024,
    };

    let (status, body) = call(&state, Method::POST, "/play", r#"{"url":"javascript:alert(1)"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
    assert_eq!(h.worker.calls().0, 0);

    let (status, body) = call(
        &state,
        Method::POST,
        "/play",
        r#"{"url":"https://example.com/a","mirrorVideo":false,"flipVideo":false}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "job");
    assert_eq!(body["job"]["status"], "CREATED");

    let (_, body) = call(&state, Method::GET, "/status", "").await;
    assert_eq!(body["hasDownloadJob"], true);
    assert_eq!(body["isPlaying"], false);
    assert_eq!(body["playerState"], "idle");

    let (status, body) = call(&state, Method::POST, "/stream", r#"{"url":"https://example.com/live.m3u8"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({}));
    assert_eq!(h.launcher.launched(), vec!["https://example.com/live.m3u8"]);

    let (_, body) = call(&state, Method::POST, "/stop", "").await;
    assert_eq!(body["didStop"], true);

    let (_, body) = call(&state, Method::DELETE, "/cache", "").await;
    assert_eq!(body["deletedCount"], 0);

    let (status, _) = call(&state, Method::POST, "/prefetch", r#"{"url":"https://example.com/b"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.worker.calls().0, 2);
    assert!(h.dir.path().exists());
}
