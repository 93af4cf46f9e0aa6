//! Configuration data structures.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure. Both halves are optional in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Transcode worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Playback orchestrator settings.
    #[serde(default)]
    pub player: PlayerConfig,
}

/// Settings for the transcode worker service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Port for the job HTTP API and `/metrics`.
    #[serde(default = "default_worker_port")]
    pub listen_port: u16,

    /// Root data directory. Storage, scratch and the job database live below it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Downloader executable (yt-dlp compatible CLI).
    #[serde(default = "default_downloader")]
    pub downloader: String,

    /// FFmpeg executable.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    /// FFmpeg `-preset` value for both encode stages.
    #[serde(default = "default_ffmpeg_preset")]
    pub ffmpeg_preset: String,

    /// Container extension of finished artifacts.
    #[serde(default = "default_video_extension")]
    pub video_extension: String,

    /// Longest accepted source URL.
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,

    /// Whether job reuse also requires an equal `flipVideo` for mirrored jobs.
    #[serde(default)]
    pub dedup_on_flip: bool,

    /// Target display the artifacts are sized for.
    #[serde(default)]
    pub display: DisplayConfig,
}

impl WorkerConfig {
    fn downloader_dir(&self) -> PathBuf {
        self.data_dir.join("video_downloader")
    }

    /// Content-addressed artifact directory.
    pub fn storage_dir(&self) -> PathBuf {
        self.downloader_dir().join("storage")
    }

    /// Scratch directory, wiped on startup.
    pub fn temp_dir(&self) -> PathBuf {
        self.downloader_dir().join("temp")
    }

    /// Job record database file.
    pub fn database_path(&self) -> PathBuf {
        self.downloader_dir().join("db.sqlite")
    }
}

/// Settings for the playback orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Base URL of the worker service.
    #[serde(default = "default_worker_url")]
    pub worker_url: String,

    /// Port for the control HTTP API.
    #[serde(default = "default_player_port")]
    pub listen_port: u16,

    /// Local mirror of the worker's content store.
    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,

    /// Local cache database file.
    #[serde(default = "default_player_database")]
    pub database: PathBuf,

    /// Player executable (VLC with the flaschen output module).
    #[serde(default = "default_player_command")]
    pub player_command: String,

    /// Container extension of mirrored artifacts.
    #[serde(default = "default_video_extension")]
    pub video_extension: String,

    /// Output display.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Job polling cadence.
    #[serde(default)]
    pub poll: PollConfig,

    /// Player shutdown escalation.
    #[serde(default)]
    pub stop: StopConfig,

    /// Interval in seconds between local cache sweeps.
    #[serde(default = "default_cache_sweep_interval")]
    pub cache_sweep_interval_secs: u64,
}

/// Physical output display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Flaschen-taschen host the player streams to.
    #[serde(default = "default_display_host")]
    pub host: String,

    /// Display width in pixels.
    #[serde(default = "default_display_width")]
    pub width: u32,

    /// Display height in pixels.
    #[serde(default = "default_display_height")]
    pub height: u32,
}

/// Polling contract between the orchestrator and the worker.
///
/// The monitor wakes every `tick_ms` and queries the worker once every
/// `ticks_per_check` ticks, so worst case status latency is their product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_ticks_per_check")]
    pub ticks_per_check: u32,
}

impl PollConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Upper bound between a status change on the worker and the monitor seeing it.
    pub fn check_interval(&self) -> Duration {
        self.tick() * self.ticks_per_check.max(1)
    }
}

/// Terminate, wait, then force-kill escalation for the player process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    #[serde(default = "default_stop_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_stop_poll_attempts")]
    pub poll_attempts: u32,

    #[serde(default = "default_force_kill_grace_ms")]
    pub force_kill_grace_ms: u64,
}

// Default value functions

fn default_worker_port() -> u16 {
    8090
}

fn default_player_port() -> u16 {
    8091
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_downloader() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffmpeg_preset() -> String {
    "fast".to_string()
}

fn default_video_extension() -> String {
    "mp4".to_string()
}

fn default_max_url_length() -> usize {
    1024
}

fn default_worker_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_video_dir() -> PathBuf {
    PathBuf::from("./videos")
}

fn default_player_database() -> PathBuf {
    PathBuf::from("./player.sqlite")
}

fn default_player_command() -> String {
    "vlc".to_string()
}

fn default_cache_sweep_interval() -> u64 {
    300
}

fn default_display_host() -> String {
    "127.0.0.1".to_string()
}

fn default_display_width() -> u32 {
    128
}

fn default_display_height() -> u32 {
    32
}

fn default_tick_ms() -> u64 {
    100
}

fn default_ticks_per_check() -> u32 {
    20
}

fn default_stop_poll_interval_ms() -> u64 {
    100
}

fn default_stop_poll_attempts() -> u32 {
    50
}

fn default_force_kill_grace_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_worker_port(),
            data_dir: default_data_dir(),
            downloader: default_downloader(),
            ffmpeg: default_ffmpeg(),
            ffmpeg_preset: default_ffmpeg_preset(),
            video_extension: default_video_extension(),
            max_url_length: default_max_url_length(),
            dedup_on_flip: false,
            display: DisplayConfig::default(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            worker_url: default_worker_url(),
            listen_port: default_player_port(),
            video_dir: default_video_dir(),
            database: default_player_database(),
            player_command: default_player_command(),
            video_extension: default_video_extension(),
            display: DisplayConfig::default(),
            poll: PollConfig::default(),
            stop: StopConfig::default(),
            cache_sweep_interval_secs: default_cache_sweep_interval(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            host: default_display_host(),
            width: default_display_width(),
            height: default_display_height(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            ticks_per_check: default_ticks_per_check(),
        }
    }
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_stop_poll_interval_ms(),
            poll_attempts: default_stop_poll_attempts(),
            force_kill_grace_ms: default_force_kill_grace_ms(),
        }
    }
}
