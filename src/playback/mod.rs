//! Orchestrator side: job monitor, local cache, playback supervisor, render locks.

pub mod cache;
pub mod lock;
pub mod manager;
pub mod monitor;
pub mod process;
pub mod supervisor;

pub use cache::{CacheKey, LocalCache};
pub use lock::RenderLocks;
pub use manager::{PlayOutcome, PlaybackManager, PlaybackStatus};
pub use monitor::{JobMonitor, PollOutcome};
pub use process::{PlayerLauncher, PlayerProcess, VlcLauncher};
pub use supervisor::{PlaybackSupervisor, PlayerState, StopPolicy, RENDER_LOCK_NAME};
