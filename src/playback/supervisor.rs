//! Playback supervisor: at most one current player process.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::lock::RenderLocks;
use super::process::{PlayerLauncher, PlayerProcess};
use crate::config::StopConfig;
use crate::error::PlaybackError;

/// Render lock name held while a player owns the display.
pub const RENDER_LOCK_NAME: &str = "VideoPlaybackManager";

/// Lifecycle of the current player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// How long to wait for a signalled player before killing it by name.
#[derive(Debug, Clone)]
pub struct StopPolicy {
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub force_kill_grace: Duration,
}

impl From<&StopConfig> for StopPolicy {
    fn from(config: &StopConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_attempts: config.poll_attempts,
            force_kill_grace: Duration::from_millis(config.force_kill_grace_ms),
        }
    }
}

struct Slot {
    state: PlayerState,
    active: Option<ActivePlayer>,
    next_generation: u64,
}

struct ActivePlayer {
    generation: u64,
    source: String,
    terminate_tx: Option<oneshot::Sender<()>>,
}

/// Owns the current player process and the render lock that goes with it.
///
/// Each launch gets a generation number. Only the exit of the current
/// generation clears the slot and releases the lock, so a late exit of a
/// replaced player never touches its successor.
#[derive(Clone)]
pub struct PlaybackSupervisor {
    launcher: Arc<dyn PlayerLauncher>,
    locks: RenderLocks,
    policy: StopPolicy,
    slot: Arc<Mutex<Slot>>,
    /// Serializes start and kill-and-await sequences.
    transitions: Arc<tokio::sync::Mutex<()>>,
}

impl PlaybackSupervisor {
    pub fn new(launcher: Arc<dyn PlayerLauncher>, locks: RenderLocks, policy: StopPolicy) -> Self {
        Self {
            launcher,
            locks,
            policy,
            slot: Arc::new(Mutex::new(Slot {
                state: PlayerState::Idle,
                active: None,
                next_generation: 1,
            })),
            transitions: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn locks(&self) -> &RenderLocks {
        &self.locks
    }

    pub fn state(&self) -> PlayerState {
        lock_slot(&self.slot).state
    }

    /// True while a launched process has not been seen to exit.
    pub fn is_playing(&self) -> bool {
        lock_slot(&self.slot).active.is_some()
    }

    pub fn current_source(&self) -> Option<String> {
        lock_slot(&self.slot)
            .active
            .as_ref()
            .map(|active| active.source.clone())
    }

    /// Stops whatever is playing, takes the render lock and launches a player for `source`.
    pub async fn start_playback(&self, source: &str) -> Result<(), PlaybackError> {
        self.start_playback_if(source, || true).await.map(|_| ())
    }

    /// Like [`start_playback`](Self::start_playback), but asks `still_wanted`
    /// once earlier transitions have finished. Returns false if it declined,
    /// in which case the current player is left alone.
    pub async fn start_playback_if<F>(
        &self,
        source: &str,
        still_wanted: F,
    ) -> Result<bool, PlaybackError>
    where
        F: FnOnce() -> bool,
    {
        let _transition = self.transitions.lock().await;
        if !still_wanted() {
            return Ok(false);
        }
        self.stop_current().await;

        lock_slot(&self.slot).state = PlayerState::Starting;
        self.locks.append_lock(RENDER_LOCK_NAME);

        let process = match self.launcher.launch(source) {
            Ok(process) => process,
            Err(e) => {
                self.locks.remove_lock(RENDER_LOCK_NAME);
                lock_slot(&self.slot).state = PlayerState::Idle;
                return Err(e);
            }
        };

        let (terminate_tx, terminate_rx) = oneshot::channel();
        let generation = {
            let mut slot = lock_slot(&self.slot);
            let generation = slot.next_generation;
            slot.next_generation += 1;
            slot.active = Some(ActivePlayer {
                generation,
                source: source.to_string(),
                terminate_tx: Some(terminate_tx),
            });
            slot.state = PlayerState::Running;
            generation
        };

        tokio::spawn(watch_player(
            self.slot.clone(),
            self.locks.clone(),
            generation,
            process,
            terminate_rx,
        ));
        Ok(true)
    }

    /// Signals the current player to exit. Returns false if nothing was playing.
    pub fn kill(&self) -> bool {
        let mut slot = lock_slot(&self.slot);
        let Some(active) = slot.active.as_mut() else {
            return false;
        };
        if let Some(tx) = active.terminate_tx.take() {
            let _ = tx.send(());
        }
        slot.state = PlayerState::Stopping;
        true
    }

    /// Stops the current player and waits for it, force killing it if it lingers.
    pub async fn kill_and_await(&self) {
        let _transition = self.transitions.lock().await;
        self.stop_current().await;
    }

    async fn stop_current(&self) {
        let Some(generation) = current_generation(&self.slot) else {
            return;
        };
        self.kill();

        for _ in 0..self.policy.poll_attempts {
            tokio::time::sleep(self.policy.poll_interval).await;
            if current_generation(&self.slot) != Some(generation) {
                return;
            }
        }

        warn!(generation, "Player did not exit after kill attempt, force killing");
        self.launcher.force_kill().await;
        release(&self.slot, &self.locks, generation);
        tokio::time::sleep(self.policy.force_kill_grace).await;
    }
}

async fn watch_player(
    slot: Arc<Mutex<Slot>>,
    locks: RenderLocks,
    generation: u64,
    mut process: Box<dyn PlayerProcess>,
    mut terminate_rx: oneshot::Receiver<()>,
) {
    let pid = process.id();
    let status = tokio::select! {
        status = process.wait() => status,
        signal = &mut terminate_rx => {
            if signal.is_ok() {
                if let Err(e) = process.terminate() {
                    warn!(pid = ?pid, error = %e, "Failed to signal player");
                }
            }
            process.wait().await
        }
    };

    match status {
        Ok(code) => info!(pid = ?pid, code = ?code, generation, "Player exited"),
        Err(e) => warn!(pid = ?pid, error = %e, generation, "Lost track of player process"),
    }
    release(&slot, &locks, generation);
}

/// Clears the slot and drops the render lock if `generation` is still current.
fn release(slot: &Mutex<Slot>, locks: &RenderLocks, generation: u64) -> bool {
    let mut slot = lock_slot(slot);
    let current = slot.active.as_ref().map(|active| active.generation);
    if current != Some(generation) {
        return false;
    }
    slot.active = None;
    slot.state = PlayerState::Idle;
    locks.remove_lock(RENDER_LOCK_NAME);
    true
}

fn current_generation(slot: &Mutex<Slot>) -> Option<u64> {
    lock_slot(slot).active.as_ref().map(|active| active.generation)
}

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
