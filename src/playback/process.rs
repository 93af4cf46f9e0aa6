//! External player processes.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::DisplayConfig;
use crate::error::PlaybackError;

/// A running player.
#[async_trait]
pub trait PlayerProcess: Send {
    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;

    /// Asks the process to exit. Does not wait.
    fn terminate(&mut self) -> std::io::Result<()>;

    /// Waits for exit and returns the exit code (`None` if killed by a signal).
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;
}

/// Starts players and kills strays.
#[async_trait]
pub trait PlayerLauncher: Send + Sync {
    /// Starts playing `source`, a local path or a URL.
    fn launch(&self, source: &str) -> Result<Box<dyn PlayerProcess>, PlaybackError>;

    /// Kills every player process by name, for players that ignored `terminate`.
    async fn force_kill(&self);
}

/// Launches VLC with the flaschen-taschen video output.
#[derive(Debug, Clone)]
pub struct VlcLauncher {
    program: String,
    display: DisplayConfig,
}

impl VlcLauncher {
    pub fn new(program: impl Into<String>, display: DisplayConfig) -> Self {
        Self {
            program: program.into(),
            display,
        }
    }

    pub fn args(&self, source: &str) -> Vec<String> {
        vec![
            "--play-and-exit".to_string(),
            "--vout".to_string(),
            "flaschen".to_string(),
            format!("--flaschen-display={}", self.display.host),
            format!("--flaschen-width={}", self.display.width),
            format!("--flaschen-height={}", self.display.height),
            source.to_string(),
        ]
    }

    /// Name `killall` matches against.
    fn process_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }
}

#[async_trait]
impl PlayerLauncher for VlcLauncher {
    fn launch(&self, source: &str) -> Result<Box<dyn PlayerProcess>, PlaybackError> {
        let child = Command::new(&self.program)
            .args(self.args(source))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::LaunchFailed {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        info!(pid = ?child.id(), source = %source, "Player started");
        Ok(Box::new(ChildPlayer { child }))
    }

    async fn force_kill(&self) {
        let name = self.process_name();
        match Command::new("killall").arg(&name).status().await {
            Ok(status) if status.success() => debug!(name = %name, "killall succeeded"),
            Ok(status) => warn!(name = %name, code = ?status.code(), "killall found nothing to kill"),
            Err(e) => warn!(name = %name, error = %e, "Failed to run killall"),
        }
    }
}

struct ChildPlayer {
    child: Child,
}

#[async_trait]
impl PlayerProcess for ChildPlayer {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }
}
