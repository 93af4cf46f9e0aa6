//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use visor_video::error::{ClientError, PipelineError, PlaybackError};
use visor_video::job::{JobRecord, JobRequest, JobStatus};
use visor_video::playback::{PlayerLauncher, PlayerProcess, StopPolicy};
use visor_video::remote::WorkerApi;
use visor_video::store::sha256_hex;
use visor_video::transcode::{ToolCommand, ToolRunner, ToolStage};

/// Writes plausible outputs for each tool stage instead of running anything.
#[derive(Default)]
pub struct FakeRunner {
    pub fail_stage: Option<ToolStage>,
    pub gate: Option<Arc<Notify>>,
    pub calls: Mutex<Vec<ToolCommand>>,
}

impl FakeRunner {
    pub fn failing_at(stage: ToolStage) -> Self {
        Self {
            fail_stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn stages(&self) -> Vec<ToolStage> {
        self.calls.lock().unwrap().iter().map(|c| c.stage).collect()
    }
}

#[async_trait]
impl ToolRunner for FakeRunner {
    async fn run(&self, command: &ToolCommand) -> Result<i32, PipelineError> {
        self.calls.lock().unwrap().push(command.clone());
        if command.stage == ToolStage::Fetch {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }
        if self.fail_stage == Some(command.stage) {
            if command.stage != ToolStage::Fetch {
                std::fs::write(command.args.last().unwrap(), "partial").unwrap();
            }
            return Ok(1);
        }

        let (output, content) = match command.stage {
            ToolStage::Fetch => {
                let template = PathBuf::from(&command.args[command.args.len() - 2]);
                let name = template
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .replace("%(ext)s", "webm");
                let url = command.args.last().unwrap().clone();
                (template.with_file_name(name), format!("source:{}", url))
            }
            _ => {
                let input = command
                    .args
                    .iter()
                    .position(|a| a == "-i")
                    .map(|i| PathBuf::from(&command.args[i + 1]))
                    .unwrap();
                let previous = std::fs::read_to_string(input).unwrap();
                let output = PathBuf::from(command.args.last().unwrap());
                (output, format!("{:?}({})", command.stage, previous))
            }
        };
        std::fs::write(output, content).unwrap();
        Ok(0)
    }
}

/// Player process that exits when terminated, force killed, or finished by the test.
pub struct FakeProcess {
    id: u32,
    ignore_terminate: bool,
    dead_tx: Arc<watch::Sender<bool>>,
    dead_rx: watch::Receiver<bool>,
    live: Arc<AtomicUsize>,
    exited: bool,
}

#[async_trait]
impl PlayerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.id)
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        if !self.ignore_terminate {
            self.dead_tx.send_replace(true);
        }
        Ok(())
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        loop {
            let dead = *self.dead_rx.borrow();
            if dead || self.dead_rx.changed().await.is_err() {
                break;
            }
        }
        if !self.exited {
            self.exited = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(Some(0))
    }
}

/// Launcher that records sources and hands out [`FakeProcess`]es.
#[derive(Default)]
pub struct FakeLauncher {
    pub ignore_terminate: bool,
    pub fail_launch: bool,
    pub launches: Mutex<Vec<String>>,
    pub force_kills: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    pub processes: Mutex<Vec<Arc<watch::Sender<bool>>>>,
}

impl FakeLauncher {
    pub fn stubborn() -> Self {
        Self {
            ignore_terminate: true,
            ..Self::default()
        }
    }

    pub fn launched(&self) -> Vec<String> {
        self.launches.lock().unwrap().clone()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Makes every running process exit on its own.
    pub fn finish_all(&self) {
        for tx in self.processes.lock().unwrap().iter() {
            tx.send_replace(true);
        }
    }
}

#[async_trait]
impl PlayerLauncher for FakeLauncher {
    fn launch(&self, source: &str) -> Result<Box<dyn PlayerProcess>, PlaybackError> {
        if self.fail_launch {
            return Err(PlaybackError::LaunchFailed {
                program: "fake".to_string(),
                message: "not installed".to_string(),
            });
        }
        let mut launches = self.launches.lock().unwrap();
        launches.push(source.to_string());

        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        self.processes.lock().unwrap().push(tx.clone());
        self.live.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeProcess {
            id: launches.len() as u32,
            ignore_terminate: self.ignore_terminate,
            dead_tx: tx,
            dead_rx: rx,
            live: self.live.clone(),
            exited: false,
        }))
    }

    async fn force_kill(&self) {
        self.force_kills.fetch_add(1, Ordering::SeqCst);
        self.finish_all();
    }
}

/// In-memory worker whose jobs finish as soon as they are polled.
pub struct FakeWorker {
    pub artifact: Vec<u8>,
    pub jobs: Mutex<HashMap<String, JobRecord>>,
    pub created: AtomicUsize,
    pub polls: AtomicUsize,
    pub downloads: AtomicUsize,
    /// When set, each download waits for one notification before writing.
    pub download_gate: Option<Arc<Notify>>,
}

impl FakeWorker {
    pub fn new(artifact: &[u8]) -> Self {
        Self {
            artifact: artifact.to_vec(),
            jobs: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            download_gate: None,
        }
    }

    pub fn with_download_gate(artifact: &[u8], gate: Arc<Notify>) -> Self {
        Self {
            download_gate: Some(gate),
            ..Self::new(artifact)
        }
    }

    pub fn artifact_hash(&self) -> String {
        sha256_hex(&self.artifact)
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.created.load(Ordering::SeqCst),
            self.polls.load(Ordering::SeqCst),
            self.downloads.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl WorkerApi for FakeWorker {
    async fn create_job(&self, request: &JobRequest) -> Result<JobRecord, ClientError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let job = JobRecord::new(&request.url, request.mirror_video, request.flip_video);
        self.jobs
            .lock()
            .unwrap()
            .insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, ClientError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(None);
        };
        job.status = JobStatus::Done;
        job.output_hash = Some(sha256_hex(&self.artifact));
        Ok(Some(job.clone()))
    }

    async fn download(&self, hash: &str, destination: &Path) -> Result<(), ClientError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.download_gate {
            gate.notified().await;
        }
        if hash != self.artifact_hash() {
            return Err(ClientError::ArtifactNotFound(hash.to_string()));
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(destination, &self.artifact).unwrap();
        Ok(())
    }
}

/// Stop policy short enough for tests.
pub fn quick_stop() -> StopPolicy {
    StopPolicy {
        poll_interval: Duration::from_millis(10),
        poll_attempts: 5,
        force_kill_grace: Duration::from_millis(10),
    }
}

/// Polls `condition` every 10ms for up to 5s.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
