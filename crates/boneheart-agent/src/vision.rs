//! Photo → description of whoever is standing in front of the throne.
//!
//! The camera and the vision model are untrusted for hangs, so [`PhotoRefresher`] runs
//! each capture in its own task, waits on a one-shot channel with a timeout and then
//! aborts the worker. [`ProcessVision`] moves the capture into a child process that is
//! killed when the worker is aborted.

use crate::error::{AgentError, AgentResult};
use crate::llm::{ChatClient, ChatMessage};
use crate::responder::with_retry;
use crate::state::SessionState;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Requested intervals below this are raised to it.
pub const MIN_PHOTO_INTERVAL: Duration = Duration::from_secs(10);

const SLEEP_SLICE: Duration = Duration::from_secs(1);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Captures a photo and describes the people in it. May hang or fail.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn capture_and_describe(&self) -> AgentResult<String>;
}

/// Webcam command + vision model, in-process. This is what the `describe` worker runs.
pub struct CameraVision {
    client: ChatClient,
    prompt: String,
    capture_argv: Vec<String>,
}

impl CameraVision {
    pub fn new(client: ChatClient, prompt: impl Into<String>, capture_argv: Vec<String>) -> Self {
        Self {
            client,
            prompt: prompt.into(),
            capture_argv,
        }
    }

    /// Run the capture command and return the JPEG it writes to stdout.
    pub async fn capture_jpeg(&self) -> AgentResult<Vec<u8>> {
        let (program, args) = self
            .capture_argv
            .split_first()
            .ok_or_else(|| AgentError::Vision("capture command is empty".to_string()))?;
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(AgentError::Vision(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(AgentError::Vision(format!("{} produced no image", program)));
        }
        debug!(bytes = output.stdout.len(), "📸 Photo captured");
        Ok(output.stdout)
    }
}

#[async_trait]
impl VisionAnalyzer for CameraVision {
    async fn capture_and_describe(&self) -> AgentResult<String> {
        let jpeg = self.capture_jpeg().await?;
        let messages = [ChatMessage::user_with_image(&self.prompt, &jpeg)];
        with_retry("Image analysis", || self.client.complete(&messages)).await
    }
}

/// Runs the vision call in a child process (`<this binary> describe`).
pub struct ProcessVision {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessVision {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-invoke the running executable with the `describe` subcommand.
    pub fn current_exe() -> AgentResult<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["describe".to_string()]))
    }
}

#[async_trait]
impl VisionAnalyzer for ProcessVision {
    async fn capture_and_describe(&self) -> AgentResult<String> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(AgentError::Vision(format!("vision worker exited with {}", output.status)));
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(AgentError::Vision("vision worker returned nothing".to_string()));
        }
        Ok(text)
    }
}

/// Latest description of the user. Last write wins.
#[derive(Clone, Default)]
pub struct UserDescription {
    inner: Arc<RwLock<String>>,
}

impl UserDescription {
    pub fn get(&self) -> String {
        self.inner.read().clone()
    }

    pub fn set(&self, text: impl Into<String>) {
        *self.inner.write() = text.into();
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Raise `requested` to [`MIN_PHOTO_INTERVAL`] if it is below it.
pub fn clamp_interval(requested: Duration) -> Duration {
    requested.max(MIN_PHOTO_INTERVAL)
}

/// One capture with a bounded wait. On success the description is replaced; on failure
/// or timeout it is left as it was. Returns whether it was updated.
pub async fn refresh_once(
    analyzer: Arc<dyn VisionAnalyzer>,
    description: &UserDescription,
    timeout: Duration,
) -> bool {
    debug!("📸 Taking updated photo for user description");
    let (tx, rx) = oneshot::channel();
    let worker = tokio::spawn(async move {
        let _ = tx.send(analyzer.capture_and_describe().await);
    });

    let updated = match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Ok(text))) => {
            info!("📸 Updated user description: {}", preview(&text));
            description.set(text);
            true
        }
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "📸 Photo update failed - keeping previous description");
            false
        }
        Ok(Err(_)) => {
            warn!("📸 Photo worker ended without a result - keeping previous description");
            false
        }
        Err(_) => {
            warn!("📸 Photo update timed out after {:?} - keeping previous description", timeout);
            false
        }
    };
    worker.abort();
    updated
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(50).collect();
    if head.len() < text.len() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Periodic photo refresh. Starts lazily on the first handled transcript; does not tick
/// while the session is idle.
pub struct PhotoRefresher {
    analyzer: Arc<dyn VisionAnalyzer>,
    description: UserDescription,
    session: SessionState,
    interval: Arc<Mutex<Duration>>,
    timeout: Duration,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl PhotoRefresher {
    pub fn new(
        analyzer: Arc<dyn VisionAnalyzer>,
        description: UserDescription,
        session: SessionState,
        interval: Duration,
        timeout: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            analyzer,
            description,
            session,
            interval: Arc::new(Mutex::new(clamp_interval(interval))),
            timeout,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            runtime,
        }
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Set the refresh period; values below 10s become 10s. Returns the effective value.
    pub fn set_interval(&self, requested: Duration) -> Duration {
        let effective = clamp_interval(requested);
        *self.interval.lock() = effective;
        info!("📸 Photo update interval set to {:?}", effective);
        effective
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the loop if it is not already running. Takes a photo immediately.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let task = self.runtime.spawn(photo_loop(
            Arc::clone(&self.analyzer),
            self.description.clone(),
            self.session.clone(),
            Arc::clone(&self.interval),
            self.timeout,
            Arc::clone(&self.running),
        ));
        *self.task.lock() = Some(task);
        info!("📸 Started photo updates every {:?}", self.interval());
    }

    /// Stop the loop, waiting briefly for it to exit.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(STOP_TIMEOUT, task).await.is_err() {
                warn!("📸 Photo loop did not exit within {:?}; abandoning it", STOP_TIMEOUT);
            }
        }
        if was_running {
            info!("📸 Stopped photo updates");
        }
    }
}

async fn photo_loop(
    analyzer: Arc<dyn VisionAnalyzer>,
    description: UserDescription,
    session: SessionState,
    interval: Arc<Mutex<Duration>>,
    timeout: Duration,
    running: Arc<AtomicBool>,
) {
    let active = |running: &AtomicBool| running.load(Ordering::SeqCst) && session.is_running();

    refresh_once(Arc::clone(&analyzer), &description, timeout).await;

    while active(&running) {
        let mut slept = Duration::ZERO;
        while slept < current(&interval) && active(&running) {
            tokio::time::sleep(SLEEP_SLICE).await;
            slept += SLEEP_SLICE;
        }
        if active(&running) && !session.is_idle() {
            refresh_once(Arc::clone(&analyzer), &description, timeout).await;
        }
    }
    debug!("Photo loop exited");
}

fn current(interval: &Mutex<Duration>) -> Duration {
    *interval.lock()
}
