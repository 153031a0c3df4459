//! Idle mode: ambient clips played at random intervals while nobody is talking to the skull.

use crate::error::{VoiceError, VoiceResult};
use crate::playback::ClipPlayer;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Extensions picked up from the idle audio directory.
pub const IDLE_AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg", "m4a"];

/// Stop requests are noticed within one slice while waiting between clips.
const SLEEP_SLICE: Duration = Duration::from_millis(500);
/// Poll period while a clip is playing.
const PLAYBACK_POLL: Duration = Duration::from_millis(100);
/// How long `stop` waits for the loop before abandoning it.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct IdleConfig {
    pub audio_dir: PathBuf,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("idle_audio"),
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
        }
    }
}

/// The clips available to idle mode. Discovered once; never rescanned.
#[derive(Debug, Clone, Default)]
pub struct IdleLibrary {
    files: Vec<PathBuf>,
}

impl IdleLibrary {
    /// Scan `dir` for audio files, creating the directory if it does not exist.
    pub fn discover(dir: &Path) -> Self {
        if !dir.exists() {
            match std::fs::create_dir_all(dir) {
                Ok(()) => info!(
                    "Created idle audio directory {}; add audio files there for idle mode",
                    dir.display()
                ),
                Err(e) => warn!("Could not create idle audio directory {}: {}", dir.display(), e),
            }
            return Self::default();
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read idle audio directory {}: {}", dir.display(), e);
                return Self::default();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_idle_audio(path))
            .collect();
        files.sort();
        info!("🎵 Found {} idle audio file(s) in {}", files.len(), dir.display());
        Self { files }
    }

    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Add a clip after discovery. The file must exist.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> VoiceResult<()> {
        let path = path.into();
        if !path.is_file() {
            return Err(VoiceError::Config(format!(
                "idle audio file not found: {}",
                path.display()
            )));
        }
        info!("Added idle audio file {}", path.display());
        self.files.push(path);
        Ok(())
    }

    /// Pick one clip uniformly at random.
    pub fn choose(&self) -> Option<PathBuf> {
        self.files.choose(&mut rand::thread_rng()).cloned()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_idle_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            IDLE_AUDIO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    min: Duration,
    max: Duration,
}

impl Timing {
    fn new(a: Duration, b: Duration) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    fn pick(&self) -> Duration {
        let min = saturating_millis(self.min);
        let max = saturating_millis(self.max);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Background scheduler for idle clips. STOPPED until `start`, ACTIVE until `stop`.
pub struct IdlePlayer {
    library: Arc<RwLock<IdleLibrary>>,
    timing: Arc<Mutex<Timing>>,
    player: Option<Arc<dyn ClipPlayer>>,
    active: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl IdlePlayer {
    /// Build from config, scanning the audio directory. `player` is `None` when the
    /// playback subsystem failed to initialise.
    pub fn new(config: &IdleConfig, player: Option<Arc<dyn ClipPlayer>>, runtime: Handle) -> Self {
        let library = IdleLibrary::discover(&config.audio_dir);
        Self::with_library(library, config, player, runtime)
    }

    pub fn with_library(
        library: IdleLibrary,
        config: &IdleConfig,
        player: Option<Arc<dyn ClipPlayer>>,
        runtime: Handle,
    ) -> Self {
        Self {
            library: Arc::new(RwLock::new(library)),
            timing: Arc::new(Mutex::new(Timing::new(config.min_interval, config.max_interval))),
            player,
            active: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            runtime,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn library_len(&self) -> usize {
        self.library.read().len()
    }

    pub fn add_file(&self, path: impl Into<PathBuf>) -> VoiceResult<()> {
        self.library.write().add_file(path)
    }

    /// Change the interval range. Takes effect from the next wait.
    pub fn set_timing(&self, min: Duration, max: Duration) {
        let timing = Timing::new(min, max);
        *self.timing.lock() = timing;
        info!("Idle timing set to {:?}..={:?}", timing.min, timing.max);
    }

    pub fn timing(&self) -> (Duration, Duration) {
        let t = *self.timing.lock();
        (t.min, t.max)
    }

    /// Begin idle playback. Without a playback backend this only logs.
    pub fn start(&self) {
        let Some(player) = self.player.clone() else {
            warn!("Idle mode unavailable: audio output is not initialised");
            return;
        };
        if self.active.swap(true, Ordering::SeqCst) {
            debug!("Idle player already active");
            return;
        }
        if self.library.read().is_empty() {
            warn!("No idle audio files available; idle mode will stay quiet");
        }

        let task = self.runtime.spawn(idle_loop(
            Arc::clone(&self.active),
            Arc::clone(&self.library),
            Arc::clone(&self.timing),
            player,
        ));
        if let Some(stale) = self.task.lock().replace(task) {
            stale.abort();
        }
        info!("💤 Idle mode started");
    }

    /// Stop idle playback and wait briefly for the loop to exit.
    pub async fn stop(&self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if let Some(player) = &self.player {
            if let Err(e) = player.stop() {
                debug!("Ignoring idle playback stop error: {}", e);
            }
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(STOP_TIMEOUT, task).await.is_err() {
                warn!("Idle loop did not exit within {:?}; abandoning it", STOP_TIMEOUT);
            }
        }
        if was_active {
            info!("Idle mode stopped");
        }
    }
}

async fn idle_loop(
    active: Arc<AtomicBool>,
    library: Arc<RwLock<IdleLibrary>>,
    timing: Arc<Mutex<Timing>>,
    player: Arc<dyn ClipPlayer>,
) {
    while active.load(Ordering::SeqCst) {
        let wait = timing.lock().pick();
        debug!("Next idle clip in {:?}", wait);
        if !sleep_while_active(&active, wait).await {
            break;
        }

        let Some(clip) = library.read().choose() else {
            continue;
        };
        info!("🎵 Playing idle clip {}", clip.display());
        if let Err(e) = player.start(&clip) {
            warn!("Idle clip {} failed: {}", clip.display(), e);
            continue;
        }
        while player.is_busy() {
            if !active.load(Ordering::SeqCst) {
                let _ = player.stop();
                break;
            }
            tokio::time::sleep(PLAYBACK_POLL).await;
        }
    }
    debug!("Idle loop exited");
}

/// Sleep for `total` in slices. Returns `false` if deactivated before it elapsed.
async fn sleep_while_active(active: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if !active.load(Ordering::SeqCst) {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        tokio::time::sleep(slice).await;
        remaining -= slice;
    }
    active.load(Ordering::SeqCst)
}
