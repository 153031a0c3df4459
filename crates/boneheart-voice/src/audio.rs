//! Microphone capture: a cpal input device feeding a mutable, amplitude-gated chunk source.
//!
//! The transcription session pulls fixed-size chunks of 16-bit little-endian PCM from
//! [`MutableMicStream`]. Muting swaps the output for silence without stopping the device,
//! so the capture buffer keeps draining while the agent is paused or idle.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Length of one chunk handed to the transcription session.
pub const CHUNK_DURATION_MS: u32 = 50;

/// Buffers queued between the cpal callback and the reader before new audio is dropped.
const CAPTURE_QUEUE_DEPTH: usize = 256;

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Peak absolute sample value below which a chunk is replaced by silence (default: 500)
    pub threshold: u16,

    /// Longest a single chunk read may wait on the device before it is zero-padded
    pub read_timeout: Duration,

    /// Input device name; `None` uses the host default
    pub device_name: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            threshold: 500,
            read_timeout: Duration::from_millis(200),
            device_name: None,
        }
    }
}

impl AudioConfig {
    /// Samples per chunk (800 at 16 kHz).
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as usize * CHUNK_DURATION_MS as usize) / 1000
    }

    /// Bytes per chunk; every chunk emitted downstream has exactly this length.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * 2
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(CHUNK_DURATION_MS as u64)
    }
}

/// A source of mono 16-bit samples. Implemented by [`CpalCapture`] and by test doubles.
pub trait CaptureDevice: Send {
    /// Fill `buf` with up to `buf.len()` samples, waiting at most `timeout`.
    /// Returns the number of samples written; a short count is not an error.
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> VoiceResult<usize>;

    /// Stop capture and release the device. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Capture from a cpal input device.
///
/// The cpal `Stream` is !Send on some platforms, so it lives on a dedicated thread that
/// only keeps it alive; samples cross over through a bounded channel.
pub struct CpalCapture {
    sample_rx: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalCapture {
    /// Open the configured (or default) input device. Fails if no device can be opened.
    pub fn open(config: &AudioConfig) -> VoiceResult<Self> {
        info!(
            "🎤 Initializing audio capture ({}Hz, mono, {}ms chunks)",
            config.sample_rate, CHUNK_DURATION_MS
        );

        let (sample_tx, sample_rx) = mpsc::sync_channel::<Vec<i16>>(CAPTURE_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let config = config.clone();

        let worker = thread::Builder::new()
            .name("boneheart-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(&config, sample_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Blocks until close() signals or the capture handle is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("capture thread exiting");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("✅ Audio capture started");
                Ok(Self {
                    sample_rx,
                    pending: VecDeque::new(),
                    shutdown_tx: Some(shutdown_tx),
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::AudioDevice(
                "capture thread exited before the stream started".to_string(),
            )),
        }
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

fn build_input_stream(config: &AudioConfig, sample_tx: SyncSender<Vec<i16>>) -> VoiceResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = match config.device_name.as_deref() {
        Some(wanted) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| VoiceError::AudioDevice(format!("Input device not found: {}", wanted)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?,
    };

    info!("📱 Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let samples: Vec<i16> = data
                .iter()
                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .collect();
            if let Err(TrySendError::Full(_)) = sample_tx.try_send(samples) {
                debug!("capture queue full, dropping buffer");
            }
        },
        move |err| {
            warn!("Audio stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}

impl CaptureDevice for CpalCapture {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> VoiceResult<usize> {
        let deadline = Instant::now() + timeout;
        while self.pending.len() < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.sample_rx.recv_timeout(remaining) {
                Ok(samples) => self.pending.extend(samples),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VoiceError::AudioStream("capture stream disconnected".to_string()));
                }
            }
        }

        let n = self.pending.len().min(buf.len());
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }

    fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

struct MicInner {
    device: Mutex<Option<Box<dyn CaptureDevice>>>,
    muted: AtomicBool,
    open: AtomicBool,
    threshold: u16,
    chunk_samples: usize,
    chunk_duration: Duration,
    read_timeout: Duration,
}

/// A controllable microphone chunk source.
///
/// Clones share the same device and flags, so the controller can mute or close the
/// stream while the transcription session is iterating over it on another thread.
#[derive(Clone)]
pub struct MutableMicStream {
    inner: Arc<MicInner>,
}

impl MutableMicStream {
    /// Open the microphone described by `config`. Device failures are fatal to the caller.
    pub fn open(config: &AudioConfig) -> VoiceResult<Self> {
        let device = CpalCapture::open(config)?;
        Ok(Self::with_device(Box::new(device), config))
    }

    /// Wrap an already-open capture device.
    pub fn with_device(device: Box<dyn CaptureDevice>, config: &AudioConfig) -> Self {
        Self {
            inner: Arc::new(MicInner {
                device: Mutex::new(Some(device)),
                muted: AtomicBool::new(false),
                open: AtomicBool::new(true),
                threshold: config.threshold,
                chunk_samples: config.chunk_samples(),
                chunk_duration: config.chunk_duration(),
                read_timeout: config.read_timeout,
            }),
        }
    }

    /// Pull the next chunk. `None` means the stream was closed.
    ///
    /// Always performs the device read, even while muted, so the capture queue drains.
    pub fn next_chunk(&self) -> Option<Vec<u8>> {
        if !self.is_open() {
            return None;
        }

        let mut samples = vec![0i16; self.inner.chunk_samples];
        let read = {
            let mut guard = self.inner.device.lock();
            let device = guard.as_mut()?;
            device.read(&mut samples, self.inner.read_timeout)
        };

        if !self.is_open() {
            return None;
        }

        match read {
            Ok(n) if n < samples.len() => {
                debug!("short read ({} of {} samples), zero-padding", n, samples.len());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Microphone read failed, substituting silence: {}", e);
                // Hold the chunk cadence so a dead device does not spin the session loop.
                thread::sleep(self.inner.chunk_duration);
                return Some(self.silence());
            }
        }

        if self.is_muted() {
            return Some(self.silence());
        }

        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        if peak < self.inner.threshold {
            return Some(self.silence());
        }

        Some(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
    }

    fn silence(&self) -> Vec<u8> {
        vec![0u8; self.inner.chunk_samples * 2]
    }

    /// Mute the microphone (produce silence)
    pub fn mute(&self) {
        self.inner.muted.store(true, Ordering::SeqCst);
        info!("Microphone muted");
    }

    /// Unmute the microphone
    pub fn unmute(&self) {
        self.inner.muted.store(false, Ordering::SeqCst);
        info!("Microphone unmuted");
    }

    /// Toggle between mute and unmute
    pub fn toggle_mute(&self) {
        if self.is_muted() {
            self.unmute();
        } else {
            self.mute();
        }
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Byte length of every emitted chunk.
    pub fn chunk_bytes(&self) -> usize {
        self.inner.chunk_samples * 2
    }

    /// Stop capture and release the device. Safe to call any number of times.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
        let device = self.inner.device.lock().take();
        if let Some(mut device) = device {
            device.close();
            info!("Microphone closed");
        }
    }
}

impl Iterator for MutableMicStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}
