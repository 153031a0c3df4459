//! **AudioOutput**: the rodio playback subsystem.
//!
//! `rodio::OutputStream` is !Send, so a dedicated thread owns it for the lifetime of the
//! subsystem; callers only ever hold the `OutputStreamHandle` and the sinks built from it.

use crate::error::{VoiceError, VoiceResult};
use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Plays a synthesized reply to completion.
pub trait SpeechPlayer: Send + Sync {
    /// Decode and play `audio`, blocking until it finishes.
    fn play(&self, audio: &[u8]) -> VoiceResult<()>;
}

/// Starts, polls and stops one ambient clip at a time.
pub trait ClipPlayer: Send + Sync {
    /// Begin playing `path`, replacing any clip already playing.
    fn start(&self, path: &Path) -> VoiceResult<()>;

    /// Whether the current clip is still playing.
    fn is_busy(&self) -> bool;

    /// Halt the current clip, if any.
    fn stop(&self) -> VoiceResult<()>;
}

/// Default output device, shared by speech playback and idle clips.
pub struct AudioOutput {
    handle: Mutex<Option<OutputStreamHandle>>,
    clip: Mutex<Option<Sink>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AudioOutput {
    /// Open the default output device.
    pub fn new() -> VoiceResult<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<OutputStreamHandle>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let worker = thread::Builder::new()
            .name("boneheart-output".to_string())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(handle));
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("output thread exiting");
            })?;

        match ready_rx.recv() {
            Ok(Ok(handle)) => {
                info!("🔊 Audio output ready");
                Ok(Self {
                    handle: Mutex::new(Some(handle)),
                    clip: Mutex::new(None),
                    shutdown_tx: Mutex::new(Some(shutdown_tx)),
                    worker: Mutex::new(Some(worker)),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::Playback(
                "output thread exited before the device opened".to_string(),
            )),
        }
    }

    fn new_sink(&self) -> VoiceResult<Sink> {
        let guard = self.handle.lock();
        let handle = guard
            .as_ref()
            .ok_or_else(|| VoiceError::Playback("audio output terminated".to_string()))?;
        Sink::try_new(handle).map_err(|e| VoiceError::Playback(e.to_string()))
    }

    pub fn is_terminated(&self) -> bool {
        self.handle.lock().is_none()
    }

    /// Stop all playback and release the device. Safe to call more than once.
    pub fn terminate(&self) {
        if let Some(sink) = self.clip.lock().take() {
            sink.stop();
        }
        let had_handle = self.handle.lock().take().is_some();
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("output thread panicked during shutdown");
            }
        }
        if had_handle {
            info!("Audio output terminated");
        }
    }
}

impl SpeechPlayer for AudioOutput {
    fn play(&self, audio: &[u8]) -> VoiceResult<()> {
        if audio.is_empty() {
            return Ok(());
        }
        let source = Decoder::new(Cursor::new(audio.to_vec()))
            .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
        let sink = self.new_sink()?;
        sink.append(source.convert_samples::<f32>());
        sink.sleep_until_end();
        Ok(())
    }
}

impl ClipPlayer for AudioOutput {
    fn start(&self, path: &Path) -> VoiceResult<()> {
        let file = File::open(path)?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| VoiceError::Playback(format!("{}: {}", path.display(), e)))?;
        let sink = self.new_sink()?;
        sink.append(source.convert_samples::<f32>());
        if let Some(previous) = self.clip.lock().replace(sink) {
            previous.stop();
        }
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.clip.lock().as_ref().map(|s| !s.empty()).unwrap_or(false)
    }

    fn stop(&self) -> VoiceResult<()> {
        if let Some(sink) = self.clip.lock().take() {
            sink.stop();
        }
        Ok(())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires an audio output device"]
    fn terminate_twice_is_safe() {
        let output = AudioOutput::new().unwrap();
        output.terminate();
        output.terminate();
        assert!(output.is_terminated());
        assert!(!output.is_busy());
        assert!(output.new_sink().is_err());
    }

    #[test]
    #[ignore = "requires an audio output device"]
    fn empty_speech_is_a_no_op() {
        let output = AudioOutput::new().unwrap();
        output.play(&[]).unwrap();
    }
}
