//! Session mode shared by the command loop, the transcript handler and the photo loop.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exactly one mode is active. `Paused` and `Idle` both mean the microphone is muted and
/// transcripts are ignored; only `Idle` plays ambient clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Running,
    Paused,
    Idle,
}

struct StateInner {
    mode: Mutex<Mode>,
    running: AtomicBool,
}

/// Cloneable handle to the session's mode and run flag. Transitions are check-and-set.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<StateInner>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                mode: Mutex::new(Mode::Running),
                running: AtomicBool::new(true),
            }),
        }
    }

    pub fn mode(&self) -> Mode {
        *self.inner.mode.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.mode() == Mode::Idle
    }

    /// Transcripts are handled only while running and not paused or idle.
    pub fn accepts_transcripts(&self) -> bool {
        self.is_running() && self.mode() == Mode::Running
    }

    /// Move `from` → `to` if the mode is still `from`.
    pub fn transition(&self, from: Mode, to: Mode) -> bool {
        let mut mode = self.inner.mode.lock();
        if *mode != from {
            return false;
        }
        *mode = to;
        true
    }

    /// Running ↔ Paused. Returns the new mode, or `None` while idle.
    pub fn toggle_pause(&self) -> Option<Mode> {
        let mut mode = self.inner.mode.lock();
        let next = match *mode {
            Mode::Running => Mode::Paused,
            Mode::Paused => Mode::Running,
            Mode::Idle => return None,
        };
        *mode = next;
        Some(next)
    }

    /// Enter idle from Running or Paused. `false` if already idle.
    pub fn enter_idle(&self) -> bool {
        let mut mode = self.inner.mode.lock();
        if *mode == Mode::Idle {
            return false;
        }
        *mode = Mode::Idle;
        true
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Mark the session terminated. Returns `true` only for the first call.
    pub fn request_quit(&self) -> bool {
        self.inner.running.swap(false, Ordering::SeqCst)
    }
}
