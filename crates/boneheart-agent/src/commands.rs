//! Single-letter keyboard commands read from stdin while the session runs.

use crate::session::SessionController;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const HELP_TEXT: &str =
    "Commands: 'p' = pause/resume, 'i' = idle mode, 'r' = restart, 'q' = quit, 'help' = this list";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TogglePause,
    ToggleIdle,
    Restart,
    Quit,
    Help,
}

impl Command {
    /// Parse one input line. Unknown input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "p" => Some(Self::TogglePause),
            "i" => Some(Self::ToggleIdle),
            "r" => Some(Self::Restart),
            "q" => Some(Self::Quit),
            "help" => Some(Self::Help),
            _ => None,
        }
    }
}

/// Read stdin lines on a plain thread so a blocked read never holds up runtime shutdown.
/// The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = thread::Builder::new()
        .name("boneheart-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Keyboard commands unavailable: {}", e);
    }
    rx
}

/// Apply commands until quit, end of input, or the session stops.
pub async fn run_command_loop(
    controller: Arc<SessionController>,
    mut lines: mpsc::UnboundedReceiver<io::Result<String>>,
) {
    info!("🏴‍☠️ Type 'p' + Enter to pause/resume, 'i' + Enter for idle mode, 'r' + Enter to restart, 'q' + Enter to quit");
    let mut quit = controller.quit_signal();

    while controller.is_running() {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = quit.changed() => break,
        };
        match line {
            Some(Ok(line)) => {
                if let Some(command) = Command::parse(&line) {
                    controller.handle_command(command).await;
                }
            }
            Some(Err(e)) => warn!("Input error: {}", e),
            None => {
                info!("Input closed, quitting...");
                controller.request_quit();
                break;
            }
        }
    }
}
