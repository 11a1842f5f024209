//! Line input from stdin on a worker thread.
//!
//! The worker forwards lines over a channel. While a recording is armed, an
//! `s` line stops the recorder directly instead of being forwarded, since
//! the main thread is busy inside the recorder.

use ecoface_core::StopHandle;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;

pub struct Input {
    lines: async_channel::Receiver<String>,
    recording: Arc<Mutex<Option<StopHandle>>>,
}

impl Input {
    pub fn spawn() -> Self {
        let (tx, rx) = async_channel::unbounded::<String>();
        let recording: Arc<Mutex<Option<StopHandle>>> = Arc::new(Mutex::new(None));
        let armed = recording.clone();

        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("s") {
                    let handle = armed.lock().ok().and_then(|guard| guard.clone());
                    if let Some(handle) = handle {
                        handle.stop();
                        continue;
                    }
                }
                if tx.send_blocking(line).is_err() {
                    break;
                }
            }
        });

        Self { lines: rx, recording }
    }

    /// Print `text` and wait for a line. `None` once stdin is closed.
    pub fn prompt(&self, text: &str) -> Option<String> {
        print!("{} ", text);
        let _ = std::io::stdout().flush();
        self.lines.recv_blocking().ok().map(|line| line.trim().to_string())
    }

    /// Prompt with a default shown in brackets; an empty answer keeps it.
    pub fn prompt_default(&self, label: &str, current: &str) -> Option<String> {
        let answer = self.prompt(&format!("{} [{}]:", label, current))?;
        Some(if answer.is_empty() { current.to_string() } else { answer })
    }

    pub fn confirm(&self, question: &str) -> bool {
        matches!(
            self.prompt(&format!("{} [y/N]", question)).as_deref(),
            Some("y") | Some("Y") | Some("yes")
        )
    }

    /// Route `s` to `handle` until [`disarm`](Self::disarm).
    pub fn arm(&self, handle: StopHandle) {
        if let Ok(mut guard) = self.recording.lock() {
            *guard = Some(handle);
        }
    }

    pub fn disarm(&self) {
        if let Ok(mut guard) = self.recording.lock() {
            *guard = None;
        }
    }
}
