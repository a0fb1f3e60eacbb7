//! Bounded capture of process output.
//!
//! Each piped stream gets a reader thread that forwards lines to the `log`
//! facade and keeps the most recent ones for diagnostics.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Ring buffer of output lines shared with reader threads.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    lines: Arc<Mutex<VecDeque<String>>>,
    limit: usize,
}

impl OutputCapture {
    /// Keep at most `limit` lines.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(limit.min(64)))),
            limit: limit.max(1),
        }
    }

    /// Start a thread copying `stream` into the buffer line by line.
    ///
    /// The thread ends when the stream closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn follow<R>(&self, stream: R, label: &'static str) -> std::io::Result<JoinHandle<()>>
    where
        R: Read + Send + 'static,
    {
        let capture = self.clone();
        thread::Builder::new()
            .name(format!("mongod-{label}"))
            .spawn(move || {
                for line in BufReader::new(stream).lines() {
                    match line {
                        Ok(line) => capture.push(label, line),
                        Err(e) => {
                            log::trace!("stopped reading mongod {label}: {e}");
                            break;
                        }
                    }
                }
            })
    }

    /// Return the retained lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.buffer().iter().cloned().collect()
    }

    fn push(&self, label: &str, line: String) {
        log::debug!("[mongod {label}] {line}");
        let mut buffer = self.buffer();
        if buffer.len() == self.limit {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
