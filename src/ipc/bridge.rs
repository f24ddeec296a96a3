//! Cross-thread bridge between the transport thread and the host context.
//!
//! Work is marshalled as [`HostTask`] values over a channel drained by the
//! host loop. Most tasks are fire-and-forget: the response only confirms the
//! task was accepted, not that it has run. Selection reads are the exception:
//! the caller blocks on a completion slot with a short poll step and a hard
//! timeout, falling back to an empty string if the host never answers.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::history::Which;

/// Completion slot for the one synchronous cross-thread read.
pub type ReplySlot = Arc<Mutex<Option<String>>>;

/// Default bound on how long a selection read may block the caller.
pub const READ_TIMEOUT: Duration = Duration::from_millis(1000);
const POLL_STEP: Duration = Duration::from_millis(10);

/// A unit of work destined for the host context.
#[derive(Debug)]
pub enum HostTask {
    PresentWindow,
    SetSelection { which: Which, text: String },
    ReadSelection { which: Which, reply: ReplySlot },
}

/// Handle used by the dispatcher to move work into the host loop.
#[derive(Debug, Clone)]
pub struct UiBridge {
    tx: Sender<HostTask>,
}

impl UiBridge {
    pub fn channel() -> (UiBridge, Receiver<HostTask>) {
        let (tx, rx) = mpsc::channel();
        (UiBridge { tx }, rx)
    }

    /// Queue a task without waiting for it to run. Returns false when the
    /// host loop is gone.
    pub fn enqueue(&self, task: HostTask) -> bool {
        self.tx.send(task).is_ok()
    }

    /// Read the current text of a selection from the host context, blocking
    /// the calling thread up to [`READ_TIMEOUT`].
    pub fn read_selection(&self, which: Which) -> String {
        self.read_selection_with_timeout(which, READ_TIMEOUT)
    }

    pub fn read_selection_with_timeout(&self, which: Which, timeout: Duration) -> String {
        let reply: ReplySlot = Arc::new(Mutex::new(None));
        let task = HostTask::ReadSelection {
            which,
            reply: reply.clone(),
        };
        if !self.enqueue(task) {
            return String::new();
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(text) = reply.lock().unwrap().take() {
                return text;
            }
            if Instant::now() >= deadline {
                return String::new();
            }
            thread::sleep(POLL_STEP);
        }
    }
}
