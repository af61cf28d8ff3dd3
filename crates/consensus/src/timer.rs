//! The single cancellable tick source driving round timeouts.

use crate::service::ConsensusEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One delayed tick at a time. Scheduling cancels whatever was armed before,
/// so at most one tick is ever in flight; a tick that outlives its round is
/// discarded by the service's `(height, view)` guard.
pub struct ConsensusTimer {
    events: mpsc::UnboundedSender<ConsensusEvent>,
    task: Option<JoinHandle<()>>,
    target: Option<(u32, u8)>,
}

impl ConsensusTimer {
    /// Creates a timer posting ticks onto the service queue.
    pub fn new(events: mpsc::UnboundedSender<ConsensusEvent>) -> Self {
        Self {
            events,
            task: None,
            target: None,
        }
    }

    /// Arms a tick for `(height, view)` after `delay`, cancelling any tick
    /// armed earlier.
    pub fn schedule(&mut self, delay: Duration, height: u32, view: u8) {
        self.cancel();
        self.target = Some((height, view));
        let events = self.events.clone();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ConsensusEvent::Timer { height, view });
        }));
    }

    /// Cancels the armed tick, if any.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.target = None;
    }

    /// The `(height, view)` the armed tick will carry, if one is armed.
    pub fn target(&self) -> Option<(u32, u8)> {
        self.target
    }
}

impl Drop for ConsensusTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
