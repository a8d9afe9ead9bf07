use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::TodoState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Celebration {
    /// A single task was completed.
    Confetti,
    /// The last open task was completed.
    Grand,
}

/// What a toggle did, measured against the post-mutation collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleEffect {
    pub completing: bool,
    pub all_completed: bool,
}

impl ToggleEffect {
    pub fn after_toggle(state: &TodoState, now_completed: bool) -> Self {
        Self {
            completing: now_completed,
            all_completed: now_completed && state.all_completed(),
        }
    }
}

/// Sends celebrations to the front end. The grand celebration is delayed and
/// can be cancelled until it fires; dropping the scheduler cancels it too.
pub struct CelebrationScheduler {
    tx: Option<mpsc::UnboundedSender<Celebration>>,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl CelebrationScheduler {
    pub fn new(tx: mpsc::UnboundedSender<Celebration>, delay: Duration) -> Self {
        Self {
            tx: Some(tx),
            delay,
            pending: Mutex::new(None),
        }
    }

    /// A scheduler that drops every celebration.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            delay: Duration::ZERO,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn on_toggle(&self, effect: ToggleEffect) {
        if !effect.completing {
            self.cancel();
            return;
        }
        self.emit(Celebration::Confetti);
        if effect.all_completed {
            self.schedule_grand();
        }
    }

    fn emit(&self, celebration: Celebration) {
        if let Some(tx) = &self.tx
            && tx.send(celebration).is_err()
        {
            debug!(?celebration, "celebration receiver gone");
        }
    }

    fn schedule_grand(&self) {
        let Some(tx) = self.tx.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; skipping delayed celebration");
            return;
        };

        let delay = self.delay;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Celebration::Grand);
        });

        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
        debug!(delay_ms = delay.as_millis() as u64, "grand celebration scheduled");
    }

    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
            debug!("pending grand celebration cancelled");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Waits for a scheduled celebration to fire. Used before process exit.
    pub async fn settle(&self) {
        let handle = self.pending.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for CelebrationScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}
