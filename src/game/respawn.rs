//! Single-shot respawn timer
//!
//! The timer never touches session state itself: when the delay elapses it
//! posts `SessionCommand::RespawnElapsed` back into the session queue, so the
//! respawn is applied on the same serialized loop as every other mutation.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use super::SessionCommand;

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

/// At most one pending respawn per death
pub struct RespawnTimer {
    delay: Duration,
    pending: Option<Pending>,
    next_generation: u64,
}

impl RespawnTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            next_generation: 1,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Arm the timer. Returns the generation, or `None` if one is already pending.
    pub fn schedule(&mut self, commands: mpsc::WeakSender<SessionCommand>) -> Option<u64> {
        if self.pending.is_some() {
            return None;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let delay = self.delay;
        let task = tokio::spawn(async move {
            sleep(delay).await;
            match commands.upgrade() {
                Some(tx) => {
                    let _ = tx.send(SessionCommand::RespawnElapsed { generation }).await;
                }
                None => debug!(generation, "Session gone before respawn"),
            }
        });

        self.pending = Some(Pending { generation, task });
        Some(generation)
    }

    /// Accept an elapsed notification; true exactly once for the pending generation
    pub fn fire(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some(p) if p.generation == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Forget any pending respawn; used when the session itself ends
    pub fn reset(&mut self) {
        if let Some(p) = self.pending.take() {
            p.task.abort();
        }
    }
}

impl Drop for RespawnTimer {
    fn drop(&mut self) {
        self.reset();
    }
}
