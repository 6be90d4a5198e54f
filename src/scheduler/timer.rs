//! Timer registrations backing RUNNING tasks.
//!
//! Every registration is a small Tokio task that sleeps until a firing is
//! due and then posts a [`TimerEvent`] to the scheduler's control loop.  The
//! callback itself never runs here; it runs wherever the events are
//! consumed (see [`super::Scheduler::fire`]).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, trace};

/// "Fire task X now", as produced by a timer registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub task_id: String,
    /// Registration generation; events from a cancelled registration are
    /// discarded by the scheduler.
    pub generation: u64,
}

/// Receiving half of the timer event channel, consumed by the control loop.
pub type TimerEvents = mpsc::UnboundedReceiver<TimerEvent>;

/// A live timer.  Dropping the registration cancels it.
pub(crate) struct TimerRegistration {
    pub generation: u64,
    _guard: DropGuard,
}

impl std::fmt::Debug for TimerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistration")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Register a repeating timer: first firing after `first`, then every
/// `period`.  Must be called from within a Tokio runtime.
pub(crate) fn periodic(
    task_id: &str,
    generation: u64,
    first: Duration,
    period: Duration,
    tx: mpsc::UnboundedSender<TimerEvent>,
) -> TimerRegistration {
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let task_id = task_id.to_string();

    let Some(start) = Instant::now().checked_add(first) else {
        error!(task_id = %task_id, ?first, "first firing is out of range, timer not armed");
        return TimerRegistration {
            generation,
            _guard: token.drop_guard(),
        };
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(start, period);
        // A firing that comes due while the previous one is still queued is
        // delivered late rather than skipped.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {
                    trace!(task_id = %task_id, generation, "periodic timer elapsed");
                    let event = TimerEvent { task_id: task_id.clone(), generation };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }
        }
    });

    TimerRegistration {
        generation,
        _guard: token.drop_guard(),
    }
}

/// Register a single-shot timer firing after `after`.
pub(crate) fn once(
    task_id: &str,
    generation: u64,
    after: Duration,
    tx: mpsc::UnboundedSender<TimerEvent>,
) -> TimerRegistration {
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let task_id = task_id.to_string();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancelled.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                trace!(task_id = %task_id, generation, "one-shot timer elapsed");
                let _ = tx.send(TimerEvent { task_id, generation });
            }
        }
    });

    TimerRegistration {
        generation,
        _guard: token.drop_guard(),
    }
}
