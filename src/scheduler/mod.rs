//! Background task scheduler.
//!
//! The [`Scheduler`] owns every [`ScheduledTask`] record and drives its
//! lifecycle:
//!
//! ```text
//! PENDING ─start─▶ RUNNING ─pause─▶ PAUSED ─resume─▶ RUNNING
//!                     │
//!                     ├─stop──────▶ STOPPED
//!                     ├─max_runs──▶ COMPLETED
//!                     └─error─────▶ FAILED
//! ```
//!
//! Timers never call back into task code directly.  Each RUNNING task holds
//! exactly one timer registration which posts [`TimerEvent`]s onto a channel;
//! whoever owns the receiving end (normally the bot's control loop, or
//! [`spawn_driver`]) hands them to [`Scheduler::fire`].  Registrations carry
//! a generation number so that an event already in flight when a task is
//! stopped, paused or removed is ignored.

mod timer;

pub use timer::{TimerEvent, TimerEvents};

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use timer::TimerRegistration;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A task body.  Arguments are bound at schedule time by capture.
pub type TaskCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Longest interval or delay a task may be given.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Paused => "PAUSED",
            TaskState::Stopped => "STOPPED",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskState::Pending),
            "RUNNING" => Ok(TaskState::Running),
            "PAUSED" => Ok(TaskState::Paused),
            "STOPPED" => Ok(TaskState::Stopped),
            "COMPLETED" => Ok(TaskState::Completed),
            "FAILED" => Ok(TaskState::Failed),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// Errors returned by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid task `{name}`: {reason}")]
    Validation { name: String, reason: String },
    #[error("task {0} not found")]
    NotFound(String),
    #[error("cannot {op} task {id}: {reason}")]
    InvalidState {
        id: String,
        op: &'static str,
        reason: String,
    },
}

impl SchedulerError {
    fn state(id: &str, op: &'static str, state: TaskState) -> Self {
        SchedulerError::InvalidState {
            id: id.to_string(),
            op,
            reason: format!("it is {state}"),
        }
    }
}

/// Everything needed to create a task.  Periodic by default.
pub struct TaskSpec {
    name: String,
    callback: TaskCallback,
    interval: Option<Duration>,
    delay: Duration,
    periodic: bool,
    max_runs: Option<u32>,
    owner: Option<String>,
    description: String,
    auto_start: bool,
}

impl TaskSpec {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
            interval: None,
            delay: Duration::ZERO,
            periodic: true,
            max_runs: None,
            owner: None,
            description: String::new(),
            auto_start: false,
        }
    }

    /// Repeat period, or for one-time tasks the firing delay.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Offset before the first firing.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn one_shot(mut self) -> Self {
        self.periodic = false;
        self
    }

    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Extension that owns the task; owned tasks are removed when the
    /// extension unloads.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }
}

/// Fields accepted by [`Scheduler::modify`].  `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub interval: Option<Duration>,
    pub max_runs: Option<u32>,
    pub description: Option<String>,
}

/// Read-only view of a task record (everything except the callback).
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub description: String,
    pub periodic: bool,
    pub interval: Option<Duration>,
    pub delay: Duration,
    pub max_runs: Option<u32>,
    pub run_count: u32,
    pub state: TaskState,
    pub created_at: DateTime<Local>,
    pub started_at: Option<DateTime<Local>>,
    pub last_run: Option<DateTime<Local>>,
    /// Message of the most recent callback failure, cleared on success.
    pub last_error: Option<String>,
}

impl TaskInfo {
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            periodic: self.periodic,
            interval: self.interval.map(|d| d.as_secs_f64()),
            delay: self.delay.as_secs_f64(),
            run_count: self.run_count,
            max_runs: self.max_runs,
            created_at: timestamp(&self.created_at),
            started_at: self.started_at.as_ref().map(timestamp),
            last_run: self.last_run.as_ref().map(timestamp),
            owner: self.owner.clone(),
            description: self.description.clone(),
        }
    }
}

/// Serializable introspection view.  Durations are in seconds and
/// timestamps are RFC 3339, so they sort lexically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub name: String,
    pub state: TaskState,
    pub periodic: bool,
    pub interval: Option<f64>,
    pub delay: f64,
    pub run_count: u32,
    pub max_runs: Option<u32>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub last_run: Option<String>,
    pub owner: Option<String>,
    pub description: String,
}

fn timestamp(t: &DateTime<Local>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// A task record owned by the scheduler.
pub struct ScheduledTask {
    info: TaskInfo,
    callback: TaskCallback,
    timer: Option<TimerRegistration>,
}

impl ScheduledTask {
    fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    fn is_stoppable(&self) -> bool {
        match self.info.state {
            TaskState::Running | TaskState::Paused => true,
            // A periodic task keeps firing after a failure.
            TaskState::Failed => self.has_timer(),
            _ => false,
        }
    }

    fn disarm(&mut self) {
        // Dropping the registration cancels the timer task.
        self.timer = None;
    }

    fn stop(&mut self) -> Result<(), SchedulerError> {
        if !self.is_stoppable() {
            return Err(SchedulerError::state(&self.info.id, "stop", self.info.state));
        }
        self.disarm();
        self.info.state = TaskState::Stopped;
        Ok(())
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("info", &self.info)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, ScheduledTask>,
    generation: u64,
}

impl Inner {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut ScheduledTask, SchedulerError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }
}

/// Owner of all scheduled tasks.  All operations take `&self`; the task
/// table sits behind one mutex that is never held while a callback runs.
pub struct Scheduler {
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<TimerEvent>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.len())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler and the receiver its timers post to.
    pub fn new() -> (Self, TimerEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            inner: Mutex::new(Inner::default()),
            events: tx,
        };
        (scheduler, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a task in PENDING (or RUNNING with `auto_start`) and return
    /// its id.
    pub fn schedule(&self, spec: TaskSpec) -> Result<String, SchedulerError> {
        let TaskSpec {
            name,
            callback,
            interval,
            delay,
            periodic,
            max_runs,
            owner,
            description,
            auto_start,
        } = spec;

        if let Err(reason) = check_bounds(interval, Some(delay), max_runs) {
            error!(task = %name, %reason, "task rejected");
            return Err(SchedulerError::Validation { name, reason });
        }

        let interval = if periodic {
            match interval {
                Some(iv) if !iv.is_zero() => Some(iv),
                Some(_) => {
                    error!(task = %name, "periodic task interval must be positive");
                    return Err(SchedulerError::Validation {
                        name,
                        reason: "interval must be positive".into(),
                    });
                }
                None => {
                    error!(task = %name, "periodic task requires an interval");
                    return Err(SchedulerError::Validation {
                        name,
                        reason: "periodic tasks require an interval".into(),
                    });
                }
            }
        } else {
            if max_runs.is_some() {
                error!(task = %name, "max_runs is only meaningful for periodic tasks");
                return Err(SchedulerError::Validation {
                    name,
                    reason: "max_runs only applies to periodic tasks".into(),
                });
            }
            Some(interval.unwrap_or(delay))
        };

        let id = {
            let mut inner = self.lock();
            let mut id = new_task_id();
            while inner.tasks.contains_key(&id) {
                id = new_task_id();
            }
            let task = ScheduledTask {
                info: TaskInfo {
                    id: id.clone(),
                    name: name.clone(),
                    owner,
                    description,
                    periodic,
                    interval,
                    delay,
                    max_runs,
                    run_count: 0,
                    state: TaskState::Pending,
                    created_at: Local::now(),
                    started_at: None,
                    last_run: None,
                    last_error: None,
                },
                callback,
                timer: None,
            };
            inner.tasks.insert(id.clone(), task);
            id
        };
        info!(task_id = %id, name = %name, periodic, "task added");

        if auto_start {
            self.start(&id)?;
        }
        Ok(id)
    }

    /// Arm the task's timer and move it to RUNNING.
    pub fn start(&self, id: &str) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        let generation = inner.next_generation();
        let task = inner.task_mut(id)?;

        if matches!(task.info.state, TaskState::Running | TaskState::Completed) {
            warn!(task_id = %id, state = %task.info.state, "start rejected");
            return Err(SchedulerError::state(id, "start", task.info.state));
        }

        task.disarm();
        let info = &task.info;
        let interval = info.interval.unwrap_or(info.delay);
        let registration = if info.periodic {
            timer::periodic(id, generation, info.delay, interval, self.events.clone())
        } else {
            timer::once(id, generation, info.delay.max(interval), self.events.clone())
        };
        task.timer = Some(registration);
        task.info.state = TaskState::Running;
        task.info.started_at = Some(Local::now());
        info!(task_id = %id, name = %task.info.name, "task started");
        Ok(())
    }

    /// Cancel the task's timer and move it to STOPPED.
    pub fn stop(&self, id: &str) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        let task = inner.task_mut(id)?;
        if let Err(e) = task.stop() {
            warn!(task_id = %id, state = %task.info.state, "stop rejected");
            return Err(e);
        }
        info!(task_id = %id, name = %task.info.name, "task stopped");
        Ok(())
    }

    /// Suspend a RUNNING periodic task, keeping its run history.
    pub fn pause(&self, id: &str) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        let task = inner.task_mut(id)?;
        if !task.info.periodic {
            warn!(task_id = %id, "cannot pause a one-time task");
            return Err(SchedulerError::InvalidState {
                id: id.to_string(),
                op: "pause",
                reason: "one-time tasks cannot be paused".into(),
            });
        }
        if task.info.state != TaskState::Running {
            warn!(task_id = %id, state = %task.info.state, "pause rejected");
            return Err(SchedulerError::state(id, "pause", task.info.state));
        }
        task.disarm();
        task.info.state = TaskState::Paused;
        info!(task_id = %id, name = %task.info.name, "task paused");
        Ok(())
    }

    /// Re-arm a PAUSED task.  The first firing comes one full interval
    /// after the resume, not on the original cadence.
    pub fn resume(&self, id: &str) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        let generation = inner.next_generation();
        let task = inner.task_mut(id)?;
        if task.info.state != TaskState::Paused {
            warn!(task_id = %id, state = %task.info.state, "resume rejected");
            return Err(SchedulerError::state(id, "resume", task.info.state));
        }
        Self::rearm(task, generation, self.events.clone());
        task.info.state = TaskState::Running;
        info!(task_id = %id, name = %task.info.name, "task resumed");
        Ok(())
    }

    fn rearm(task: &mut ScheduledTask, generation: u64, tx: mpsc::UnboundedSender<TimerEvent>) {
        task.disarm();
        let interval = task.info.interval.unwrap_or(task.info.delay);
        task.timer = Some(timer::periodic(
            &task.info.id,
            generation,
            interval,
            interval,
            tx,
        ));
    }

    /// Stop the task if it is active, then delete it.
    pub fn remove(&self, id: &str) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        let mut task = inner
            .tasks
            .remove(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        if task.is_stoppable() {
            let _ = task.stop();
        }
        info!(task_id = %id, name = %task.info.name, "task removed");
        Ok(())
    }

    /// Change interval, run bound or description.  A new interval on a
    /// periodic task with a live timer takes effect immediately (pause then
    /// resume); otherwise it applies to the task's next start.
    pub fn modify(&self, id: &str, changes: TaskChanges) -> Result<(), SchedulerError> {
        let mut inner = self.lock();
        let generation = inner.next_generation();
        let task = inner.task_mut(id)?;

        if let Err(reason) = check_bounds(changes.interval, None, changes.max_runs) {
            return Err(SchedulerError::Validation {
                name: task.info.name.clone(),
                reason,
            });
        }
        if task.info.periodic && changes.interval.is_some_and(|iv| iv.is_zero()) {
            return Err(SchedulerError::Validation {
                name: task.info.name.clone(),
                reason: "interval must be positive".into(),
            });
        }
        if !task.info.periodic && changes.max_runs.is_some() {
            return Err(SchedulerError::Validation {
                name: task.info.name.clone(),
                reason: "max_runs only applies to periodic tasks".into(),
            });
        }

        // FAILED periodic tasks keep their timer, so they are re-armed too.
        let reschedule = changes.interval.is_some() && task.info.periodic && task.has_timer();

        if let Some(interval) = changes.interval {
            task.info.interval = Some(interval);
        }
        if let Some(max_runs) = changes.max_runs {
            task.info.max_runs = Some(max_runs);
        }
        if let Some(description) = changes.description {
            task.info.description = description;
        }
        if reschedule {
            Self::rearm(task, generation, self.events.clone());
            debug!(task_id = %id, "task re-armed with new interval");
        }
        info!(task_id = %id, name = %task.info.name, "task modified");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TaskInfo> {
        self.lock().tasks.get(id).map(|t| t.info.clone())
    }

    /// First task (oldest) carrying `name`.
    pub fn find_by_name(&self, name: &str) -> Option<TaskInfo> {
        self.list(None, None).into_iter().find(|t| t.name == name)
    }

    /// Tasks matching every given filter, oldest first.
    pub fn list(&self, owner: Option<&str>, state: Option<TaskState>) -> Vec<TaskInfo> {
        let inner = self.lock();
        let mut tasks: Vec<TaskInfo> = inner
            .tasks
            .values()
            .filter(|t| owner.map_or(true, |o| t.info.owner.as_deref() == Some(o)))
            .filter(|t| state.map_or(true, |s| t.info.state == s))
            .map(|t| t.info.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn snapshot(&self, id: &str) -> Option<TaskSnapshot> {
        self.lock().tasks.get(id).map(|t| t.info.snapshot())
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every task owned by `owner`.  Returns the number removed.
    pub fn remove_all_for(&self, owner: &str) -> usize {
        let mut inner = self.lock();
        let ids: Vec<String> = inner
            .tasks
            .values()
            .filter(|t| t.info.owner.as_deref() == Some(owner))
            .map(|t| t.info.id.clone())
            .collect();
        for id in &ids {
            if let Some(mut task) = inner.tasks.remove(id) {
                if task.is_stoppable() {
                    let _ = task.stop();
                }
                debug!(task_id = %id, owner = %owner, "task removed with owner");
            }
        }
        info!(owner = %owner, removed = ids.len(), "removed owned tasks");
        ids.len()
    }

    /// Stop every active task.  Returns the number stopped.
    pub fn stop_all(&self) -> usize {
        let mut inner = self.lock();
        let stopped = inner
            .tasks
            .values_mut()
            .filter(|t| t.is_stoppable())
            .map(|t| t.stop())
            .filter(Result::is_ok)
            .count();
        info!(stopped, "stopped all tasks");
        stopped
    }

    /// Execute one firing.  Stale events (task gone, stopped, paused or
    /// re-armed since the event was posted) are ignored.
    ///
    /// Callback errors and panics are contained: the task is marked FAILED
    /// and, if periodic, keeps its timer.
    pub fn fire(&self, event: TimerEvent) {
        let (callback, name) = {
            let inner = self.lock();
            let Some(task) = inner.tasks.get(&event.task_id) else {
                debug!(task_id = %event.task_id, "timer event for unknown task dropped");
                return;
            };
            if !is_current(task, event.generation) {
                debug!(task_id = %event.task_id, "stale timer event dropped");
                return;
            }
            (Arc::clone(&task.callback), task.info.name.clone())
        };

        let result = match catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!(
                "callback panicked: {}",
                panic_message(payload.as_ref())
            )),
        };

        let mut inner = self.lock();
        // The callback may have removed or rescheduled its own task.
        let Some(task) = inner.tasks.get_mut(&event.task_id) else {
            return;
        };
        let current = is_current(task, event.generation);

        match result {
            Ok(()) => {
                task.info.last_run = Some(Local::now());
                task.info.run_count += 1;
                task.info.last_error = None;
                if !current {
                    return;
                }
                if !task.info.periodic {
                    task.disarm();
                    task.info.state = TaskState::Completed;
                    info!(task_id = %event.task_id, name = %name, "one-time task completed");
                    return;
                }
                if task.info.state == TaskState::Failed {
                    task.info.state = TaskState::Running;
                }
                if let Some(max) = task.info.max_runs {
                    if task.info.run_count >= max {
                        task.disarm();
                        task.info.state = TaskState::Completed;
                        info!(task_id = %event.task_id, name = %name, max_runs = max,
                              "task reached max runs");
                    }
                }
            }
            Err(e) => {
                error!(task_id = %event.task_id, name = %name, error = %e,
                       "task execution failed");
                task.info.last_error = Some(e.to_string());
                if current {
                    task.info.state = TaskState::Failed;
                    if !task.info.periodic {
                        task.disarm();
                    }
                }
            }
        }
    }
}

fn is_current(task: &ScheduledTask, generation: u64) -> bool {
    task.timer
        .as_ref()
        .is_some_and(|t| t.generation == generation)
}

/// Limits shared by `schedule` and `modify`.
fn check_bounds(
    interval: Option<Duration>,
    delay: Option<Duration>,
    max_runs: Option<u32>,
) -> Result<(), String> {
    if max_runs == Some(0) {
        return Err("max_runs must be at least 1".into());
    }
    for (what, value) in [("interval", interval), ("delay", delay)] {
        if value.is_some_and(|d| d > MAX_INTERVAL) {
            return Err(format!("{what} is longer than one year"));
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Short opaque task id: the first 8 hex digits of a v4 uuid.
fn new_task_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Feed timer events into `scheduler` until the channel closes.  Used when
/// no other control loop owns the receiver.
pub fn spawn_driver(scheduler: Arc<Scheduler>, mut events: TimerEvents) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            scheduler.fire(event);
        }
    })
}
