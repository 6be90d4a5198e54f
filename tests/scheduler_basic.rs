//! Scheduler lifecycle: validation, state transitions, queries and
//! snapshots.  Timing-sensitive behaviour lives in `scheduler_advanced.rs`.

use std::time::Duration;

use servicex::scheduler::{
    Scheduler, SchedulerError, TaskChanges, TaskSpec, TaskState, TimerEvent, MAX_INTERVAL,
};

fn noop() -> anyhow::Result<()> {
    Ok(())
}

fn periodic(name: &str, secs: u64) -> TaskSpec {
    TaskSpec::new(name, noop).interval(Duration::from_secs(secs))
}

#[tokio::test(start_paused = true)]
async fn schedule_then_start_moves_pending_to_running() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler.schedule(periodic("tick", 10)).unwrap();
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.state, TaskState::Pending);
    assert!(info.started_at.is_none());
    assert_eq!(id.len(), 8);

    scheduler.start(&id).unwrap();
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.state, TaskState::Running);
    assert!(info.started_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn periodic_without_interval_is_rejected() {
    let (scheduler, _events) = Scheduler::new();
    let err = scheduler.schedule(TaskSpec::new("broken", noop)).unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
    assert!(scheduler.is_empty());

    let err = scheduler
        .schedule(TaskSpec::new("zero", noop).interval(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
}

#[tokio::test(start_paused = true)]
async fn one_time_task_with_max_runs_is_rejected() {
    let (scheduler, _events) = Scheduler::new();
    let err = scheduler
        .schedule(TaskSpec::new("once", noop).one_shot().max_runs(2))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
    assert_eq!(scheduler.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_max_runs_is_rejected() {
    let (scheduler, _events) = Scheduler::new();
    let err = scheduler
        .schedule(periodic("never", 1).max_runs(0))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
    assert!(scheduler.is_empty());

    let id = scheduler.schedule(periodic("tick", 1)).unwrap();
    let err = scheduler
        .modify(
            &id,
            TaskChanges {
                max_runs: Some(0),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
    assert_eq!(scheduler.get(&id).unwrap().max_runs, None);
}

#[tokio::test(start_paused = true)]
async fn oversized_durations_are_rejected() {
    let (scheduler, _events) = Scheduler::new();
    let huge = Duration::from_secs(u64::MAX);

    let err = scheduler
        .schedule(TaskSpec::new("forever", noop).interval(huge).auto_start())
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
    let err = scheduler
        .schedule(periodic("late", 1).delay(huge).auto_start())
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
    let err = scheduler
        .schedule(TaskSpec::new("once", noop).one_shot().delay(huge))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
    assert!(scheduler.is_empty());

    // The cap itself is still accepted.
    scheduler
        .schedule(periodic("yearly", 1).interval(MAX_INTERVAL).auto_start())
        .unwrap();

    let id = scheduler.schedule(periodic("tick", 5)).unwrap();
    scheduler.start(&id).unwrap();
    let err = scheduler
        .modify(
            &id,
            TaskChanges {
                interval: Some(huge),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.interval, Some(Duration::from_secs(5)));
    assert_eq!(info.state, TaskState::Running);
}

#[tokio::test(start_paused = true)]
async fn one_time_interval_defaults_to_delay() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler
        .schedule(
            TaskSpec::new("later", noop)
                .one_shot()
                .delay(Duration::from_secs(30)),
        )
        .unwrap();
    let info = scheduler.get(&id).unwrap();
    assert!(!info.periodic);
    assert_eq!(info.interval, Some(Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn stop_twice_fails_the_second_time() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler.schedule(periodic("tick", 5).auto_start()).unwrap();
    scheduler.stop(&id).unwrap();
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Stopped);

    let err = scheduler.stop(&id).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidState { op: "stop", .. }));
}

#[tokio::test(start_paused = true)]
async fn illegal_transitions_are_reported() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler.schedule(periodic("tick", 5)).unwrap();

    // Nothing to stop, pause or resume while pending.
    assert!(scheduler.stop(&id).is_err());
    assert!(scheduler.pause(&id).is_err());
    assert!(scheduler.resume(&id).is_err());

    scheduler.start(&id).unwrap();
    assert!(matches!(
        scheduler.start(&id),
        Err(SchedulerError::InvalidState { op: "start", .. })
    ));
    assert!(scheduler.resume(&id).is_err());

    let once = scheduler
        .schedule(
            TaskSpec::new("once", noop)
                .one_shot()
                .delay(Duration::from_secs(60))
                .auto_start(),
        )
        .unwrap();
    assert!(matches!(
        scheduler.pause(&once),
        Err(SchedulerError::InvalidState { op: "pause", .. })
    ));

    assert!(matches!(
        scheduler.start("deadbeef"),
        Err(SchedulerError::NotFound(_))
    ));
    assert!(matches!(
        scheduler.remove("deadbeef"),
        Err(SchedulerError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn stopped_task_can_be_restarted() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler.schedule(periodic("tick", 5).auto_start()).unwrap();
    scheduler.stop(&id).unwrap();
    scheduler.start(&id).unwrap();
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Running);
}

#[tokio::test(start_paused = true)]
async fn remove_stops_and_deletes() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler.schedule(periodic("tick", 5).auto_start()).unwrap();
    scheduler.remove(&id).unwrap();
    assert!(scheduler.get(&id).is_none());
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn list_filters_by_owner_and_state() {
    let (scheduler, _events) = Scheduler::new();
    let a1 = scheduler
        .schedule(periodic("a1", 5).owner("alpha").auto_start())
        .unwrap();
    let a2 = scheduler.schedule(periodic("a2", 5).owner("alpha")).unwrap();
    let b1 = scheduler
        .schedule(periodic("b1", 5).owner("beta").auto_start())
        .unwrap();
    let _free = scheduler.schedule(periodic("free", 5)).unwrap();

    let alpha: Vec<String> = scheduler
        .list(Some("alpha"), None)
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(alpha.len(), 2);
    assert!(alpha.contains(&a1) && alpha.contains(&a2));

    let running_alpha = scheduler.list(Some("alpha"), Some(TaskState::Running));
    assert_eq!(running_alpha.len(), 1);
    assert_eq!(running_alpha[0].id, a1);

    let running = scheduler.list(None, Some(TaskState::Running));
    assert_eq!(running.len(), 2);
    assert!(running.iter().any(|t| t.id == b1));

    assert_eq!(scheduler.list(None, None).len(), 4);
    assert_eq!(scheduler.find_by_name("b1").unwrap().id, b1);
    assert!(scheduler.find_by_name("zzz").is_none());
}

#[tokio::test(start_paused = true)]
async fn remove_all_for_only_touches_that_owner() {
    let (scheduler, _events) = Scheduler::new();
    scheduler
        .schedule(periodic("a1", 5).owner("alpha").auto_start())
        .unwrap();
    scheduler.schedule(periodic("a2", 5).owner("alpha")).unwrap();
    let b1 = scheduler
        .schedule(periodic("b1", 5).owner("beta").auto_start())
        .unwrap();
    let free = scheduler.schedule(periodic("free", 5)).unwrap();

    assert_eq!(scheduler.remove_all_for("alpha"), 2);
    assert_eq!(scheduler.remove_all_for("alpha"), 0);
    assert_eq!(scheduler.len(), 2);
    assert_eq!(scheduler.get(&b1).unwrap().state, TaskState::Running);
    assert!(scheduler.get(&free).is_some());
}

#[tokio::test(start_paused = true)]
async fn stop_all_stops_running_and_paused() {
    let (scheduler, _events) = Scheduler::new();
    let running = scheduler.schedule(periodic("r", 5).auto_start()).unwrap();
    let paused = scheduler.schedule(periodic("p", 5).auto_start()).unwrap();
    scheduler.pause(&paused).unwrap();
    let pending = scheduler.schedule(periodic("n", 5)).unwrap();

    assert_eq!(scheduler.stop_all(), 2);
    assert_eq!(scheduler.get(&running).unwrap().state, TaskState::Stopped);
    assert_eq!(scheduler.get(&paused).unwrap().state, TaskState::Stopped);
    assert_eq!(scheduler.get(&pending).unwrap().state, TaskState::Pending);
}

#[tokio::test(start_paused = true)]
async fn modify_validates_and_applies() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler.schedule(periodic("tick", 5)).unwrap();
    scheduler
        .modify(
            &id,
            TaskChanges {
                interval: Some(Duration::from_secs(7)),
                max_runs: Some(4),
                description: Some("every seven".into()),
            },
        )
        .unwrap();
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.interval, Some(Duration::from_secs(7)));
    assert_eq!(info.max_runs, Some(4));
    assert_eq!(info.description, "every seven");
    assert_eq!(info.state, TaskState::Pending);

    let once = scheduler
        .schedule(TaskSpec::new("once", noop).one_shot())
        .unwrap();
    let err = scheduler
        .modify(
            &once,
            TaskChanges {
                max_runs: Some(2),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation { .. }));
}

#[tokio::test(start_paused = true)]
async fn snapshot_has_the_documented_keys() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler
        .schedule(
            periodic("tick", 90)
                .delay(Duration::from_millis(1500))
                .max_runs(3)
                .owner("timers")
                .description("demo"),
        )
        .unwrap();
    let snapshot = scheduler.snapshot(&id).unwrap();
    let value = serde_json::to_value(&snapshot).unwrap();
    let object = value.as_object().unwrap();

    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "created_at",
            "delay",
            "description",
            "id",
            "interval",
            "last_run",
            "max_runs",
            "name",
            "owner",
            "periodic",
            "run_count",
            "started_at",
            "state",
        ]
    );
    assert_eq!(object["state"], "PENDING");
    assert_eq!(object["interval"], 90.0);
    assert_eq!(object["delay"], 1.5);
    assert_eq!(object["owner"], "timers");
    assert!(object["last_run"].is_null());
    assert!(snapshot.created_at.contains('T'));
}

#[tokio::test(start_paused = true)]
async fn stale_timer_events_are_ignored() {
    let (scheduler, _events) = Scheduler::new();
    let id = scheduler.schedule(periodic("tick", 60).auto_start()).unwrap();

    scheduler.fire(TimerEvent {
        task_id: id.clone(),
        generation: u64::MAX,
    });
    scheduler.fire(TimerEvent {
        task_id: "deadbeef".into(),
        generation: 1,
    });
    assert_eq!(scheduler.get(&id).unwrap().run_count, 0);
}
