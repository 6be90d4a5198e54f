//! Scheduler timing: firing cadence, run bounds, pause/resume, failure
//! containment and re-arming.  Runs on Tokio's paused clock so sleeps
//! advance virtual time instantly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use servicex::scheduler::{spawn_driver, Scheduler, TaskChanges, TaskSpec, TaskState};

/// Scheduler whose timer events are fed back into it by a driver task.
fn driven_scheduler() -> Arc<Scheduler> {
    let (scheduler, events) = Scheduler::new();
    let scheduler = Arc::new(scheduler);
    spawn_driver(Arc::clone(&scheduler), events);
    scheduler
}

/// A callback that counts its invocations.
fn counter() -> (Arc<AtomicU32>, impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
    let hits = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&hits);
    (hits, move || {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

async fn sleep_secs(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn periodic_task_fires_on_its_interval() {
    let scheduler = driven_scheduler();
    let (hits, cb) = counter();
    let id = scheduler
        .schedule(
            TaskSpec::new("tick", cb)
                .interval(Duration::from_secs(10))
                .auto_start(),
        )
        .unwrap();

    // Zero delay: fires at 0, 10 and 20.
    sleep_secs(25.0).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.run_count, 3);
    assert!(info.last_run.is_some());
    assert_eq!(info.state, TaskState::Running);
}

#[tokio::test(start_paused = true)]
async fn delay_defers_the_first_firing() {
    let scheduler = driven_scheduler();
    let (hits, cb) = counter();
    scheduler
        .schedule(
            TaskSpec::new("late", cb)
                .interval(Duration::from_secs(10))
                .delay(Duration::from_secs(5))
                .auto_start(),
        )
        .unwrap();

    sleep_secs(4.5).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    sleep_secs(1.0).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    sleep_secs(10.0).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn max_runs_completes_without_a_fourth_firing() {
    let scheduler = driven_scheduler();
    let (hits, cb) = counter();
    let id = scheduler
        .schedule(
            TaskSpec::new("bounded", cb)
                .interval(Duration::from_secs(1))
                .max_runs(3)
                .auto_start(),
        )
        .unwrap();

    sleep_secs(10.5).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.run_count, 3);
    assert_eq!(info.state, TaskState::Completed);

    // Completed tasks cannot be started again.
    assert!(scheduler.start(&id).is_err());
}

#[tokio::test(start_paused = true)]
async fn one_time_task_completes_after_its_delay() {
    let scheduler = driven_scheduler();
    let (hits, cb) = counter();
    let id = scheduler
        .schedule(
            TaskSpec::new("once", cb)
                .one_shot()
                .delay(Duration::from_secs(5))
                .auto_start(),
        )
        .unwrap();

    sleep_secs(4.5).await;
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Running);
    sleep_secs(1.0).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Completed);

    sleep_secs(30.0).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_counts_from_the_resume_instant() {
    let scheduler = driven_scheduler();
    let (hits, cb) = counter();
    let id = scheduler
        .schedule(
            TaskSpec::new("pausable", cb)
                .interval(Duration::from_secs(10))
                .delay(Duration::from_secs(10))
                .auto_start(),
        )
        .unwrap();

    sleep_secs(15.0).await; // t=15, fired at 10
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    scheduler.pause(&id).unwrap();
    sleep_secs(30.0).await; // t=45
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Paused);

    scheduler.resume(&id).unwrap();
    sleep_secs(5.0).await; // t=50, the old cadence would have fired
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    sleep_secs(6.0).await; // t=56
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    sleep_secs(10.0).await; // t=66
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.run_count, 3);
    assert_eq!(info.state, TaskState::Running);
}

#[tokio::test(start_paused = true)]
async fn stopped_task_stops_firing() {
    let scheduler = driven_scheduler();
    let (hits, cb) = counter();
    let id = scheduler
        .schedule(
            TaskSpec::new("tick", cb)
                .interval(Duration::from_secs(2))
                .auto_start(),
        )
        .unwrap();

    sleep_secs(3.0).await; // fired at 0 and 2
    scheduler.stop(&id).unwrap();
    sleep_secs(20.0).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn periodic_failure_keeps_firing() {
    let scheduler = driven_scheduler();
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let id = scheduler
        .schedule(
            TaskSpec::new("flaky", move || {
                if seen.fetch_add(1, Ordering::SeqCst) == 1 {
                    anyhow::bail!("second call fails");
                }
                Ok(())
            })
            .interval(Duration::from_secs(1))
            .auto_start(),
        )
        .unwrap();

    sleep_secs(1.5).await; // t=0 ok, t=1 error
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.state, TaskState::Failed);
    assert_eq!(info.run_count, 1);
    assert_eq!(info.last_error.as_deref(), Some("second call fails"));

    sleep_secs(1.0).await; // t=2 ok again
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.state, TaskState::Running);
    assert_eq!(info.run_count, 2);
    assert!(info.last_error.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_periodic_task_can_be_stopped() {
    let scheduler = driven_scheduler();
    let id = scheduler
        .schedule(
            TaskSpec::new("always-fails", || anyhow::bail!("nope"))
                .interval(Duration::from_secs(1))
                .auto_start(),
        )
        .unwrap();

    sleep_secs(0.5).await;
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Failed);
    scheduler.stop(&id).unwrap();
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn panicking_one_time_task_is_marked_failed() {
    let scheduler = driven_scheduler();
    let id = scheduler
        .schedule(
            TaskSpec::new("explodes", || -> anyhow::Result<()> { panic!("kaboom") })
                .one_shot()
                .delay(Duration::from_secs(1))
                .auto_start(),
        )
        .unwrap();

    sleep_secs(1.5).await;
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.state, TaskState::Failed);
    assert!(info.last_error.unwrap().contains("kaboom"));

    // The scheduler keeps serving other tasks.
    let (hits, cb) = counter();
    scheduler
        .schedule(TaskSpec::new("after", cb).one_shot().auto_start())
        .unwrap();
    sleep_secs(0.5).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn modify_rearms_a_running_task() {
    let scheduler = driven_scheduler();
    let (hits, cb) = counter();
    let id = scheduler
        .schedule(
            TaskSpec::new("slow", cb)
                .interval(Duration::from_secs(100))
                .delay(Duration::from_secs(100))
                .auto_start(),
        )
        .unwrap();

    sleep_secs(1.0).await;
    scheduler
        .modify(
            &id,
            TaskChanges {
                interval: Some(Duration::from_secs(2)),
                ..Default::default()
            },
        )
        .unwrap();

    sleep_secs(2.5).await; // t=3.5, first firing at 3
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    sleep_secs(2.0).await; // t=5.5
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn modify_rearms_a_failed_task() {
    let scheduler = driven_scheduler();
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let id = scheduler
        .schedule(
            TaskSpec::new("always-fails", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("nope")
            })
            .interval(Duration::from_secs(1))
            .auto_start(),
        )
        .unwrap();

    sleep_secs(0.5).await; // t=0 failed
    assert_eq!(scheduler.get(&id).unwrap().state, TaskState::Failed);
    scheduler
        .modify(
            &id,
            TaskChanges {
                interval: Some(Duration::from_secs(100)),
                ..Default::default()
            },
        )
        .unwrap();

    sleep_secs(50.0).await; // t=50.5, the old cadence would have fired 50 times
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    sleep_secs(51.0).await; // t=101.5, first firing on the new cadence at 100.5
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let info = scheduler.get(&id).unwrap();
    assert_eq!(info.state, TaskState::Failed);
    assert_eq!(info.interval, Some(Duration::from_secs(100)));
}

#[tokio::test(start_paused = true)]
async fn removing_owner_tasks_cancels_their_timers() {
    let scheduler = driven_scheduler();
    let (hits, cb) = counter();
    let cb = Arc::new(cb);
    for name in ["a", "b"] {
        let cb = Arc::clone(&cb);
        scheduler
            .schedule(
                TaskSpec::new(name, move || cb())
                    .interval(Duration::from_secs(1))
                    .delay(Duration::from_secs(1))
                    .owner("timers")
                    .auto_start(),
            )
            .unwrap();
    }

    assert_eq!(scheduler.remove_all_for("timers"), 2);
    sleep_secs(5.0).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn callback_may_remove_its_own_task() {
    let (scheduler, events) = Scheduler::new();
    let scheduler = Arc::new(scheduler);
    spawn_driver(Arc::clone(&scheduler), events);

    let own_id = Arc::new(std::sync::Mutex::new(String::new()));
    let handle = Arc::downgrade(&scheduler);
    let id_slot = Arc::clone(&own_id);
    let id = scheduler
        .schedule(
            TaskSpec::new("self-removing", move || {
                let id = id_slot.lock().unwrap().clone();
                if let Some(scheduler) = handle.upgrade() {
                    scheduler.remove(&id)?;
                }
                Ok(())
            })
            .interval(Duration::from_secs(1))
            .delay(Duration::from_secs(1)),
        )
        .unwrap();
    *own_id.lock().unwrap() = id.clone();
    scheduler.start(&id).unwrap();

    sleep_secs(3.5).await;
    assert!(scheduler.get(&id).is_none());
}
