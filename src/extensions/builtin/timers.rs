//! Reminders, repeating messages and the `task` management command.
//!
//! Every task created here is owned by this extension, so unloading
//! `timers` cancels all of them.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use super::parse_opts;
use crate::comm::Session;
use crate::extensions::{CommandContext, Exports, Extension};
use crate::scheduler::{TaskChanges, TaskInfo, TaskSpec, TaskState};
use crate::utils::{format_duration, parse_duration};

pub const NAME: &str = "timers";

pub struct Timers;

impl Extension for Timers {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Reminders, repeating messages and task management"
    }

    fn register(&self, exports: &mut Exports) -> anyhow::Result<()> {
        exports
            .command("remind", remind)
            .command("repeat", repeat)
            .command("task", task);
        Ok(())
    }
}

/// Callback that sends `text` to `target`, addressed to `requester`.
fn announce(
    session: Arc<dyn Session>,
    target: &str,
    requester: &str,
    text: String,
) -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
    let target = target.to_string();
    let line = format!("{requester}: {text}");
    move || {
        session.send(&target, &line);
        Ok(())
    }
}

fn remind(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some((when, text)) = args.split_first().filter(|(_, t)| !t.is_empty()) else {
        ctx.reply("Usage: remind SECONDS TEXT");
        return Ok(());
    };
    let Some(after) = parse_duration(when) else {
        ctx.reply(format!("Invalid duration: {when}"));
        return Ok(());
    };

    let text = text.join(" ");
    let spec = TaskSpec::new(
        format!("remind:{}", ctx.requester),
        announce(
            Arc::clone(ctx.session()),
            ctx.target,
            ctx.requester,
            format!("Reminder: {text}"),
        ),
    )
    .one_shot()
    .delay(after)
    .owner(NAME)
    .description(text)
    .auto_start();

    match ctx.scheduler().schedule(spec) {
        Ok(id) => ctx.reply(format!("Reminder {id} set for {}", format_duration(after))),
        Err(e) => ctx.reply(e.to_string()),
    }
    Ok(())
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct RepeatOpts {
    /// Stop after this many messages.
    #[arg(short = 'n', long = "times")]
    times: Option<u32>,
    interval: String,
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    text: Vec<String>,
}

fn repeat(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    if args.is_empty() {
        ctx.reply("Usage: repeat SECONDS [-n TIMES] TEXT");
        return Ok(());
    }
    let Some(opts) = parse_opts::<RepeatOpts>(ctx, args) else {
        return Ok(());
    };
    let Some(every) = parse_duration(&opts.interval) else {
        ctx.reply(format!("Invalid duration: {}", opts.interval));
        return Ok(());
    };

    let text = opts.text.join(" ");
    let mut spec = TaskSpec::new(
        format!("repeat:{}", ctx.requester),
        announce(Arc::clone(ctx.session()), ctx.target, ctx.requester, text.clone()),
    )
    .interval(every)
    .delay(every)
    .owner(NAME)
    .description(text)
    .auto_start();
    if let Some(times) = opts.times {
        spec = spec.max_runs(times);
    }

    match ctx.scheduler().schedule(spec) {
        Ok(id) => ctx.reply(format!("Repeating task {id} every {}", format_duration(every))),
        Err(e) => ctx.reply(e.to_string()),
    }
    Ok(())
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ModifyOpts {
    #[arg(short, long)]
    interval: Option<String>,
    #[arg(short = 'n', long)]
    max_runs: Option<u32>,
    #[arg(short, long, allow_hyphen_values = true)]
    description: Option<String>,
}

/// One-line summary used by `task list`.
pub fn describe(task: &TaskInfo) -> String {
    let runs = match task.max_runs {
        Some(max) => format!("{}/{max}", task.run_count),
        None => task.run_count.to_string(),
    };
    let schedule = match (task.periodic, task.interval) {
        (true, Some(iv)) => format!("every {}", format_duration(iv)),
        (false, Some(iv)) => format!("once after {}", format_duration(iv.max(task.delay))),
        (_, None) => format!("once after {}", format_duration(task.delay)),
    };
    format!(
        "{} {} [{}] {schedule}, runs: {runs}",
        task.id, task.name, task.state
    )
}

fn task(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some((sub, rest)) = args.split_first() else {
        ctx.reply("Usage: task list|info|start|stop|pause|resume|remove|modify [ID] [OPTIONS]");
        return Ok(());
    };
    let sub = sub.to_lowercase();
    let scheduler = ctx.scheduler();

    if sub == "list" {
        let state = match rest.first().map(|s| s.parse::<TaskState>()) {
            None => None,
            Some(Ok(state)) => Some(state),
            Some(Err(e)) => {
                ctx.reply(e);
                return Ok(());
            }
        };
        let tasks = scheduler.list(None, state);
        if tasks.is_empty() {
            ctx.reply("No scheduled tasks");
        } else {
            let lines: Vec<String> = tasks.iter().map(describe).collect();
            ctx.reply(lines.join("\n"));
        }
        return Ok(());
    }

    let Some((key, options)) = rest.split_first() else {
        ctx.reply(format!("Usage: task {sub} ID"));
        return Ok(());
    };
    let Some(id) = scheduler
        .get(key)
        .or_else(|| scheduler.find_by_name(key))
        .map(|t| t.id)
    else {
        ctx.reply(format!("No such task: {key}"));
        return Ok(());
    };

    let result = match sub.as_str() {
        "info" => {
            let Some(snapshot) = scheduler.snapshot(&id) else {
                ctx.reply(format!("No such task: {key}"));
                return Ok(());
            };
            if options.first().is_some_and(|o| o == "json") {
                ctx.reply(serde_json::to_string(&snapshot)?);
            } else {
                let last_run = snapshot.last_run.as_deref().unwrap_or("never");
                ctx.reply(format!(
                    "Task {} ({}): {}\nState: {}, runs: {}{}\nCreated: {}, last run: {}",
                    snapshot.id,
                    snapshot.name,
                    if snapshot.description.is_empty() {
                        "-"
                    } else {
                        snapshot.description.as_str()
                    },
                    snapshot.state,
                    snapshot.run_count,
                    snapshot
                        .max_runs
                        .map(|m| format!("/{m}"))
                        .unwrap_or_default(),
                    snapshot.created_at,
                    last_run,
                ));
            }
            return Ok(());
        }
        "start" => scheduler.start(&id).map(|_| "started"),
        "stop" => scheduler.stop(&id).map(|_| "stopped"),
        "pause" => scheduler.pause(&id).map(|_| "paused"),
        "resume" => scheduler.resume(&id).map(|_| "resumed"),
        "remove" => scheduler.remove(&id).map(|_| "removed"),
        "modify" => {
            let Some(opts) = parse_opts::<ModifyOpts>(ctx, options) else {
                return Ok(());
            };
            let interval: Option<Duration> = match opts.interval.as_deref() {
                None => None,
                Some(raw) => match parse_duration(raw) {
                    Some(d) => Some(d),
                    None => {
                        ctx.reply(format!("Invalid duration: {raw}"));
                        return Ok(());
                    }
                },
            };
            let changes = TaskChanges {
                interval,
                max_runs: opts.max_runs,
                description: opts.description,
            };
            scheduler.modify(&id, changes).map(|_| "modified")
        }
        other => {
            ctx.reply(format!("Unknown subcommand: {other}"));
            return Ok(());
        }
    };

    match result {
        Ok(done) => ctx.reply(format!("Task {id} {done}")),
        Err(e) => ctx.reply(e.to_string()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn info(periodic: bool, interval: Option<u64>, max_runs: Option<u32>) -> TaskInfo {
        TaskInfo {
            id: "abcd1234".into(),
            name: "demo".into(),
            owner: Some(NAME.into()),
            description: String::new(),
            periodic,
            interval: interval.map(Duration::from_secs),
            delay: Duration::ZERO,
            max_runs,
            run_count: 2,
            state: TaskState::Running,
            created_at: Local::now(),
            started_at: None,
            last_run: None,
            last_error: None,
        }
    }

    #[test]
    fn describe_periodic_and_one_time() {
        assert_eq!(
            describe(&info(true, Some(90), Some(5))),
            "abcd1234 demo [RUNNING] every 1m 30s, runs: 2/5"
        );
        assert_eq!(
            describe(&info(false, Some(30), None)),
            "abcd1234 demo [RUNNING] once after 30s, runs: 2"
        );
    }
}
