//! Core utility commands and the standard `$nick`, `$date`, `$time` values.

use std::collections::BTreeSet;

use chrono::Local;
use clap::Parser;
use sysinfo::System;

use super::parse_opts;
use crate::extensions::{CommandContext, Exports, Extension};
use crate::utils::{format_now, PRESET_DATE, PRESET_TIME};

pub const NAME: &str = "utilities";

pub struct Utilities;

impl Extension for Utilities {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Core utility commands"
    }

    fn register(&self, exports: &mut Exports) -> anyhow::Result<()> {
        exports
            .value("nick", |session| session.nickname())
            .value("date", |_| Local::now().format(PRESET_DATE).to_string())
            .value("time", |_| Local::now().format(PRESET_TIME).to_string())
            .command("help", help)
            .command("commands", commands)
            .command("date", date)
            .command("echo", echo)
            .command("nick", nick)
            .command("uname", uname)
            .command("extension", extension);
        Ok(())
    }
}

/// Lay `items` out in `columns` padded columns, filling across each row.
pub fn grid<S: AsRef<str>>(items: &[S], columns: usize) -> String {
    if items.is_empty() || columns == 0 {
        return String::new();
    }
    let cols: Vec<Vec<&str>> = (0..columns)
        .map(|c| {
            items
                .iter()
                .skip(c)
                .step_by(columns)
                .map(AsRef::as_ref)
                .collect()
        })
        .collect();
    let widths: Vec<usize> = cols
        .iter()
        .map(|col| col.iter().map(|s| s.chars().count()).max().unwrap_or(0))
        .collect();
    let rows = cols.iter().map(Vec::len).max().unwrap_or(0);

    (0..rows)
        .map(|r| {
            cols.iter()
                .zip(&widths)
                .filter_map(|(col, width)| col.get(r).map(|s| format!("{s:<width$}")))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn help(ctx: &CommandContext<'_>, _args: &[String]) -> anyhow::Result<()> {
    let nick = ctx.session().nickname();
    let trigger = &ctx.services.trigger;
    ctx.reply(format!(
        "Hello there, I am a ServiceX bot called {nick}. For a list of commands, send \
         '{trigger}commands' into a channel or 'commands' to me as a PM."
    ));
    Ok(())
}

fn commands(ctx: &CommandContext<'_>, _args: &[String]) -> anyhow::Result<()> {
    let registry = ctx.extensions();
    let names = registry.commands();
    if names.is_empty() {
        ctx.reply("No commands available");
        return Ok(());
    }
    let owners: BTreeSet<String> = names
        .iter()
        .filter_map(|c| registry.command_owner(c))
        .collect();

    let mut desc = if names.len() == 1 {
        "is 1 command".to_string()
    } else {
        format!("are {} commands", names.len())
    };
    if owners.len() == 1 {
        desc.push_str(" from a single extension");
    } else {
        desc.push_str(&format!(" from {} extensions", owners.len()));
    }
    ctx.reply(format!(
        "There {desc} available, these commands are:\n{}",
        grid(&names, 2)
    ));
    Ok(())
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct DateOpts {
    #[arg(short, long)]
    timezone: Option<String>,
    #[arg(short, long)]
    preset: Option<String>,
    #[arg(short, long, allow_hyphen_values = true)]
    format: Option<String>,
}

fn date(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(opts) = parse_opts::<DateOpts>(ctx, args) else {
        return Ok(());
    };
    match format_now(
        opts.timezone.as_deref(),
        opts.preset.as_deref(),
        opts.format.as_deref(),
    ) {
        Ok(text) => ctx.reply(text),
        Err(e) => ctx.reply(e.to_string()),
    }
    Ok(())
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct EchoOpts {
    /// Interpret `\n` and `\t`.
    #[arg(short = 'e')]
    escapes: bool,
    /// Accepted for familiarity; lines are always sent whole.
    #[allow(dead_code)]
    #[arg(short = 'n')]
    no_newline: bool,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    text: Vec<String>,
}

fn echo(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(opts) = parse_opts::<EchoOpts>(ctx, args) else {
        return Ok(());
    };
    let message = ctx
        .extensions()
        .substitute(&opts.text.join(" "), ctx.session().as_ref());

    if opts.escapes {
        let message = message.replace("\\t", "    ");
        for line in message.split("\\n") {
            ctx.reply(line);
        }
    } else {
        ctx.reply(message);
    }
    Ok(())
}

fn nick(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(new_nick) = args.first() else {
        ctx.reply("Usage: nick NEWNICK");
        return Ok(());
    };
    ctx.session().set_nickname(new_nick);
    ctx.reply(format!("Changing nickname to: {new_nick}"));
    Ok(())
}

/// The fields `uname` can print, in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub kernel_name: String,
    pub nodename: String,
    pub kernel_release: String,
    pub kernel_version: String,
    pub machine: String,
    pub operating_system: String,
}

impl SystemInfo {
    pub fn current() -> Self {
        let unknown = || "unknown".to_string();
        let os = std::env::consts::OS;
        Self {
            kernel_name: if os == "linux" {
                "Linux".to_string()
            } else {
                System::name().unwrap_or_else(|| os.to_string())
            },
            nodename: System::host_name().unwrap_or_else(unknown),
            kernel_release: System::kernel_version().unwrap_or_else(unknown),
            kernel_version: std::fs::read_to_string("/proc/sys/kernel/version")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|_| unknown()),
            machine: std::env::consts::ARCH.to_string(),
            operating_system: if os == "linux" {
                "GNU/Linux".to_string()
            } else {
                os.to_string()
            },
        }
    }
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_help_flag = true)]
pub struct UnameOpts {
    #[arg(short = 's', long)]
    pub kernel_name: bool,
    #[arg(short = 'n', long)]
    pub nodename: bool,
    #[arg(short = 'r', long)]
    pub kernel_release: bool,
    #[arg(short = 'v', long)]
    pub kernel_version: bool,
    #[arg(short = 'm', long)]
    pub machine: bool,
    #[arg(short = 'o', long)]
    pub operating_system: bool,
    #[arg(short = 'a', long)]
    pub all: bool,
}

/// The fields selected by `opts`; no flags at all selects everything.
pub fn uname_line(info: &SystemInfo, opts: &UnameOpts) -> String {
    let fields = [
        (opts.kernel_name, &info.kernel_name),
        (opts.nodename, &info.nodename),
        (opts.kernel_release, &info.kernel_release),
        (opts.kernel_version, &info.kernel_version),
        (opts.machine, &info.machine),
        (opts.operating_system, &info.operating_system),
    ];
    let everything = opts.all || fields.iter().all(|(wanted, _)| !wanted);
    fields
        .iter()
        .filter(|(wanted, _)| everything || *wanted)
        .map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn uname(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(opts) = parse_opts::<UnameOpts>(ctx, args) else {
        return Ok(());
    };
    ctx.reply(uname_line(&SystemInfo::current(), &opts));
    Ok(())
}

fn extension(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some((sub, names)) = args.split_first() else {
        ctx.reply("Usage: extension SUBCOMMAND [ARGS...]");
        return Ok(());
    };
    let sub = sub.to_lowercase();
    let registry = ctx.extensions();

    if matches!(sub.as_str(), "load" | "unload" | "enable" | "disable") && names.is_empty() {
        ctx.reply(format!("Specify extension(s) to {sub}"));
        return Ok(());
    }

    match sub.as_str() {
        "help" => ctx.reply(
            "ServiceX Extension Manager\nCommands: list, load, unload, enable, disable, help",
        ),
        "list" => {
            let mut loaded = registry.loaded();
            loaded.sort();
            if loaded.is_empty() {
                ctx.reply("No extensions loaded");
            } else {
                ctx.reply(format!("Loaded extensions: {}", loaded.join(", ")));
            }
        }
        "load" => {
            for name in names {
                match registry.load(name) {
                    Ok(()) => ctx.reply(format!("Loaded extension: {name}")),
                    Err(_) => ctx.reply(format!("Failed to load: {name}")),
                }
            }
        }
        "unload" => {
            for name in names {
                match registry.unload(name, ctx.scheduler()) {
                    Ok(_) => ctx.reply(format!("Unloaded extension: {name}")),
                    Err(_) => ctx.reply(format!("Failed to unload: {name}")),
                }
            }
        }
        "enable" | "disable" => {
            let enabled = sub == "enable";
            let store = ctx.store()?;
            let network = ctx.session().network_id();
            for name in names {
                store.set_extension_enabled(network, name, enabled)?;
                let verb = if enabled { "Enabled" } else { "Disabled" };
                ctx.reply(format!("{verb} extension: {name}"));
            }
        }
        other => ctx.reply(format!("Unknown subcommand: {other}")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_fills_rows_left_to_right() {
        let items = ["a", "bbb", "cc", "d", "e"];
        assert_eq!(grid(&items, 2), "a   bbb\ncc  d\ne");
        assert_eq!(grid::<&str>(&[], 2), "");
    }

    fn sample_system() -> SystemInfo {
        SystemInfo {
            kernel_name: "Linux".into(),
            nodename: "host".into(),
            kernel_release: "6.1.0".into(),
            kernel_version: "#1 SMP".into(),
            machine: "x86_64".into(),
            operating_system: "GNU/Linux".into(),
        }
    }

    fn uname_for(args: &[&str]) -> String {
        let opts = UnameOpts::try_parse_from(args).unwrap();
        uname_line(&sample_system(), &opts)
    }

    #[test]
    fn uname_prints_selected_fields_in_order() {
        let all = "Linux host 6.1.0 #1 SMP x86_64 GNU/Linux";
        assert_eq!(uname_for(&[]), all);
        assert_eq!(uname_for(&["-a"]), all);
        assert_eq!(uname_for(&["-r", "-s"]), "Linux 6.1.0");
        assert_eq!(uname_for(&["-sm"]), "Linux x86_64");
        assert_eq!(uname_for(&["--operating-system"]), "GNU/Linux");
        assert!(UnameOpts::try_parse_from(["-x"]).is_err());
    }
}
