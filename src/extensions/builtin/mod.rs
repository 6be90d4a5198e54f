//! Extensions shipped with the bot.
//!
//! | name        | exports                                                    |
//! |-------------|------------------------------------------------------------|
//! | `utilities` | `help`, `commands`, `date`, `echo`, `nick`, `uname`, `extension`; `$nick` `$date` `$time` |
//! | `channel`   | `chanjoin`, `chanpart`, `chancycle`, `chanlist`, `chaninfo`, `chansave`, `chanunsave` |
//! | `fun`       | `dice`, `coin`, `8ball`, `digits`, `digiclock`             |
//! | `timers`    | `remind`, `repeat`, `task`                                 |
//! | `network`   | `network` (`list`, `info`, `current`)                      |

pub mod channel;
pub mod fun;
pub mod network;
pub mod timers;
pub mod utilities;

use clap::Parser;

use super::{CommandContext, ExtensionCatalog};

/// Extensions loaded when a network has none enabled yet.
pub const DEFAULT_EXTENSIONS: &[&str] = &["utilities", "channel"];

/// Register every built-in extension in `catalog`.
pub fn add_all(catalog: &mut ExtensionCatalog) {
    catalog
        .add(utilities::NAME, || Box::new(utilities::Utilities))
        .add(channel::NAME, || Box::new(channel::Channel))
        .add(fun::NAME, || Box::new(fun::Fun))
        .add(timers::NAME, || Box::new(timers::Timers))
        .add(network::NAME, || Box::new(network::Network));
}

/// Parse command options with clap.  On failure the first line of clap's
/// message is sent back as `Invalid option: ...` and `None` is returned.
pub(crate) fn parse_opts<T: Parser>(ctx: &CommandContext<'_>, args: &[String]) -> Option<T> {
    match T::try_parse_from(args) {
        Ok(opts) => Some(opts),
        Err(e) => {
            ctx.reply(format!("Invalid option: {}", clap_summary(&e)));
            None
        }
    }
}

fn clap_summary(e: &clap::Error) -> String {
    let rendered = e.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).to_string()
}

/// Channel argument for the channel commands: the first argument, or the
/// current channel when none is given.  Replies with usage or a validation
/// message and returns `None` when there is no usable channel.
pub(crate) fn channel_arg(ctx: &CommandContext<'_>, args: &[String], command: &str) -> Option<String> {
    let channel = match args.first() {
        Some(arg) => arg.split_whitespace().next().unwrap_or_default().to_string(),
        None if ctx.in_channel() => ctx.target.to_string(),
        None => {
            ctx.reply(format!("Usage: {command} [channel]"));
            return None;
        }
    };
    if !channel.starts_with('#') {
        ctx.reply(format!("Invalid channel name: {channel}"));
        return None;
    }
    Some(channel)
}
