//! Channel management: join, part, list and the saved auto-join set.

use tracing::info;

use super::channel_arg;
use crate::extensions::{CommandContext, Exports, Extension};

pub const NAME: &str = "channel";

pub struct Channel;

impl Extension for Channel {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Channel management and information commands"
    }

    fn register(&self, exports: &mut Exports) -> anyhow::Result<()> {
        exports
            .command("chanjoin", chanjoin)
            .command("chanpart", chanpart)
            .command("chancycle", chancycle)
            .command("chanlist", chanlist)
            .command("chaninfo", chaninfo)
            .command("chansave", chansave)
            .command("chanunsave", chanunsave);
        Ok(())
    }
}

/// One-sentence description of the joined channel set.
pub fn format_channel_list(channels: &[String]) -> String {
    match channels {
        [] => "I am not in any channels on this IRC network.".to_string(),
        [only] => format!("I am just in {only} on this IRC network."),
        [rest @ .., last] => format!(
            "I am in {} and {last} on this IRC network, a total of {} channels.",
            rest.join(", "),
            channels.len()
        ),
    }
}

fn chanjoin(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(channel) = channel_arg(ctx, args, "chanjoin") else {
        return Ok(());
    };
    ctx.reply(format!("Joining channel: {channel}"));
    if ctx.session().joined_channels().contains(&channel) {
        info!(channel = %channel, "already in channel");
        return Ok(());
    }
    ctx.session().join(&channel);
    if let Some(store) = &ctx.services.store {
        store.add_channel(ctx.session().network_id(), &channel)?;
    }
    Ok(())
}

fn chanpart(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(channel) = channel_arg(ctx, args, "chanpart") else {
        return Ok(());
    };
    ctx.reply(format!("Parting channel: {channel}"));
    if !ctx.session().joined_channels().contains(&channel) {
        info!(channel = %channel, "not in channel");
        return Ok(());
    }
    ctx.session().part(&channel);
    if let Some(store) = &ctx.services.store {
        store.remove_channel(ctx.session().network_id(), &channel)?;
    }
    Ok(())
}

fn chancycle(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(channel) = channel_arg(ctx, args, "chancycle") else {
        return Ok(());
    };
    ctx.reply(format!("Cycling channel: {channel}"));
    ctx.session().part(&channel);
    ctx.session().join(&channel);
    Ok(())
}

fn chanlist(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let mode = args
        .first()
        .map(|m| m.to_lowercase())
        .unwrap_or_else(|| "simple".to_string());
    let mut channels = ctx.session().joined_channels();
    channels.sort();

    match mode.as_str() {
        "count" => ctx.reply(channels.len().to_string()),
        "fancy" => ctx.reply(format_channel_list(&channels)),
        "simple" if channels.is_empty() => ctx.reply("Not in any channels"),
        "simple" => ctx.reply(channels.join(", ")),
        other => ctx.reply(format!("Unknown mode: {other}. Use: simple, count, or fancy")),
    }
    Ok(())
}

fn chaninfo(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(channel) = channel_arg(ctx, args, "chaninfo") else {
        return Ok(());
    };
    let status = if ctx.session().joined_channels().contains(&channel) {
        "Joined"
    } else {
        "Not joined"
    };
    let saved = ctx
        .store()?
        .get_channels(ctx.session().network_id())?
        .contains(&channel);
    ctx.reply(format!(
        "Channel: {channel}\nStatus: {status}\nAuto-join: {}",
        if saved { "Yes" } else { "No" }
    ));
    Ok(())
}

fn chansave(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(channel) = channel_arg(ctx, args, "chansave") else {
        return Ok(());
    };
    let store = ctx.store()?;
    let network = ctx.session().network_id();
    if store.get_channels(network)?.contains(&channel) {
        ctx.reply(format!("Channel {channel} already saved"));
    } else {
        store.add_channel(network, &channel)?;
        ctx.reply(format!("Saved channel {channel} for auto-join"));
    }
    Ok(())
}

fn chanunsave(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(channel) = channel_arg(ctx, args, "chanunsave") else {
        return Ok(());
    };
    let store = ctx.store()?;
    let network = ctx.session().network_id();
    if store.get_channels(network)?.contains(&channel) {
        store.remove_channel(network, &channel)?;
        ctx.reply(format!("Removed {channel} from auto-join list"));
    } else {
        ctx.reply(format!("Channel {channel} not in auto-join list"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fancy_channel_list() {
        assert_eq!(
            format_channel_list(&[]),
            "I am not in any channels on this IRC network."
        );
        assert_eq!(
            format_channel_list(&names(&["#a"])),
            "I am just in #a on this IRC network."
        );
        assert_eq!(
            format_channel_list(&names(&["#a", "#b", "#c"])),
            "I am in #a, #b and #c on this IRC network, a total of 3 channels."
        );
    }
}
