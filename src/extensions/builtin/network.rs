//! Read-only view of the networks known to the database.

use crate::comm::Session;
use crate::extensions::{CommandContext, Exports, Extension};
use crate::store::NetworkRecord;

pub const NAME: &str = "network";

const SUBCOMMANDS: &str = "list, info, current";

pub struct Network;

impl Extension for Network {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Network information commands"
    }

    fn register(&self, exports: &mut Exports) -> anyhow::Result<()> {
        exports.command("network", network);
        Ok(())
    }
}

/// One line per network, or a notice when there are none.
pub fn format_network_list(networks: &[NetworkRecord]) -> String {
    if networks.is_empty() {
        return "No networks configured".to_string();
    }
    networks
        .iter()
        .map(|net| {
            format!(
                "ID: {}, Name: {}, Nicknames: {}, Trigger: {}",
                net.id,
                net.name,
                net.nicknames.join(", "),
                net.command_trigger
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Multi-line description of `net`.  Live details (nickname, channels) are
/// only shown for the network `session` is connected to.
pub fn format_network_info(net: &NetworkRecord, session: &dyn Session) -> String {
    let mut lines = vec![
        format!("Network: {} (ID: {})", net.name, net.id),
        format!("  Nicknames: {}", net.nicknames.join(", ")),
        format!("  Trigger: {}", net.command_trigger),
    ];
    if net.id != session.network_id() {
        lines.push("  Status: Not connected".to_string());
        return lines.join("\n");
    }
    lines.push("  Status: Connected".to_string());
    lines.push(format!("  Nickname: {}", session.nickname()));
    let channels = session.joined_channels();
    if !channels.is_empty() {
        lines.push(format!("  Channels: {}", channels.join(", ")));
    }
    lines.join("\n")
}

fn network(ctx: &CommandContext<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some((sub, rest)) = args.split_first() else {
        ctx.reply(format!("Usage: requires a subcommand: {SUBCOMMANDS}"));
        return Ok(());
    };
    let sub = sub.to_lowercase();
    if !matches!(sub.as_str(), "list" | "info" | "current") {
        ctx.reply(format!(
            "Error: unknown subcommand: {sub} - available: {SUBCOMMANDS}"
        ));
        return Ok(());
    }
    let Some(store) = ctx.services.store.as_deref() else {
        ctx.reply("Error: network database not available");
        return Ok(());
    };
    let networks = store.get_networks()?;
    let session = ctx.session().as_ref();

    match sub.as_str() {
        "list" => ctx.reply(format_network_list(&networks)),
        "info" => {
            let Some(raw) = rest.first() else {
                ctx.reply("Usage: network info NETWORK_ID");
                return Ok(());
            };
            let Ok(id) = raw.parse::<i64>() else {
                ctx.reply(format!("Error: invalid network ID: {raw}"));
                return Ok(());
            };
            match networks.iter().find(|n| n.id == id) {
                Some(net) => ctx.reply(format_network_info(net, session)),
                None => ctx.reply(format!("Error: network not found: {id}")),
            }
        }
        _ => {
            let current = session.network_id();
            match networks.iter().find(|n| n.id == current) {
                Some(net) => ctx.reply(format_network_info(net, session)),
                None => ctx.reply("Error: current network not found"),
            }
        }
    }
    Ok(())
}
