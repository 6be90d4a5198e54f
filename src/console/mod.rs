//! stdin/stdout transport for running the bot locally.
//!
//! Each input line is a chat line from the console user:
//! `#channel> text` speaks in a channel, anything else is a private
//! message to the bot.  Outgoing actions are printed, and joins, parts and
//! nick changes are confirmed straight back to the bot as if a server had
//! accepted them.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::comm::{InboundEvent, InboundMessage, Outgoing};

/// Nickname the console user speaks as.
pub const CONSOLE_USER: &str = "console";

/// Turn one input line into a chat message.  Blank lines yield `None`.
pub fn parse_line(line: &str, user: &str, me: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('#') {
        if let Some((channel, text)) = line.split_once("> ") {
            if !channel.contains(char::is_whitespace) {
                return Some(InboundMessage::channel(channel, user, text));
            }
        }
    }
    Some(InboundMessage::private(me, user, line))
}

/// Render an outgoing action for the terminal.
pub fn render(action: &Outgoing) -> String {
    match action {
        Outgoing::Message { target, text } => format!("[{target}] {text}"),
        Outgoing::Join { channel } => format!("* joining {channel}"),
        Outgoing::Part { channel } => format!("* leaving {channel}"),
        Outgoing::Nick { nickname } => format!("* now known as {nickname}"),
    }
}

/// The event a server would send back after carrying out `action`.
fn confirmation(action: &Outgoing) -> Option<InboundEvent> {
    match action {
        Outgoing::Message { .. } => None,
        Outgoing::Join { channel } => Some(InboundEvent::Joined(channel.clone())),
        Outgoing::Part { channel } => Some(InboundEvent::Parted(channel.clone())),
        Outgoing::Nick { nickname } => Some(InboundEvent::NickChanged(nickname.clone())),
    }
}

/// Print outgoing actions and confirm them back to the bot.
pub fn spawn_writer(
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::Sender<InboundEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(action) = outgoing.recv().await {
            println!("{}", render(&action));
            if let Some(event) = confirmation(&action) {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
        debug!("console writer finished");
    })
}

/// Read stdin until EOF or shutdown, feeding the bot connect, sign-on and
/// message events.
pub fn spawn_reader(
    events: mpsc::Sender<InboundEvent>,
    me: String,
    shutdown: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        events.send(InboundEvent::Connected).await?;
        events.send(InboundEvent::SignedOn).await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(msg) = parse_line(&line, CONSOLE_USER, &me) {
                            events.send(InboundEvent::Message(msg)).await?;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = events.send(InboundEvent::Disconnected).await;
        debug!("console reader finished");
        Ok(())
    })
}
