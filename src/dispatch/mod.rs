//! Inbound command pipeline.
//!
//! For each chat line the [`Dispatcher`] decides whether it is a command
//! (channel lines must start with the trigger; private lines need not),
//! splits it with shell-style quoting, and hands the command name and
//! arguments to the [`ExtensionRegistry`](crate::extensions::ExtensionRegistry).
//! It keeps no state of its own.

mod tokenize;

pub use tokenize::{tokenize, ParseError};

use std::sync::Arc;

use tracing::{debug, info};

use crate::comm::InboundMessage;
use crate::extensions::{CommandContext, Services};

/// Notice sent when a line has an unterminated quote.
pub const QUOTE_ERROR_REPLY: &str = "Missing closing quotation mark";
/// Notice sent when no loaded extension provides the command.
pub const NOT_FOUND_REPLY: &str = "Command not found";

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Where the reply goes.
    pub target: String,
    pub requester: String,
    pub command: String,
    pub args: Vec<String>,
}

/// What happened to an inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not a command, empty, or unparsable for reasons not reported.
    Ignored,
    /// Unterminated quote; the requester was told.
    QuoteError,
    /// No handler for this command; the requester was told.
    NotFound(String),
    Executed(String),
}

/// Recognise and tokenize a command line.  `Ok(None)` means the line is not
/// a command.
pub fn parse(msg: &InboundMessage, trigger: &str) -> Result<Option<CommandInvocation>, ParseError> {
    // The trigger must open the line; only trailing whitespace is dropped.
    let text = msg.text.trim_end();
    if text.is_empty() {
        return Ok(None);
    }
    let body = match text.strip_prefix(trigger) {
        Some(rest) if !trigger.is_empty() => rest,
        _ if msg.private => text,
        _ => return Ok(None),
    };

    let mut words = tokenize(body)?.into_iter();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    Ok(Some(CommandInvocation {
        target: msg.reply_target().to_string(),
        requester: msg.sender.clone(),
        command,
        args: words.collect(),
    }))
}

/// Routes inbound lines to command handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    services: Arc<Services>,
}

impl Dispatcher {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Process one inbound line.
    pub fn handle(&self, msg: &InboundMessage) -> Outcome {
        let invocation = match parse(msg, &self.services.trigger) {
            Ok(Some(invocation)) => invocation,
            Ok(None) => return Outcome::Ignored,
            Err(ParseError::UnterminatedQuote) => {
                info!(sender = %msg.sender, channel = %msg.channel, "unterminated quote in command");
                CommandContext::new(&self.services, msg.reply_target(), &msg.sender)
                    .reply(QUOTE_ERROR_REPLY);
                return Outcome::QuoteError;
            }
            Err(e) => {
                debug!(sender = %msg.sender, error = %e, "unparsable command dropped");
                return Outcome::Ignored;
            }
        };

        let ctx = CommandContext::new(&self.services, &invocation.target, &invocation.requester);
        if self
            .services
            .extensions
            .dispatch(&invocation.command, &ctx, &invocation.args)
        {
            info!(command = %invocation.command, requester = %invocation.requester,
                  target = %invocation.target, "executed command");
            Outcome::Executed(invocation.command)
        } else {
            info!(command = %invocation.command, requester = %invocation.requester,
                  "unknown command");
            ctx.reply(NOT_FOUND_REPLY);
            Outcome::NotFound(invocation.command)
        }
    }
}
