//! Chat session layer.
//!
//! Provides [`InboundMessage`] -- the envelope a transport produces for each
//! line of chat -- and the [`Session`] trait through which command handlers
//! and task callbacks talk back to the network.
//!
//! [`OutboundSession`] is the in-process implementation: every call queues an
//! [`Outgoing`] action on an unbounded channel that the transport drains, so
//! nothing on the control loop ever blocks on I/O.  The transport reports
//! what actually happened (joins, parts, nick changes) back through
//! [`InboundEvent`]s, and the session's view of joined channels follows
//! those reports rather than the requests.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One line of chat received from the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel the line arrived on.  For private messages this is the
    /// bot's own nickname.
    pub channel: String,
    /// Nickname of the author.
    pub sender: String,
    /// Raw message text.
    pub text: String,
    /// True for a one-to-one exchange with the bot.
    #[serde(default)]
    pub private: bool,
}

impl InboundMessage {
    pub fn channel(channel: impl Into<String>, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            sender: sender.into(),
            text: text.into(),
            private: false,
        }
    }

    pub fn private(me: impl Into<String>, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: me.into(),
            sender: sender.into(),
            text: text.into(),
            private: true,
        }
    }

    /// Where replies to this message go: the author for private messages,
    /// otherwise the channel.
    pub fn reply_target(&self) -> &str {
        if self.private {
            &self.sender
        } else {
            &self.channel
        }
    }
}

/// Events a transport feeds to the bot's control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Connection established; extensions are loaded at this point.
    Connected,
    /// Registration with the network finished; saved channels are joined.
    SignedOn,
    Message(InboundMessage),
    Joined(String),
    Parted(String),
    NickChanged(String),
    /// The requested nickname is taken.
    NickInUse(String),
    Disconnected,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// An action requested of the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outgoing {
    Message { target: String, text: String },
    Join { channel: String },
    Part { channel: String },
    Nick { nickname: String },
}

/// The chat session as seen by handlers and task callbacks.
///
/// All methods are non-blocking.
pub trait Session: Send + Sync {
    /// Send `text` to `target`.  Text containing newlines goes out as one
    /// message per line.
    fn send(&self, target: &str, text: &str);

    /// Currently joined channels, in join order.
    fn joined_channels(&self) -> Vec<String>;

    /// Database id of the network this session is connected to.
    fn network_id(&self) -> i64;

    fn nickname(&self) -> String;

    fn join(&self, channel: &str);

    fn part(&self, channel: &str);

    fn set_nickname(&self, nickname: &str);
}

#[derive(Debug)]
struct SessionState {
    nickname: String,
    channels: Vec<String>,
}

/// [`Session`] that queues [`Outgoing`] actions for a transport.
#[derive(Debug)]
pub struct OutboundSession {
    network_id: i64,
    state: RwLock<SessionState>,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl OutboundSession {
    /// Create a session and the receiver the transport drains.
    pub fn new(
        network_id: i64,
        nickname: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            network_id,
            state: RwLock::new(SessionState {
                nickname: nickname.into(),
                channels: Vec::new(),
            }),
            tx,
        };
        (session, rx)
    }

    fn queue(&self, action: Outgoing) {
        trace!(?action, "queue outgoing");
        if self.tx.send(action).is_err() {
            debug!("transport gone, outgoing action dropped");
        }
    }

    /// Record a join confirmed by the transport.
    pub fn joined(&self, channel: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.channels.iter().any(|c| c == channel) {
            state.channels.push(channel.to_string());
        }
    }

    /// Record a part confirmed by the transport.
    pub fn left(&self, channel: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.channels.retain(|c| c != channel);
    }

    /// Record a nickname change confirmed by the transport.
    pub fn nick_changed(&self, nickname: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.nickname = nickname.to_string();
    }

    /// Forget all joined channels (connection lost).
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.channels.clear();
    }

    pub fn is_joined(&self, channel: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.channels.iter().any(|c| c == channel)
    }
}

impl Session for OutboundSession {
    fn send(&self, target: &str, text: &str) {
        for line in text.split('\n') {
            self.queue(Outgoing::Message {
                target: target.to_string(),
                text: line.trim_end_matches('\r').to_string(),
            });
        }
    }

    fn joined_channels(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.channels.clone()
    }

    fn network_id(&self) -> i64 {
        self.network_id
    }

    fn nickname(&self) -> String {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.nickname.clone()
    }

    fn join(&self, channel: &str) {
        self.queue(Outgoing::Join {
            channel: channel.to_string(),
        });
    }

    fn part(&self, channel: &str) {
        self.queue(Outgoing::Part {
            channel: channel.to_string(),
        });
    }

    fn set_nickname(&self, nickname: &str) {
        self.queue(Outgoing::Nick {
            nickname: nickname.to_string(),
        });
    }
}

/// Drain everything currently queued on `rx` without waiting.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Outgoing> {
    let mut out = Vec::new();
    while let Ok(action) = rx.try_recv() {
        out.push(action);
    }
    out
}
