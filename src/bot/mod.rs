//! The bot runtime.
//!
//! [`Bot`] wires the session, scheduler, extension registry and store
//! together and owns the single control loop.  Inbound transport events and
//! timer events are both consumed by [`Bot::run`], so every scheduler
//! transition, registry mutation and command invocation happens on one
//! task, one at a time.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::comm::{InboundEvent, OutboundSession, Outgoing, Session};
use crate::config::Config;
use crate::dispatch::{Dispatcher, Outcome};
use crate::extensions::{ExtensionCatalog, ExtensionError, ExtensionRegistry, Services};
use crate::scheduler::{Scheduler, TimerEvents};
use crate::store::Store;

/// Capacity of the inbound event channel handed to transports.
pub const INBOUND_CAPACITY: usize = 256;

pub struct Bot {
    config: Config,
    session: Arc<OutboundSession>,
    dispatcher: Dispatcher,
    timer_events: TimerEvents,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("network", &self.config.network.name)
            .field("services", self.dispatcher.services())
            .finish_non_exhaustive()
    }
}

impl Bot {
    /// Build a bot for `config`.  Returns the bot and the queue of actions
    /// the transport must carry out.
    pub fn new(
        config: Config,
        store: Option<Arc<Store>>,
        catalog: ExtensionCatalog,
    ) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (session, outgoing) =
            OutboundSession::new(config.network.id, config.network.primary_nickname());
        let session = Arc::new(session);
        let (scheduler, timer_events) = Scheduler::new();

        let services = Arc::new(Services {
            session: session.clone(),
            scheduler: Arc::new(scheduler),
            extensions: Arc::new(ExtensionRegistry::new(catalog)),
            store,
            trigger: config.network.command_trigger.clone(),
        });

        let bot = Self {
            config,
            session,
            dispatcher: Dispatcher::new(services),
            timer_events,
        };
        (bot, outgoing)
    }

    pub fn services(&self) -> &Arc<Services> {
        self.dispatcher.services()
    }

    pub fn session(&self) -> &Arc<OutboundSession> {
        &self.session
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Extensions to load on connect: those enabled for this network, or
    /// the configured defaults when none are.
    fn startup_extensions(&self) -> Vec<String> {
        let network = self.config.network.id;
        let enabled = match &self.services().store {
            Some(store) => store.get_enabled_extensions(network).unwrap_or_else(|e| {
                warn!(network, error = %e, "failed to read enabled extensions");
                Vec::new()
            }),
            None => Vec::new(),
        };
        if enabled.is_empty() {
            self.config.default_extensions.clone()
        } else {
            enabled
        }
    }

    /// Connection established: load extensions.  Returns how many were
    /// newly loaded.
    pub fn on_connected(&self) -> usize {
        info!(network = %self.config.network.name, "connected");
        let registry = &self.services().extensions;
        let mut loaded = 0;
        for name in self.startup_extensions() {
            match registry.load(&name) {
                Ok(()) => loaded += 1,
                Err(ExtensionError::AlreadyLoaded(_)) => {
                    debug!(extension = %name, "already loaded from a previous connection");
                }
                Err(e) => warn!(extension = %name, error = %e, "startup load failed"),
            }
        }
        loaded
    }

    /// Signed on: rejoin the saved channels.
    pub fn on_signed_on(&self) {
        let Some(store) = &self.services().store else {
            return;
        };
        match store.get_channels(self.config.network.id) {
            Ok(channels) => {
                for channel in channels {
                    if self.session.is_joined(&channel) {
                        info!(channel = %channel, "already in channel");
                    } else {
                        info!(channel = %channel, "joining saved channel");
                        self.session.join(&channel);
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to read saved channels"),
        }
    }

    /// Connection lost: stop every active task and forget joined channels.
    pub fn on_disconnected(&self) {
        let stopped = self.services().scheduler.stop_all();
        self.session.reset();
        warn!(network = %self.config.network.name, tasks_stopped = stopped, "disconnected");
    }

    /// Apply one transport event.  Returns the dispatch outcome for chat
    /// lines.
    pub fn handle_event(&self, event: InboundEvent) -> Option<Outcome> {
        match event {
            InboundEvent::Connected => {
                self.on_connected();
            }
            InboundEvent::SignedOn => self.on_signed_on(),
            InboundEvent::Message(msg) => return Some(self.dispatcher.handle(&msg)),
            InboundEvent::Joined(channel) => {
                info!(channel = %channel, "joined channel");
                self.session.joined(&channel);
            }
            InboundEvent::Parted(channel) => {
                info!(channel = %channel, "left channel");
                self.session.left(&channel);
            }
            InboundEvent::NickChanged(nick) => {
                info!(nickname = %nick, "nickname changed");
                self.session.nick_changed(&nick);
            }
            InboundEvent::NickInUse(nick) => {
                let next = self.config.network.alternate_nickname(&nick);
                warn!(rejected = %nick, trying = %next, "nickname in use");
                self.session.set_nickname(&next);
            }
            InboundEvent::Disconnected => self.on_disconnected(),
        }
        None
    }

    /// Drive the bot until the inbound channel closes or `shutdown` fires.
    /// All active tasks are stopped on exit.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<InboundEvent>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!(network = %self.config.network.name, "control loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                event = inbound.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => {
                        info!("transport closed");
                        break;
                    }
                },
                Some(timer) = self.timer_events.recv() => {
                    self.services().scheduler.fire(timer);
                }
            }
        }
        let stopped = self.services().scheduler.stop_all();
        info!(tasks_stopped = stopped, "control loop finished");
        Ok(())
    }
}
