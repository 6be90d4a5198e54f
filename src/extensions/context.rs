use std::sync::Arc;

use anyhow::anyhow;

use crate::comm::Session;
use crate::extensions::ExtensionRegistry;
use crate::scheduler::Scheduler;
use crate::store::Store;

/// Long-lived collaborators shared by every command invocation.
#[derive(Clone)]
pub struct Services {
    pub session: Arc<dyn Session>,
    pub scheduler: Arc<Scheduler>,
    pub extensions: Arc<ExtensionRegistry>,
    /// Absent when running without a database.
    pub store: Option<Arc<Store>>,
    /// Prefix marking a channel line as a command.
    pub trigger: String,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("network_id", &self.session.network_id())
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

/// Execution context handed to every command handler.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub services: &'a Services,
    /// Where replies go (channel, or the requester for private messages).
    pub target: &'a str,
    /// Nickname of whoever issued the command.
    pub requester: &'a str,
}

impl<'a> CommandContext<'a> {
    pub fn new(services: &'a Services, target: &'a str, requester: &'a str) -> Self {
        Self {
            services,
            target,
            requester,
        }
    }

    /// Reply to the requester, addressed by nickname.
    pub fn reply(&self, text: impl AsRef<str>) {
        let text = format!("{}: {}", self.requester, text.as_ref());
        self.services.session.send(self.target, &text);
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.services.session
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.services.scheduler
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.services.extensions
    }

    pub fn store(&self) -> anyhow::Result<&Store> {
        self.services
            .store
            .as_deref()
            .ok_or_else(|| anyhow!("no database configured"))
    }

    /// True when the command arrived in a channel rather than privately.
    pub fn in_channel(&self) -> bool {
        self.target.starts_with('#')
    }
}
