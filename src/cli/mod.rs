//! CLI subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the work lives here.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bot::{Bot, INBOUND_CAPACITY};
use crate::config::Config;
use crate::console;
use crate::extensions::ExtensionCatalog;
use crate::store::Store;

// ── Setup ────────────────────────────────────────────────────────────────────

/// Prepare a fresh installation: write a starter config when none exists,
/// create the database schema and network row, and enable the default
/// extensions for the network.
pub async fn setup(config_path: &Path, home: &Path) -> anyhow::Result<()> {
    let config = if tokio::fs::try_exists(config_path).await.unwrap_or(false) {
        Config::load(config_path).await?
    } else {
        let config = Config::example();
        config.save(config_path).await?;
        println!("Wrote starter config to {}", config_path.display());
        config
    };

    let db_path = config.database_path(home);
    let store = Store::open(&db_path)?;
    store
        .upsert_network(&config.network.to_record())
        .context("failed to record network")?;

    let catalog = ExtensionCatalog::builtin();
    for name in &config.default_extensions {
        if !catalog.contains(name) {
            anyhow::bail!("default extension '{}' is not available", name);
        }
        store.set_extension_enabled(config.network.id, name, true)?;
    }

    println!(
        "Database ready at {} (network '{}', extensions: {})",
        db_path.display(),
        config.network.name,
        config.default_extensions.join(", ")
    );
    Ok(())
}

// ── Extensions ───────────────────────────────────────────────────────────────

/// Render the compiled-in catalog: one line per extension with its
/// description and exported commands.
pub fn describe_catalog(catalog: &ExtensionCatalog) -> Vec<String> {
    let mut lines = Vec::new();
    for name in catalog.names() {
        let Some(extension) = catalog.create(&name) else {
            continue;
        };
        let mut exports = crate::extensions::Exports::new();
        let commands = match extension.register(&mut exports) {
            Ok(()) => {
                let values = exports
                    .value_names()
                    .map(|v| format!(" ${v}"))
                    .collect::<String>();
                format!(
                    "{}{values}",
                    exports.command_names().collect::<Vec<_>>().join(", ")
                )
            }
            Err(e) => format!("(unavailable: {e})"),
        };
        lines.push(format!(
            "{name:<10} {}  [{commands}]",
            extension.description()
        ));
    }
    lines
}

pub fn list_extensions() -> anyhow::Result<()> {
    for line in describe_catalog(&ExtensionCatalog::builtin()) {
        println!("{line}");
    }
    Ok(())
}

// ── Start ────────────────────────────────────────────────────────────────────

/// Run the bot on the console transport until stdin closes or Ctrl-C.
pub async fn start(config: Config, home: &Path) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&config.database_path(home))?);
    store.upsert_network(&config.network.to_record())?;

    let me = config.network.primary_nickname().to_string();
    let (bot, outgoing) = Bot::new(config, Some(store), ExtensionCatalog::builtin());
    let (events_tx, events_rx) = mpsc::channel(INBOUND_CAPACITY);
    let shutdown = CancellationToken::new();

    let _writer = console::spawn_writer(outgoing, events_tx.clone());
    let reader = console::spawn_reader(events_tx, me, shutdown.clone());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C, shutting down…");
                shutdown.cancel();
            }
        });
    }

    bot.run(events_rx, shutdown.clone()).await?;
    shutdown.cancel();
    reader.await.context("console reader panicked")??;
    info!("shutdown complete");
    Ok(())
}
