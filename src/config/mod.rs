use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::extensions::builtin::DEFAULT_EXTENSIONS;
use crate::store::NetworkRecord;

/// The network this bot instance serves.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Database id; keys saved channels and extension enablement.
    #[serde(default = "default_network_id")]
    pub id: i64,
    pub name: String,
    /// Preferred nickname first, then fallbacks tried on collision.
    pub nicknames: Vec<String>,
    /// Prefix marking a channel line as a command.
    #[serde(default = "default_trigger")]
    pub command_trigger: String,
}

impl NetworkConfig {
    pub fn primary_nickname(&self) -> &str {
        self.nicknames.first().map(String::as_str).unwrap_or_default()
    }

    /// Nickname to try after `current` was rejected, cycling through the
    /// configured list and then appending underscores.
    pub fn alternate_nickname(&self, current: &str) -> String {
        match self.nicknames.iter().position(|n| n == current) {
            Some(i) if i + 1 < self.nicknames.len() => self.nicknames[i + 1].clone(),
            _ => format!("{current}_"),
        }
    }

    pub fn to_record(&self) -> NetworkRecord {
        NetworkRecord {
            id: self.id,
            name: self.name.clone(),
            nicknames: self.nicknames.clone(),
            command_trigger: self.command_trigger.clone(),
        }
    }
}

fn default_network_id() -> i64 {
    1
}

fn default_trigger() -> String {
    "!".to_string()
}

fn default_database() -> String {
    "servicex.db".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// Top-level configuration loaded from `config.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub network: NetworkConfig,
    /// SQLite database path.  Relative paths resolve against the servicex
    /// home directory.
    #[serde(default = "default_database")]
    pub database: String,
    /// Directory for the daily log file.  Relative paths resolve against
    /// the servicex home directory.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Extensions loaded when the network has none enabled in the database.
    #[serde(default = "default_extensions")]
    pub default_extensions: Vec<String>,
}

impl Config {
    /// A starter configuration, written by `servicex setup` when no config
    /// exists yet.
    pub fn example() -> Self {
        Self {
            network: NetworkConfig {
                id: default_network_id(),
                name: "local".to_string(),
                nicknames: vec!["ServiceX".to_string(), "ServiceX_".to_string()],
                command_trigger: default_trigger(),
            },
            database: default_database(),
            log_dir: default_log_dir(),
            default_extensions: default_extensions(),
        }
    }

    /// Load and validate configuration from a YAML file.
    ///
    /// A missing file falls back to `<path>.bak` when one exists.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut bak_name = path.as_os_str().to_os_string();
                bak_name.push(".bak");
                let bak_path = PathBuf::from(bak_name);
                match tokio::fs::read_to_string(&bak_path).await {
                    Ok(c) => {
                        tracing::warn!(
                            path = %path.display(),
                            bak = %bak_path.display(),
                            "config file not found, falling back to .bak"
                        );
                        c
                    }
                    Err(_) => {
                        return Err(e).with_context(|| {
                            format!("failed to read config file: {}", path.display())
                        });
                    }
                }
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        let config = Self::from_yaml(&contents)?;
        tracing::debug!(
            network = %config.network.name,
            extensions = config.default_extensions.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        let config: Config =
            serde_yaml_ng::from_str(contents).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic constraints that serde cannot enforce.
    fn validate(&self) -> anyhow::Result<()> {
        use std::collections::HashSet;

        if self.network.command_trigger.trim().is_empty() {
            anyhow::bail!("config: network.command_trigger must not be empty");
        }
        if self.network.nicknames.is_empty() {
            anyhow::bail!("config: network.nicknames must list at least one nickname");
        }
        if let Some(bad) = self
            .network
            .nicknames
            .iter()
            .find(|n| n.is_empty() || n.contains(char::is_whitespace))
        {
            anyhow::bail!("config: invalid nickname '{}'", bad);
        }

        let mut seen = HashSet::new();
        for name in &self.default_extensions {
            if !seen.insert(name.as_str()) {
                anyhow::bail!("config: duplicate default extension: {}", name);
            }
        }
        Ok(())
    }

    /// Database path, resolved against `home` when relative.
    pub fn database_path(&self, home: &Path) -> PathBuf {
        resolve(home, &self.database)
    }

    /// Log directory, resolved against `home` when relative.
    pub fn log_dir_path(&self, home: &Path) -> PathBuf {
        resolve(home, &self.log_dir)
    }

    /// Serialize the config back to YAML and write it to `path`.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_yaml_ng::to_string(self).context("serialize config YAML")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, &contents)
            .await
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

fn resolve(home: &Path, p: &str) -> PathBuf {
    let path = Path::new(p);
    if path.is_relative() {
        home.join(path)
    } else {
        path.to_path_buf()
    }
}
