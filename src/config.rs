use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Nodo de audio declarado en `AUDIO_NODES` (`nombre=url`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeDefinition {
    pub name: String,
    pub url: Url,
}

impl NodeDefinition {
    /// Parsea una lista `nombre=url` separada por comas
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (name, url) = entry
                    .split_once('=')
                    .with_context(|| format!("Nodo inválido '{}', se esperaba nombre=url", entry))?;
                Ok(Self {
                    name: name.trim().to_string(),
                    url: Url::parse(url.trim()).with_context(|| format!("URL inválida para el nodo {}", name))?,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Búsqueda
    pub search_prefix: String,

    // Audio
    pub default_volume: u16,
    pub min_volume: u16,
    pub max_volume: u16,
    pub min_repeats: u32,
    pub max_repeats: u32,

    // Inactividad
    pub leave_no_tracks_secs: u64,     // En segundos
    pub leave_empty_channel_secs: u64, // En segundos

    // Votaciones
    pub voting_percentage_ratio: u8,
    pub max_voting_secs: u64,

    // Nodos
    pub node_health_interval_ms: u64,
    pub audio_nodes: Vec<NodeDefinition>,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            search_prefix: var("SEARCH_PREFIX").unwrap_or_else(|| "ytsearch:".to_string()),

            default_volume: var("DEFAULT_VOLUME")
                .unwrap_or_else(|| "100".to_string())
                .parse()?,
            min_volume: var("MIN_VOLUME").unwrap_or_else(|| "0".to_string()).parse()?,
            max_volume: var("MAX_VOLUME").unwrap_or_else(|| "150".to_string()).parse()?,
            min_repeats: var("MIN_REPEATS").unwrap_or_else(|| "1".to_string()).parse()?,
            max_repeats: var("MAX_REPEATS").unwrap_or_else(|| "30".to_string()).parse()?,

            leave_no_tracks_secs: var("LEAVE_NO_TRACKS_SECS")
                .unwrap_or_else(|| "300".to_string()) // 5 minutos
                .parse()?,
            leave_empty_channel_secs: var("LEAVE_EMPTY_CHANNEL_SECS")
                .unwrap_or_else(|| "120".to_string())
                .parse()?,

            voting_percentage_ratio: var("VOTING_PERCENTAGE_RATIO")
                .unwrap_or_else(|| "50".to_string())
                .parse()?,
            max_voting_secs: var("MAX_VOTING_SECS")
                .unwrap_or_else(|| "60".to_string())
                .parse()?,

            node_health_interval_ms: var("NODE_HEALTH_INTERVAL_MS")
                .unwrap_or_else(|| "5000".to_string())
                .parse()?,
            audio_nodes: match var("AUDIO_NODES") {
                Some(raw) if !raw.trim().is_empty() => NodeDefinition::parse_list(&raw)?,
                _ => Vec::new(),
            },

            data_dir: var("DATA_DIR").unwrap_or_else(|| "./data".to_string()).into(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume bounds must be ordered and contain the default volume
    /// - Repeat bounds must be ordered and start at 1 or more
    /// - Voting ratio is a percentage (1-100)
    /// - Timeouts and the health interval must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.min_volume > self.max_volume {
            anyhow::bail!("MIN_VOLUME ({}) cannot exceed MAX_VOLUME ({})", self.min_volume, self.max_volume);
        }

        if !(self.min_volume..=self.max_volume).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between {} and {}, got: {}",
                self.min_volume,
                self.max_volume,
                self.default_volume
            );
        }

        if self.min_repeats == 0 || self.min_repeats > self.max_repeats {
            anyhow::bail!("Invalid repeat bounds: {}..={}", self.min_repeats, self.max_repeats);
        }

        if self.voting_percentage_ratio == 0 || self.voting_percentage_ratio > 100 {
            anyhow::bail!("Voting ratio must be between 1 and 100, got: {}", self.voting_percentage_ratio);
        }

        if self.leave_no_tracks_secs == 0 || self.leave_empty_channel_secs == 0 || self.max_voting_secs == 0 {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        if self.node_health_interval_ms == 0 {
            anyhow::bail!("Node health interval must be greater than 0");
        }

        Ok(())
    }

    pub fn node_health_interval(&self) -> Duration {
        Duration::from_millis(self.node_health_interval_ms)
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Search: prefix '{}'\n  \
            Audio: {}% vol ({}-{}), repeats {}-{}\n  \
            Leave: {}s without tracks, {}s alone\n  \
            Voting: {}% in {}s\n  \
            Nodes: {} ({}ms health checks)",
            self.search_prefix,
            self.default_volume,
            self.min_volume,
            self.max_volume,
            self.min_repeats,
            self.max_repeats,
            self.leave_no_tracks_secs,
            self.leave_empty_channel_secs,
            self.voting_percentage_ratio,
            self.max_voting_secs,
            self.audio_nodes
                .iter()
                .map(|node| node.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.node_health_interval_ms
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            search_prefix: "ytsearch:".to_string(),

            default_volume: 100,
            min_volume: 0,
            max_volume: 150,
            min_repeats: 1,
            max_repeats: 30,

            leave_no_tracks_secs: 300,
            leave_empty_channel_secs: 120,

            voting_percentage_ratio: 50,
            max_voting_secs: 60,

            node_health_interval_ms: 5000,
            audio_nodes: Vec::new(),

            data_dir: "./data".into(),
        }
    }
}
