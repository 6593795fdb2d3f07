use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{io::ErrorKind, path::PathBuf, time::Duration};
use tokio::fs;
use tracing::{info, warn};

use crate::{config::Config, vote::VoteRules};

/// Configuración por servidor almacenada en JSON.
///
/// Los campos ausentes del archivo toman el valor por defecto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub default_volume: u16,
    pub min_repeats: u32,
    pub max_repeats: u32,
    pub leave_no_tracks_secs: u64,     // seconds
    pub leave_empty_channel_secs: u64, // seconds
    pub voting_percentage_ratio: u8,
    pub max_voting_secs: u64,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GuildSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_volume: config.default_volume,
            min_repeats: config.min_repeats,
            max_repeats: config.max_repeats,
            leave_no_tracks_secs: config.leave_no_tracks_secs,
            leave_empty_channel_secs: config.leave_empty_channel_secs,
            voting_percentage_ratio: config.voting_percentage_ratio,
            max_voting_secs: config.max_voting_secs,
        }
    }
}

impl GuildSettings {
    pub fn leave_no_tracks(&self) -> Duration {
        Duration::from_secs(self.leave_no_tracks_secs)
    }

    pub fn leave_empty_channel(&self) -> Duration {
        Duration::from_secs(self.leave_empty_channel_secs)
    }

    pub fn vote_rules(&self) -> VoteRules {
        VoteRules {
            ratio: self.voting_percentage_ratio,
            max_duration: Duration::from_secs(self.max_voting_secs),
        }
    }
}

/// Fuente de la configuración de cada servidor.
///
/// Se consulta cada vez que una operación la necesita; las
/// implementaciones no deben devolver valores viejos.
#[async_trait]
pub trait GuildSettingsProvider: Send + Sync {
    async fn guild_settings(&self, guild_id: GuildId) -> GuildSettings;
}

/// Misma configuración para todos los servidores
pub struct StaticSettings(pub GuildSettings);

#[async_trait]
impl GuildSettingsProvider for StaticSettings {
    async fn guild_settings(&self, _guild_id: GuildId) -> GuildSettings {
        self.0.clone()
    }
}

/// Configuración por servidor en `<data_dir>/guilds/guild_<id>.json`
pub struct JsonGuildSettings {
    data_dir: PathBuf,
    defaults: GuildSettings,
}

impl JsonGuildSettings {
    pub async fn new(data_dir: PathBuf, defaults: GuildSettings) -> Result<Self> {
        fs::create_dir_all(data_dir.join("guilds")).await?;
        info!("📁 Configuración de servidores en: {}", data_dir.display());
        Ok(Self { data_dir, defaults })
    }

    /// Guarda la configuración de un servidor
    pub async fn save(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<()> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.guild_file_path(guild_id), content).await?;
        info!("💾 Configuración actualizada para guild {}", guild_id);
        Ok(())
    }

    // Métodos privados

    async fn load(&self, guild_id: GuildId) -> Result<Option<GuildSettings>> {
        match fs::read_to_string(self.guild_file_path(guild_id)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn guild_file_path(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir.join("guilds").join(format!("guild_{}.json", guild_id))
    }
}

#[async_trait]
impl GuildSettingsProvider for JsonGuildSettings {
    async fn guild_settings(&self, guild_id: GuildId) -> GuildSettings {
        match self.load(guild_id).await {
            Ok(Some(settings)) => settings,
            Ok(None) => self.defaults.clone(),
            Err(e) => {
                warn!("Error cargando configuración para guild {}: {}", guild_id, e);
                self.defaults.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonGuildSettings::new(dir.path().to_path_buf(), GuildSettings::default())
            .await
            .unwrap();

        assert_eq!(store.guild_settings(GuildId::new(1)).await, GuildSettings::default());
    }

    #[tokio::test]
    async fn changes_on_disk_are_seen_on_next_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonGuildSettings::new(dir.path().to_path_buf(), GuildSettings::default())
            .await
            .unwrap();
        let guild = GuildId::new(42);

        let mut settings = GuildSettings::default();
        settings.leave_no_tracks_secs = 30;
        store.save(guild, &settings).await.unwrap();
        assert_eq!(store.guild_settings(guild).await.leave_no_tracks(), Duration::from_secs(30));

        settings.leave_no_tracks_secs = 90;
        store.save(guild, &settings).await.unwrap();
        assert_eq!(store.guild_settings(guild).await.leave_no_tracks(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn partial_and_corrupt_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonGuildSettings::new(dir.path().to_path_buf(), GuildSettings::default())
            .await
            .unwrap();

        fs::write(dir.path().join("guilds/guild_1.json"), r#"{ "voting_percentage_ratio": 75 }"#)
            .await
            .unwrap();
        fs::write(dir.path().join("guilds/guild_2.json"), "not json").await.unwrap();

        let partial = store.guild_settings(GuildId::new(1)).await;
        assert_eq!(partial.voting_percentage_ratio, 75);
        assert_eq!(partial.max_voting_secs, 60);

        assert_eq!(store.guild_settings(GuildId::new(2)).await, GuildSettings::default());
    }
}
