//! # Guild Playback
//!
//! Per-guild playback scheduling for a Discord music bot whose audio is
//! decoded by remote audio nodes.
//!
//! ## Modules
//!
//! - [`audio`]: queue, repeat policy, schedulers and fault classification
//! - [`node`]: node registry, penalty balancing and per-guild links
//! - [`session`]: guild sessions, the command façade and the event loop
//! - [`mutation`]: turns node responses into command outcomes
//! - [`eviction`]: inactivity timer that makes the bot leave idle guilds
//! - [`vote`]: quorum votes that gate shared-queue commands
//! - [`notify`]: structured notifications for the response layer
//! - [`config`] / [`settings`]: process configuration and per-guild settings
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_playback::{
//!     config::Config, node::NodeSelector, notify::ChannelNotifier, session::AudioSessions,
//!     settings::JsonGuildSettings,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! guild_playback::logging::init()?;
//! let config = Arc::new(Config::load()?);
//!
//! let (nodes, node_events) = NodeSelector::new();
//! for node in &config.audio_nodes {
//!     println!("registrar {} en {}", node.name, node.url);
//!     // nodes.add_node(&node.name, transport_for(&node.url));
//! }
//! let shutdown = CancellationToken::new();
//! nodes.spawn_health_monitor(config.node_health_interval(), shutdown.clone());
//!
//! let (notifier, mut notifications) = ChannelNotifier::new();
//! let settings = JsonGuildSettings::new(config.data_dir.clone(), config.as_ref().into()).await?;
//! let sessions = AudioSessions::start(config, nodes, node_events, Arc::new(notifier), Arc::new(settings));
//!
//! while let Some(event) = notifications.recv().await {
//!     println!("{}: {:?}", event.guild_id, event.notification);
//! }
//! # drop(sessions);
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod eviction;
pub mod logging;
pub mod mutation;
pub mod node;
pub mod notify;
pub mod session;
pub mod settings;
pub mod vote;

#[cfg(test)]
mod testing;
