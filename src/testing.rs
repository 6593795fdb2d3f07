//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

use crate::{
    audio::{scheduler::SchedulerContext, track::Track},
    error::NodeError,
    node::{
        transport::{AudioNodeTransport, LoadResult, NodeEvent, NodeStats, PlayerSnapshot, PlayerUpdate},
        Link, NodeSelector,
    },
    notify::{ChannelNotifier, GuildNotification, Notification},
};

/// Nodo en memoria que aplica las peticiones y recuerda cada una
#[derive(Default)]
pub struct FakeNode {
    players: DashMap<GuildId, PlayerSnapshot>,
    updates: Mutex<Vec<(GuildId, PlayerUpdate)>>,
    loads: Mutex<HashMap<String, LoadResult>>,
    destroyed: Mutex<Vec<GuildId>>,
    failing: AtomicBool,
    stalled_destroy: AtomicBool,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_load(&self, identifier: &str, result: LoadResult) {
        self.loads.lock().insert(identifier.to_string(), result);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `destroy_player` no responde nunca mientras esté activo
    pub fn stall_destroy(&self, stalled: bool) {
        self.stalled_destroy.store(stalled, Ordering::SeqCst);
    }

    pub fn player(&self, guild_id: GuildId) -> PlayerSnapshot {
        self.players.get(&guild_id).map(|p| p.clone()).unwrap_or_default()
    }

    pub fn updates(&self, guild_id: GuildId) -> Vec<PlayerUpdate> {
        self.updates
            .lock()
            .iter()
            .filter(|(guild, _)| *guild == guild_id)
            .map(|(_, update)| update.clone())
            .collect()
    }

    pub fn destroyed(&self) -> Vec<GuildId> {
        self.destroyed.lock().clone()
    }
}

#[async_trait]
impl AudioNodeTransport for FakeNode {
    async fn load_item(&self, identifier: &str) -> Result<LoadResult, NodeError> {
        Ok(self.loads.lock().get(identifier).cloned().unwrap_or(LoadResult::Empty))
    }

    async fn update_player(&self, guild_id: GuildId, update: PlayerUpdate) -> Result<PlayerSnapshot, NodeError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NodeError::Transport {
                node: "fake".to_string(),
                message: "rejected".to_string(),
            });
        }
        self.updates.lock().push((guild_id, update.clone()));
        let mut player = self.players.entry(guild_id).or_default();
        player.apply(&update);
        Ok(player.clone())
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        if self.stalled_destroy.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.players.remove(&guild_id);
        self.destroyed.lock().push(guild_id);
        Ok(())
    }

    async fn stats(&self) -> Result<NodeStats, NodeError> {
        Ok(NodeStats::default())
    }
}

pub fn track(id: &str) -> Track {
    Track::new(id, format!("enc-{id}"), format!("Song {id}")).with_duration(Duration::from_secs(180))
}

/// Espera (con tiempo simulado o real) hasta que se cumpla la condición
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not met in time");
}

pub async fn next_notification(receiver: &mut mpsc::UnboundedReceiver<GuildNotification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(30), receiver.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
        .notification
}

/// Link real sobre un [`FakeNode`] para probar schedulers y sesiones
pub struct Harness {
    pub selector: Arc<NodeSelector>,
    pub node: Arc<FakeNode>,
    pub link: Arc<Link>,
    notifier: ChannelNotifier,
    notifications: mpsc::UnboundedReceiver<GuildNotification>,
    _events: mpsc::UnboundedReceiver<NodeEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let (selector, events) = NodeSelector::new();
        let node = FakeNode::new();
        selector.add_node("fake", node.clone());
        let link = selector
            .get_or_create_link(harness_guild())
            .expect("fake node is available");
        let (notifier, notifications) = ChannelNotifier::new();
        Self {
            selector,
            node,
            link,
            notifier,
            notifications,
            _events: events,
        }
    }

    pub fn ctx(&self) -> SchedulerContext<'_> {
        SchedulerContext::new(harness_guild(), &self.link, &self.notifier)
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Ok(next) = self.notifications.try_recv() {
            drained.push(next.notification);
        }
        drained
    }
}

pub fn harness_guild() -> GuildId {
    GuildId::new(777)
}
