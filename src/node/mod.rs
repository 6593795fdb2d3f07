//! # Audio Nodes
//!
//! Client side of the remote audio nodes that actually decode and stream
//! audio to Discord.
//!
//! ## Components
//!
//! ### [`NodeSelector`]
//! - Registry of nodes and of one [`Link`] per guild
//! - Penalty based load balancing when a guild needs a node
//! - Re-homes links when a node goes down and adopts orphans when it returns
//! - Forwards playback events to the session layer
//!
//! ### [`link::Link`]
//! - Sequential command worker per guild
//! - Optimistic cache of the remote player state
//!
//! ### [`transport::AudioNodeTransport`]
//! - Wire boundary implemented by whatever talks to a concrete node
//!
//! Voice gateway plumbing and the node wire protocol itself live outside
//! this crate.

pub mod balancer;
pub mod link;
pub mod transport;

use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use balancer::{PenaltyMetric, PenaltyTracker};
pub use link::{Link, LinkState, PendingUpdate};
use transport::{AudioNodeTransport, EndReason, NodeEvent, NodeEventKind, NodeStats};

/// Un nodo de audio registrado
pub struct AudioNode {
    name: String,
    transport: Arc<dyn AudioNodeTransport>,
    available: AtomicBool,
    stats: RwLock<Option<NodeStats>>,
    penalties: PenaltyTracker,
}

impl AudioNode {
    fn new(name: String, transport: Arc<dyn AudioNodeTransport>) -> Self {
        Self {
            name,
            transport,
            available: AtomicBool::new(true),
            stats: RwLock::new(None),
            penalties: PenaltyTracker::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<dyn AudioNodeTransport> {
        &self.transport
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.read().clone()
    }

    pub fn penalties(&self) -> &PenaltyTracker {
        &self.penalties
    }

    fn set_available(&self, available: bool) -> bool {
        self.available.swap(available, Ordering::AcqRel)
    }

    fn update_stats(&self, stats: NodeStats) {
        *self.stats.write() = Some(stats);
    }
}

/// Cliente distribuido: elige nodo para cada servidor y mantiene sus links
pub struct NodeSelector {
    nodes: RwLock<Vec<Arc<AudioNode>>>,
    links: DashMap<GuildId, Arc<Link>>,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl NodeSelector {
    /// Crea el selector y el receptor de eventos de reproducción
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<NodeEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let selector = Arc::new(Self {
            nodes: RwLock::new(Vec::new()),
            links: DashMap::new(),
            events,
        });
        (selector, receiver)
    }

    /// Registra un nodo; si ya existía uno con el mismo nombre lo reemplaza
    pub fn add_node(&self, name: impl Into<String>, transport: Arc<dyn AudioNodeTransport>) -> Arc<AudioNode> {
        let node = Arc::new(AudioNode::new(name.into(), transport));
        {
            let mut nodes = self.nodes.write();
            nodes.retain(|existing| existing.name() != node.name());
            nodes.push(Arc::clone(&node));
        }
        info!("🎛️ Nodo de audio registrado: {}", node.name());
        self.adopt_orphans(&node);
        node
    }

    /// Quita un nodo, moviendo antes sus links a otros nodos
    pub fn remove_node(&self, name: &str) -> Result<(), NodeError> {
        self.mark_unavailable(name)?;
        self.nodes.write().retain(|node| node.name() != name);
        info!("🗑️ Nodo de audio eliminado: {}", name);
        Ok(())
    }

    pub fn nodes(&self) -> Vec<Arc<AudioNode>> {
        self.nodes.read().clone()
    }

    pub fn node(&self, name: &str) -> Option<Arc<AudioNode>> {
        self.nodes.read().iter().find(|node| node.name() == name).cloned()
    }

    /// Nodo disponible con menor penalización
    pub fn select_node(&self) -> Result<Arc<AudioNode>, NodeError> {
        let candidates: Vec<_> = self
            .nodes()
            .into_iter()
            .filter(|node| node.is_available())
            .collect();

        candidates
            .into_iter()
            .filter_map(|node| {
                let playing = self.playing_links_on(node.name());
                balancer::penalty(node.stats().as_ref(), playing, node.penalties().counts())
                    .map(|penalty| (penalty, node))
            })
            .min_by_key(|(penalty, _)| *penalty)
            .map(|(_, node)| node)
            .ok_or(NodeError::NoAvailableNodes)
    }

    /// Link del servidor; lo crea o lo mueve si su nodo ya no está disponible
    pub fn get_or_create_link(&self, guild_id: GuildId) -> Result<Arc<Link>, NodeError> {
        if let Some(link) = self.link(guild_id) {
            if !link.node().is_available() {
                let node = self.select_node()?;
                link.transfer_to(node);
            }
            return Ok(link);
        }

        let node = self.select_node()?;
        let link = self
            .links
            .entry(guild_id)
            .or_insert_with(|| Link::spawn(guild_id, node))
            .clone();
        Ok(link)
    }

    pub fn link(&self, guild_id: GuildId) -> Option<Arc<Link>> {
        self.links.get(&guild_id).map(|link| Arc::clone(link.value()))
    }

    /// Destruye el link y el reproductor remoto del servidor
    pub async fn destroy_link(&self, guild_id: GuildId) {
        let Some((_, link)) = self.links.remove(&guild_id) else {
            return;
        };
        if let Err(e) = link.destroy().await {
            warn!("⚠️ No se pudo destruir el reproductor de {} en {}: {}", guild_id, link.node_name(), e);
        }
        debug!("🔗 Link del servidor {} destruido", guild_id);
    }

    /// Marca un nodo como caído y mueve sus links al mejor nodo restante.
    ///
    /// Si no queda ninguno, los links quedan desconectados hasta que un nodo
    /// vuelva. Devuelve cuántos links se movieron.
    pub fn mark_unavailable(&self, name: &str) -> Result<usize, NodeError> {
        let node = self.node(name).ok_or_else(|| NodeError::UnknownNode(name.to_string()))?;
        if node.set_available(false) {
            warn!("🔴 Nodo de audio no disponible: {}", name);
        }

        let mut moved = 0;
        for link in self.links_on(name) {
            match self.select_node() {
                Ok(target) => {
                    link.transfer_to(target);
                    moved += 1;
                }
                Err(_) => link.set_state(LinkState::Disconnected),
            }
        }
        Ok(moved)
    }

    /// Marca un nodo como disponible y le asigna los links huérfanos
    pub fn mark_available(&self, name: &str) -> Result<usize, NodeError> {
        let node = self.node(name).ok_or_else(|| NodeError::UnknownNode(name.to_string()))?;
        if !node.set_available(true) {
            info!("🟢 Nodo de audio disponible: {}", name);
            node.penalties().clear();
        }
        Ok(self.adopt_orphans(&node))
    }

    /// Entrega un evento de reproducción de un nodo.
    ///
    /// Actualiza penalizaciones y el estado del link antes de reenviarlo a
    /// las sesiones, en el mismo orden en que llegó.
    pub fn publish(&self, event: NodeEvent) {
        if let Some(node) = self.node(&event.node) {
            match &event.kind {
                NodeEventKind::TrackStart { .. } => node.penalties().record(PenaltyMetric::LoadAttempt),
                NodeEventKind::TrackEnd {
                    reason: EndReason::LoadFailed,
                    ..
                } => node.penalties().record(PenaltyMetric::LoadFailed),
                NodeEventKind::TrackStuck { .. } => node.penalties().record(PenaltyMetric::TrackStuck),
                NodeEventKind::TrackException { .. } => node.penalties().record(PenaltyMetric::TrackException),
                _ => {}
            }
        }

        if let Some(link) = self.link(event.guild_id) {
            match &event.kind {
                NodeEventKind::TrackStart { track } => link.observe_start(track),
                NodeEventKind::TrackEnd { track, reason } if *reason != EndReason::Replaced => {
                    link.observe_end(track)
                }
                NodeEventKind::VoiceClosed { code, reason } => {
                    warn!("🔌 Conexión de voz cerrada en {} ({}: {})", event.guild_id, code, reason);
                    link.set_state(LinkState::Disconnected);
                }
                _ => {}
            }
        }

        if self.events.send(event).is_err() {
            debug!("Evento de nodo descartado: no hay sesiones escuchando");
        }
    }

    /// Consulta periódicamente las estadísticas de cada nodo y actualiza su
    /// disponibilidad
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let selector = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("🛑 Monitor de nodos detenido");
                        break;
                    }
                    _ = ticker.tick() => selector.check_health().await,
                }
            }
        })
    }

    async fn check_health(&self) {
        for node in self.nodes() {
            match node.transport().stats().await {
                Ok(stats) => {
                    node.update_stats(stats);
                    if !node.is_available() {
                        let _ = self.mark_available(node.name());
                    }
                }
                Err(e) => {
                    if node.is_available() {
                        warn!("⚠️ Nodo {} no responde: {}", node.name(), e);
                        let _ = self.mark_unavailable(node.name());
                    }
                }
            }
        }
    }

    // Funciones privadas

    fn links_on(&self, name: &str) -> Vec<Arc<Link>> {
        self.links
            .iter()
            .filter(|entry| entry.value().node().name() == name)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn playing_links_on(&self, name: &str) -> usize {
        self.links
            .iter()
            .filter(|entry| entry.value().node().name() == name && entry.value().player().is_playing())
            .count()
    }

    fn adopt_orphans(&self, node: &Arc<AudioNode>) -> usize {
        let orphans: Vec<_> = self
            .links
            .iter()
            .filter(|entry| !entry.value().node().is_available() || entry.value().connection_lost())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for link in &orphans {
            link.transfer_to(Arc::clone(node));
        }
        if !orphans.is_empty() {
            info!("🔗 Nodo {} adoptó {} links huérfanos", node.name(), orphans.len());
        }
        orphans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::track::Track,
        node::transport::{MockAudioNodeTransport, PlayerUpdate},
        testing::{wait_until, FakeNode},
    };
    use pretty_assertions::assert_eq;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    #[tokio::test]
    async fn no_nodes_means_no_link() {
        let (selector, _events) = NodeSelector::new();

        assert_eq!(selector.get_or_create_link(guild()).err(), Some(NodeError::NoAvailableNodes));
    }

    #[tokio::test]
    async fn least_penalized_node_is_selected() {
        let (selector, _events) = NodeSelector::new();
        let busy = selector.add_node("busy", FakeNode::new());
        selector.add_node("idle", FakeNode::new());
        busy.update_stats(NodeStats {
            system_load: 0.95,
            ..NodeStats::default()
        });

        let link = selector.get_or_create_link(guild()).unwrap();

        assert_eq!(link.node_name(), "idle");
    }

    #[tokio::test]
    async fn link_moves_to_surviving_node_with_its_player_state() {
        let (selector, _events) = NodeSelector::new();
        let first = FakeNode::new();
        let second = FakeNode::new();
        selector.add_node("first", first.clone());
        let link = selector.get_or_create_link(guild()).unwrap();
        selector.add_node("second", second.clone());

        let track = Track::new("a", "enc-a", "Song A");
        link.submit(PlayerUpdate::play(track.clone())).await.unwrap();

        let moved = selector.mark_unavailable("first").unwrap();

        assert_eq!(moved, 1);
        assert_eq!(link.node_name(), "second");
        wait_until(|| second.player(guild()).track.is_some()).await;
        assert_eq!(second.player(guild()).track, Some(track));
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn sole_node_going_down_disconnects_links_until_it_returns() {
        let (selector, _events) = NodeSelector::new();
        let node = FakeNode::new();
        selector.add_node("solo", node.clone());
        let link = selector.get_or_create_link(guild()).unwrap();

        selector.mark_unavailable("solo").unwrap();
        assert!(link.connection_lost());

        let adopted = selector.mark_available("solo").unwrap();
        assert_eq!(adopted, 1);
        wait_until(|| link.state() == LinkState::Connected).await;
    }

    #[tokio::test]
    async fn late_node_adopts_orphans() {
        let (selector, _events) = NodeSelector::new();
        selector.add_node("old", FakeNode::new());
        let link = selector.get_or_create_link(guild()).unwrap();
        selector.mark_unavailable("old").unwrap();

        selector.add_node("new", FakeNode::new());

        assert_eq!(link.node_name(), "new");
    }

    #[tokio::test]
    async fn commands_reach_the_node_in_order() {
        let (selector, _events) = NodeSelector::new();
        let node = FakeNode::new();
        selector.add_node("main", node.clone());
        let link = selector.get_or_create_link(guild()).unwrap();

        link.dispatch(PlayerUpdate::volume(50));
        link.dispatch(PlayerUpdate::paused(true));
        let last = link.submit(PlayerUpdate::volume(70)).await.unwrap();

        assert_eq!(last.volume, 70);
        assert!(last.paused);
        assert_eq!(
            node.updates(guild()),
            vec![PlayerUpdate::volume(50), PlayerUpdate::paused(true), PlayerUpdate::volume(70)]
        );
    }

    #[tokio::test]
    async fn destroy_waits_for_queued_updates_and_closes_the_link() {
        let (selector, _events) = NodeSelector::new();
        let node = FakeNode::new();
        selector.add_node("main", node.clone());
        let link = selector.get_or_create_link(guild()).unwrap();

        link.dispatch(PlayerUpdate::teardown());
        selector.destroy_link(guild()).await;

        assert_eq!(node.updates(guild()), vec![PlayerUpdate::teardown()]);
        assert_eq!(node.destroyed(), vec![guild()]);
        assert!(selector.link(guild()).is_none());
        assert_eq!(link.submit(PlayerUpdate::volume(10)).await, Err(NodeError::LinkClosed(guild())));
    }

    #[tokio::test]
    async fn publish_tracks_current_track_and_forwards_events() {
        let (selector, mut events) = NodeSelector::new();
        selector.add_node("main", FakeNode::new());
        let link = selector.get_or_create_link(guild()).unwrap();
        let track = Track::new("a", "enc-a", "Song A");

        selector.publish(NodeEvent::new("main", guild(), NodeEventKind::TrackStart { track: track.clone() }));
        assert_eq!(link.current_track(), Some(track.clone()));

        selector.publish(NodeEvent::new(
            "main",
            guild(),
            NodeEventKind::TrackEnd {
                track: track.clone(),
                reason: EndReason::Finished,
            },
        ));
        assert_eq!(link.current_track(), None);

        assert!(matches!(events.recv().await.map(|e| e.kind), Some(NodeEventKind::TrackStart { .. })));
        assert!(matches!(events.recv().await.map(|e| e.kind), Some(NodeEventKind::TrackEnd { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn health_monitor_marks_failing_node_unavailable() {
        let (selector, _events) = NodeSelector::new();
        let mut transport = MockAudioNodeTransport::new();
        transport
            .expect_stats()
            .returning(|| Err(NodeError::Unavailable("flaky".to_string())));
        let node = selector.add_node("flaky", Arc::new(transport));

        let shutdown = CancellationToken::new();
        let monitor = selector.spawn_health_monitor(Duration::from_secs(5), shutdown.clone());

        wait_until(|| !node.is_available()).await;
        shutdown.cancel();
        monitor.await.unwrap();

        assert!(!node.is_available());
    }
}
