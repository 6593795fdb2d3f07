use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{
    transport::{LoadResult, PlayerSnapshot, PlayerUpdate},
    AudioNode,
};
use crate::{audio::track::Track, error::NodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Connecting,
    Disconnected,
}

enum LinkCommand {
    Update {
        update: PlayerUpdate,
        reply: Option<oneshot::Sender<Result<PlayerSnapshot, NodeError>>>,
    },
    Destroy {
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
}

/// Conexión lógica entre un servidor y el nodo de audio que lo atiende.
///
/// Las peticiones al nodo se ejecutan en orden, una a la vez, en una tarea
/// propia del link. El estado del reproductor se actualiza de forma
/// optimista al encolar cada petición.
pub struct Link {
    guild_id: GuildId,
    node: RwLock<Arc<AudioNode>>,
    state: RwLock<LinkState>,
    player: RwLock<PlayerSnapshot>,
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl Link {
    pub(crate) fn spawn(guild_id: GuildId, node: Arc<AudioNode>) -> Arc<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        info!("🔗 Link creado para el servidor {} en el nodo {}", guild_id, node.name());

        let link = Arc::new(Self {
            guild_id,
            node: RwLock::new(node),
            state: RwLock::new(LinkState::Connecting),
            player: RwLock::new(PlayerSnapshot::default()),
            commands,
        });

        tokio::spawn(Self::run(Arc::downgrade(&link), receiver));
        link
    }

    async fn run(link: Weak<Link>, mut receiver: mpsc::UnboundedReceiver<LinkCommand>) {
        while let Some(command) = receiver.recv().await {
            let Some(link) = link.upgrade() else {
                break;
            };
            match command {
                LinkCommand::Update { update, reply } => {
                    let result = link.execute(update).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                LinkCommand::Destroy { reply } => {
                    let node = link.node();
                    let result = node.transport().destroy_player(link.guild_id).await;
                    link.set_state(LinkState::Disconnected);
                    let _ = reply.send(result);
                    break;
                }
            }
        }
        debug!("🔗 Tarea de link terminada");
    }

    async fn execute(&self, update: PlayerUpdate) -> Result<PlayerSnapshot, NodeError> {
        let node = self.node();
        match node.transport().update_player(self.guild_id, update).await {
            Ok(snapshot) => {
                self.set_state(LinkState::Connected);
                Ok(snapshot)
            }
            Err(e) => {
                warn!("⚠️ El nodo {} falló al actualizar el servidor {}: {}", node.name(), self.guild_id, e);
                Err(e)
            }
        }
    }

    /// Encola una petición y devuelve un handle para esperar la respuesta
    pub fn submit(&self, update: PlayerUpdate) -> PendingUpdate {
        let (reply, receiver) = oneshot::channel();
        self.player.write().apply(&update);
        // Si la tarea ya no existe `reply` se descarta y el handle informa LinkClosed
        let _ = self.commands.send(LinkCommand::Update {
            update,
            reply: Some(reply),
        });
        PendingUpdate {
            guild_id: self.guild_id,
            receiver,
        }
    }

    /// Encola una petición sin esperar respuesta; los fallos sólo se registran
    pub fn dispatch(&self, update: PlayerUpdate) {
        self.player.write().apply(&update);
        if self
            .commands
            .send(LinkCommand::Update { update, reply: None })
            .is_err()
        {
            warn!("⚠️ Link del servidor {} cerrado, petición descartada", self.guild_id);
        }
    }

    /// Destruye el reproductor tras las peticiones ya encoladas y cierra el link
    pub(crate) async fn destroy(&self) -> Result<(), NodeError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(LinkCommand::Destroy { reply })
            .map_err(|_| NodeError::LinkClosed(self.guild_id))?;
        receiver.await.unwrap_or(Err(NodeError::LinkClosed(self.guild_id)))
    }

    pub async fn load_item(&self, identifier: &str) -> Result<LoadResult, NodeError> {
        let node = self.node();
        if !node.is_available() {
            return Err(NodeError::Unavailable(node.name().to_string()));
        }
        node.transport().load_item(identifier).await
    }

    /// Cambia de nodo y reproduce allí el último estado conocido
    pub(crate) fn transfer_to(&self, node: Arc<AudioNode>) {
        let previous = std::mem::replace(&mut *self.node.write(), Arc::clone(&node));
        info!(
            "🔀 Servidor {} movido del nodo {} al nodo {}",
            self.guild_id,
            previous.name(),
            node.name()
        );
        self.set_state(LinkState::Connecting);

        let restore = self.player.read().restore_update();
        let _ = self.commands.send(LinkCommand::Update {
            update: restore,
            reply: None,
        });
    }

    pub(crate) fn observe_start(&self, track: &Track) {
        self.player.write().track = Some(track.clone());
        self.set_state(LinkState::Connected);
    }

    pub(crate) fn observe_end(&self, track: &Track) {
        let mut player = self.player.write();
        if player.track.as_ref().is_some_and(|current| current.encoded == track.encoded) {
            player.track = None;
        }
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn node(&self) -> Arc<AudioNode> {
        Arc::clone(&self.node.read())
    }

    pub fn node_name(&self) -> String {
        self.node.read().name().to_string()
    }

    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// `true` si se perdió la conexión de voz y no hay nodo que la recupere
    pub fn connection_lost(&self) -> bool {
        self.state() == LinkState::Disconnected
    }

    pub fn player(&self) -> PlayerSnapshot {
        self.player.read().clone()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.player.read().track.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.player.read().paused
    }
}

/// Respuesta pendiente de una petición encolada con [`Link::submit`]
pub struct PendingUpdate {
    guild_id: GuildId,
    receiver: oneshot::Receiver<Result<PlayerSnapshot, NodeError>>,
}

impl Future for PendingUpdate {
    type Output = Result<PlayerSnapshot, NodeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let guild_id = self.guild_id;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(NodeError::LinkClosed(guild_id))))
    }
}
