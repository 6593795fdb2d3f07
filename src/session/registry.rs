use dashmap::DashMap;
use serenity::model::id::{GuildId, UserId};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::{
    AudioServices, GuildAudioSession, GuildLockGuard, GuildLocks, LoadOutcome, PlayerChange, SessionSignal,
    SessionSnapshot,
};
use crate::{
    audio::{
        self,
        repeat::RepeatCounter,
        track::{RadioStation, Track},
    },
    config::Config,
    error::{InternalFault, NodeError, QueueError, SessionError},
    eviction::EvictionCause,
    mutation::{AsyncMutation, MutationOutcome},
    node::{
        transport::{AudioFilter, FilterUpdate, NodeEvent, PlayerSnapshot, PlayerUpdate},
        NodeSelector,
    },
    notify::{Notification, Notifier},
    settings::{GuildSettings, GuildSettingsProvider},
    session::ContentType,
    vote::VoteRules,
};

/// Trabajo pendiente para la cola de un servidor
enum GuildWork {
    Event(NodeEvent),
    Signal(SessionSignal),
}

/// Registro de sesiones de audio y punto de entrada de los comandos.
///
/// Cada servidor tiene a lo sumo una sesión; los comandos y los eventos de
/// los nodos se serializan por sesión. Cada servidor procesa sus eventos en
/// su propia tarea, así un nodo lento no frena a los demás.
pub struct AudioSessions {
    sessions: DashMap<GuildId, Arc<Mutex<GuildAudioSession>>>,
    workers: DashMap<GuildId, mpsc::UnboundedSender<GuildWork>>,
    services: AudioServices,
}

impl AudioSessions {
    /// Crea el registro y lanza el bucle que reparte eventos y temporizadores
    pub fn start(
        config: Arc<Config>,
        nodes: Arc<NodeSelector>,
        node_events: mpsc::UnboundedReceiver<NodeEvent>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn GuildSettingsProvider>,
    ) -> Arc<Self> {
        let (signals, signal_receiver) = mpsc::unbounded_channel();
        let sessions = Arc::new(Self {
            sessions: DashMap::new(),
            workers: DashMap::new(),
            services: AudioServices {
                config,
                nodes,
                notifier,
                settings,
                locks: GuildLocks::new(signals.clone()),
                signals,
            },
        });

        tokio::spawn(Self::run(Arc::downgrade(&sessions), node_events, signal_receiver));
        info!("🎵 Registro de sesiones de audio iniciado");
        sessions
    }

    async fn run(
        sessions: Weak<Self>,
        mut node_events: mpsc::UnboundedReceiver<NodeEvent>,
        mut signals: mpsc::UnboundedReceiver<SessionSignal>,
    ) {
        loop {
            tokio::select! {
                Some(event) = node_events.recv() => {
                    let Some(sessions) = sessions.upgrade() else { break };
                    sessions.route(event.guild_id, GuildWork::Event(event));
                }
                Some(signal) = signals.recv() => {
                    let Some(sessions) = sessions.upgrade() else { break };
                    sessions.route(signal.guild_id(), GuildWork::Signal(signal));
                }
                else => break,
            }
        }
        debug!("🎵 Bucle de eventos de audio terminado");
    }

    /// Cola FIFO de un servidor; vive lo mismo que el registro
    async fn run_guild(sessions: Weak<Self>, guild_id: GuildId, mut work: mpsc::UnboundedReceiver<GuildWork>) {
        while let Some(item) = work.recv().await {
            let Some(sessions) = sessions.upgrade() else { break };
            match item {
                GuildWork::Event(event) => sessions.dispatch_event(event).await,
                GuildWork::Signal(signal) => sessions.dispatch_signal(signal).await,
            }
        }
        debug!("🎵 Cola de eventos de {} terminada", guild_id);
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }

    pub fn nodes(&self) -> &Arc<NodeSelector> {
        &self.services.nodes
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    /// Bloquea el servidor; la salida por inactividad espera al guard
    pub fn lock_guild(&self, guild_id: GuildId) -> GuildLockGuard {
        self.services.locks.lock(guild_id)
    }

    pub fn is_locked(&self, guild_id: GuildId) -> bool {
        self.services.locks.is_locked(guild_id)
    }

    pub async fn settings(&self, guild_id: GuildId) -> GuildSettings {
        self.services.settings.guild_settings(guild_id).await
    }

    /// Reglas de votación del servidor para [`crate::vote::QuorumVoteGate`]
    pub async fn vote_rules(&self, guild_id: GuildId) -> VoteRules {
        self.settings(guild_id).await.vote_rules()
    }

    pub async fn snapshot(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        let shared = self.get(guild_id)?;
        let session = shared.lock().await;
        Some(session.snapshot())
    }

    /// Busca o carga `query` y lo reproduce o lo agrega a la cola
    pub async fn load_and_play(&self, guild_id: GuildId, query: &str, sender: UserId) -> Result<LoadOutcome, SessionError> {
        let identifier = audio::resolve_identifier(query, &self.services.config.search_prefix);
        let link = {
            let mut session = self.open_session(guild_id).await?;
            session.declare(ContentType::Queued)?;
            session.refresh_link(&self.services.nodes)?
        };

        debug!("🔎 Cargando '{}' para {}", identifier, guild_id);
        let loaded = link.load_item(&identifier).await;

        let mut session = self.open_session(guild_id).await?;
        session
            .apply_queue_load(&self.services, query, Some(sender), loaded)
            .await
    }

    /// Reproduce una estación de radio en lugar de la cola
    pub async fn load_and_stream(
        &self,
        guild_id: GuildId,
        station: RadioStation,
        sender: UserId,
    ) -> Result<LoadOutcome, SessionError> {
        let link = {
            let mut session = self.open_session(guild_id).await?;
            session.begin_stream(station.clone())?;
            session.refresh_link(&self.services.nodes)?
        };

        debug!("📻 Cargando la radio {} para {}", station.name, guild_id);
        let loaded = link.load_item(&station.stream_url).await;

        let mut session = self.open_session(guild_id).await?;
        session
            .apply_stream_load(&self.services, station, Some(sender), loaded)
            .await
    }

    pub async fn shuffle(&self, guild_id: GuildId) -> Result<usize, SessionError> {
        let mut session = self.existing_session(guild_id).await?;
        let queue = session.queued_mut()?.queue_mut();
        if queue.is_empty() {
            return Err(QueueError::EmptyQueue.into());
        }
        queue.shuffle();
        info!("🔀 Cola de {} mezclada ({} pistas)", guild_id, queue.len());
        Ok(queue.len())
    }

    /// Mueve la pista en `from` a `to` (posiciones desde 1)
    pub async fn move_track(&self, guild_id: GuildId, from: usize, to: usize) -> Result<Track, SessionError> {
        let mut session = self.existing_session(guild_id).await?;
        let queue = session.queued_mut()?.queue_mut();
        if from == to && !queue.position_out_of_bounds(from) {
            return Err(QueueError::SamePosition(from).into());
        }
        let moved = queue.move_to_position(from, to)?.clone();
        Ok(moved)
    }

    /// Quita de la cola todo lo que pidió `user_id`
    pub async fn remove_by_sender(&self, guild_id: GuildId, user_id: UserId) -> Result<Vec<Track>, SessionError> {
        let mut session = self.existing_session(guild_id).await?;
        let queue = session.queued_mut()?.queue_mut();
        if !queue.any_from_sender(user_id) {
            return Err(QueueError::NoTracksFromSender(user_id).into());
        }
        Ok(queue.remove_by_sender(user_id))
    }

    /// Salta a la pista en `position`, descartando las anteriores
    pub async fn skip_to(&self, guild_id: GuildId, position: usize) -> Result<Track, SessionError> {
        let mut session = self.existing_session(guild_id).await?;
        session.queued()?;
        let (skipped, request) = session.run_scheduler(self.services.notifier.as_ref(), |scheduler, ctx| {
            scheduler
                .as_queued_mut()
                .ok_or(SessionError::ContentTypeMismatch {
                    declared: ContentType::Continuous,
                    requested: ContentType::Queued,
                })
                .and_then(|queued| queued.skip_to(ctx, position).map_err(SessionError::from))
        });
        session.apply_timer(&self.services, request).await;
        skipped
    }

    /// Vacía la cola y devuelve cuántas pistas tenía
    pub async fn clear_queue(&self, guild_id: GuildId) -> Result<usize, SessionError> {
        let mut session = self.existing_session(guild_id).await?;
        let queue = session.queued_mut()?.queue_mut();
        if queue.is_empty() {
            return Err(QueueError::EmptyQueue.into());
        }
        Ok(queue.clear_and_get_size())
    }

    pub async fn toggle_track_repeat(&self, guild_id: GuildId) -> Result<bool, SessionError> {
        let mut session = self.existing_session(guild_id).await?;
        session.require_current_track()?;
        let enabled = session.queued_mut()?.repeat_mut().toggle_track_loop()?;
        info!("🔂 Repetir pista en {}: {}", guild_id, enabled);
        Ok(enabled)
    }

    pub async fn toggle_playlist_repeat(&self, guild_id: GuildId) -> Result<bool, SessionError> {
        let mut session = self.existing_session(guild_id).await?;
        session.require_current_track()?;
        let enabled = session.queued_mut()?.repeat_mut().toggle_playlist_loop()?;
        info!("🔁 Repetir cola en {}: {}", guild_id, enabled);
        Ok(enabled)
    }

    /// Repite la pista actual `count` veces más
    pub async fn set_repeat_count(&self, guild_id: GuildId, count: u32) -> Result<RepeatCounter, SessionError> {
        let settings = self.settings(guild_id).await;
        let mut session = self.existing_session(guild_id).await?;
        session.require_current_track()?;
        let repeat = session.queued_mut()?.repeat_mut();
        repeat.set_count(count, settings.min_repeats, settings.max_repeats)?;
        Ok(repeat.counter())
    }

    pub async fn clear_repeat(&self, guild_id: GuildId) -> Result<(), SessionError> {
        let mut session = self.existing_session(guild_id).await?;
        session.queued_mut()?.repeat_mut().clear();
        Ok(())
    }

    pub async fn set_paused(
        &self,
        guild_id: GuildId,
        paused: bool,
    ) -> Result<MutationOutcome<PlayerChange>, SessionError> {
        let pending = {
            let mut session = self.existing_session(guild_id).await?;
            session.require_current_track()?;
            session.refresh_link(&self.services.nodes)?.submit(PlayerUpdate::paused(paused))
        };

        let action = if paused { "pause" } else { "resume" };
        let mutation = AsyncMutation::new(guild_id, action, pending, move |player: PlayerSnapshot| {
            let track = player.track.ok_or(InternalFault::NoCurrentTrack)?;
            Ok(if paused {
                PlayerChange::Paused(track)
            } else {
                PlayerChange::Resumed(track)
            })
        });
        Ok(mutation.outcome().await)
    }

    pub async fn set_volume(&self, guild_id: GuildId, volume: u16) -> Result<MutationOutcome<PlayerChange>, SessionError> {
        let config = &self.services.config;
        if !(config.min_volume..=config.max_volume).contains(&volume) {
            return Err(SessionError::VolumeOutOfRange {
                volume,
                min: config.min_volume,
                max: config.max_volume,
            });
        }
        self.submit_volume(guild_id, volume).await
    }

    /// Vuelve al volumen por defecto del servidor
    pub async fn reset_volume(&self, guild_id: GuildId) -> Result<MutationOutcome<PlayerChange>, SessionError> {
        let volume = self.settings(guild_id).await.default_volume;
        self.submit_volume(guild_id, volume).await
    }

    /// Detiene la pista actual; el scheduler decide qué sigue
    pub async fn stop_track(&self, guild_id: GuildId) -> Result<MutationOutcome<PlayerChange>, SessionError> {
        let (track, pending) = {
            let mut session = self.existing_session(guild_id).await?;
            let track = session.require_current_track()?;
            let pending = session.refresh_link(&self.services.nodes)?.submit(PlayerUpdate::stop());
            (track, pending)
        };

        let stopped = track.clone();
        let mutation = AsyncMutation::new(guild_id, "stop", pending, move |_: PlayerSnapshot| {
            Ok(PlayerChange::Stopped(track))
        })
        // Sin nodo no queda nada sonando
        .on_failure(move |e| {
            matches!(e, NodeError::Unavailable(_) | NodeError::LinkClosed(_)).then_some(PlayerChange::Stopped(stopped))
        });
        Ok(mutation.outcome().await)
    }

    /// Aplica un filtro de audio, o lo quita con `None`
    pub async fn set_filter(
        &self,
        guild_id: GuildId,
        filter: Option<AudioFilter>,
    ) -> Result<MutationOutcome<PlayerChange>, SessionError> {
        let pending = {
            let mut session = self.existing_session(guild_id).await?;
            session.require_current_track()?;
            let update = match filter {
                Some(filter) => FilterUpdate::Set(filter),
                None => FilterUpdate::Reset,
            };
            session.refresh_link(&self.services.nodes)?.submit(PlayerUpdate::filter(update))
        };

        let mutation = AsyncMutation::new(guild_id, "filter", pending, |player: PlayerSnapshot| {
            player.track.ok_or(InternalFault::NoCurrentTrack)?;
            Ok(PlayerChange::Filter(player.filter))
        });
        Ok(mutation.outcome().await)
    }

    pub async fn reset_filter(&self, guild_id: GuildId) -> Result<MutationOutcome<PlayerChange>, SessionError> {
        self.set_filter(guild_id, None).await
    }

    /// Detiene todo, vacía la cola y sale del servidor
    pub async fn stop_and_clear(&self, guild_id: GuildId) -> Result<(), SessionError> {
        let Some(shared) = self.get(guild_id) else {
            return Err(SessionError::NothingPlaying);
        };
        let mut session = shared.lock_owned().await;
        if session.is_closed() {
            return Err(SessionError::NothingPlaying);
        }
        self.close(guild_id, &mut session).await;
        info!("⏹️ Reproducción detenida en {}", guild_id);
        Ok(())
    }

    /// El canal de voz del servidor cambió de oyentes (sin contar al bot)
    pub async fn on_voice_presence_changed(&self, guild_id: GuildId, listeners: usize) {
        let Some(shared) = self.get(guild_id) else {
            return;
        };
        let mut session = shared.lock().await;
        if !session.is_closed() {
            session.on_listeners_changed(&self.services, listeners).await;
        }
    }

    // Funciones privadas

    /// Entrega el trabajo a la cola del servidor, creándola si hace falta
    fn route(self: &Arc<Self>, guild_id: GuildId, work: GuildWork) {
        let work = match self.workers.get(&guild_id) {
            Some(worker) => match worker.send(work) {
                Ok(()) => return,
                Err(mpsc::error::SendError(work)) => work,
            },
            None => work,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(work);
        self.workers.insert(guild_id, sender);
        tokio::spawn(Self::run_guild(Arc::downgrade(self), guild_id, receiver));
    }

    fn get(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildAudioSession>>> {
        self.sessions.get(&guild_id).map(|session| Arc::clone(session.value()))
    }

    fn get_or_create(&self, guild_id: GuildId) -> Result<Arc<Mutex<GuildAudioSession>>, NodeError> {
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }
        let link = self.services.nodes.get_or_create_link(guild_id)?;
        let session = self
            .sessions
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🎵 Sesión de audio creada para {}", guild_id);
                Arc::new(Mutex::new(GuildAudioSession::new(guild_id, link)))
            })
            .clone();
        Ok(session)
    }

    /// Sesión abierta del servidor, creándola si hace falta
    async fn open_session(&self, guild_id: GuildId) -> Result<OwnedMutexGuard<GuildAudioSession>, SessionError> {
        loop {
            let session = self.get_or_create(guild_id)?.lock_owned().await;
            if !session.is_closed() {
                return Ok(session);
            }
        }
    }

    /// Sesión abierta del servidor; sin sesión no hay nada que modificar
    async fn existing_session(&self, guild_id: GuildId) -> Result<OwnedMutexGuard<GuildAudioSession>, SessionError> {
        let shared = self.get(guild_id).ok_or(SessionError::NothingPlaying)?;
        let session = shared.lock_owned().await;
        if session.is_closed() {
            return Err(SessionError::NothingPlaying);
        }
        Ok(session)
    }

    async fn submit_volume(&self, guild_id: GuildId, volume: u16) -> Result<MutationOutcome<PlayerChange>, SessionError> {
        let pending = {
            let mut session = self.existing_session(guild_id).await?;
            session.refresh_link(&self.services.nodes)?.submit(PlayerUpdate::volume(volume))
        };

        let mutation = AsyncMutation::new(guild_id, "volume", pending, |player: PlayerSnapshot| {
            Ok(PlayerChange::Volume(player.volume))
        });
        Ok(mutation.outcome().await)
    }

    /// Cierra la sesión, destruye el link y la quita del registro
    async fn close(&self, guild_id: GuildId, session: &mut GuildAudioSession) {
        session.close(self.services.notifier.as_ref());
        self.services.nodes.destroy_link(guild_id).await;
        self.sessions.remove(&guild_id);
    }

    async fn dispatch_event(&self, event: NodeEvent) {
        let Some(shared) = self.get(event.guild_id) else {
            debug!("Evento del nodo {} para {} sin sesión", event.node, event.guild_id);
            return;
        };
        let mut session = shared.lock().await;
        if !session.is_closed() {
            session.handle_event(&self.services, event.kind).await;
        }
    }

    async fn dispatch_signal(&self, signal: SessionSignal) {
        match signal {
            SessionSignal::EvictionElapsed { guild_id, generation } => self.evict(guild_id, generation).await,
            SessionSignal::Unlocked(guild_id) => {
                let Some(shared) = self.get(guild_id) else {
                    return;
                };
                let mut session = shared.lock().await;
                if !session.is_closed() {
                    session.resume_after_unlock(&self.services).await;
                }
            }
        }
    }

    async fn evict(&self, guild_id: GuildId, generation: u64) {
        let Some(shared) = self.get(guild_id) else {
            return;
        };
        let mut session = shared.lock().await;
        let Some((cause, idle)) = session.take_elapsed_eviction(generation) else {
            debug!("⏲️ Disparo viejo del temporizador de {} ignorado", guild_id);
            return;
        };

        if self.services.locks.is_locked(guild_id) {
            info!("🔒 {} bloqueado, salida por inactividad pospuesta", guild_id);
            session.defer_eviction(cause);
            return;
        }

        self.close(guild_id, &mut session).await;
        info!(
            "👋 Saliendo de {} tras {} ({:?})",
            guild_id,
            humantime::format_duration(idle),
            cause
        );
        let notification = match cause {
            EvictionCause::NoTracks => Notification::LeftDueToInactivity { idle },
            EvictionCause::EmptyChannel => Notification::LeftEmptyChannel { idle },
        };
        self.services.notifier.notify(guild_id, notification);
    }
}
