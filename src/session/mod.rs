//! # Guild Audio Sessions
//!
//! One [`GuildAudioSession`] per guild ties together the active playback
//! scheduler, the guild's node link and its inactivity timer.
//!
//! ## Components
//!
//! ### [`GuildAudioSession`]
//! - Declares the content type (queued tracks or a continuous stream)
//! - Routes node events to the scheduler and applies its timer requests
//! - Tears everything down when the guild is left
//!
//! ### [`AudioSessions`]
//! - Registry and command façade for all guilds
//! - Runs the event loop that feeds node events and timer signals into
//!   the sessions
//!
//! ### [`GuildLocks`]
//! - Keeps the inactivity timer from evicting a guild while something
//!   (such as an open vote) holds it

mod locks;
mod registry;

pub use locks::{GuildLockGuard, GuildLocks};
pub use registry::AudioSessions;

use chrono::{DateTime, Utc};
use serenity::model::id::{GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        repeat::RepeatCounter,
        scheduler::{PlaybackScheduler, QueuedScheduler, SchedulerContext, StreamScheduler, TimerRequest},
        track::{RadioStation, Track},
    },
    config::Config,
    error::{NodeError, SessionError},
    eviction::{EvictionCause, InactivityEvictionTimer},
    node::{
        link::LinkState,
        transport::{AudioFilter, LoadResult, NodeEventKind},
        Link, NodeSelector,
    },
    notify::{Notification, Notifier},
    settings::GuildSettingsProvider,
};

/// Tipo de contenido que una sesión reproduce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Queued,
    Continuous,
}

/// Señales internas hacia el bucle de eventos de las sesiones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionSignal {
    EvictionElapsed { guild_id: GuildId, generation: u64 },
    Unlocked(GuildId),
}

impl SessionSignal {
    pub(crate) fn guild_id(&self) -> GuildId {
        match self {
            SessionSignal::EvictionElapsed { guild_id, .. } => *guild_id,
            SessionSignal::Unlocked(guild_id) => *guild_id,
        }
    }
}

/// Resultado de pedir una pista, una playlist o una radio
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Started(Track),
    Queued { track: Track, position: usize },
    PlaylistQueued { name: String, count: usize, started: Option<Track> },
    StreamStarted(RadioStation),
    NoMatches,
    Failed { message: String },
}

/// Cambio aplicado al reproductor por un comando
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerChange {
    Paused(Track),
    Resumed(Track),
    Volume(u16),
    Stopped(Track),
    Filter(Option<AudioFilter>),
}

/// Vista de sólo lectura del estado de una sesión
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub content_type: Option<ContentType>,
    pub node: String,
    pub link_state: LinkState,
    pub current: Option<Track>,
    pub paused: bool,
    pub volume: u16,
    pub filter: Option<AudioFilter>,
    pub queue: Vec<Track>,
    pub queue_duration: Duration,
    pub track_repeat: bool,
    pub playlist_repeat: bool,
    pub repeat_counter: RepeatCounter,
    pub station: Option<RadioStation>,
    pub eviction_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Dependencias compartidas por todas las sesiones
pub(crate) struct AudioServices {
    pub config: Arc<Config>,
    pub nodes: Arc<NodeSelector>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: Arc<dyn GuildSettingsProvider>,
    pub locks: GuildLocks,
    pub signals: mpsc::UnboundedSender<SessionSignal>,
}

/// Estado de reproducción de un servidor
pub struct GuildAudioSession {
    guild_id: GuildId,
    scheduler: PlaybackScheduler,
    declared: Option<ContentType>,
    link: Arc<Link>,
    eviction: InactivityEvictionTimer,
    deferred_eviction: Option<EvictionCause>,
    closed: bool,
    created_at: DateTime<Utc>,
}

impl GuildAudioSession {
    pub(crate) fn new(guild_id: GuildId, link: Arc<Link>) -> Self {
        Self {
            guild_id,
            scheduler: PlaybackScheduler::default(),
            declared: None,
            link,
            eviction: InactivityEvictionTimer::new(),
            deferred_eviction: None,
            closed: false,
            created_at: Utc::now(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.declared
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// `true` tras salir del servidor; la sesión ya no está registrada
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sin pista actual ni nada en cola
    pub fn is_idle(&self) -> bool {
        self.link.current_track().is_none()
            && self
                .scheduler
                .as_queued()
                .is_none_or(|queued| queued.queue().is_empty())
    }

    /// Fija el tipo de contenido; una sesión no mezcla cola y radio
    pub(crate) fn declare(&mut self, requested: ContentType) -> Result<(), SessionError> {
        match self.declared {
            Some(declared) if declared != requested => Err(SessionError::ContentTypeMismatch { declared, requested }),
            _ => {
                self.declared = Some(requested);
                Ok(())
            }
        }
    }

    /// Instala el scheduler de radio para `station`
    pub(crate) fn begin_stream(&mut self, station: RadioStation) -> Result<(), SessionError> {
        self.declare(ContentType::Continuous)?;
        let same_station = self
            .scheduler
            .as_stream()
            .is_some_and(|stream| stream.station() == &station);
        if !same_station {
            self.scheduler = PlaybackScheduler::Stream(StreamScheduler::new(station));
        }
        Ok(())
    }

    /// El link vigente del servidor; puede haber cambiado de nodo
    pub(crate) fn refresh_link(&mut self, nodes: &NodeSelector) -> Result<Arc<Link>, NodeError> {
        let link = nodes.get_or_create_link(self.guild_id)?;
        self.link = Arc::clone(&link);
        Ok(link)
    }

    pub(crate) fn queued(&self) -> Result<&QueuedScheduler, SessionError> {
        let declared = self.scheduler.content_type();
        self.scheduler.as_queued().ok_or(SessionError::ContentTypeMismatch {
            declared,
            requested: ContentType::Queued,
        })
    }

    pub(crate) fn queued_mut(&mut self) -> Result<&mut QueuedScheduler, SessionError> {
        let declared = self.scheduler.content_type();
        self.scheduler.as_queued_mut().ok_or(SessionError::ContentTypeMismatch {
            declared,
            requested: ContentType::Queued,
        })
    }

    pub(crate) fn require_current_track(&self) -> Result<Track, SessionError> {
        self.link.current_track().ok_or(SessionError::NothingPlaying)
    }

    /// Ejecuta un callback del scheduler y devuelve su petición de temporizador
    pub(crate) fn run_scheduler<R>(
        &mut self,
        notifier: &dyn Notifier,
        callback: impl FnOnce(&mut PlaybackScheduler, &mut SchedulerContext<'_>) -> R,
    ) -> (R, Option<TimerRequest>) {
        let mut ctx = SchedulerContext::new(self.guild_id, &self.link, notifier);
        let result = callback(&mut self.scheduler, &mut ctx);
        (result, ctx.into_timer_request())
    }

    pub(crate) async fn handle_event(&mut self, services: &AudioServices, kind: NodeEventKind) {
        let notifier = services.notifier.as_ref();
        let ((), request) = match kind {
            NodeEventKind::TrackStart { track } => {
                self.run_scheduler(notifier, |scheduler, ctx| scheduler.on_start(ctx, track))
            }
            NodeEventKind::TrackEnd { track, reason } => {
                self.run_scheduler(notifier, |scheduler, ctx| scheduler.on_end(ctx, track, reason))
            }
            NodeEventKind::TrackStuck { track, threshold } => {
                warn!(
                    "⏳ Pista atascada en {} ({}): {}",
                    self.guild_id,
                    humantime::format_duration(threshold),
                    track.title
                );
                self.run_scheduler(notifier, |scheduler, ctx| scheduler.on_stuck(ctx, track))
            }
            NodeEventKind::TrackException { track, message } => {
                self.run_scheduler(notifier, |scheduler, ctx| {
                    scheduler.on_exception(ctx, track, message.as_deref())
                })
            }
            NodeEventKind::VoiceClosed { code, reason } => {
                debug!("🔇 Voz cerrada en {} ({}): {}", self.guild_id, code, reason);
                return;
            }
        };
        self.apply_timer(services, request).await;
    }

    /// Aplica la carga de una pista o playlist a la cola
    pub(crate) async fn apply_queue_load(
        &mut self,
        services: &AudioServices,
        query: &str,
        sender: Option<UserId>,
        loaded: Result<LoadResult, NodeError>,
    ) -> Result<LoadOutcome, SessionError> {
        self.declare(ContentType::Queued)?;

        let (playlist, tracks) = match loaded_tracks(loaded) {
            Ok(found) => found,
            Err(failure) => return Ok(self.load_failed(services, query, failure).await),
        };

        let tracks: Vec<Track> = tracks
            .into_iter()
            .map(|track| match sender {
                Some(user_id) => track.with_sender(user_id),
                None => track,
            })
            .collect();
        let Some(first) = tracks.first().cloned() else {
            return Ok(self.load_failed(services, query, None).await);
        };

        let idle = self.link.current_track().is_none();
        let queued_before = self.queued()?.queue().len();
        let outcome = match playlist {
            Some(name) => LoadOutcome::PlaylistQueued {
                name,
                count: tracks.len(),
                started: idle.then(|| first.clone()),
            },
            None if idle => LoadOutcome::Started(first),
            None => LoadOutcome::Queued {
                track: first,
                position: queued_before + 1,
            },
        };

        info!("➕ Agregado a la cola de {}: {:?}", self.guild_id, outcome);
        let ((), request) = self.run_scheduler(services.notifier.as_ref(), |scheduler, ctx| {
            scheduler.on_load(ctx, tracks)
        });
        self.apply_timer(services, request).await;
        Ok(outcome)
    }

    /// Aplica la carga de una estación de radio
    pub(crate) async fn apply_stream_load(
        &mut self,
        services: &AudioServices,
        station: RadioStation,
        sender: Option<UserId>,
        loaded: Result<LoadResult, NodeError>,
    ) -> Result<LoadOutcome, SessionError> {
        self.begin_stream(station.clone())?;

        let stream = loaded_tracks(loaded).map(|(_, tracks)| tracks.into_iter().next());
        match stream {
            Ok(Some(track)) => {
                let track = match sender {
                    Some(user_id) => track.with_sender(user_id),
                    None => track,
                };
                let ((), request) = self.run_scheduler(services.notifier.as_ref(), |scheduler, ctx| {
                    scheduler.on_load(ctx, vec![track.as_stream()])
                });
                self.apply_timer(services, request).await;
                Ok(LoadOutcome::StreamStarted(station))
            }
            failed => {
                let message = failed.err().flatten();
                warn!("📻 No se pudo cargar la radio {} en {}", station.name, self.guild_id);
                services.notifier.notify(
                    self.guild_id,
                    Notification::LoadFailed {
                        query: station.name.clone(),
                        message: message.clone().unwrap_or_default(),
                    },
                );
                self.stop_and_destroy(services.notifier.as_ref());
                self.apply_timer(services, Some(TimerRequest::Arm(EvictionCause::NoTracks)))
                    .await;
                Ok(match message {
                    Some(message) => LoadOutcome::Failed { message },
                    None => LoadOutcome::NoMatches,
                })
            }
        }
    }

    /// Detiene la reproducción, vacía la cola y borra el tipo de contenido.
    ///
    /// No toca el temporizador: una salida por canal vacío sigue en pie.
    pub(crate) fn stop_and_destroy(&mut self, notifier: &dyn Notifier) {
        let ((), _) = self.run_scheduler(notifier, |scheduler, ctx| scheduler.stop_and_destroy(ctx));
        self.scheduler = PlaybackScheduler::default();
        self.declared = None;
    }

    /// Marca la sesión como terminada tras [`Self::stop_and_destroy`]
    pub(crate) fn close(&mut self, notifier: &dyn Notifier) {
        self.stop_and_destroy(notifier);
        self.cancel_eviction();
        self.closed = true;
    }

    /// Aplica lo que pidió el scheduler, que sólo maneja la salida por
    /// falta de pistas; con el canal vacío manda la cuenta de oyentes
    pub(crate) async fn apply_timer(&mut self, services: &AudioServices, request: Option<TimerRequest>) {
        if request.is_some() && self.waiting_for_listeners() {
            debug!("👤 {} sigue sin oyentes, el temporizador no cambia", self.guild_id);
            return;
        }
        match request {
            Some(TimerRequest::Arm(cause)) => self.arm_eviction(services, cause).await,
            Some(TimerRequest::Cancel) => self.cancel_eviction(),
            None => {}
        }
    }

    pub(crate) async fn arm_eviction(&mut self, services: &AudioServices, cause: EvictionCause) {
        let settings = services.settings.guild_settings(self.guild_id).await;
        let delay = match cause {
            EvictionCause::NoTracks => settings.leave_no_tracks(),
            EvictionCause::EmptyChannel => settings.leave_empty_channel(),
        };

        let guild_id = self.guild_id;
        let signals = services.signals.clone();
        self.deferred_eviction = None;
        self.eviction.arm(delay, cause, move |generation| {
            let _ = signals.send(SessionSignal::EvictionElapsed { guild_id, generation });
        });
    }

    pub(crate) fn cancel_eviction(&mut self) {
        self.eviction.cancel();
        self.deferred_eviction = None;
    }

    /// Consume un disparo del temporizador si sigue vigente
    pub(crate) fn take_elapsed_eviction(&mut self, generation: u64) -> Option<(EvictionCause, Duration)> {
        self.eviction.take_elapsed(generation)
    }

    /// Guarda una salida que no se pudo ejecutar por estar bloqueado
    pub(crate) fn defer_eviction(&mut self, cause: EvictionCause) {
        self.deferred_eviction = Some(cause);
    }

    /// Vuelve a programar la salida tras desbloquear el servidor
    pub(crate) async fn resume_after_unlock(&mut self, services: &AudioServices) {
        let cause = self
            .deferred_eviction
            .take()
            .or_else(|| (self.is_idle() && !self.eviction.is_armed()).then_some(EvictionCause::NoTracks));
        if let Some(cause) = cause {
            self.arm_eviction(services, cause).await;
        }
    }

    /// Reacciona a cambios en la cantidad de oyentes del canal de voz
    pub(crate) async fn on_listeners_changed(&mut self, services: &AudioServices, listeners: usize) {
        let waiting_for_listeners = self.waiting_for_listeners();

        if listeners == 0 {
            if !waiting_for_listeners {
                info!("👤 Canal vacío en {}", self.guild_id);
                self.arm_eviction(services, EvictionCause::EmptyChannel).await;
            }
        } else if waiting_for_listeners {
            info!("👥 Alguien volvió al canal en {}", self.guild_id);
            self.cancel_eviction();
            if self.is_idle() {
                self.arm_eviction(services, EvictionCause::NoTracks).await;
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let player = self.link.player();
        let queued = self.scheduler.as_queued();
        SessionSnapshot {
            guild_id: self.guild_id,
            content_type: self.declared,
            node: self.link.node_name(),
            link_state: self.link.state(),
            current: player.track,
            paused: player.paused,
            volume: player.volume,
            filter: player.filter,
            queue: queued.map(|q| q.queue().iter().cloned().collect()).unwrap_or_default(),
            queue_duration: queued.map(|q| q.queue().total_duration()).unwrap_or_default(),
            track_repeat: queued.is_some_and(|q| q.repeat().track_repeat()),
            playlist_repeat: queued.is_some_and(|q| q.repeat().playlist_repeat()),
            repeat_counter: queued.map(|q| q.repeat().counter()).unwrap_or_default(),
            station: self.scheduler.as_stream().map(|s| s.station().clone()),
            eviction_deadline: self.eviction.deadline(),
            created_at: self.created_at,
        }
    }

    // Funciones privadas

    async fn load_failed(&mut self, services: &AudioServices, query: &str, message: Option<String>) -> LoadOutcome {
        let notification = match &message {
            Some(message) => Notification::LoadFailed {
                query: query.to_string(),
                message: message.clone(),
            },
            None => Notification::NoMatches {
                query: query.to_string(),
            },
        };
        info!("🔍 Sin resultados para '{}' en {}", query, self.guild_id);
        services.notifier.notify(self.guild_id, notification);

        if self.is_idle() && !self.eviction.is_armed() {
            self.apply_timer(services, Some(TimerRequest::Arm(EvictionCause::NoTracks)))
                .await;
        }

        match message {
            Some(message) => LoadOutcome::Failed { message },
            None => LoadOutcome::NoMatches,
        }
    }

    fn waiting_for_listeners(&self) -> bool {
        self.eviction.cause() == Some(EvictionCause::EmptyChannel)
            || self.deferred_eviction == Some(EvictionCause::EmptyChannel)
    }
}

/// Pistas de un resultado de carga; `Err` lleva el mensaje de error, si hubo
fn loaded_tracks(loaded: Result<LoadResult, NodeError>) -> Result<(Option<String>, Vec<Track>), Option<String>> {
    match loaded {
        Ok(LoadResult::Track(track)) => Ok((None, vec![track])),
        Ok(LoadResult::Search(results)) => Ok((None, results.into_iter().take(1).collect())),
        Ok(LoadResult::Playlist { name, tracks }) => Ok((Some(name), tracks)),
        Ok(LoadResult::Empty) => Err(None),
        Ok(LoadResult::Error { message }) => Err(Some(message)),
        Err(e) => Err(Some(e.to_string())),
    }
}
