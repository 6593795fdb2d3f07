use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::time::Duration;

use crate::{audio::track::Track, error::NodeError};

/// Filtros de audio que un nodo sabe aplicar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFilter {
    BassBoost,
    Nightcore,
    Vaporwave,
    Karaoke,
    EightD,
}

impl AudioFilter {
    pub fn display_name(&self) -> &'static str {
        match self {
            AudioFilter::BassBoost => "Bass Boost",
            AudioFilter::Nightcore => "Nightcore",
            AudioFilter::Vaporwave => "Vaporwave",
            AudioFilter::Karaoke => "Karaoke",
            AudioFilter::EightD => "8D",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackUpdate {
    Play(Track),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterUpdate {
    Set(AudioFilter),
    Reset,
}

/// Cambio parcial del reproductor remoto; los campos `None` no se tocan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerUpdate {
    pub track: Option<TrackUpdate>,
    pub paused: Option<bool>,
    pub volume: Option<u16>,
    pub filter: Option<FilterUpdate>,
}

impl PlayerUpdate {
    pub fn play(track: Track) -> Self {
        Self {
            track: Some(TrackUpdate::Play(track)),
            ..Self::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            track: Some(TrackUpdate::Stop),
            ..Self::default()
        }
    }

    pub fn paused(paused: bool) -> Self {
        Self {
            paused: Some(paused),
            ..Self::default()
        }
    }

    pub fn volume(volume: u16) -> Self {
        Self {
            volume: Some(volume),
            ..Self::default()
        }
    }

    pub fn filter(filter: FilterUpdate) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    /// Detiene, quita la pausa y los filtros en una sola petición
    pub fn teardown() -> Self {
        Self {
            track: Some(TrackUpdate::Stop),
            paused: Some(false),
            volume: None,
            filter: Some(FilterUpdate::Reset),
        }
    }
}

/// Estado del reproductor remoto tal como lo conoce el cliente
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub track: Option<Track>,
    pub paused: bool,
    pub volume: u16,
    pub filter: Option<AudioFilter>,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            track: None,
            paused: false,
            volume: 100,
            filter: None,
        }
    }
}

impl PlayerSnapshot {
    pub fn apply(&mut self, update: &PlayerUpdate) {
        match &update.track {
            Some(TrackUpdate::Play(track)) => self.track = Some(track.clone()),
            Some(TrackUpdate::Stop) => self.track = None,
            None => {}
        }
        if let Some(paused) = update.paused {
            self.paused = paused;
        }
        if let Some(volume) = update.volume {
            self.volume = volume;
        }
        match update.filter {
            Some(FilterUpdate::Set(filter)) => self.filter = Some(filter),
            Some(FilterUpdate::Reset) => self.filter = None,
            None => {}
        }
    }

    /// Petición que reproduce este estado en otro nodo
    pub fn restore_update(&self) -> PlayerUpdate {
        PlayerUpdate {
            track: self.track.clone().map(TrackUpdate::Play),
            paused: Some(self.paused),
            volume: Some(self.volume),
            filter: Some(self.filter.map_or(FilterUpdate::Reset, FilterUpdate::Set)),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.track.is_some() && !self.paused
    }
}

/// Resultado de resolver un identificador en un nodo
#[derive(Debug, Clone, PartialEq)]
pub enum LoadResult {
    Track(Track),
    Playlist { name: String, tracks: Vec<Track> },
    Search(Vec<Track>),
    Empty,
    Error { message: String },
}

/// Estadísticas que publica un nodo
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    /// Carga del sistema entre 0.0 y 1.0
    pub system_load: f64,
    /// Frames no enviados por minuto, si el nodo lo informa
    pub frames_deficit: Option<u32>,
    pub frames_nulled: Option<u32>,
}

/// Motivo con el que el nodo informa el fin de una canción
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl EndReason {
    /// `true` si tras este fin corresponde empezar la siguiente canción
    pub fn may_start_next(&self) -> bool {
        matches!(self, EndReason::Finished | EndReason::LoadFailed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEventKind {
    TrackStart { track: Track },
    TrackEnd { track: Track, reason: EndReason },
    TrackStuck { track: Track, threshold: Duration },
    TrackException { track: Track, message: Option<String> },
    /// El nodo perdió la conexión de voz del servidor
    VoiceClosed { code: u16, reason: String },
}

/// Evento de reproducción emitido por un nodo
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    pub node: String,
    pub guild_id: GuildId,
    pub kind: NodeEventKind,
}

impl NodeEvent {
    pub fn new(node: impl Into<String>, guild_id: GuildId, kind: NodeEventKind) -> Self {
        Self {
            node: node.into(),
            guild_id,
            kind,
        }
    }
}

/// Canal de comandos hacia un nodo de audio remoto.
///
/// Los eventos de reproducción no pasan por aquí: la capa que mantiene la
/// conexión con el nodo los entrega con [`crate::node::NodeSelector::publish`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioNodeTransport: Send + Sync {
    async fn load_item(&self, identifier: &str) -> Result<LoadResult, NodeError>;

    async fn update_player(&self, guild_id: GuildId, update: PlayerUpdate) -> Result<PlayerSnapshot, NodeError>;

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError>;

    async fn stats(&self) -> Result<NodeStats, NodeError>;
}
