//! # Errors
//!
//! Typed faults for every component of the playback core. Each component
//! resolves its failures into one of these enums at its own boundary.

use serenity::model::id::{GuildId, UserId};
use thiserror::Error;

use crate::session::ContentType;

/// Errores de validación de [`crate::audio::queue::TrackQueue`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("posición {position} fuera de rango (tamaño de la cola: {size})")]
    PositionOutOfBounds { position: usize, size: usize },

    #[error("la posición de origen y destino es la misma: {0}")]
    SamePosition(usize),

    #[error("la cola está vacía")]
    EmptyQueue,

    #[error("el usuario {0} no tiene canciones en la cola")]
    NoTracksFromSender(UserId),
}

/// Errores al cambiar la política de repetición
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepeatError {
    #[error("número de repeticiones {count} fuera del rango permitido {min}..={max}")]
    CountOutOfRange { count: u32, min: u32, max: u32 },

    #[error("hay una repetición con contador en curso")]
    CountedRepeatActive,
}

/// Errores de la capa de nodos y de los links por servidor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("no hay ningún nodo de audio disponible")]
    NoAvailableNodes,

    #[error("el nodo de audio {0} no está disponible")]
    Unavailable(String),

    #[error("el nodo de audio {0} no está registrado")]
    UnknownNode(String),

    #[error("el nodo de audio {node} rechazó la petición: {message}")]
    Transport { node: String, message: String },

    #[error("el link del servidor {0} se cerró antes de completar la petición")]
    LinkClosed(GuildId),
}

/// Errores de votación
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("la votación ya terminó")]
    Closed,

    #[error("el usuario {0} no está en el canal de voz")]
    NotInChannel(UserId),
}

/// Invariantes internas que deberían cumplirse siempre.
///
/// Son fatales para la operación que las detecta, nunca para el proceso.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalFault {
    #[error("debe haber una canción en reproducción")]
    NoCurrentTrack,

    #[error("invariante violada: {0}")]
    Invariant(String),
}

/// Errores expuestos por la sesión de audio de un servidor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("la sesión reproduce contenido {declared:?}, se pidió {requested:?}")]
    ContentTypeMismatch {
        declared: ContentType,
        requested: ContentType,
    },

    #[error("no se está reproduciendo nada")]
    NothingPlaying,

    #[error("volumen {volume} fuera del rango permitido {min}..={max}")]
    VolumeOutOfRange { volume: u16, min: u16, max: u16 },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Repeat(#[from] RepeatError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Internal(#[from] InternalFault),
}
