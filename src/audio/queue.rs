use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::{audio::track::Track, error::QueueError};

/// Cola FIFO de canciones de un servidor.
///
/// Las posiciones que recibe la API pública empiezan en 1 y siempre se
/// validan contra el tamaño actual antes de tocar la cola.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega una canción al final de la cola
    pub fn append(&mut self, track: Track) {
        debug!("➕ Agregado a la cola: {}", track.qualifier());
        self.items.push_back(track);
    }

    /// Agrega varias canciones (playlist) manteniendo el orden
    pub fn append_all(&mut self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let before = self.items.len();
        self.items.extend(tracks);
        let added = self.items.len() - before;
        info!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    /// Obtiene la siguiente canción (FIFO)
    pub fn poll(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola: {}", track.qualifier()),
            None => debug!("📭 Cola vacía, no hay siguiente canción"),
        }
        next
    }

    /// Mezcla la cola
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada ({} canciones)", self.items.len());
    }

    /// Mueve la canción en `from` a la posición `to`.
    ///
    /// Mover una posición sobre sí misma no cambia nada.
    pub fn move_to_position(&mut self, from: usize, to: usize) -> Result<&Track, QueueError> {
        self.check_position(from)?;
        self.check_position(to)?;

        if from != to {
            let track = self
                .items
                .remove(from - 1)
                .ok_or(QueueError::PositionOutOfBounds { position: from, size: self.items.len() })?;
            self.items.insert(to - 1, track);
            debug!("📍 Canción movida de la posición {} a {}", from, to);
        }

        self.track_at(to).ok_or(QueueError::PositionOutOfBounds { position: to, size: self.items.len() })
    }

    /// Descarta las canciones anteriores a `position` y devuelve la que
    /// estaba en esa posición, fuera de la cola.
    pub fn skip_to_position(&mut self, position: usize) -> Result<Track, QueueError> {
        self.check_position(position)?;

        let skipped = self.items.drain(..position - 1).count();
        debug!("⏭️ Saltadas {} canciones", skipped);

        self.items
            .pop_front()
            .ok_or(QueueError::PositionOutOfBounds { position, size: 0 })
    }

    /// Elimina todas las canciones de un usuario, en el orden en que estaban
    pub fn remove_by_sender(&mut self, user_id: UserId) -> Vec<Track> {
        let (removed, kept): (VecDeque<_>, VecDeque<_>) =
            self.items.drain(..).partition(|track| track.is_sent_by(user_id));
        self.items = kept;

        if !removed.is_empty() {
            info!("🗑️ Eliminadas {} canciones del usuario {}", removed.len(), user_id);
        }
        removed.into()
    }

    /// Vacía la cola y devuelve cuántas canciones tenía
    pub fn clear_and_get_size(&mut self) -> usize {
        let size = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada ({} canciones)", size);
        size
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// `true` si la posición (desde 1) no existe en la cola actual
    pub fn position_out_of_bounds(&self, position: usize) -> bool {
        position < 1 || position > self.items.len()
    }

    pub fn track_at(&self, position: usize) -> Option<&Track> {
        position.checked_sub(1).and_then(|index| self.items.get(index))
    }

    pub fn any_from_sender(&self, user_id: UserId) -> bool {
        self.items.iter().any(|track| track.is_sent_by(user_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Duración total de la cola (los streams no suman)
    pub fn total_duration(&self) -> Duration {
        self.items
            .iter()
            .filter(|track| !track.is_stream)
            .map(|track| track.duration)
            .sum()
    }

    // Funciones privadas

    fn check_position(&self, position: usize) -> Result<(), QueueError> {
        if self.position_out_of_bounds(position) {
            return Err(QueueError::PositionOutOfBounds {
                position,
                size: self.items.len(),
            });
        }
        Ok(())
    }
}
