use tracing::info;

use crate::error::RepeatError;

/// Contador de repeticiones pendientes de la canción actual
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepeatCounter {
    remaining: u32,
    total: u32,
}

impl RepeatCounter {
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    /// Número de la repetición que está por empezar (desde 1)
    pub fn current_repeat(&self) -> u32 {
        self.total - self.remaining + 1
    }

    fn set(&mut self, count: u32) {
        self.remaining = count;
        self.total = count;
    }

    fn decrease(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Qué debe hacer el scheduler cuando termina una canción.
///
/// El orden de las variantes es la precedencia: con repetición de canción
/// activa nunca se consulta la de playlist ni el contador.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatDecision {
    Track,
    Playlist,
    Counted,
    None,
}

/// Estado de repetición de una sesión
#[derive(Debug, Default)]
pub struct RepeatPolicyEngine {
    track_repeat: bool,
    playlist_repeat: bool,
    counter: RepeatCounter,
    suppress_notification: bool,
}

impl RepeatPolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(&self) -> RepeatDecision {
        if self.track_repeat {
            RepeatDecision::Track
        } else if self.playlist_repeat {
            RepeatDecision::Playlist
        } else if self.counter.is_active() {
            RepeatDecision::Counted
        } else {
            RepeatDecision::None
        }
    }

    /// Activa/desactiva la repetición de la canción actual
    pub fn toggle_track_loop(&mut self) -> Result<bool, RepeatError> {
        self.ensure_no_counted_repeat()?;
        self.track_repeat = !self.track_repeat;
        if self.track_repeat {
            info!("🔂 Repetir canción activado");
        } else {
            info!("➡️ Repetir canción desactivado");
        }
        Ok(self.track_repeat)
    }

    /// Activa/desactiva la repetición de la cola completa
    pub fn toggle_playlist_loop(&mut self) -> Result<bool, RepeatError> {
        self.ensure_no_counted_repeat()?;
        self.playlist_repeat = !self.playlist_repeat;
        if self.playlist_repeat {
            info!("🔁 Repetir cola activado");
        } else {
            info!("➡️ Repetir cola desactivado");
        }
        Ok(self.playlist_repeat)
    }

    /// Programa `count` repeticiones de la canción actual
    pub fn set_count(&mut self, count: u32, min: u32, max: u32) -> Result<(), RepeatError> {
        if !(min..=max).contains(&count) {
            return Err(RepeatError::CountOutOfRange { count, min, max });
        }
        self.counter.set(count);
        if count > 0 {
            self.suppress_notification = true;
        }
        info!("🔂 Repetir canción {} veces", count);
        Ok(())
    }

    /// Consume una repetición y devuelve el número de la que empieza
    pub fn consume_repeat(&mut self) -> u32 {
        let current = self.counter.current_repeat();
        self.counter.decrease();
        current
    }

    /// Desactiva las tres formas de repetición
    pub fn clear(&mut self) {
        self.track_repeat = false;
        self.playlist_repeat = false;
        self.counter.clear();
    }

    pub fn track_repeat(&self) -> bool {
        self.track_repeat
    }

    pub fn playlist_repeat(&self) -> bool {
        self.playlist_repeat
    }

    pub fn counter(&self) -> RepeatCounter {
        self.counter
    }

    // Notificaciones de "reproduciendo ahora"

    pub fn suppress_notifications(&mut self) {
        self.suppress_notification = true;
    }

    pub fn allow_notifications(&mut self) {
        self.suppress_notification = false;
    }

    pub fn notifications_suppressed(&self) -> bool {
        self.suppress_notification
    }

    fn ensure_no_counted_repeat(&self) -> Result<(), RepeatError> {
        if self.counter.is_active() {
            return Err(RepeatError::CountedRepeatActive);
        }
        Ok(())
    }
}
