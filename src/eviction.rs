use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Por qué se programó la salida del canal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// No queda nada que reproducir
    NoTracks,
    /// El canal de voz quedó sin usuarios
    EmptyChannel,
}

#[derive(Debug)]
struct PendingEviction {
    generation: u64,
    cause: EvictionCause,
    delay: Duration,
    deadline: DateTime<Utc>,
    token: CancellationToken,
}

/// Temporizador de inactividad de una sesión.
///
/// Cada `arm` cancela el anterior y abre una nueva generación; al vencer,
/// el callback recibe el número de generación para que la sesión descarte
/// disparos que ya no corresponden.
#[derive(Debug, Default)]
pub struct InactivityEvictionTimer {
    generation: u64,
    pending: Option<PendingEviction>,
}

impl InactivityEvictionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Programa la salida tras `delay`, reemplazando cualquier otra pendiente
    pub fn arm<F>(&mut self, delay: Duration, cause: EvictionCause, on_elapsed: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        let deadline = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());

        debug!(
            "⏲️ Salida por inactividad ({:?}) programada en {}",
            cause,
            humantime::format_duration(delay)
        );

        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_elapsed(generation),
            }
        });

        self.pending = Some(PendingEviction {
            generation,
            cause,
            delay,
            deadline,
            token,
        });
        generation
    }

    /// Cancela la salida pendiente; no hace nada si no había ninguna
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.token.cancel();
                debug!("⏲️ Salida por inactividad ({:?}) cancelada", pending.cause);
                true
            }
            None => false,
        }
    }

    /// Consume el disparo si pertenece a la generación vigente
    pub fn take_elapsed(&mut self, generation: u64) -> Option<(EvictionCause, Duration)> {
        match &self.pending {
            Some(pending) if pending.generation == generation => {
                self.pending.take().map(|pending| (pending.cause, pending.delay))
            }
            _ => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cause(&self) -> Option<EvictionCause> {
        self.pending.as_ref().map(|pending| pending.cause)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }
}

impl Drop for InactivityEvictionTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
