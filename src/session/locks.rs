use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::SessionSignal;

/// Servidores bloqueados (por ejemplo, con una votación abierta).
///
/// Mientras un servidor está bloqueado la salida por inactividad no se
/// ejecuta; al liberarse el último guard la sesión vuelve a programarla.
#[derive(Clone)]
pub struct GuildLocks {
    held: Arc<DashMap<GuildId, usize>>,
    signals: mpsc::UnboundedSender<SessionSignal>,
}

impl GuildLocks {
    pub(crate) fn new(signals: mpsc::UnboundedSender<SessionSignal>) -> Self {
        Self {
            held: Arc::new(DashMap::new()),
            signals,
        }
    }

    pub fn lock(&self, guild_id: GuildId) -> GuildLockGuard {
        *self.held.entry(guild_id).or_insert(0) += 1;
        debug!("🔒 Servidor {} bloqueado", guild_id);
        GuildLockGuard {
            guild_id,
            locks: self.clone(),
        }
    }

    pub fn is_locked(&self, guild_id: GuildId) -> bool {
        self.held.contains_key(&guild_id)
    }

    fn release(&self, guild_id: GuildId) {
        let unlocked = match self.held.entry(guild_id) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        if unlocked {
            debug!("🔓 Servidor {} desbloqueado", guild_id);
            let _ = self.signals.send(SessionSignal::Unlocked(guild_id));
        }
    }
}

/// Mantiene el servidor bloqueado mientras exista
pub struct GuildLockGuard {
    guild_id: GuildId,
    locks: GuildLocks,
}

impl GuildLockGuard {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }
}

impl Drop for GuildLockGuard {
    fn drop(&mut self) {
        self.locks.release(self.guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_guards_unlock_once_at_the_end() {
        let (signals, mut received) = mpsc::unbounded_channel();
        let locks = GuildLocks::new(signals);
        let guild = GuildId::new(3);

        let outer = locks.lock(guild);
        let inner = locks.lock(guild);
        drop(inner);
        assert!(locks.is_locked(guild));
        assert!(received.try_recv().is_err());

        drop(outer);
        assert!(!locks.is_locked(guild));
        assert_eq!(received.try_recv().ok(), Some(SessionSignal::Unlocked(guild)));
    }
}
