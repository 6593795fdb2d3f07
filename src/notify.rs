use serenity::model::id::GuildId;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::audio::{
    fault::PlaybackFault,
    track::{RadioStation, Track},
};

/// Evento para el usuario emitido por el núcleo de reproducción.
///
/// Sólo describe qué pasó; cómo se presenta (embed, texto, idioma) es
/// responsabilidad de quien consume el canal.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    TrackStarted { track: Track },
    TrackStartedWhilePaused { track: Track },
    RepeatProgress { track: Track, current_repeat: u32, remaining: u32 },
    QueueEnded,
    PlaybackIssue { track: Track, cause: PlaybackFault },
    StreamStarted { station: RadioStation },
    StreamStopped { station: RadioStation },
    StreamIssue { station: RadioStation, cause: PlaybackFault },
    NoMatches { query: String },
    LoadFailed { query: String, message: String },
    LeftDueToInactivity { idle: Duration },
    LeftEmptyChannel { idle: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuildNotification {
    pub guild_id: GuildId,
    pub notification: Notification,
}

/// Destino de las notificaciones de todas las sesiones
pub trait Notifier: Send + Sync {
    fn notify(&self, guild_id: GuildId, notification: Notification);
}

/// Notifier que reenvía todo por un canal
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<GuildNotification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GuildNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, guild_id: GuildId, notification: Notification) {
        debug!("📣 Notificación para {}: {:?}", guild_id, notification);
        let _ = self.sender.send(GuildNotification {
            guild_id,
            notification,
        });
    }
}
