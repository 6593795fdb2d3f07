use tracing::{debug, info};

use super::SchedulerContext;
use crate::{
    audio::{
        fault::{self, PlaybackFault},
        queue::TrackQueue,
        repeat::{RepeatDecision, RepeatPolicyEngine},
        track::Track,
    },
    error::QueueError,
    eviction::EvictionCause,
    node::transport::EndReason,
    notify::Notification,
};

/// Reproduce la cola del servidor en orden, aplicando las repeticiones
#[derive(Debug, Default)]
pub struct QueuedScheduler {
    queue: TrackQueue,
    repeat: RepeatPolicyEngine,
}

impl QueuedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut TrackQueue {
        &mut self.queue
    }

    pub fn repeat(&self) -> &RepeatPolicyEngine {
        &self.repeat
    }

    pub fn repeat_mut(&mut self) -> &mut RepeatPolicyEngine {
        &mut self.repeat
    }

    pub(super) fn on_load(&mut self, ctx: &mut SchedulerContext<'_>, tracks: Vec<Track>) {
        let idle = ctx.current_track().is_none();

        if tracks.len() == 1 {
            let Some(track) = tracks.into_iter().next() else {
                return;
            };
            if idle {
                self.repeat.allow_notifications();
                ctx.start_track(track);
            } else {
                self.queue.append(track);
            }
            return;
        }

        self.queue.append_all(tracks);
        if idle {
            self.repeat.allow_notifications();
            self.next_track(ctx);
        }
    }

    pub(super) fn on_start(&mut self, ctx: &mut SchedulerContext<'_>, track: Track) {
        info!("▶️ Reproduciendo en {}: {}", ctx.guild_id(), track.qualifier());

        if ctx.is_paused() {
            ctx.notify(Notification::TrackStartedWhilePaused { track });
        } else if !self.repeat.notifications_suppressed() {
            ctx.notify(Notification::TrackStarted { track });
        }
    }

    pub(super) fn on_end(&mut self, ctx: &mut SchedulerContext<'_>, track: Track, reason: EndReason) {
        debug!("⏹️ Terminó en {} ({:?}): {}", ctx.guild_id(), reason, track.qualifier());

        match self.repeat.decide() {
            RepeatDecision::Track => {
                self.repeat.suppress_notifications();
                ctx.start_track(track.make_clone());
            }
            RepeatDecision::Playlist => {
                self.queue.append(track.make_clone());
                // Replaced ya tiene otra pista en marcha: no se avanza
                if reason.may_start_next() || reason == EndReason::Stopped {
                    self.next_track(ctx);
                }
            }
            RepeatDecision::Counted => {
                let current_repeat = self.repeat.consume_repeat();
                self.repeat.suppress_notifications();
                ctx.start_track(track.make_clone());
                ctx.notify(Notification::RepeatProgress {
                    track,
                    current_repeat,
                    remaining: self.repeat.counter().remaining(),
                });
            }
            RepeatDecision::None => self.advance(ctx, reason),
        }
    }

    pub(super) fn on_stuck(&mut self, ctx: &mut SchedulerContext<'_>, track: Track) {
        self.on_error(ctx, track, PlaybackFault::Stuck);
    }

    pub(super) fn on_exception(&mut self, ctx: &mut SchedulerContext<'_>, track: Track, message: Option<&str>) {
        self.on_error(ctx, track, fault::classify(message));
    }

    pub(super) fn stop_and_destroy(&mut self, ctx: &mut SchedulerContext<'_>) {
        self.queue.clear();
        self.repeat.clear();
        self.repeat.allow_notifications();
        ctx.stop_playback();
        ctx.cancel_eviction();
    }

    /// Salta a una posición de la cola y empieza esa canción
    pub fn skip_to(&mut self, ctx: &mut SchedulerContext<'_>, position: usize) -> Result<Track, QueueError> {
        let track = self.queue.skip_to_position(position)?;
        self.repeat.allow_notifications();
        ctx.start_track(track.clone());
        Ok(track)
    }

    // Funciones privadas

    fn advance(&mut self, ctx: &mut SchedulerContext<'_>, reason: EndReason) {
        if self.queue.is_empty() && reason != EndReason::Replaced {
            self.repeat.allow_notifications();
            if ctx.connection_lost() {
                info!("🔌 Conexión perdida en {}, limpiando la sesión", ctx.guild_id());
                self.queue.clear();
                self.repeat.clear();
            } else {
                info!("📭 Cola terminada en {}", ctx.guild_id());
                ctx.notify(Notification::QueueEnded);
                ctx.arm_eviction(EvictionCause::NoTracks);
            }
            return;
        }

        if reason.may_start_next() || (reason == EndReason::Stopped && !self.queue.is_empty()) {
            self.repeat.allow_notifications();
            self.next_track(ctx);
        }
    }

    fn next_track(&mut self, ctx: &mut SchedulerContext<'_>) {
        if let Some(next) = self.queue.poll() {
            ctx.start_track(next);
        }
    }

    fn on_error(&mut self, ctx: &mut SchedulerContext<'_>, track: Track, cause: PlaybackFault) {
        info!("⚠️ Problema reproduciendo {} en {}: {:?}", track.qualifier(), ctx.guild_id(), cause);
        ctx.notify(Notification::PlaybackIssue { track, cause });

        if self.queue.is_empty() && ctx.current_track().is_none() {
            ctx.arm_eviction(EvictionCause::NoTracks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::scheduler::TimerRequest,
        node::{transport::PlayerUpdate, LinkState},
        testing::{track, Harness},
    };
    use pretty_assertions::assert_eq;

    fn queue_ids(scheduler: &QueuedScheduler) -> Vec<String> {
        scheduler.queue().iter().map(|t| t.identifier.clone()).collect()
    }

    #[tokio::test]
    async fn single_track_starts_when_idle_and_queues_otherwise() {
        let h = Harness::new();
        let mut scheduler = QueuedScheduler::new();

        scheduler.on_load(&mut h.ctx(), vec![track("a")]);
        assert_eq!(h.link.current_track(), Some(track("a")));

        scheduler.on_load(&mut h.ctx(), vec![track("b")]);
        assert_eq!(h.link.current_track(), Some(track("a")));
        assert_eq!(queue_ids(&scheduler), vec!["b"]);
    }

    #[tokio::test]
    async fn playlist_starts_first_track_and_queues_the_rest() {
        let h = Harness::new();
        let mut scheduler = QueuedScheduler::new();

        scheduler.on_load(&mut h.ctx(), vec![track("a"), track("b"), track("c")]);

        assert_eq!(h.link.current_track(), Some(track("a")));
        assert_eq!(queue_ids(&scheduler), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn track_repeat_takes_precedence() {
        let h = Harness::new();
        let mut scheduler = QueuedScheduler::new();
        scheduler.queue_mut().append(track("b"));
        scheduler.repeat_mut().toggle_playlist_loop().unwrap();
        scheduler.repeat_mut().toggle_track_loop().unwrap();

        scheduler.on_end(&mut h.ctx(), track("a"), EndReason::Finished);

        assert_eq!(h.link.current_track(), Some(track("a")));
        assert_eq!(queue_ids(&scheduler), vec!["b"]);
        assert!(scheduler.repeat().notifications_suppressed());
    }

    #[tokio::test]
    async fn track_repeat_wins_over_playlist_and_counted_repeat() {
        let mut h = Harness::new();
        let mut scheduler = QueuedScheduler::new();
        scheduler.queue_mut().append(track("b"));
        scheduler.repeat_mut().toggle_track_loop().unwrap();
        scheduler.repeat_mut().toggle_playlist_loop().unwrap();
        scheduler.repeat_mut().set_count(3, 1, 30).unwrap();

        scheduler.on_end(&mut h.ctx(), track("a"), EndReason::Finished);

        assert_eq!(h.link.current_track(), Some(track("a")));
        assert_eq!(queue_ids(&scheduler), vec!["b"]);
        assert_eq!(scheduler.repeat().counter().remaining(), 3);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn playlist_repeat_advances_and_requeues() {
        let h = Harness::new();
        let mut scheduler = QueuedScheduler::new();
        scheduler.queue_mut().append(track("b"));
        scheduler.repeat_mut().toggle_playlist_loop().unwrap();

        scheduler.on_end(&mut h.ctx(), track("a"), EndReason::Finished);

        assert_eq!(h.link.current_track(), Some(track("b")));
        assert_eq!(queue_ids(&scheduler), vec!["a"]);
    }

    #[tokio::test]
    async fn playlist_repeat_requeues_without_advancing_on_replace() {
        let h = Harness::new();
        let mut scheduler = QueuedScheduler::new();
        scheduler.queue_mut().append(track("b"));
        scheduler.repeat_mut().toggle_playlist_loop().unwrap();

        scheduler.on_end(&mut h.ctx(), track("a"), EndReason::Replaced);

        assert_eq!(h.link.current_track(), None);
        assert_eq!(queue_ids(&scheduler), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn counted_repeat_reports_progress() {
        let mut h = Harness::new();
        let mut scheduler = QueuedScheduler::new();
        scheduler.repeat_mut().set_count(3, 1, 30).unwrap();

        scheduler.on_end(&mut h.ctx(), track("a"), EndReason::Finished);
        scheduler.on_end(&mut h.ctx(), track("a"), EndReason::Finished);

        assert_eq!(
            h.drain(),
            vec![
                Notification::RepeatProgress {
                    track: track("a"),
                    current_repeat: 1,
                    remaining: 2
                },
                Notification::RepeatProgress {
                    track: track("a"),
                    current_repeat: 2,
                    remaining: 1
                },
            ]
        );
        assert_eq!(h.link.current_track(), Some(track("a")));
    }

    #[tokio::test]
    async fn empty_queue_ends_and_arms_eviction() {
        let mut h = Harness::new();
        let mut scheduler = QueuedScheduler::new();

        let mut ctx = h.ctx();
        scheduler.on_end(&mut ctx, track("a"), EndReason::Finished);

        assert_eq!(ctx.into_timer_request(), Some(TimerRequest::Arm(EvictionCause::NoTracks)));
        assert_eq!(h.drain(), vec![Notification::QueueEnded]);
    }

    #[tokio::test]
    async fn lost_connection_clears_state_silently() {
        let mut h = Harness::new();
        let mut scheduler = QueuedScheduler::new();
        h.link.set_state(LinkState::Disconnected);

        let mut ctx = h.ctx();
        scheduler.on_end(&mut ctx, track("a"), EndReason::Cleanup);

        assert_eq!(ctx.into_timer_request(), None);
        assert!(h.drain().is_empty());
        assert!(scheduler.queue().is_empty());
    }

    #[tokio::test]
    async fn replaced_track_does_not_advance() {
        let mut h = Harness::new();
        let mut scheduler = QueuedScheduler::new();

        let mut ctx = h.ctx();
        scheduler.on_end(&mut ctx, track("a"), EndReason::Replaced);

        assert_eq!(ctx.into_timer_request(), None);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn stopped_track_advances_when_queue_has_more() {
        let h = Harness::new();
        let mut scheduler = QueuedScheduler::new();
        scheduler.queue_mut().append_all([track("b"), track("c")]);

        scheduler.on_end(&mut h.ctx(), track("a"), EndReason::Stopped);

        assert_eq!(h.link.current_track(), Some(track("b")));
        assert_eq!(queue_ids(&scheduler), vec!["c"]);
    }

    #[tokio::test]
    async fn start_notifications_respect_pause_and_suppression() {
        let mut h = Harness::new();
        let mut scheduler = QueuedScheduler::new();

        scheduler.on_start(&mut h.ctx(), track("a"));
        scheduler.repeat_mut().suppress_notifications();
        scheduler.on_start(&mut h.ctx(), track("a"));
        h.link.dispatch(PlayerUpdate::paused(true));
        scheduler.on_start(&mut h.ctx(), track("b"));

        assert_eq!(
            h.drain(),
            vec![
                Notification::TrackStarted { track: track("a") },
                Notification::TrackStartedWhilePaused { track: track("b") },
            ]
        );
    }

    #[tokio::test]
    async fn exception_with_nothing_left_arms_eviction() {
        let mut h = Harness::new();
        let mut scheduler = QueuedScheduler::new();

        let mut ctx = h.ctx();
        scheduler.on_exception(&mut ctx, track("a"), Some("Video unavailable"));

        assert_eq!(ctx.into_timer_request(), Some(TimerRequest::Arm(EvictionCause::NoTracks)));
        assert_eq!(
            h.drain(),
            vec![Notification::PlaybackIssue {
                track: track("a"),
                cause: PlaybackFault::Unavailable
            }]
        );
    }

    #[tokio::test]
    async fn skip_to_starts_the_target_track() {
        let h = Harness::new();
        let mut scheduler = QueuedScheduler::new();
        scheduler.queue_mut().append_all([track("a"), track("b"), track("c")]);

        let started = scheduler.skip_to(&mut h.ctx(), 2).unwrap();

        assert_eq!(started, track("b"));
        assert_eq!(h.link.current_track(), Some(track("b")));
        assert_eq!(queue_ids(&scheduler), vec!["c"]);
        assert_eq!(
            scheduler.skip_to(&mut h.ctx(), 5),
            Err(QueueError::PositionOutOfBounds { position: 5, size: 1 })
        );
    }
}
