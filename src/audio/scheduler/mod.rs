//! # Playback Schedulers
//!
//! React to node playback events for one guild and decide what plays next.
//!
//! - [`QueuedScheduler`] plays a FIFO queue with track, playlist and
//!   counted repeats
//! - [`StreamScheduler`] plays a single continuous radio stream
//!
//! Schedulers never block: side effects go through [`SchedulerContext`],
//! which queues node commands on the guild's link and records timer
//! requests for the session to apply afterwards.

mod queued;
mod stream;

pub use queued::QueuedScheduler;
pub use stream::StreamScheduler;

use serenity::model::id::GuildId;

use crate::{
    audio::track::Track,
    eviction::EvictionCause,
    node::{
        transport::{EndReason, PlayerUpdate},
        Link,
    },
    notify::{Notification, Notifier},
    session::ContentType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    Arm(EvictionCause),
    Cancel,
}

/// Efectos disponibles para un scheduler durante un callback
pub struct SchedulerContext<'a> {
    guild_id: GuildId,
    link: &'a Link,
    notifier: &'a dyn Notifier,
    timer: Option<TimerRequest>,
}

impl<'a> SchedulerContext<'a> {
    pub fn new(guild_id: GuildId, link: &'a Link, notifier: &'a dyn Notifier) -> Self {
        Self {
            guild_id,
            link,
            notifier,
            timer: None,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn start_track(&self, track: Track) {
        self.link.dispatch(PlayerUpdate::play(track));
    }

    /// Detiene la reproducción y quita pausa y filtros
    pub fn stop_playback(&self) {
        self.link.dispatch(PlayerUpdate::teardown());
    }

    pub fn current_track(&self) -> Option<Track> {
        self.link.current_track()
    }

    pub fn is_paused(&self) -> bool {
        self.link.is_paused()
    }

    pub fn connection_lost(&self) -> bool {
        self.link.connection_lost()
    }

    pub fn notify(&self, notification: Notification) {
        self.notifier.notify(self.guild_id, notification);
    }

    /// La última petición del callback es la que vale
    pub fn arm_eviction(&mut self, cause: EvictionCause) {
        self.timer = Some(TimerRequest::Arm(cause));
    }

    pub fn cancel_eviction(&mut self) {
        self.timer = Some(TimerRequest::Cancel);
    }

    pub fn into_timer_request(self) -> Option<TimerRequest> {
        self.timer
    }
}

/// Política de reproducción activa en una sesión
pub enum PlaybackScheduler {
    Queued(QueuedScheduler),
    Stream(StreamScheduler),
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        PlaybackScheduler::Queued(QueuedScheduler::new())
    }
}

impl PlaybackScheduler {
    pub fn content_type(&self) -> ContentType {
        match self {
            PlaybackScheduler::Queued(_) => ContentType::Queued,
            PlaybackScheduler::Stream(_) => ContentType::Continuous,
        }
    }

    pub fn on_load(&mut self, ctx: &mut SchedulerContext<'_>, tracks: Vec<Track>) {
        ctx.cancel_eviction();
        match self {
            PlaybackScheduler::Queued(scheduler) => scheduler.on_load(ctx, tracks),
            PlaybackScheduler::Stream(scheduler) => scheduler.on_load(ctx, tracks),
        }
    }

    pub fn on_start(&mut self, ctx: &mut SchedulerContext<'_>, track: Track) {
        ctx.cancel_eviction();
        match self {
            PlaybackScheduler::Queued(scheduler) => scheduler.on_start(ctx, track),
            PlaybackScheduler::Stream(scheduler) => scheduler.on_start(ctx, track),
        }
    }

    pub fn on_end(&mut self, ctx: &mut SchedulerContext<'_>, track: Track, reason: EndReason) {
        match self {
            PlaybackScheduler::Queued(scheduler) => scheduler.on_end(ctx, track, reason),
            PlaybackScheduler::Stream(scheduler) => scheduler.on_end(ctx, track, reason),
        }
    }

    pub fn on_stuck(&mut self, ctx: &mut SchedulerContext<'_>, track: Track) {
        match self {
            PlaybackScheduler::Queued(scheduler) => scheduler.on_stuck(ctx, track),
            PlaybackScheduler::Stream(scheduler) => scheduler.on_stuck(ctx, track),
        }
    }

    pub fn on_exception(&mut self, ctx: &mut SchedulerContext<'_>, track: Track, message: Option<&str>) {
        match self {
            PlaybackScheduler::Queued(scheduler) => scheduler.on_exception(ctx, track, message),
            PlaybackScheduler::Stream(scheduler) => scheduler.on_exception(ctx, track, message),
        }
    }

    /// Detiene todo y deja el scheduler como recién creado
    pub fn stop_and_destroy(&mut self, ctx: &mut SchedulerContext<'_>) {
        match self {
            PlaybackScheduler::Queued(scheduler) => scheduler.stop_and_destroy(ctx),
            PlaybackScheduler::Stream(scheduler) => scheduler.stop_and_destroy(ctx),
        }
    }

    pub fn as_queued(&self) -> Option<&QueuedScheduler> {
        match self {
            PlaybackScheduler::Queued(scheduler) => Some(scheduler),
            PlaybackScheduler::Stream(_) => None,
        }
    }

    pub fn as_queued_mut(&mut self) -> Option<&mut QueuedScheduler> {
        match self {
            PlaybackScheduler::Queued(scheduler) => Some(scheduler),
            PlaybackScheduler::Stream(_) => None,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamScheduler> {
        match self {
            PlaybackScheduler::Stream(scheduler) => Some(scheduler),
            PlaybackScheduler::Queued(_) => None,
        }
    }
}
