use tracing::info;

use super::SchedulerContext;
use crate::{
    audio::{
        fault::{self, PlaybackFault},
        track::{RadioStation, Track},
    },
    eviction::EvictionCause,
    node::transport::EndReason,
    notify::Notification,
};

/// Reproduce una estación de radio sin cola
#[derive(Debug)]
pub struct StreamScheduler {
    station: RadioStation,
}

impl StreamScheduler {
    pub fn new(station: RadioStation) -> Self {
        Self { station }
    }

    pub fn station(&self) -> &RadioStation {
        &self.station
    }

    pub(super) fn on_load(&mut self, ctx: &mut SchedulerContext<'_>, tracks: Vec<Track>) {
        if let Some(stream) = tracks.into_iter().next() {
            ctx.start_track(stream);
        }
    }

    pub(super) fn on_start(&mut self, ctx: &mut SchedulerContext<'_>, _track: Track) {
        info!("📻 Transmitiendo {} en {}", self.station.name, ctx.guild_id());
        ctx.notify(Notification::StreamStarted {
            station: self.station.clone(),
        });
    }

    pub(super) fn on_end(&mut self, ctx: &mut SchedulerContext<'_>, _track: Track, reason: EndReason) {
        // Otra estación ya ocupa el reproductor
        if reason == EndReason::Replaced {
            return;
        }
        info!("📻 Transmisión de {} terminada ({:?})", self.station.name, reason);
        ctx.notify(Notification::StreamStopped {
            station: self.station.clone(),
        });
        ctx.arm_eviction(EvictionCause::NoTracks);
    }

    pub(super) fn on_stuck(&mut self, ctx: &mut SchedulerContext<'_>, _track: Track) {
        self.on_error(ctx, PlaybackFault::Stuck);
    }

    pub(super) fn on_exception(&mut self, ctx: &mut SchedulerContext<'_>, _track: Track, message: Option<&str>) {
        self.on_error(ctx, fault::classify(message));
    }

    pub(super) fn stop_and_destroy(&mut self, ctx: &mut SchedulerContext<'_>) {
        ctx.stop_playback();
        ctx.cancel_eviction();
    }

    fn on_error(&mut self, ctx: &mut SchedulerContext<'_>, cause: PlaybackFault) {
        info!("⚠️ Problema con la radio {} en {}: {:?}", self.station.name, ctx.guild_id(), cause);
        ctx.notify(Notification::StreamIssue {
            station: self.station.clone(),
            cause,
        });
        ctx.stop_playback();
        ctx.arm_eviction(EvictionCause::NoTracks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::scheduler::TimerRequest,
        testing::{track, wait_until, Harness},
    };
    use pretty_assertions::assert_eq;

    fn station() -> RadioStation {
        RadioStation::new("Jazz FM", "http://radio.example/jazz")
    }

    #[tokio::test]
    async fn stream_starts_on_load_and_announces_station() {
        let mut h = Harness::new();
        let mut scheduler = StreamScheduler::new(station());
        let stream = track("jazz").as_stream();

        scheduler.on_load(&mut h.ctx(), vec![stream.clone()]);
        scheduler.on_start(&mut h.ctx(), stream.clone());

        assert_eq!(h.link.current_track(), Some(stream));
        assert_eq!(h.drain(), vec![Notification::StreamStarted { station: station() }]);
    }

    #[tokio::test]
    async fn end_of_stream_arms_eviction() {
        let mut h = Harness::new();
        let mut scheduler = StreamScheduler::new(station());

        let mut ctx = h.ctx();
        scheduler.on_end(&mut ctx, track("jazz"), EndReason::Finished);

        assert_eq!(ctx.into_timer_request(), Some(TimerRequest::Arm(EvictionCause::NoTracks)));
        assert_eq!(h.drain(), vec![Notification::StreamStopped { station: station() }]);
    }

    #[tokio::test]
    async fn stuck_stream_is_stopped_before_arming() {
        let mut h = Harness::new();
        let mut scheduler = StreamScheduler::new(station());
        let stream = track("jazz").as_stream();
        scheduler.on_load(&mut h.ctx(), vec![stream.clone()]);

        let mut ctx = h.ctx();
        scheduler.on_stuck(&mut ctx, stream);

        assert_eq!(ctx.into_timer_request(), Some(TimerRequest::Arm(EvictionCause::NoTracks)));
        assert_eq!(h.link.current_track(), None);
        assert_eq!(
            h.drain(),
            vec![Notification::StreamIssue {
                station: station(),
                cause: PlaybackFault::Stuck
            }]
        );
        wait_until(|| h.node.updates(h.link.guild_id()).len() == 2).await;
        assert_eq!(h.node.player(h.link.guild_id()).track, None);
    }
}
