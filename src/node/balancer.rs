use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::transport::NodeStats;

/// Minutos de historial que cuentan para la penalización
const WINDOW_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyMetric {
    LoadAttempt,
    LoadFailed,
    TrackStuck,
    TrackException,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricCounts {
    pub load_attempts: u32,
    pub load_failures: u32,
    pub stuck: u32,
    pub exceptions: u32,
}

impl MetricCounts {
    fn add(&mut self, metric: PenaltyMetric) {
        match metric {
            PenaltyMetric::LoadAttempt => self.load_attempts += 1,
            PenaltyMetric::LoadFailed => self.load_failures += 1,
            PenaltyMetric::TrackStuck => self.stuck += 1,
            PenaltyMetric::TrackException => self.exceptions += 1,
        }
    }

    fn merge(&mut self, other: &MetricCounts) {
        self.load_attempts += other.load_attempts;
        self.load_failures += other.load_failures;
        self.stuck += other.stuck;
        self.exceptions += other.exceptions;
    }
}

/// Historial por minuto de los fallos de reproducción de un nodo
#[derive(Debug, Default)]
pub struct PenaltyTracker {
    buckets: Mutex<VecDeque<(i64, MetricCounts)>>,
}

impl PenaltyTracker {
    pub fn record(&self, metric: PenaltyMetric) {
        self.record_at(metric, Utc::now());
    }

    pub fn counts(&self) -> MetricCounts {
        self.counts_at(Utc::now())
    }

    pub fn clear(&self) {
        self.buckets.lock().clear();
    }

    fn record_at(&self, metric: PenaltyMetric, now: DateTime<Utc>) {
        let minute = now.timestamp() / 60;
        let mut buckets = self.buckets.lock();

        match buckets.back_mut() {
            Some((last, counts)) if *last == minute => counts.add(metric),
            _ => {
                let mut counts = MetricCounts::default();
                counts.add(metric);
                buckets.push_back((minute, counts));
            }
        }

        while buckets.front().is_some_and(|(m, _)| minute - *m >= WINDOW_MINUTES) {
            buckets.pop_front();
        }
    }

    fn counts_at(&self, now: DateTime<Utc>) -> MetricCounts {
        let minute = now.timestamp() / 60;
        let mut total = MetricCounts::default();
        for (_, counts) in self.buckets.lock().iter().filter(|(m, _)| minute - *m < WINDOW_MINUTES) {
            total.merge(counts);
        }
        total
    }
}

/// Penalización total de un nodo; `None` si el nodo no debe recibir carga.
///
/// Un nodo cuyas cargas recientes fallaron todas queda bloqueado.
pub fn penalty(stats: Option<&NodeStats>, playing_links: usize, counts: MetricCounts) -> Option<u32> {
    if counts.load_attempts > 0 && counts.load_failures >= counts.load_attempts {
        return None;
    }

    let mut total = playing_links as f64;

    if let Some(stats) = stats {
        total += 1.05f64.powf(100.0 * stats.system_load) * 10.0 - 10.0;

        if let Some(deficit) = stats.frames_deficit {
            total += 1.03f64.powf(500.0 * (deficit as f64 / 3000.0)) * 600.0 - 600.0;
        }
        if let Some(nulled) = stats.frames_nulled {
            total += (1.03f64.powf(500.0 * (nulled as f64 / 3000.0)) * 300.0 - 300.0) * 2.0;
        }
    }

    total += counts.stuck as f64 * 100.0;
    total += counts.exceptions as f64 * 10.0;

    Some(total.round().clamp(0.0, u32::MAX as f64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn busier_node_gets_higher_penalty() {
        let idle = NodeStats {
            system_load: 0.05,
            ..NodeStats::default()
        };
        let busy = NodeStats {
            system_load: 0.9,
            frames_deficit: Some(300),
            ..NodeStats::default()
        };

        let idle_penalty = penalty(Some(&idle), 1, MetricCounts::default()).unwrap();
        let busy_penalty = penalty(Some(&busy), 1, MetricCounts::default()).unwrap();

        assert!(busy_penalty > idle_penalty);
    }

    #[test]
    fn node_with_only_failed_loads_is_blocked() {
        let counts = MetricCounts {
            load_attempts: 3,
            load_failures: 3,
            ..MetricCounts::default()
        };

        assert_eq!(penalty(None, 0, counts), None);
    }

    #[test]
    fn old_buckets_fall_out_of_the_window() {
        let tracker = PenaltyTracker::default();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        tracker.record_at(PenaltyMetric::TrackStuck, start);
        tracker.record_at(PenaltyMetric::TrackStuck, start);
        assert_eq!(tracker.counts_at(start).stuck, 2);

        let later = start + chrono::Duration::minutes(WINDOW_MINUTES + 1);
        tracker.record_at(PenaltyMetric::TrackException, later);

        let counts = tracker.counts_at(later);
        assert_eq!(counts.stuck, 0);
        assert_eq!(counts.exceptions, 1);
    }
}
