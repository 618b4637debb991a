//! Fixed-step time iteration

use chrono::{DateTime, Utc};
use orbital_mechanics::{time, StateVector, TrajectorySource};

use crate::{satellite::TimeWindow, AnalyzerError, Result};

/// Epochs `start, start + step, …` while `t <= end`.
///
/// Each epoch is derived from its index (`start + k·step`) so long runs do
/// not accumulate rounding drift.
#[derive(Debug, Clone)]
pub struct StateSampler {
    window: TimeWindow,
    index: u64,
}

impl StateSampler {
    pub fn new(window: TimeWindow) -> Self {
        Self { window, index: 0 }
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Rewind to the first epoch
    pub fn restart(&mut self) {
        self.index = 0;
    }

    /// Number of epochs the full sequence yields
    pub fn sample_count(&self) -> u64 {
        let span = time::seconds_between(self.window.start(), self.window.end());
        // tolerate sub-nanosecond rounding of span / step
        (span / self.window.step_s() + 1.0e-9).floor() as u64 + 1
    }

    /// Pull one state per epoch from `source`
    pub fn states<'a>(
        self,
        source: &'a dyn TrajectorySource,
        satellite_id: &'a str,
    ) -> impl Iterator<Item = Result<StateVector>> + 'a {
        self.map(move |epoch| {
            source
                .state(satellite_id, epoch)
                .map_err(|source| AnalyzerError::Trajectory {
                    satellite: satellite_id.to_string(),
                    source,
                })
        })
    }
}

impl Iterator for StateSampler {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.sample_count() {
            return None;
        }
        let epoch = time::shifted_by(
            self.window.start(),
            self.index as f64 * self.window.step_s(),
        );
        self.index += 1;
        Some(epoch.min(self.window.end()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sample_count().saturating_sub(self.index) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use orbital_mechanics::{OrbitalError, Span};
    use nalgebra::Vector3;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_inclusive_end() {
        let window = TimeWindow::new(t0(), t0() + chrono::Duration::seconds(300), 60.0).unwrap();
        let epochs: Vec<_> = StateSampler::new(window).collect();
        assert_eq!(epochs.len(), 6);
        assert_eq!(epochs[0], t0());
        assert_eq!(epochs[5], t0() + chrono::Duration::seconds(300));
    }

    #[test]
    fn test_end_not_on_grid() {
        let window = TimeWindow::new(t0(), t0() + chrono::Duration::seconds(150), 60.0).unwrap();
        let epochs: Vec<_> = StateSampler::new(window).collect();
        assert_eq!(epochs.len(), 3);
        assert_eq!(*epochs.last().unwrap(), t0() + chrono::Duration::seconds(120));
    }

    #[test]
    fn test_zero_length_window_yields_start() {
        let window = TimeWindow::new(t0(), t0(), 60.0).unwrap();
        let epochs: Vec<_> = StateSampler::new(window).collect();
        assert_eq!(epochs, vec![t0()]);
    }

    #[test]
    fn test_week_at_one_minute() {
        let window = TimeWindow::with_duration(t0(), 7.0 * 86_400.0, 60.0).unwrap();
        let sampler = StateSampler::new(window);
        assert_eq!(sampler.sample_count(), 10_081);
        assert_eq!(sampler.count(), 10_081);
    }

    #[test]
    fn test_fractional_step_has_no_drift() {
        let window = TimeWindow::new(t0(), t0() + chrono::Duration::seconds(10), 0.1).unwrap();
        let epochs: Vec<_> = StateSampler::new(window).collect();
        assert_eq!(epochs.len(), 101);
        assert_eq!(epochs[100], t0() + chrono::Duration::seconds(10));
        assert_eq!(epochs[50], t0() + chrono::Duration::seconds(5));
    }

    #[test]
    fn test_restart() {
        let window = TimeWindow::new(t0(), t0() + chrono::Duration::seconds(120), 60.0).unwrap();
        let mut sampler = StateSampler::new(window);
        assert_eq!(sampler.by_ref().count(), 3);
        assert_eq!(sampler.next(), None);
        sampler.restart();
        assert_eq!(sampler.next(), Some(t0()));
    }

    struct Bounded(Span);

    impl TrajectorySource for Bounded {
        fn state(
            &self,
            satellite_id: &str,
            epoch: DateTime<Utc>,
        ) -> std::result::Result<StateVector, OrbitalError> {
            self.0.check(satellite_id, epoch)?;
            Ok(StateVector::new(epoch, Vector3::new(7000.0, 0.0, 0.0), Vector3::new(0.0, 7.5, 0.0)))
        }
    }

    #[test]
    fn test_states_surface_trajectory_error() {
        let source = Bounded(Span {
            start: t0(),
            end: t0() + chrono::Duration::seconds(90),
        });
        let window = TimeWindow::new(t0(), t0() + chrono::Duration::seconds(180), 60.0).unwrap();
        let results: Vec<_> = StateSampler::new(window).states(&source, "SAT-1").collect();
        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(
            results[2],
            Err(AnalyzerError::Trajectory { ref satellite, .. }) if satellite == "SAT-1"
        ));
    }
}
