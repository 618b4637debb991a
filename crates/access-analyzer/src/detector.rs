//! Elevation threshold crossing detection
//!
//! Turns a sampled elevation signal `e(t)` into ENTER/EXIT events against a
//! fixed mask. Between two coarse checks of `g(t) = e(t) - threshold` a sign
//! change is refined by bisection until the bracket is no wider than the
//! root tolerance.
//!
//! ```text
//!            g(t) >= 0                 g(t) < 0
//!   ┌────────────────┐   Exit    ┌────────────────┐
//!   │     Above      │ ────────► │     Below      │
//!   │                │ ◄──────── │                │
//!   └────────────────┘   Enter   └────────────────┘
//! ```

use chrono::{DateTime, Utc};
use orbital_mechanics::time;
use serde::{Deserialize, Serialize};

use crate::{AnalyzerError, Result, DEFAULT_MAX_CHECK_S, DEFAULT_ROOT_TOLERANCE_S, DEFAULT_THRESHOLD_DEG};

/// Safety net on bisection; 1 day refined to 1 ns needs 47 halvings
const MAX_BISECTIONS: usize = 128;

/// Smallest refinement precision that still maps onto the nanosecond clock
const MIN_ROOT_TOLERANCE_S: f64 = 1.0e-9;

/// Upper bound on coarse sign checks between two samples
pub const MAX_CHECKS_PER_STEP: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Elevation mask [deg]
    pub threshold_deg: f64,
    /// Maximum spacing between coarse sign checks [s]
    pub max_check_s: f64,
    /// Precision of refined crossing times [s]
    pub root_tolerance_s: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold_deg: DEFAULT_THRESHOLD_DEG,
            max_check_s: DEFAULT_MAX_CHECK_S,
            root_tolerance_s: DEFAULT_ROOT_TOLERANCE_S,
        }
    }
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold_deg.is_finite() && (-90.0..=90.0).contains(&self.threshold_deg)) {
            return Err(AnalyzerError::Configuration(format!(
                "elevation threshold {}° outside [-90, 90]",
                self.threshold_deg
            )));
        }
        if !(self.max_check_s.is_finite() && self.max_check_s > 0.0) {
            return Err(AnalyzerError::Configuration(format!(
                "max check interval must be > 0 (got {})",
                self.max_check_s
            )));
        }
        if !(self.root_tolerance_s.is_finite() && self.root_tolerance_s >= MIN_ROOT_TOLERANCE_S) {
            return Err(AnalyzerError::Configuration(format!(
                "root tolerance must be >= {} s (got {})",
                MIN_ROOT_TOLERANCE_S, self.root_tolerance_s
            )));
        }
        Ok(())
    }

    /// Refuse a `max_check_s` that would split one sampling step into more
    /// than [`MAX_CHECKS_PER_STEP`] checks.
    pub fn check_step(&self, step_s: f64) -> Result<()> {
        let checks = (step_s / self.max_check_s).ceil();
        if checks > MAX_CHECKS_PER_STEP as f64 {
            return Err(AnalyzerError::Configuration(format!(
                "max check interval {} s splits the {} s step into {} checks (limit {})",
                self.max_check_s, step_s, checks, MAX_CHECKS_PER_STEP
            )));
        }
        Ok(())
    }
}

/// What happens to a pass already in progress at the first sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialPassPolicy {
    /// Open a window at the first sample epoch
    #[default]
    OpenAtStart,
    /// Ignore the partial pass; windows start at the first rising crossing
    SkipPartial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Below,
    Above,
}

impl Phase {
    fn of(g: f64) -> Self {
        if g >= 0.0 {
            Phase::Above
        } else {
            Phase::Below
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    /// Rising crossing of the mask
    Enter(DateTime<Utc>),
    /// Falling crossing of the mask
    Exit(DateTime<Utc>),
}

impl VisibilityEvent {
    pub fn epoch(&self) -> DateTime<Utc> {
        match self {
            VisibilityEvent::Enter(t) | VisibilityEvent::Exit(t) => *t,
        }
    }
}

/// One detector per (satellite, station) pair.
#[derive(Debug, Clone)]
pub struct ElevationDetector {
    settings: DetectorSettings,
    phase: Option<Phase>,
    /// Last coarse check: epoch and g value
    last: Option<(DateTime<Utc>, f64)>,
}

impl ElevationDetector {
    pub fn new(settings: DetectorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            phase: None,
            last: None,
        })
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// `None` until the first sample was seen
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Seed the state machine with the first sample.
    pub fn start(&mut self, t0: DateTime<Utc>, elevation_deg: f64) -> Phase {
        let g = elevation_deg - self.settings.threshold_deg;
        let phase = Phase::of(g);
        self.phase = Some(phase);
        self.last = Some((t0, g));
        phase
    }

    /// Re-seed at `t` after an interval that could not be evaluated.
    ///
    /// A phase change across the gap is reported at `t` itself, unrefined.
    pub fn resync(&mut self, t: DateTime<Utc>, elevation_deg: f64) -> Option<VisibilityEvent> {
        let before = self.phase;
        let after = self.start(t, elevation_deg);
        match (before, after) {
            (Some(Phase::Below), Phase::Above) => Some(VisibilityEvent::Enter(t)),
            (Some(Phase::Above), Phase::Below) => Some(VisibilityEvent::Exit(t)),
            _ => None,
        }
    }

    /// Consume the next coarse sample.
    ///
    /// `elevation_at` is evaluated at intermediate epochs, both for the
    /// `max_check` subdivision of the step and during root refinement.
    /// Events are returned in chronological order and always lie strictly
    /// after the previous sample.
    pub fn advance<F, E>(
        &mut self,
        t: DateTime<Utc>,
        elevation_deg: f64,
        mut elevation_at: F,
    ) -> std::result::Result<Vec<VisibilityEvent>, E>
    where
        F: FnMut(DateTime<Utc>) -> std::result::Result<f64, E>,
    {
        let threshold = self.settings.threshold_deg;
        let g_end = elevation_deg - threshold;

        let (t_prev, g_prev) = match self.last {
            Some(last) => last,
            None => {
                self.start(t, elevation_deg);
                return Ok(Vec::new());
            },
        };

        let span = time::seconds_between(t_prev, t);
        if span <= 0.0 {
            return Ok(Vec::new());
        }

        let checks = ((span / self.settings.max_check_s).ceil().max(1.0) as u64).min(MAX_CHECKS_PER_STEP);
        let mut events = Vec::new();
        let (mut t_a, mut g_a) = (t_prev, g_prev);

        for k in 1..=checks {
            let (t_b, g_b) = if k == checks {
                (t, g_end)
            } else {
                let t_k = time::shifted_by(t_prev, span * k as f64 / checks as f64);
                (t_k, elevation_at(t_k)? - threshold)
            };

            if Phase::of(g_a) != Phase::of(g_b) {
                let crossing = self.refine(t_a, t_b, Phase::of(g_b), &mut elevation_at)?;
                let event = match Phase::of(g_b) {
                    Phase::Above => VisibilityEvent::Enter(crossing),
                    Phase::Below => VisibilityEvent::Exit(crossing),
                };
                events.push(event);
            }
            (t_a, g_a) = (t_b, g_b);
        }

        self.phase = Some(Phase::of(g_end));
        self.last = Some((t, g_end));
        Ok(events)
    }

    /// Bisection on `[t_a, t_b]`, returning the bracket end on the `after` side.
    fn refine<F, E>(
        &self,
        t_a: DateTime<Utc>,
        t_b: DateTime<Utc>,
        after: Phase,
        elevation_at: &mut F,
    ) -> std::result::Result<DateTime<Utc>, E>
    where
        F: FnMut(DateTime<Utc>) -> std::result::Result<f64, E>,
    {
        let threshold = self.settings.threshold_deg;
        let (mut lo, mut hi) = (0.0_f64, time::seconds_between(t_a, t_b));

        for _ in 0..MAX_BISECTIONS {
            if hi - lo <= self.settings.root_tolerance_s {
                break;
            }
            let mid = 0.5 * (lo + hi);
            let g = elevation_at(time::shifted_by(t_a, mid))? - threshold;
            if Phase::of(g) == after {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        Ok(time::shifted_by(t_a, hi))
    }
}
