//! Workout Session Tracking
//!
//! The stateful core of the pipeline: accumulates samples while a session is
//! active, tracks pause intervals, and derives workout statistics on demand.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::domain::models::{HeartRateSample, PauseReason, WorkoutMetrics};
use crate::error::MonitorError;

/// Readings below this are sensor noise (poor skin contact, strap settling)
/// and are excluded from the statistics. They still occupy buffer slots.
pub const MIN_VALID_BPM: u16 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active,
    Paused,
    /// Terminal for the finished session. `start` begins a fresh one.
    Ended,
}

impl SessionPhase {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }
}

/// Tracks one workout session at a time.
///
/// All mutating operations exist in an `*_at` form taking an explicit
/// [`Instant`]; the plain forms use the current time. Mutation must be
/// funneled through a single owner (the service wraps this in a mutex) so
/// sample ingestion and watchdog pauses cannot race.
pub struct SessionTracker {
    phase: SessionPhase,
    started_at: Option<Instant>,
    samples: Vec<HeartRateSample>,
    accumulated_pause: Duration,
    pause_started_at: Option<Instant>,
    pause_reason: Option<PauseReason>,
    assumed_age_years: u8,
}

impl SessionTracker {
    pub fn new(assumed_age_years: u8) -> Self {
        Self {
            phase: SessionPhase::Idle,
            started_at: None,
            samples: Vec::new(),
            accumulated_pause: Duration::ZERO,
            pause_started_at: None,
            pause_reason: None,
            assumed_age_years,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pause_reason
    }

    /// Age fed into the zone and calorie formulas. Takes effect on the next
    /// metrics computation.
    pub fn set_assumed_age(&mut self, years: u8) {
        self.assumed_age_years = years;
    }

    /// Begin a new session. Allowed from `Idle` or `Ended`.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        self.start_at(Instant::now())
    }

    pub fn start_at(&mut self, now: Instant) -> Result<(), MonitorError> {
        match self.phase {
            SessionPhase::Idle | SessionPhase::Ended => {
                self.samples.clear();
                self.accumulated_pause = Duration::ZERO;
                self.pause_started_at = None;
                self.pause_reason = None;
                self.started_at = Some(now);
                self.phase = SessionPhase::Active;
                Ok(())
            }
            other => Err(self.rejected("start", other)),
        }
    }

    /// Append a sample to the buffer. Only has effect while `Active`;
    /// samples arriving while paused, idle, or ended are dropped.
    pub fn ingest(&mut self, sample: HeartRateSample) {
        if self.phase == SessionPhase::Active {
            self.samples.push(sample);
        }
    }

    pub fn pause(&mut self, reason: PauseReason) -> Result<(), MonitorError> {
        self.pause_at(Instant::now(), reason)
    }

    /// Pause the session, optionally backdated.
    ///
    /// `at` is clamped to the session interval: no earlier than the start,
    /// no later than now. The watchdog backdates to the last good sample so
    /// stale time never counts as active. Idempotent while already paused.
    pub fn pause_at(&mut self, at: Instant, reason: PauseReason) -> Result<(), MonitorError> {
        match self.phase {
            SessionPhase::Paused => Ok(()),
            SessionPhase::Active => {
                let started = self.started_at.expect("active session has a start time");
                self.pause_started_at = Some(at.max(started).min(Instant::now()));
                self.pause_reason = Some(reason);
                self.phase = SessionPhase::Paused;
                Ok(())
            }
            other => Err(self.rejected("pause", other)),
        }
    }

    pub fn resume(&mut self) -> Result<(), MonitorError> {
        self.resume_at(Instant::now())
    }

    /// Fold the pending pause interval into the accumulator and re-enter
    /// `Active`.
    pub fn resume_at(&mut self, now: Instant) -> Result<(), MonitorError> {
        match self.phase {
            SessionPhase::Paused => {
                let pause_started = self
                    .pause_started_at
                    .take()
                    .expect("paused session has a pause start time");
                self.accumulated_pause += now.saturating_duration_since(pause_started);
                self.pause_reason = None;
                self.phase = SessionPhase::Active;
                Ok(())
            }
            other => Err(self.rejected("resume", other)),
        }
    }

    pub fn end(&mut self) -> Result<Option<WorkoutMetrics>, MonitorError> {
        self.end_at(Instant::now())
    }

    /// Finish the session and return the final metrics, if any valid sample
    /// was recorded. A pending pause is folded in first, so paused time is
    /// never counted. The buffer is cleared; the tracker lands in `Ended`.
    pub fn end_at(&mut self, now: Instant) -> Result<Option<WorkoutMetrics>, MonitorError> {
        match self.phase {
            SessionPhase::Active | SessionPhase::Paused => {
                if let Some(pause_started) = self.pause_started_at.take() {
                    self.accumulated_pause += now.saturating_duration_since(pause_started);
                }
                let metrics = self.compute_metrics(now, self.accumulated_pause);
                self.samples.clear();
                self.started_at = None;
                self.accumulated_pause = Duration::ZERO;
                self.pause_reason = None;
                self.phase = SessionPhase::Ended;
                Ok(metrics)
            }
            other => Err(self.rejected("end", other)),
        }
    }

    pub fn current_metrics(&self) -> Option<WorkoutMetrics> {
        self.metrics_at(Instant::now())
    }

    /// Live metrics as of `now`. `None` until at least one valid sample has
    /// been recorded. An in-progress pause is included in the excluded time.
    pub fn metrics_at(&self, now: Instant) -> Option<WorkoutMetrics> {
        let mut paused = self.accumulated_pause;
        if let Some(pause_started) = self.pause_started_at {
            paused += now.saturating_duration_since(pause_started);
        }
        self.compute_metrics(now, paused)
    }

    fn compute_metrics(&self, now: Instant, total_paused: Duration) -> Option<WorkoutMetrics> {
        let started_at = self.started_at?;

        let valid: Vec<u16> = self
            .samples
            .iter()
            .map(|s| s.bpm)
            .filter(|&bpm| bpm >= MIN_VALID_BPM)
            .collect();
        if valid.is_empty() {
            return None;
        }

        let elapsed = now.saturating_duration_since(started_at);
        let active = elapsed.saturating_sub(total_paused);
        let duration_secs = active.as_secs();

        let sum: u64 = valid.iter().map(|&bpm| u64::from(bpm)).sum();
        let average_bpm = (sum as f64 / valid.len() as f64).round() as u16;
        let max_bpm = *valid.iter().max().expect("non-empty");
        let min_bpm = *valid.iter().min().expect("non-empty");

        // Rough estimate: average BPM burns 0.1 calories per minute.
        let calories_burned =
            (f64::from(average_bpm) * duration_secs as f64 * 0.1 / 60.0).round() as u32;

        Some(WorkoutMetrics {
            duration_secs,
            average_bpm,
            max_bpm,
            min_bpm,
            calories_burned,
            zone: self.zone_for(average_bpm),
        })
    }

    /// 1-5 banding of intensity against the age-estimated maximum
    /// (220 - assumed age).
    fn zone_for(&self, average_bpm: u16) -> u8 {
        let max_hr = f64::from(220u16.saturating_sub(u16::from(self.assumed_age_years)));
        let hr_percentage = f64::from(average_bpm) / max_hr * 100.0;

        if hr_percentage < 60.0 {
            1
        } else if hr_percentage < 70.0 {
            2
        } else if hr_percentage < 80.0 {
            3
        } else if hr_percentage < 90.0 {
            4
        } else {
            5
        }
    }

    fn rejected(&self, op: &'static str, state: SessionPhase) -> MonitorError {
        warn!("Rejected session operation '{}' while {}", op, state.name());
        MonitorError::InvalidTransition {
            op,
            state: state.name(),
        }
    }
}
