//! Liveness Watchdog
//!
//! Detects signal dropout: when no sample has arrived within the stale
//! threshold, the session is paused, backdated to the last good reading so
//! the silent stretch never counts as active workout time.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::models::{MonitorEvent, PauseReason};
use crate::domain::session::SessionTracker;
use crate::infrastructure::events::EventBus;

/// Watches sample arrival times while a session is active.
///
/// The decision lives in [`check`](Self::check), which takes an explicit
/// `now` so it can be exercised without a running clock; [`run`](Self::run)
/// polls it on a wall-clock interval until cancelled, the session leaves the
/// active state, or a stale signal forces a pause.
pub struct LivenessMonitor {
    session: Arc<Mutex<SessionTracker>>,
    last_sample_at: Arc<Mutex<Option<Instant>>>,
    events: Arc<EventBus>,
    stale_threshold: Duration,
    poll_interval: Duration,
}

impl LivenessMonitor {
    pub fn new(
        session: Arc<Mutex<SessionTracker>>,
        last_sample_at: Arc<Mutex<Option<Instant>>>,
        events: Arc<EventBus>,
        stale_threshold: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            session,
            last_sample_at,
            events,
            stale_threshold,
            poll_interval,
        }
    }

    /// Evaluate staleness as of `now`. Returns `true` if the session was
    /// paused.
    ///
    /// The pause is backdated to the last sample arrival, not to `now`, and
    /// carries [`PauseReason::SignalLost`] so consumers can tell it apart
    /// from a user pause. Does nothing unless the session is active.
    pub fn check(&self, now: Instant) -> bool {
        let Some(last) = *self.last_sample_at.lock().unwrap() else {
            return false;
        };
        if now.saturating_duration_since(last) <= self.stale_threshold {
            return false;
        }

        {
            let mut session = self.session.lock().unwrap();
            if !session.is_active() {
                return false;
            }
            if session.pause_at(last, PauseReason::SignalLost).is_err() {
                return false;
            }
        }

        warn!(
            "No heart rate samples for more than {:?}, pausing session",
            self.stale_threshold
        );
        self.events.broadcast(&MonitorEvent::SessionPaused {
            reason: PauseReason::SignalLost,
        });
        true
    }

    /// Poll until cancelled, the session leaves the active state, or a stale
    /// signal fires the pause.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.session.lock().unwrap().is_active() {
                        break;
                    }
                    if self.check(Instant::now()) {
                        break;
                    }
                }
            }
        }
        debug!("Liveness watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HeartRateSample;
    use crate::domain::session::SessionPhase;
    use std::time::SystemTime;

    fn sample(bpm: u16) -> HeartRateSample {
        HeartRateSample {
            bpm,
            captured_at: SystemTime::now(),
            energy_expended: None,
            rr_intervals: None,
        }
    }

    fn fixture() -> (
        LivenessMonitor,
        Arc<Mutex<SessionTracker>>,
        Arc<Mutex<Option<Instant>>>,
        Arc<EventBus>,
    ) {
        let session = Arc::new(Mutex::new(SessionTracker::new(30)));
        let last_sample_at = Arc::new(Mutex::new(None));
        let events = Arc::new(EventBus::new());
        let monitor = LivenessMonitor::new(
            Arc::clone(&session),
            Arc::clone(&last_sample_at),
            Arc::clone(&events),
            Duration::from_secs(5),
            Duration::from_secs(2),
        );
        (monitor, session, last_sample_at, events)
    }

    fn base() -> Instant {
        Instant::now() - Duration::from_secs(3600)
    }

    #[test]
    fn test_stale_signal_forces_backdated_pause() {
        let (monitor, session, last_sample_at, events) = fixture();
        let mut rx = events.subscribe("consumer");

        // Session starts at t=0, the only sample arrives at t=1s.
        let t0 = base();
        {
            let mut session = session.lock().unwrap();
            session.start_at(t0).unwrap();
            session.ingest(sample(100));
        }
        *last_sample_at.lock().unwrap() = Some(t0 + Duration::from_secs(1));

        assert!(monitor.check(t0 + Duration::from_secs(10)));

        let session = session.lock().unwrap();
        assert_eq!(session.phase(), SessionPhase::Paused);
        assert_eq!(session.pause_reason(), Some(PauseReason::SignalLost));
        // The 9s of silence are excluded: only the first second was active.
        let metrics = session.metrics_at(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(metrics.duration_secs, 1);

        match rx.try_recv().unwrap() {
            MonitorEvent::SessionPaused {
                reason: PauseReason::SignalLost,
            } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_fresh_signal_keeps_session_active() {
        let (monitor, session, last_sample_at, _events) = fixture();
        let t0 = base();
        session.lock().unwrap().start_at(t0).unwrap();
        *last_sample_at.lock().unwrap() = Some(t0 + Duration::from_secs(8));

        assert!(!monitor.check(t0 + Duration::from_secs(10)));
        assert_eq!(session.lock().unwrap().phase(), SessionPhase::Active);
    }

    #[test]
    fn test_inert_while_idle() {
        let (monitor, session, last_sample_at, _events) = fixture();
        *last_sample_at.lock().unwrap() = Some(base());

        assert!(!monitor.check(Instant::now()));
        assert_eq!(session.lock().unwrap().phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_inert_while_user_paused() {
        let (monitor, session, last_sample_at, _events) = fixture();
        let t0 = base();
        {
            let mut session = session.lock().unwrap();
            session.start_at(t0).unwrap();
            session
                .pause_at(t0 + Duration::from_secs(2), PauseReason::User)
                .unwrap();
        }
        *last_sample_at.lock().unwrap() = Some(t0);

        assert!(!monitor.check(t0 + Duration::from_secs(20)));
        // The user pause is left untouched.
        assert_eq!(
            session.lock().unwrap().pause_reason(),
            Some(PauseReason::User)
        );
    }

    #[test]
    fn test_no_arrival_time_is_not_stale() {
        let (monitor, session, _last_sample_at, _events) = fixture();
        session.lock().unwrap().start_at(base()).unwrap();

        assert!(!monitor.check(Instant::now()));
        assert_eq!(session.lock().unwrap().phase(), SessionPhase::Active);
    }
}
