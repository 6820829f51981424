use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    model::Session,
    samples::SampleStore,
    time::step_interval_ms,
    voice::{VoiceSink, trigger_step},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
}

/// Step cursor and play state for live playback.
///
/// `tick` is driven externally; the scheduler owns no timer. A cursor of `None` is the
/// stopped sentinel, so the first tick after `start` lands on step 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transport {
    state: PlayState,
    current_step: Option<usize>,
}

impl Transport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> PlayState {
        self.state
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    #[must_use]
    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    pub fn start(&mut self) {
        self.current_step = None;
        self.state = PlayState::Playing;
    }

    /// Halts ticking but keeps the last cursor for display.
    pub fn stop(&mut self) {
        self.state = PlayState::Stopped;
    }

    /// Resets a cursor that no longer fits after the loop length changed.
    pub fn clamp_to(&mut self, total_steps: usize) {
        if self.current_step.is_some_and(|step| step >= total_steps) {
            debug!(total_steps, "cursor out of range after resize, resetting");
            self.current_step = None;
        }
    }

    /// Advances to the next step and triggers its voices at `scheduled_time`.
    ///
    /// Returns the new step, or `None` while stopped.
    pub fn tick(
        &mut self,
        session: &Session,
        samples: &SampleStore,
        scheduled_time: f64,
        sink: &mut impl VoiceSink,
    ) -> Option<usize> {
        if !self.is_playing() {
            return None;
        }
        let total_steps = session.total_steps();
        if total_steps == 0 {
            return None;
        }

        let next_step = self.current_step.map_or(0, |step| (step + 1) % total_steps);
        let voices = trigger_step(session, samples, next_step, scheduled_time, sink);
        self.current_step = Some(next_step);
        trace!(step = next_step, voices, scheduled_time, "transport tick");
        Some(next_step)
    }
}

#[must_use]
pub fn step_interval(bpm: f64) -> Duration {
    Duration::from_secs_f64(step_interval_ms(bpm).max(0.0) / 1_000.0)
}

/// Wall-clock driver that decides when the next tick is due.
///
/// The interval is read at every poll, so tempo changes only affect the ticks that follow.
/// Dropping the driver is the whole cancellation story.
#[derive(Debug, Clone)]
pub struct TickDriver {
    next_deadline: Instant,
}

impl TickDriver {
    /// First tick becomes due one interval after `started_at`.
    #[must_use]
    pub fn new(started_at: Instant, interval: Duration) -> Self {
        Self {
            next_deadline: started_at + interval,
        }
    }

    /// Returns `true` once per elapsed deadline and schedules the following one.
    pub fn poll(&mut self, now: Instant, interval: Duration) -> bool {
        if now < self.next_deadline {
            return false;
        }
        self.next_deadline += interval;
        if self.next_deadline < now {
            // Missed ticks after a stall are dropped, never replayed.
            self.next_deadline = now + interval;
        }
        true
    }

    #[must_use]
    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.next_deadline.saturating_duration_since(now)
    }
}
