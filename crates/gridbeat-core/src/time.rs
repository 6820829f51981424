use crate::model::{STEPS_PER_BAR, STEPS_PER_BEAT};

#[must_use]
pub fn step_interval_ms(bpm: f64) -> f64 {
    if bpm <= 0.0 {
        return 0.0;
    }

    60_000.0 / bpm / f64::from(STEPS_PER_BEAT)
}

/// Duration of one sixteenth step in seconds.
#[must_use]
pub fn step_duration_seconds(bpm: f64) -> f64 {
    if bpm <= 0.0 {
        return 0.0;
    }

    60.0 / bpm / f64::from(STEPS_PER_BEAT)
}

#[must_use]
pub fn total_steps(bars: u32) -> usize {
    STEPS_PER_BAR * bars as usize
}

#[must_use]
pub fn loop_duration_seconds(bpm: f64, bars: u32) -> f64 {
    total_steps(bars) as f64 * step_duration_seconds(bpm)
}

#[must_use]
pub fn seconds_to_frames_ceil(seconds: f64, sample_rate: u32) -> usize {
    if seconds <= 0.0 {
        return 0;
    }

    (seconds * f64::from(sample_rate)).ceil() as usize
}

#[must_use]
pub fn seconds_to_frame(seconds: f64, sample_rate: u32) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }

    (seconds * f64::from(sample_rate)).round() as u64
}

#[must_use]
pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }

    frames as f64 / f64::from(sample_rate)
}
