use std::f64::consts::TAU;

use crate::{
    automation::ParameterChange,
    model::{BarCount, DEFAULT_BPM, Session, default_instruments},
    pcm::PcmBuffer,
    samples::SampleStore,
};

/// One bar of a basic beat with a little automation on the hats and the tom.
#[must_use]
pub fn demo_session() -> Session {
    let mut session = Session::new(default_instruments(), DEFAULT_BPM, BarCount::One);
    let cells: [(usize, &[usize]); 5] = [
        (0, &[0, 4, 8, 10, 12]),
        (1, &[4, 12]),
        (2, &[0, 2, 4, 6, 8, 10, 12, 14]),
        (3, &[12]),
        (4, &[7, 14, 15]),
    ];
    for (instrument_index, steps) in cells {
        for step in steps {
            session.pattern.set(instrument_index, *step, true);
        }
    }

    session.instruments[2].volume = 0.6;
    session.instruments[2].end_time = 0.5;
    for step in [2, 6, 10, 14] {
        session.automation.record(step, 2, ParameterChange::Volume(0.3));
    }
    session.automation.record(15, 4, ParameterChange::Pitch(-5));
    session.automation.record(14, 4, ParameterChange::Volume(0.7));
    session
}

/// A sample table filled with the synthesized kit, one sound per default slot.
#[must_use]
pub fn demo_sample_store(sample_rate: u32) -> SampleStore {
    let mut store = SampleStore::new(DemoDrum::ALL.len());
    fill_missing_with_demo_kit(&mut store, DemoDrum::ALL.len(), sample_rate);
    store
}

/// Puts a synthesized sound into every slot below `slot_count` that has nothing loaded.
///
/// Slots beyond the five kit sounds cycle through the kit. Returns the number of slots filled.
pub fn fill_missing_with_demo_kit(
    store: &mut SampleStore,
    slot_count: usize,
    sample_rate: u32,
) -> usize {
    let mut filled = 0;
    for index in 0..slot_count {
        if store.lookup(index).is_none() {
            let drum = DemoDrum::ALL[index % DemoDrum::ALL.len()];
            store.insert(index, drum.synthesize(sample_rate));
            filled += 1;
        }
    }
    filled
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoDrum {
    Kick,
    Snare,
    ClosedHat,
    Clap,
    HighTom,
}

impl DemoDrum {
    pub const ALL: [DemoDrum; 5] = [
        Self::Kick,
        Self::Snare,
        Self::ClosedHat,
        Self::Clap,
        Self::HighTom,
    ];

    fn length_seconds(self) -> f64 {
        match self {
            Self::Kick => 0.45,
            Self::Snare => 0.25,
            Self::ClosedHat => 0.08,
            Self::Clap => 0.3,
            Self::HighTom => 0.35,
        }
    }

    /// Deterministic mono rendering of the drum at `sample_rate`.
    #[must_use]
    pub fn synthesize(self, sample_rate: u32) -> PcmBuffer {
        let rate = f64::from(sample_rate.max(1));
        let frames = (self.length_seconds() * rate).ceil() as usize;
        let mut noise = NoiseSource::new(0x5eed_0000 + self as u64);
        let mut phase = 0.0_f64;
        let mut previous_noise = 0.0_f64;

        let samples = (0..frames)
            .map(|frame| {
                let t = frame as f64 / rate;
                let value = match self {
                    Self::Kick => {
                        let frequency = 50.0 + 110.0 * (-t * 30.0).exp();
                        phase += TAU * frequency / rate;
                        phase.sin() * (-t * 7.0).exp()
                    }
                    Self::Snare => {
                        phase += TAU * 185.0 / rate;
                        let body = phase.sin() * (-t * 25.0).exp();
                        let rattle = noise.sample() * (-t * 14.0).exp();
                        0.45 * body + 0.55 * rattle
                    }
                    Self::ClosedHat => {
                        let white = noise.sample();
                        let bright = white - previous_noise;
                        previous_noise = white;
                        0.5 * bright * (-t * 60.0).exp()
                    }
                    Self::Clap => {
                        let burst = (t * 100.0).fract() < 0.35 || t > 0.03;
                        let envelope = if burst {
                            (-(t - 0.03).max(0.0) * 18.0).exp()
                        } else {
                            0.0
                        };
                        noise.sample() * envelope * 0.8
                    }
                    Self::HighTom => {
                        let frequency = 180.0 + 60.0 * (-t * 12.0).exp();
                        phase += TAU * frequency / rate;
                        phase.sin() * (-t * 9.0).exp() * 0.9
                    }
                };
                value as f32
            })
            .collect();
        PcmBuffer::mono(sample_rate, samples)
    }
}

/// Linear congruential noise in [-1, 1).
struct NoiseSource(u64);

impl NoiseSource {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn sample(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 11) as f64 / (1_u64 << 53) as f64) * 2.0 - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_kit_is_deterministic_and_bounded() {
        let first = demo_sample_store(22_050);
        let second = demo_sample_store(22_050);
        for index in 0..DemoDrum::ALL.len() {
            let a = first.lookup(index).expect("slot should be filled");
            let b = second.lookup(index).expect("slot should be filled");
            assert_eq!(a, b);
            assert!(a.peak() <= 1.0);
            assert!(!a.is_silent());
        }
    }

    #[test]
    fn fill_keeps_loaded_slots() {
        let mut store = SampleStore::new(6);
        store.insert(1, PcmBuffer::mono(8_000, vec![0.1; 3]));
        assert_eq!(fill_missing_with_demo_kit(&mut store, 6, 8_000), 5);
        assert_eq!(store.lookup(1).map(|buffer| buffer.frame_count()), Some(3));
        assert!(store.lookup(5).is_some());
    }

    #[test]
    fn demo_session_has_hits_and_automation() {
        let session = demo_session();
        assert!(session.pattern.active_cells(session.total_steps()) > 10);
        assert!(session.automation.get(2, 2).is_some());
    }
}
