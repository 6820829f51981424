use std::sync::Arc;

use tracing::trace;

use crate::{
    automation::AutomationOverride,
    model::{Instrument, Session},
    pcm::PcmBuffer,
    resolver::resolve,
    samples::SampleStore,
};

/// One playback of a sample buffer, positioned on an audio clock.
///
/// Times are clock-domain seconds. `offset` and `play_length` are measured in buffer time,
/// so a voice at twice the playback rate sounds for half of `play_length`.
#[derive(Debug, Clone)]
pub struct ScheduledVoice {
    pub instrument_index: usize,
    pub buffer: Arc<PcmBuffer>,
    pub start_time: f64,
    pub offset: f64,
    pub play_length: f64,
    pub gain: f32,
    pub playback_rate: f64,
}

/// Anything voices can be scheduled onto: the live graph or an offline render target.
pub trait VoiceSink {
    fn schedule(&mut self, voice: ScheduledVoice);
}

impl VoiceSink for Vec<ScheduledVoice> {
    fn schedule(&mut self, voice: ScheduledVoice) {
        self.push(voice);
    }
}

/// Schedules one playback of `instrument_index` at `scheduled_time`.
///
/// Returns `false` without touching the sink when the instrument is muted or has no buffer.
pub fn trigger_voice(
    instrument_index: usize,
    instrument: &Instrument,
    automation: Option<&AutomationOverride>,
    samples: &SampleStore,
    scheduled_time: f64,
    sink: &mut impl VoiceSink,
) -> bool {
    let effective = resolve(instrument, automation);
    if effective.is_muted {
        trace!(instrument_index, "voice skipped: muted");
        return false;
    }
    let Some(buffer) = samples.lookup(instrument_index) else {
        trace!(instrument_index, "voice skipped: no sample loaded");
        return false;
    };

    let duration = buffer.duration_seconds();
    let offset = duration * effective.start_time;
    let play_length = (duration * (effective.end_time - effective.start_time)).max(0.0);

    sink.schedule(ScheduledVoice {
        instrument_index,
        buffer,
        start_time: scheduled_time,
        offset,
        play_length,
        gain: effective.volume,
        playback_rate: effective.playback_rate(),
    });
    true
}

/// Triggers every active instrument of `step` in instrument order. Returns the voice count.
pub fn trigger_step(
    session: &Session,
    samples: &SampleStore,
    step: usize,
    scheduled_time: f64,
    sink: &mut impl VoiceSink,
) -> usize {
    let mut scheduled = 0;
    for index in session.active_instruments(step) {
        let triggered = trigger_voice(
            index,
            &session.instruments[index],
            session.automation.get(step, index),
            samples,
            scheduled_time,
            sink,
        );
        if triggered {
            scheduled += 1;
        }
    }
    scheduled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        automation::ParameterChange,
        model::{BarCount, default_instruments},
    };

    fn store_with_half_second() -> SampleStore {
        let mut store = SampleStore::new(5);
        store.insert(0, PcmBuffer::mono(1_000, vec![0.5; 500]));
        store
    }

    #[test]
    fn trigger_computes_trim_rate_and_gain() {
        let store = store_with_half_second();
        let instrument = Instrument {
            volume: 0.6,
            pitch: 12,
            start_time: 0.2,
            end_time: 0.7,
            ..Instrument::new("Kick")
        };

        let mut voices = Vec::new();
        assert!(trigger_voice(0, &instrument, None, &store, 1.5, &mut voices));
        let voice = &voices[0];
        assert!((voice.start_time - 1.5).abs() < f64::EPSILON);
        assert!((voice.offset - 0.1).abs() < 1e-12);
        assert!((voice.play_length - 0.25).abs() < 1e-12);
        assert!((voice.gain - 0.6).abs() < f32::EPSILON);
        assert!((voice.playback_rate - 2.0).abs() < 1e-12);
    }

    #[test]
    fn inverted_trim_clamps_to_zero_length() {
        let store = store_with_half_second();
        let instrument = Instrument {
            start_time: 0.8,
            end_time: 0.3,
            ..Instrument::new("Kick")
        };

        let mut voices = Vec::new();
        assert!(trigger_voice(0, &instrument, None, &store, 0.0, &mut voices));
        assert!(voices[0].play_length.abs() < f64::EPSILON);
    }

    #[test]
    fn muted_or_unloaded_instruments_never_schedule() {
        let store = store_with_half_second();
        let muted = Instrument {
            is_muted: true,
            ..Instrument::new("Kick")
        };
        let automation = AutomationOverride::default().with(ParameterChange::Volume(1.0));

        let mut voices = Vec::new();
        assert!(!trigger_voice(0, &muted, Some(&automation), &store, 0.0, &mut voices));
        assert!(!trigger_voice(1, &Instrument::new("Snare"), None, &store, 0.0, &mut voices));
        assert!(voices.is_empty());
    }

    #[test]
    fn trigger_step_applies_step_automation() {
        let mut session = Session::new(default_instruments(), 120.0, BarCount::One);
        session.pattern.set(0, 3, true);
        session.pattern.set(1, 3, true);
        session
            .automation
            .record(3, 0, ParameterChange::Volume(0.25));

        let mut voices = Vec::new();
        let count = trigger_step(&session, &store_with_half_second(), 3, 0.375, &mut voices);

        assert_eq!(count, 1, "instrument 1 has no sample loaded");
        assert!((voices[0].gain - 0.25).abs() < f32::EPSILON);
        assert_eq!(voices[0].instrument_index, 0);
    }
}
