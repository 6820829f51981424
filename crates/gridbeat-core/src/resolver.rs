use serde::{Deserialize, Serialize};

use crate::{automation::AutomationOverride, model::Instrument};

/// Playback parameters for one step after automation has been applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EffectiveParameters {
    pub volume: f32,
    pub pitch: i32,
    pub start_time: f64,
    pub end_time: f64,
    pub is_muted: bool,
}

impl From<&Instrument> for EffectiveParameters {
    fn from(instrument: &Instrument) -> Self {
        Self {
            volume: instrument.volume,
            pitch: instrument.pitch,
            start_time: instrument.start_time,
            end_time: instrument.end_time,
            is_muted: instrument.is_muted,
        }
    }
}

impl EffectiveParameters {
    #[must_use]
    pub fn playback_rate(&self) -> f64 {
        2_f64.powf(f64::from(self.pitch) / 12.0)
    }
}

/// Merges `automation` over the base parameters of `base`. Mute state is never automated.
#[must_use]
pub fn resolve(base: &Instrument, automation: Option<&AutomationOverride>) -> EffectiveParameters {
    let mut effective = EffectiveParameters::from(base);
    let Some(automation) = automation else {
        return effective;
    };

    if let Some(volume) = automation.volume {
        effective.volume = volume;
    }
    if let Some(pitch) = automation.pitch {
        effective.pitch = pitch;
    }
    if let Some(start_time) = automation.start_time {
        effective.start_time = start_time;
    }
    if let Some(end_time) = automation.end_time {
        effective.end_time = end_time;
    }
    effective
}

/// Applies `automation` to a full instrument record, keeping name, sample and mute.
#[must_use]
pub fn resolve_instrument(base: &Instrument, automation: Option<&AutomationOverride>) -> Instrument {
    let effective = resolve(base, automation);
    Instrument {
        volume: effective.volume,
        pitch: effective.pitch,
        start_time: effective.start_time,
        end_time: effective.end_time,
        ..base.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::ParameterChange;

    fn base() -> Instrument {
        Instrument {
            volume: 0.8,
            pitch: -2,
            start_time: 0.1,
            end_time: 0.9,
            ..Instrument::new("Snare")
        }
    }

    #[test]
    fn pitch_override_changes_only_pitch() {
        let base = base();
        let automation = AutomationOverride::default().with(ParameterChange::Pitch(5));
        let resolved = resolve(&base, Some(&automation));

        let mut expected = EffectiveParameters::from(&base);
        expected.pitch = 5;
        assert_eq!(resolved, expected);
    }

    #[test]
    fn missing_override_is_identity() {
        let base = base();
        assert_eq!(resolve(&base, None), EffectiveParameters::from(&base));
        assert_eq!(
            resolve(&base, Some(&AutomationOverride::default())),
            EffectiveParameters::from(&base)
        );
    }

    #[test]
    fn mute_is_not_automatable() {
        let mut base = base();
        base.is_muted = true;
        let automation = AutomationOverride::default().with(ParameterChange::Volume(1.0));
        assert!(resolve(&base, Some(&automation)).is_muted);
    }

    #[test]
    fn resolved_instrument_keeps_identity_fields() {
        let base = base().with_sample("kits/snare.wav");
        let automation = AutomationOverride::default()
            .with(ParameterChange::StartTime(0.5))
            .with(ParameterChange::Volume(0.25));
        let resolved = resolve_instrument(&base, Some(&automation));

        assert_eq!(resolved.name, "Snare");
        assert_eq!(resolved.sample_ref.as_deref(), Some("kits/snare.wav"));
        assert!((resolved.start_time - 0.5).abs() < f64::EPSILON);
        assert!((resolved.volume - 0.25).abs() < f32::EPSILON);
        assert!((resolved.end_time - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn playback_rate_doubles_per_octave() {
        let mut params = EffectiveParameters::from(&base());
        params.pitch = 12;
        assert!((params.playback_rate() - 2.0).abs() < 1e-12);
        params.pitch = 0;
        assert!((params.playback_rate() - 1.0).abs() < f64::EPSILON);
    }
}
