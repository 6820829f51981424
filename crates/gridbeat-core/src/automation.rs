use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::Instrument;

/// One automatable parameter write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ParameterChange {
    Volume(f32),
    Pitch(i32),
    StartTime(f64),
    EndTime(f64),
}

impl ParameterChange {
    pub fn apply_to(self, instrument: &mut Instrument) {
        match self {
            Self::Volume(volume) => instrument.volume = volume,
            Self::Pitch(pitch) => instrument.pitch = pitch,
            Self::StartTime(start_time) => instrument.start_time = start_time,
            Self::EndTime(end_time) => instrument.end_time = end_time,
        }
    }

    #[must_use]
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Volume(_) => "volume",
            Self::Pitch(_) => "pitch",
            Self::StartTime(_) => "start_time",
            Self::EndTime(_) => "end_time",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutomationOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

impl AutomationOverride {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volume.is_none()
            && self.pitch.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
    }

    /// Sets a single field, leaving the others untouched.
    pub fn merge(&mut self, change: ParameterChange) {
        match change {
            ParameterChange::Volume(volume) => self.volume = Some(volume),
            ParameterChange::Pitch(pitch) => self.pitch = Some(pitch),
            ParameterChange::StartTime(start_time) => self.start_time = Some(start_time),
            ParameterChange::EndTime(end_time) => self.end_time = Some(end_time),
        }
    }

    #[must_use]
    pub fn with(mut self, change: ParameterChange) -> Self {
        self.merge(change);
        self
    }
}

/// Sparse per-step, per-instrument parameter overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AutomationGrid {
    steps: BTreeMap<usize, BTreeMap<usize, AutomationOverride>>,
}

impl AutomationGrid {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override for `(step, instrument_index)`. Empty overrides read as absent.
    #[must_use]
    pub fn get(&self, step: usize, instrument_index: usize) -> Option<&AutomationOverride> {
        self.steps
            .get(&step)
            .and_then(|instruments| instruments.get(&instrument_index))
            .filter(|entry| !entry.is_empty())
    }

    pub fn record(&mut self, step: usize, instrument_index: usize, change: ParameterChange) {
        self.steps
            .entry(step)
            .or_default()
            .entry(instrument_index)
            .or_default()
            .merge(change);
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-empty `(step, instrument)` entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps
            .values()
            .flat_map(BTreeMap::values)
            .filter(|entry| !entry.is_empty())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &AutomationOverride)> {
        self.steps.iter().flat_map(|(step, instruments)| {
            instruments
                .iter()
                .filter(|(_, entry)| !entry.is_empty())
                .map(move |(instrument_index, entry)| (*step, *instrument_index, entry))
        })
    }
}
