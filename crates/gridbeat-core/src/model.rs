use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::{automation::AutomationGrid, time};

pub const STEPS_PER_BAR: usize = 16;
pub const STEPS_PER_BEAT: u32 = 4;
pub const DEFAULT_BPM: f64 = 120.0;
pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 240.0;
pub const MIN_PITCH: i32 = -12;
pub const MAX_PITCH: i32 = 12;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_INSTRUMENT_NAMES: [&str; 5] = ["Kick", "Snare", "Closed Hat", "Clap", "High Tom"];

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(try_from = "u32", into = "u32")]
pub enum BarCount {
    One,
    Two,
    #[default]
    Four,
    Eight,
}

impl BarCount {
    pub const ALL: [BarCount; 4] = [Self::One, Self::Two, Self::Four, Self::Eight];

    #[must_use]
    pub const fn bars(self) -> u32 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    #[must_use]
    pub fn total_steps(self) -> usize {
        time::total_steps(self.bars())
    }

    #[must_use]
    pub fn max_steps() -> usize {
        Self::Eight.total_steps()
    }
}

impl TryFrom<u32> for BarCount {
    type Error = InvalidBarCount;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(InvalidBarCount(other)),
        }
    }
}

impl From<BarCount> for u32 {
    fn from(value: BarCount) -> Self {
        value.bars()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bar count must be one of 1, 2, 4 or 8 (got {0})")]
pub struct InvalidBarCount(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidPattern {
    #[error("pattern has {found} rows for {expected} instruments")]
    RowCount { expected: usize, found: usize },
    #[error("pattern row {row} has {found} steps, expected {expected}")]
    RowLength {
        row: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Instrument {
    pub name: String,
    pub sample_ref: Option<String>,
    pub volume: f32,
    pub is_muted: bool,
    /// Trim start as a fraction of the buffer duration.
    pub start_time: f64,
    /// Trim end as a fraction of the buffer duration. Not required to exceed `start_time`.
    pub end_time: f64,
    pub pitch: i32,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            name: String::new(),
            sample_ref: None,
            volume: 1.0,
            is_muted: false,
            start_time: 0.0,
            end_time: 1.0,
            pitch: 0,
        }
    }
}

impl Instrument {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sample(mut self, sample_ref: impl Into<String>) -> Self {
        self.sample_ref = Some(sample_ref.into());
        self
    }
}

#[must_use]
pub fn default_instruments() -> Vec<Instrument> {
    DEFAULT_INSTRUMENT_NAMES
        .iter()
        .map(|name| Instrument::new(*name))
        .collect()
}

/// Step grid indexed `[instrument][step]`.
///
/// Rows always hold `BarCount::max_steps()` cells so that shrinking the loop keeps the
/// steps that fall outside the active range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternGrid {
    rows: Vec<Vec<bool>>,
}

impl PatternGrid {
    #[must_use]
    pub fn new(instrument_count: usize) -> Self {
        Self {
            rows: vec![vec![false; BarCount::max_steps()]; instrument_count],
        }
    }

    #[must_use]
    pub fn instrument_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn step_capacity(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_active(&self, instrument_index: usize, step: usize) -> bool {
        self.rows
            .get(instrument_index)
            .and_then(|row| row.get(step))
            .copied()
            .unwrap_or(false)
    }

    /// Flips one cell and returns its new value, or `None` when out of range.
    pub fn toggle(&mut self, instrument_index: usize, step: usize) -> Option<bool> {
        let cell = self.rows.get_mut(instrument_index)?.get_mut(step)?;
        *cell = !*cell;
        Some(*cell)
    }

    pub fn set(&mut self, instrument_index: usize, step: usize, active: bool) -> Option<()> {
        let cell = self.rows.get_mut(instrument_index)?.get_mut(step)?;
        *cell = active;
        Some(())
    }

    /// Checks for one row per instrument, each `BarCount::max_steps()` long.
    pub fn check_shape(&self, instrument_count: usize) -> Result<(), InvalidPattern> {
        if self.rows.len() != instrument_count {
            return Err(InvalidPattern::RowCount {
                expected: instrument_count,
                found: self.rows.len(),
            });
        }
        let expected = BarCount::max_steps();
        match self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != expected)
        {
            Some((row, cells)) => Err(InvalidPattern::RowLength {
                row,
                expected,
                found: cells.len(),
            }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn active_cells(&self, total_steps: usize) -> usize {
        self.rows
            .iter()
            .map(|row| row.iter().take(total_steps).filter(|cell| **cell).count())
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Session {
    pub instruments: Vec<Instrument>,
    pub pattern: PatternGrid,
    #[serde(default)]
    pub automation: AutomationGrid,
    pub bpm: f64,
    pub bars: BarCount,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(default_instruments(), DEFAULT_BPM, BarCount::default())
    }
}

impl Session {
    #[must_use]
    pub fn new(instruments: Vec<Instrument>, bpm: f64, bars: BarCount) -> Self {
        let pattern = PatternGrid::new(instruments.len());
        Self {
            instruments,
            pattern,
            automation: AutomationGrid::default(),
            bpm: clamp_bpm(bpm),
            bars,
        }
    }

    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.bars.total_steps()
    }

    #[must_use]
    pub fn loop_duration_seconds(&self) -> f64 {
        time::loop_duration_seconds(self.bpm, self.bars.bars())
    }

    /// Active instrument indices for `step`, in instrument order.
    pub fn active_instruments(&self, step: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.instruments.len()).filter(move |index| self.pattern.is_active(*index, step))
    }
}

#[derive(Deserialize)]
struct SessionFile {
    instruments: Vec<Instrument>,
    pattern: PatternGrid,
    #[serde(default)]
    automation: AutomationGrid,
    bpm: f64,
    bars: BarCount,
}

/// Applies the same tempo clamp as `Session::new` and rejects grids of the wrong shape.
impl<'de> Deserialize<'de> for Session {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let file = SessionFile::deserialize(deserializer)?;
        file.pattern
            .check_shape(file.instruments.len())
            .map_err(serde::de::Error::custom)?;
        Ok(Self {
            instruments: file.instruments,
            pattern: file.pattern,
            automation: file.automation,
            bpm: clamp_bpm(file.bpm),
            bars: file.bars,
        })
    }
}

#[must_use]
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return DEFAULT_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}
