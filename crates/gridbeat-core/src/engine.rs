use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    automation::{AutomationOverride, ParameterChange},
    export::{ExportGate, ExportJob},
    live::LiveGraph,
    model::{
        BarCount, Instrument, InvalidBarCount, MAX_PITCH, MIN_PITCH, OutputFormat, Session,
        clamp_bpm,
    },
    pcm::PcmBuffer,
    resolver::{EffectiveParameters, resolve, resolve_instrument},
    samples::{SampleStore, decode_audio_file},
    transport::{PlayState, Transport},
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("instrument index out of range: {0}")]
    InstrumentOutOfRange(usize),
    #[error("step out of range: {0}")]
    StepOutOfRange(usize),
    #[error(transparent)]
    InvalidBarCount(#[from] InvalidBarCount),
    #[error("an export is already in progress")]
    ExportInProgress,
    #[error("sample load failed: {0}")]
    SampleLoad(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// Where a parameter write ended up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "target")]
pub enum ParameterTarget {
    Instrument,
    Automation { step: usize },
    /// Recording is armed but no step is sounding, so the write was dropped.
    Ignored,
}

/// Owns the session, the sample table, the transport and the live output graph.
///
/// Commands are synchronous and run between ticks; nothing here locks.
#[derive(Debug)]
pub struct Engine {
    session: Session,
    samples: SampleStore,
    transport: Transport,
    graph: LiveGraph,
    recording_automation: bool,
    master_volume: f32,
    exports: ExportGate,
}

impl Engine {
    #[must_use]
    pub fn new(session: Session, samples: SampleStore, format: OutputFormat) -> Self {
        Self {
            session,
            samples,
            transport: Transport::new(),
            graph: LiveGraph::new(format),
            recording_automation: false,
            master_volume: 1.0,
            exports: ExportGate::default(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn samples(&self) -> &SampleStore {
        &self.samples
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.graph.format()
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    #[must_use]
    pub fn play_state(&self) -> PlayState {
        self.transport.state()
    }

    #[must_use]
    pub fn current_step(&self) -> Option<usize> {
        self.transport.current_step()
    }

    #[must_use]
    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    #[must_use]
    pub fn is_recording_automation(&self) -> bool {
        self.recording_automation
    }

    #[must_use]
    pub fn is_exporting(&self) -> bool {
        self.exports.is_busy()
    }

    #[must_use]
    pub fn graph(&self) -> &LiveGraph {
        &self.graph
    }

    #[instrument(skip(self))]
    pub fn toggle_step(
        &mut self,
        instrument_index: usize,
        step: usize,
    ) -> Result<bool, EngineError> {
        self.check_instrument(instrument_index)?;
        let active = self
            .session
            .pattern
            .toggle(instrument_index, step)
            .ok_or(EngineError::StepOutOfRange(step))?;
        debug!(active, "step toggled");
        Ok(active)
    }

    /// Sets the tempo, clamped to the supported range. Takes effect from the next interval.
    #[instrument(skip(self))]
    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        self.session.bpm = clamp_bpm(bpm);
        info!(bpm = self.session.bpm, "tempo changed");
        self.session.bpm
    }

    #[instrument(skip(self))]
    pub fn set_master_volume(&mut self, volume: f32) -> f32 {
        self.master_volume = clamp_unit_f32(volume);
        self.graph.set_master_gain(self.master_volume);
        debug!(master_volume = self.master_volume, "master volume changed");
        self.master_volume
    }

    #[instrument(skip(self))]
    pub fn set_bars(&mut self, bars: u32) -> Result<BarCount, EngineError> {
        let bars = BarCount::try_from(bars)?;
        self.session.bars = bars;
        self.transport.clamp_to(bars.total_steps());
        info!(bars = bars.bars(), total_steps = bars.total_steps(), "loop length changed");
        Ok(bars)
    }

    pub fn set_volume(
        &mut self,
        instrument_index: usize,
        volume: f32,
    ) -> Result<ParameterTarget, EngineError> {
        self.apply_parameter(instrument_index, ParameterChange::Volume(clamp_unit_f32(volume)))
    }

    pub fn set_pitch(
        &mut self,
        instrument_index: usize,
        pitch: i32,
    ) -> Result<ParameterTarget, EngineError> {
        self.apply_parameter(
            instrument_index,
            ParameterChange::Pitch(pitch.clamp(MIN_PITCH, MAX_PITCH)),
        )
    }

    pub fn set_start_time(
        &mut self,
        instrument_index: usize,
        start_time: f64,
    ) -> Result<ParameterTarget, EngineError> {
        self.apply_parameter(
            instrument_index,
            ParameterChange::StartTime(clamp_unit_f64(start_time)),
        )
    }

    pub fn set_end_time(
        &mut self,
        instrument_index: usize,
        end_time: f64,
    ) -> Result<ParameterTarget, EngineError> {
        self.apply_parameter(
            instrument_index,
            ParameterChange::EndTime(clamp_unit_f64(end_time)),
        )
    }

    /// Routes a parameter write either into the base instrument or, while recording, into the
    /// automation of the step that is currently sounding.
    #[instrument(skip(self), fields(field = change.field_name()))]
    pub fn apply_parameter(
        &mut self,
        instrument_index: usize,
        change: ParameterChange,
    ) -> Result<ParameterTarget, EngineError> {
        self.check_instrument(instrument_index)?;

        if !self.recording_automation {
            change.apply_to(&mut self.session.instruments[instrument_index]);
            return Ok(ParameterTarget::Instrument);
        }

        match (self.transport.is_playing(), self.transport.current_step()) {
            (true, Some(step)) => {
                self.session.automation.record(step, instrument_index, change);
                debug!(step, "automation captured");
                Ok(ParameterTarget::Automation { step })
            }
            _ => {
                debug!("recording armed without a playing step, write dropped");
                Ok(ParameterTarget::Ignored)
            }
        }
    }

    #[instrument(skip(self))]
    pub fn toggle_mute(&mut self, instrument_index: usize) -> Result<bool, EngineError> {
        self.check_instrument(instrument_index)?;
        let instrument = &mut self.session.instruments[instrument_index];
        instrument.is_muted = !instrument.is_muted;
        debug!(is_muted = instrument.is_muted, "mute toggled");
        Ok(instrument.is_muted)
    }

    /// Decodes a user-chosen file into a slot.
    ///
    /// On success the instrument takes the file stem as its name and its trim and pitch reset.
    /// On failure nothing changes and the previous buffer stays in place.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load_sample(&mut self, instrument_index: usize, path: &Path) -> Result<(), EngineError> {
        self.check_instrument(instrument_index)?;
        let buffer = decode_audio_file(path).map_err(|error| {
            warn!(?error, "user sample rejected");
            EngineError::SampleLoad(format!("{error:#}"))
        })?;
        self.samples.insert(instrument_index, buffer);

        let instrument = &mut self.session.instruments[instrument_index];
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            instrument.name = stem.to_string();
        }
        instrument.sample_ref = Some(path.display().to_string());
        instrument.start_time = 0.0;
        instrument.end_time = 1.0;
        instrument.pitch = 0;
        info!(name = %instrument.name, "user sample loaded");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn start(&mut self) {
        self.transport.start();
        info!("playback started");
    }

    /// Halts ticking. Voices already handed to the live graph finish on their own.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        self.transport.stop();
        info!(last_step = ?self.transport.current_step(), "playback stopped");
    }

    pub fn toggle_playback(&mut self) -> PlayState {
        if self.transport.is_playing() {
            self.stop();
        } else {
            self.start();
        }
        self.transport.state()
    }

    /// Advances the transport one step, scheduling its voices at the live graph's clock.
    pub fn tick(&mut self) -> Option<usize> {
        let now = self.graph.current_time();
        self.transport
            .tick(&self.session, &self.samples, now, &mut self.graph)
    }

    /// Pulls the next block of live audio.
    pub fn render_live_block(&mut self, frames: usize) -> PcmBuffer {
        self.graph.render_block(frames)
    }

    #[instrument(skip(self))]
    pub fn toggle_automation_recording(&mut self) -> bool {
        self.recording_automation = !self.recording_automation;
        info!(recording = self.recording_automation, "automation recording toggled");
        self.recording_automation
    }

    #[instrument(skip(self))]
    pub fn clear_automation(&mut self) {
        let cleared = self.session.automation.len();
        self.session.automation.clear();
        info!(cleared, "automation cleared");
    }

    /// Effective parameters of one instrument at the step currently playing.
    pub fn effective_parameters(
        &self,
        instrument_index: usize,
    ) -> Result<EffectiveParameters, EngineError> {
        let instrument = self
            .session
            .instruments
            .get(instrument_index)
            .ok_or(EngineError::InstrumentOutOfRange(instrument_index))?;
        Ok(resolve(instrument, self.display_override(instrument_index)))
    }

    /// Instruments as they currently sound: merged with the playing step's automation while
    /// the transport runs, the base table otherwise.
    #[must_use]
    pub fn display_instruments(&self) -> Vec<Instrument> {
        self.session
            .instruments
            .iter()
            .enumerate()
            .map(|(index, instrument)| resolve_instrument(instrument, self.display_override(index)))
            .collect()
    }

    /// Snapshots the session and sample table into a job that renders and writes the loop.
    ///
    /// Fails fast while another export holds the gate.
    #[instrument(skip(self), fields(output_dir = %output_dir.display()))]
    pub fn begin_export(&self, output_dir: &Path) -> Result<ExportJob, EngineError> {
        let permit = self.exports.try_acquire().ok_or_else(|| {
            warn!("export rejected, another export is running");
            EngineError::ExportInProgress
        })?;
        Ok(ExportJob::new(
            self.session.clone(),
            self.samples.clone(),
            self.format(),
            output_dir.to_path_buf(),
            permit,
        ))
    }

    /// Runs an export to completion on the calling thread.
    pub fn export_loop(&self, output_dir: &Path) -> Result<PathBuf, EngineError> {
        let path = self.begin_export(output_dir)?.run()?;
        Ok(path)
    }

    fn display_override(
        &self,
        instrument_index: usize,
    ) -> Option<&AutomationOverride> {
        if !self.transport.is_playing() {
            return None;
        }
        let step = self.transport.current_step()?;
        self.session.automation.get(step, instrument_index)
    }

    fn check_instrument(&self, instrument_index: usize) -> Result<(), EngineError> {
        if instrument_index < self.session.instruments.len() {
            Ok(())
        } else {
            Err(EngineError::InstrumentOutOfRange(instrument_index))
        }
    }
}

fn clamp_unit_f32(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn clamp_unit_f64(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::default_instruments;

    fn engine() -> Engine {
        let mut samples = SampleStore::new(5);
        samples.insert(0, PcmBuffer::mono(1_000, vec![0.5; 100]));
        Engine::new(
            Session::new(default_instruments(), 120.0, BarCount::One),
            samples,
            OutputFormat {
                sample_rate: 1_000,
                channels: 1,
            },
        )
    }

    #[test]
    fn out_of_range_commands_are_typed_errors() {
        let mut engine = engine();
        assert!(matches!(
            engine.toggle_step(9, 0),
            Err(EngineError::InstrumentOutOfRange(9))
        ));
        assert!(matches!(
            engine.toggle_step(0, 500),
            Err(EngineError::StepOutOfRange(500))
        ));
        assert!(matches!(engine.set_bars(3), Err(EngineError::InvalidBarCount(_))));
        assert_eq!(engine.session().bars, BarCount::One);
    }

    #[test]
    fn command_surface_clamps_ranges() {
        let mut engine = engine();
        assert!((engine.set_bpm(30.0) - 60.0).abs() < f64::EPSILON);
        assert!((engine.set_master_volume(1.7) - 1.0).abs() < f32::EPSILON);

        engine.set_pitch(0, 40).expect("pitch should apply");
        engine.set_volume(0, -2.0).expect("volume should apply");
        let kick = &engine.session().instruments[0];
        assert_eq!(kick.pitch, 12);
        assert!(kick.volume.abs() < f32::EPSILON);
    }

    #[test]
    fn recording_without_playing_step_drops_the_write() {
        let mut engine = engine();
        engine.toggle_automation_recording();

        let target = engine.set_volume(0, 0.2).expect("valid instrument");
        assert_eq!(target, ParameterTarget::Ignored);
        assert!(engine.session().automation.is_empty());
        assert!((engine.session().instruments[0].volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn recording_targets_the_sounding_step() {
        let mut engine = engine();
        engine.start();
        engine.tick();
        engine.tick();
        engine.toggle_automation_recording();

        let target = engine.set_pitch(0, 5).expect("valid instrument");
        assert_eq!(target, ParameterTarget::Automation { step: 1 });
        assert_eq!(engine.session().instruments[0].pitch, 0);
        assert_eq!(engine.display_instruments()[0].pitch, 5);

        engine.stop();
        assert_eq!(engine.display_instruments()[0].pitch, 0);
    }

    #[test]
    fn second_export_is_rejected_while_first_runs() {
        let engine = engine();
        let temp = tempfile::tempdir().expect("tempdir should work");
        let job = engine.begin_export(temp.path()).expect("first export");
        assert!(engine.is_exporting());
        assert!(matches!(
            engine.begin_export(temp.path()),
            Err(EngineError::ExportInProgress)
        ));

        job.run().expect("export should succeed");
        assert!(!engine.is_exporting());
    }

    #[test]
    fn failed_user_load_changes_nothing() {
        let mut engine = engine();
        let temp = tempfile::tempdir().expect("tempdir should work");
        let bogus = temp.path().join("bogus.wav");
        std::fs::write(&bogus, b"nope").expect("write should work");

        let before = engine.session().clone();
        assert!(matches!(
            engine.load_sample(0, &bogus),
            Err(EngineError::SampleLoad(_))
        ));
        assert_eq!(engine.session(), &before);
        assert_eq!(engine.samples().lookup(0).map(|buffer| buffer.frame_count()), Some(100));
    }
}
