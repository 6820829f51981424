use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::{
    live::LiveGraph,
    model::{OutputFormat, Session},
    pcm::{PcmBuffer, encode_wav},
    render::render_loop,
    samples::SampleStore,
    time::{seconds_to_frame, seconds_to_frames_ceil, step_duration_seconds},
    transport::Transport,
    voice::{ScheduledVoice, VoiceSink},
};

const PARITY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParityReport {
    pub schema_version: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bars: u32,
    pub total_steps: usize,
    pub active_cells: usize,
    pub automation_entries: usize,
    pub live_voice_count: usize,
    pub frame_count: usize,
    pub session_hash: String,
    pub offline_hash: String,
    pub live_hash: String,
    pub matches: bool,
}

/// Drives the live path on a virtual clock: one tick on every step boundary, audio pulled in
/// blocks of at most `block_frames` in between.
///
/// Returns the captured output, trimmed to the offline loop length, and the voice count.
pub fn render_live_virtual(
    session: &Session,
    samples: &SampleStore,
    format: OutputFormat,
    block_frames: usize,
) -> (PcmBuffer, usize) {
    let block_frames = block_frames.max(1);
    let note_duration = step_duration_seconds(session.bpm);
    let total_steps = session.total_steps();
    let loop_frames =
        seconds_to_frames_ceil(total_steps as f64 * note_duration, format.sample_rate);

    let mut graph = LiveGraph::new(format);
    let mut transport = Transport::new();
    let mut captured = PcmBuffer::silent(format.sample_rate, format.channels, 0);
    let mut voices = 0;
    transport.start();

    for step in 0..total_steps {
        let boundary = seconds_to_frame(step as f64 * note_duration, format.sample_rate);
        pull_until(&mut graph, &mut captured, boundary, block_frames);
        let now = graph.current_time();
        let mut sink = CountingSink {
            graph: &mut graph,
            voices: &mut voices,
        };
        transport.tick(session, samples, now, &mut sink);
    }
    pull_until(&mut graph, &mut captured, loop_frames as u64, block_frames);

    (captured, voices)
}

fn pull_until(graph: &mut LiveGraph, captured: &mut PcmBuffer, target: u64, block_frames: usize) {
    while graph.frames_rendered() < target {
        let remaining = (target - graph.frames_rendered()) as usize;
        let block = graph.render_block(remaining.min(block_frames));
        captured.append(&block);
    }
}

struct CountingSink<'a> {
    graph: &'a mut LiveGraph,
    voices: &'a mut usize,
}

impl VoiceSink for CountingSink<'_> {
    fn schedule(&mut self, voice: ScheduledVoice) {
        *self.voices += 1;
        self.graph.schedule(voice);
    }
}

#[instrument(skip(session, samples), fields(bpm = session.bpm, bars = session.bars.bars()))]
pub fn generate_parity_report(
    session: &Session,
    samples: &SampleStore,
    format: OutputFormat,
    block_frames: usize,
) -> Result<ParityReport> {
    let session_bytes = serde_json::to_vec(session).context("failed to serialize session")?;
    let offline = render_loop(session, samples, format);
    let (live, live_voice_count) = render_live_virtual(session, samples, format, block_frames);

    let offline_bytes = encode_wav(&offline)?;
    let live_bytes = encode_wav(&live)?;
    let offline_hash = hash_hex(&offline_bytes);
    let live_hash = hash_hex(&live_bytes);
    let matches = offline_hash == live_hash;
    if matches {
        info!(%offline_hash, "live and offline renders match");
    } else {
        warn!(%offline_hash, %live_hash, "live and offline renders diverge");
    }

    Ok(ParityReport {
        schema_version: PARITY_SCHEMA_VERSION,
        sample_rate: format.sample_rate,
        channels: format.channels,
        bars: session.bars.bars(),
        total_steps: session.total_steps(),
        active_cells: session.pattern.active_cells(session.total_steps()),
        automation_entries: session.automation.len(),
        live_voice_count,
        frame_count: offline.frame_count(),
        session_hash: hash_hex(&session_bytes),
        offline_hash,
        live_hash,
        matches,
    })
}

pub fn read_parity_report(path: &Path) -> Result<ParityReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read parity report: {}", path.display()))?;
    let report: ParityReport =
        serde_json::from_slice(&bytes).context("failed to parse parity report json")?;
    Ok(report)
}

pub fn write_parity_report(path: &Path, report: &ParityReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parity directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to encode parity report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write parity report: {}", path.display()))?;
    Ok(())
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
