use std::sync::Arc;

use crate::{
    model::OutputFormat,
    pcm::PcmBuffer,
    time::seconds_to_frame,
    voice::{ScheduledVoice, VoiceSink},
};

#[derive(Debug, Clone)]
struct MixVoice {
    buffer: Arc<PcmBuffer>,
    start_frame: u64,
    frame_len: u64,
    source_start: f64,
    source_end: f64,
    source_step: f64,
    gain: f32,
}

impl MixVoice {
    fn new(voice: ScheduledVoice, sample_rate: u32) -> Option<Self> {
        let source_rate = f64::from(voice.buffer.sample_rate());
        if source_rate <= 0.0 || sample_rate == 0 {
            return None;
        }

        let source_frames = voice.buffer.frame_count() as f64;
        let source_start = (voice.offset * source_rate).max(0.0);
        let source_end = ((voice.offset + voice.play_length) * source_rate).min(source_frames);
        let source_step = voice.playback_rate * source_rate / f64::from(sample_rate);
        if source_end <= source_start || !source_step.is_finite() || source_step <= 0.0 {
            return None;
        }

        let frame_len = ((source_end - source_start) / source_step).ceil() as u64;
        Some(Self {
            buffer: voice.buffer,
            start_frame: seconds_to_frame(voice.start_time, sample_rate),
            frame_len,
            source_start,
            source_end,
            source_step,
            gain: voice.gain,
        })
    }

    fn end_frame(&self) -> u64 {
        self.start_frame.saturating_add(self.frame_len)
    }

    fn mix_into(&self, block_start: u64, out: &mut PcmBuffer) {
        let block_end = block_start + out.frame_count() as u64;
        let from = self.start_frame.max(block_start);
        let to = self.end_frame().min(block_end);
        if from >= to {
            return;
        }

        let out_channels = out.channel_count();
        for frame in from..to {
            let position = self.source_start + (frame - self.start_frame) as f64 * self.source_step;
            if position >= self.source_end {
                break;
            }
            let index = position as usize;
            let frac = (position - index as f64) as f32;
            let out_index = (frame - block_start) as usize;

            for (channel_index, channel) in out.channels_mut().iter_mut().enumerate() {
                let sample = self.read(channel_index, out_channels, index, frac);
                channel[out_index] += sample * self.gain;
            }
        }
    }

    /// Reads one output channel. Mono sources feed every channel and a mono output averages
    /// all source channels; otherwise channels map one to one.
    fn read(&self, out_channel: usize, out_channels: usize, index: usize, frac: f32) -> f32 {
        let source_channels = self.buffer.channel_count();
        if source_channels == 1 {
            return self.buffer.channel(0).map_or(0.0, |data| lerp_at(data, index, frac));
        }
        if out_channels == 1 {
            let sum: f32 = self
                .buffer
                .channels()
                .map(|data| lerp_at(data, index, frac))
                .sum();
            return sum / source_channels as f32;
        }
        self.buffer
            .channel(out_channel)
            .map_or(0.0, |data| lerp_at(data, index, frac))
    }
}

#[inline]
fn lerp_at(data: &[f32], index: usize, frac: f32) -> f32 {
    let Some(a) = data.get(index).copied() else {
        return 0.0;
    };
    let b = data.get(index + 1).copied().unwrap_or(a);
    a * (1.0 - frac) + b * frac
}

/// Sums scheduled voices into output blocks on a frame clock.
///
/// Each output frame is computed from its absolute position, so rendering a span in one
/// call or in many blocks produces identical samples.
#[derive(Debug, Clone)]
pub struct VoiceMixer {
    format: OutputFormat,
    voices: Vec<MixVoice>,
}

impl VoiceMixer {
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            voices: Vec::new(),
        }
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    #[must_use]
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Mixes every voice overlapping `[block_start, block_start + out.frame_count())` into
    /// `out`, then drops voices that end inside the block.
    pub fn render_into(&mut self, block_start: u64, out: &mut PcmBuffer) {
        for voice in &self.voices {
            voice.mix_into(block_start, out);
        }
        let block_end = block_start + out.frame_count() as u64;
        self.voices.retain(|voice| voice.end_frame() > block_end);
    }
}

impl VoiceSink for VoiceMixer {
    fn schedule(&mut self, voice: ScheduledVoice) {
        if let Some(voice) = MixVoice::new(voice, self.format.sample_rate) {
            self.voices.push(voice);
        }
    }
}
