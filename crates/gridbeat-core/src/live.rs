use crate::{
    mixer::VoiceMixer,
    model::OutputFormat,
    pcm::PcmBuffer,
    time::frames_to_seconds,
    voice::{ScheduledVoice, VoiceSink},
};

/// The live output graph: a voice mixer behind a master gain, clocked by frames pulled.
///
/// An audio callback calls `render_block`; the clock only advances when audio is pulled.
#[derive(Debug, Clone)]
pub struct LiveGraph {
    mixer: VoiceMixer,
    frames_rendered: u64,
    master_gain: f32,
}

impl LiveGraph {
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            mixer: VoiceMixer::new(format),
            frames_rendered: 0,
            master_gain: 1.0,
        }
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.mixer.format()
    }

    /// Audio clock in seconds.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        frames_to_seconds(self.frames_rendered, self.format().sample_rate)
    }

    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    #[must_use]
    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain;
    }

    #[must_use]
    pub fn active_voices(&self) -> usize {
        self.mixer.voice_count()
    }

    /// Renders the next `frames` frames and advances the clock.
    pub fn render_block(&mut self, frames: usize) -> PcmBuffer {
        let format = self.format();
        let mut block = PcmBuffer::silent(format.sample_rate, format.channels, frames);
        self.mixer.render_into(self.frames_rendered, &mut block);
        for channel in block.channels_mut() {
            for sample in channel.iter_mut() {
                *sample *= self.master_gain;
            }
        }
        self.frames_rendered += frames as u64;
        block
    }
}

impl VoiceSink for LiveGraph {
    /// Voices scheduled in the past start at the current clock position.
    fn schedule(&mut self, mut voice: ScheduledVoice) {
        let now = self.current_time();
        if voice.start_time < now {
            voice.start_time = now;
        }
        self.mixer.schedule(voice);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn voice(start_time: f64) -> ScheduledVoice {
        ScheduledVoice {
            instrument_index: 0,
            buffer: Arc::new(PcmBuffer::mono(1_000, vec![1.0; 10])),
            start_time,
            offset: 0.0,
            play_length: 0.01,
            gain: 0.5,
            playback_rate: 1.0,
        }
    }

    fn graph() -> LiveGraph {
        LiveGraph::new(OutputFormat {
            sample_rate: 1_000,
            channels: 1,
        })
    }

    #[test]
    fn clock_advances_with_pulled_frames() {
        let mut graph = graph();
        assert!(graph.current_time().abs() < f64::EPSILON);
        let _ = graph.render_block(250);
        assert!((graph.current_time() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn late_voice_starts_immediately() {
        let mut graph = graph();
        let _ = graph.render_block(100);
        graph.schedule(voice(0.0));

        let block = graph.render_block(20);
        let data = block.channel(0).expect("mono block");
        assert!(data[..10].iter().all(|sample| (*sample - 0.5).abs() < f32::EPSILON));
        assert!(data[10..].iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn master_gain_scales_output() {
        let mut graph = graph();
        graph.set_master_gain(0.5);
        graph.schedule(voice(0.0));
        let block = graph.render_block(10);
        assert!(
            block
                .channel(0)
                .expect("mono block")
                .iter()
                .all(|sample| (*sample - 0.25).abs() < f32::EPSILON)
        );
    }
}
