use tracing::{debug, instrument};

use crate::{
    mixer::VoiceMixer,
    model::{OutputFormat, Session},
    pcm::PcmBuffer,
    samples::SampleStore,
    time::{seconds_to_frames_ceil, step_duration_seconds},
    voice::trigger_step,
};

/// Renders one pass of the loop into a buffer of exactly `ceil(loop_duration * rate)` frames.
///
/// Only the session contents, the captured sample buffers and `format` influence the output.
#[instrument(skip(session, samples), fields(bpm = session.bpm, bars = session.bars.bars()))]
pub fn render_loop(session: &Session, samples: &SampleStore, format: OutputFormat) -> PcmBuffer {
    let note_duration = step_duration_seconds(session.bpm);
    let total_steps = session.total_steps();
    let loop_duration = total_steps as f64 * note_duration;
    let frame_count = seconds_to_frames_ceil(loop_duration, format.sample_rate);

    let mut mixer = VoiceMixer::new(format);
    let mut voices = 0;
    for step in 0..total_steps {
        let event_time = step as f64 * note_duration;
        voices += trigger_step(session, samples, step, event_time, &mut mixer);
    }

    let mut output = PcmBuffer::silent(format.sample_rate, format.channels, frame_count);
    mixer.render_into(0, &mut output);

    debug!(
        frames = frame_count,
        voices,
        loop_duration, "offline render completed"
    );
    output
}
