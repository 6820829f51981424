use std::{fs::File, io::ErrorKind, path::Path, sync::Arc};

use anyhow::{Context, Result};
use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer},
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, info, instrument, warn};

use crate::{model::Instrument, pcm::PcmBuffer};

/// One decoded buffer per instrument slot.
///
/// Buffers are never edited in place. Replacing a slot swaps the `Arc`, so a render that
/// already captured the old buffer keeps using it.
#[derive(Debug, Clone, Default)]
pub struct SampleStore {
    slots: Vec<Option<Arc<PcmBuffer>>>,
}

impl SampleStore {
    #[must_use]
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![None; slot_count],
        }
    }

    #[must_use]
    pub fn lookup(&self, instrument_index: usize) -> Option<Arc<PcmBuffer>> {
        self.slots.get(instrument_index).and_then(Clone::clone)
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Publishes `buffer` into a slot, growing the table if needed.
    ///
    /// Buffers without channels or frames are treated as absent.
    pub fn insert(&mut self, instrument_index: usize, buffer: PcmBuffer) {
        if instrument_index >= self.slots.len() {
            self.slots.resize(instrument_index + 1, None);
        }
        let usable = buffer.channel_count() > 0 && buffer.frame_count() > 0;
        self.slots[instrument_index] = usable.then(|| Arc::new(buffer));
    }

    /// Decodes `path` and publishes it. On failure the slot keeps its previous buffer.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load_file(&mut self, instrument_index: usize, path: &Path) -> Result<()> {
        let buffer = decode_audio_file(path)?;
        info!(
            frames = buffer.frame_count(),
            channels = buffer.channel_count(),
            sample_rate = buffer.sample_rate(),
            "sample loaded"
        );
        self.insert(instrument_index, buffer);
        Ok(())
    }

    /// Loads the default sample of every instrument that names one.
    ///
    /// Failures are logged and leave the slot silent. Returns the number of slots loaded.
    #[instrument(skip(self, instruments), fields(instruments = instruments.len()))]
    pub fn load_kit(&mut self, instruments: &[Instrument]) -> usize {
        let mut loaded = 0;
        for (index, instrument) in instruments.iter().enumerate() {
            let Some(sample_ref) = instrument.sample_ref.as_deref() else {
                continue;
            };
            if sample_ref.is_empty() {
                continue;
            }

            match self.load_file(index, Path::new(sample_ref)) {
                Ok(()) => loaded += 1,
                Err(error) => {
                    warn!(
                        instrument = %instrument.name,
                        sample_ref,
                        ?error,
                        "failed to load default sample, slot stays silent"
                    );
                }
            }
        }
        debug!(loaded, "kit load complete");
        loaded
    }
}

#[instrument(fields(path = %path.display()))]
pub fn decode_audio_file(path: &Path) -> Result<PcmBuffer> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found in {}", path.display()))?;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!(
                    "audio stream reset required for {}",
                    path.display()
                ));
            }
            Err(error) => return Err(error.into()),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        sample_rate = decoded.spec().rate;
        push_planar_samples(decoded, &mut channels);
    }

    let buffer = PcmBuffer::from_channels(sample_rate, channels);
    if buffer.frame_count() == 0 {
        return Err(anyhow::anyhow!(
            "decoded zero samples from {}",
            path.display()
        ));
    }

    debug!(
        sample_rate,
        channels = buffer.channel_count(),
        total_frames = buffer.frame_count(),
        "audio decode complete"
    );
    Ok(buffer)
}

fn push_planar_samples(decoded: AudioBufferRef<'_>, channels: &mut Vec<Vec<f32>>) {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    if channels.len() < channel_count {
        channels.resize_with(channel_count, Vec::new);
    }

    let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buffer.copy_interleaved_ref(decoded);

    for frame in sample_buffer.samples().chunks(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame.iter()) {
            channel.push(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_slot_reads_as_absent() {
        let store = SampleStore::new(5);
        assert!(store.lookup(0).is_none());
        assert!(store.lookup(99).is_none());
    }

    #[test]
    fn replacing_a_slot_keeps_captured_buffer_alive() {
        let mut store = SampleStore::new(1);
        store.insert(0, PcmBuffer::mono(8_000, vec![0.5; 4]));
        let captured = store.lookup(0).expect("buffer should be loaded");

        store.insert(0, PcmBuffer::mono(8_000, vec![-0.5; 2]));
        assert_eq!(captured.frame_count(), 4);
        assert_eq!(store.lookup(0).map(|buffer| buffer.frame_count()), Some(2));
    }

    #[test]
    fn empty_buffers_are_not_published() {
        let mut store = SampleStore::new(2);
        store.insert(1, PcmBuffer::mono(8_000, Vec::new()));
        assert!(store.lookup(1).is_none());
        assert_eq!(store.loaded_count(), 0);
    }

    #[test]
    fn kit_load_failure_leaves_slot_silent() {
        let temp = tempfile::tempdir().expect("tempdir should work");
        let missing = temp.path().join("missing.wav");
        let instruments = vec![
            Instrument::new("Kick").with_sample(missing.display().to_string()),
            Instrument::new("Snare"),
        ];

        let mut store = SampleStore::new(2);
        assert_eq!(store.load_kit(&instruments), 0);
        assert!(store.lookup(0).is_none());
    }

    #[test]
    fn failed_file_load_keeps_previous_buffer() {
        let temp = tempfile::tempdir().expect("tempdir should work");
        let garbage = temp.path().join("garbage.wav");
        std::fs::write(&garbage, b"not audio at all").expect("write should work");

        let mut store = SampleStore::new(1);
        store.insert(0, PcmBuffer::mono(8_000, vec![0.25; 8]));
        assert!(store.load_file(0, &garbage).is_err());
        assert_eq!(store.lookup(0).map(|buffer| buffer.frame_count()), Some(8));
    }
}
