use anyhow::{Context, Result};

pub const WAV_HEADER_LEN: usize = 44;
const BYTES_PER_SAMPLE: u16 = 2;
const BITS_PER_SAMPLE: u16 = 16;
const FORMAT_PCM: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Planar multi-channel float audio.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    /// Builds a buffer from planar channel data. Channels are truncated to the shortest one.
    #[must_use]
    pub fn from_channels(sample_rate: u32, mut channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in &mut channels {
            channel.truncate(frames);
        }
        Self {
            sample_rate,
            channels,
        }
    }

    #[must_use]
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::from_channels(sample_rate, vec![samples])
    }

    #[must_use]
    pub fn silent(sample_rate: u32, channels: u16, frames: usize) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; frames]; usize::from(channels)],
        }
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(Vec::as_slice)
    }

    pub(crate) fn channels_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.channels
    }

    /// Appends `other` frame by frame. Every channel grows by `other.frame_count()`: channels
    /// `other` lacks are padded with silence and its extra channels are dropped.
    pub fn append(&mut self, other: &PcmBuffer) {
        let frames = other.frame_count();
        for (index, channel) in self.channels.iter_mut().enumerate() {
            match other.channels.get(index) {
                Some(source) => channel.extend_from_slice(&source[..frames]),
                None => channel.resize(channel.len() + frames, 0.0),
            }
        }
    }

    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.channels
            .iter()
            .all(|channel| channel.iter().all(|sample| *sample == 0.0))
    }

    #[must_use]
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|sample| sample.abs())
            .fold(0.0_f32, f32::max)
    }
}

/// Quantizes one float sample to signed 16-bit PCM.
///
/// Negative values scale by 32768 and non-negative values by 32767, truncating toward zero.
#[must_use]
pub fn quantize_sample(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    let scaled = if clamped < 0.0 {
        clamped * 32_768.0
    } else {
        clamped * 32_767.0
    };
    scaled as i16
}

/// Encodes `buffer` as a canonical 44-byte-header 16-bit PCM WAV.
pub fn encode_wav(buffer: &PcmBuffer) -> Result<Vec<u8>> {
    let channels = u16::try_from(buffer.channel_count())
        .context("too many channels for a wav container")?;
    let frames = buffer.frame_count();
    let data_len = frames
        .checked_mul(usize::from(channels) * usize::from(BYTES_PER_SAMPLE))
        .context("wav payload size overflow")?;
    let data_len_u32 = u32::try_from(data_len).context("wav payload exceeds 4 GiB")?;
    let riff_len = data_len_u32
        .checked_add((WAV_HEADER_LEN - 8) as u32)
        .context("wav riff length overflow")?;
    let block_align = channels * BYTES_PER_SAMPLE;
    let byte_rate = buffer
        .sample_rate()
        .checked_mul(u32::from(block_align))
        .context("wav byte rate overflow")?;

    let mut bytes = Vec::with_capacity(WAV_HEADER_LEN + data_len);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&riff_len.to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    bytes.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&buffer.sample_rate().to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len_u32.to_le_bytes());

    for frame in 0..frames {
        for channel in buffer.channels() {
            bytes.extend_from_slice(&quantize_sample(channel[frame]).to_le_bytes());
        }
    }

    Ok(bytes)
}
