use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, instrument};

use crate::{
    model::{OutputFormat, Session},
    pcm::encode_wav,
    render::render_loop,
    samples::SampleStore,
};

pub const EXPORT_FILE_PREFIX: &str = "drum-loop";

#[must_use]
pub fn export_file_name(timestamp_millis: i64) -> String {
    format!("{EXPORT_FILE_PREFIX}-{timestamp_millis}.wav")
}

/// Offline render followed by WAV encoding.
pub fn render_wav_bytes(
    session: &Session,
    samples: &SampleStore,
    format: OutputFormat,
) -> Result<Vec<u8>> {
    let rendered = render_loop(session, samples, format);
    encode_wav(&rendered).context("failed to encode rendered loop")
}

/// Renders the loop and writes it to `<output_dir>/drum-loop-<millis>.wav`.
#[instrument(skip(session, samples), fields(output_dir = %output_dir.display()))]
pub fn export_loop_wav(
    session: &Session,
    samples: &SampleStore,
    format: OutputFormat,
    output_dir: &Path,
) -> Result<PathBuf> {
    let bytes = render_wav_bytes(session, samples, format)?;
    let path = output_dir.join(export_file_name(Utc::now().timestamp_millis()));
    write_wav_file(&path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "loop exported");
    Ok(path)
}

/// Writes through a temp file in the target directory, so a failed write leaves nothing behind.
#[instrument(skip(bytes), fields(path = %path.display(), len = bytes.len()))]
pub fn write_wav_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf);
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create export directory: {}", parent.display()))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(&parent)
        .context("failed to create temp export file")?;
    temp_file
        .write_all(bytes)
        .context("failed to write temp export file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist export: {}", path.display()))?;
    Ok(())
}

/// Single-export-at-a-time flag shared between the engine and running jobs.
#[derive(Debug, Clone, Default)]
pub struct ExportGate {
    busy: Arc<AtomicBool>,
}

impl ExportGate {
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claims the gate, or returns `None` while another export holds it.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ExportPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ExportPermit {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Held for the lifetime of one export; releases the gate on drop, including on failure.
#[derive(Debug)]
pub struct ExportPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for ExportPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// A snapshot of everything an export needs, detached from the live engine.
#[derive(Debug)]
pub struct ExportJob {
    session: Session,
    samples: SampleStore,
    format: OutputFormat,
    output_dir: PathBuf,
    _permit: ExportPermit,
}

impl ExportJob {
    #[must_use]
    pub fn new(
        session: Session,
        samples: SampleStore,
        format: OutputFormat,
        output_dir: PathBuf,
        permit: ExportPermit,
    ) -> Self {
        Self {
            session,
            samples,
            format,
            output_dir,
            _permit: permit,
        }
    }

    /// Runs to completion. The gate is released when the job is consumed, whatever the outcome.
    pub fn run(self) -> Result<PathBuf> {
        export_loop_wav(&self.session, &self.samples, self.format, &self.output_dir).inspect_err(
            |error| {
                error!(?error, output_dir = %self.output_dir.display(), "loop export failed");
            },
        )
    }

    #[must_use]
    pub fn spawn(self) -> JoinHandle<Result<PathBuf>> {
        thread::spawn(move || self.run())
    }
}
