use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{
    BarCount, DEFAULT_BPM, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, Instrument, OutputFormat,
    Session, default_instruments,
};

pub const CONFIG_FILE_NAME: &str = "gridbeat.config.toml";
pub const CONFIG_PATH_ENV: &str = "GRIDBEAT_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub kit: Vec<KitSlotConfig>,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub default_bpm: f64,
    pub default_bars: u32,
    pub master_volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_frames: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KitSlotConfig {
    pub name: String,
    pub sample_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    pub stdout: bool,
    pub json_file: bool,
    pub thread_ids: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_bpm: DEFAULT_BPM,
            default_bars: BarCount::default().bars(),
            master_volume: 1.0,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            block_frames: 512,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: crate::diagnostics::DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: "gridbeat".to_string(),
            stdout: true,
            json_file: true,
            thread_ids: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            export_dir: PathBuf::from("data/exports"),
        }
    }
}

impl AppConfig {
    /// Loads the discovered config file, or the defaults when there is none.
    ///
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Some(path) => Self::from_path(&path),
            None => {
                debug!("no {CONFIG_FILE_NAME} found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.audio.sample_rate.max(1),
            channels: self.audio.channels.max(1),
        }
    }

    /// Instrument table from the `kit` section; an empty kit yields the five default slots.
    #[must_use]
    pub fn instruments(&self) -> Vec<Instrument> {
        if self.kit.is_empty() {
            return default_instruments();
        }
        self.kit
            .iter()
            .map(|slot| {
                let instrument = Instrument::new(slot.name.clone());
                match &slot.sample_path {
                    Some(path) => instrument.with_sample(path.display().to_string()),
                    None => instrument,
                }
            })
            .collect()
    }

    /// A fresh session with an empty grid.
    pub fn session(&self) -> Result<Session> {
        let bars = BarCount::try_from(self.session.default_bars)
            .context("invalid session.default_bars in config")?;
        Ok(Session::new(
            self.instruments(),
            self.session.default_bpm,
            bars,
        ))
    }
}

fn discover_config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
    }

    let cwd = env::current_dir().ok()?;
    [cwd.join(CONFIG_FILE_NAME), cwd.join("..").join(CONFIG_FILE_NAME)]
        .into_iter()
        .find(|path| path.is_file())
}
