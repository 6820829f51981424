pub mod automation;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod export;
pub mod fixtures;
pub mod live;
pub mod mixer;
pub mod model;
pub mod parity;
pub mod pcm;
pub mod render;
pub mod resolver;
pub mod samples;
pub mod time;
pub mod transport;
pub mod voice;

pub use automation::{AutomationGrid, AutomationOverride, ParameterChange};
pub use config::AppConfig;
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use engine::{Engine, EngineError, ParameterTarget};
pub use export::{ExportGate, ExportJob, export_file_name, export_loop_wav, render_wav_bytes};
pub use live::LiveGraph;
pub use mixer::VoiceMixer;
pub use model::{BarCount, Instrument, OutputFormat, PatternGrid, Session};
pub use parity::{ParityReport, generate_parity_report, render_live_virtual};
pub use pcm::{PcmBuffer, encode_wav, quantize_sample};
pub use render::render_loop;
pub use resolver::{EffectiveParameters, resolve};
pub use samples::{SampleStore, decode_audio_file};
pub use transport::{PlayState, TickDriver, Transport, step_interval};
pub use voice::{ScheduledVoice, VoiceSink, trigger_step, trigger_voice};
