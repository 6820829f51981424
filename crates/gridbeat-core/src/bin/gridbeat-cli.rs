use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use gridbeat_core::{
    AppConfig, Engine, PcmBuffer, SampleStore, Session, TickDriver,
    diagnostics::init_tracing,
    encode_wav,
    export::write_wav_file,
    fixtures::{demo_session, fill_missing_with_demo_kit},
    generate_parity_report,
    parity::write_parity_report,
    step_interval,
};

#[derive(Debug, Parser)]
#[command(name = "gridbeat-cli")]
#[command(about = "Headless tools for gridbeat render/playback/parity workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Offline export of the demo loop or a JSON session.
    Render {
        #[arg(long)]
        pattern: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        bpm: Option<f64>,

        #[arg(long)]
        bars: Option<u32>,
    },
    /// Runs the live transport against the wall clock.
    Play {
        #[arg(long)]
        pattern: Option<PathBuf>,

        #[arg(long, default_value_t = 1)]
        loops: u32,

        #[arg(long)]
        capture: Option<PathBuf>,
    },
    /// Compares the live path against the offline render.
    Parity {
        #[arg(long, default_value = "data/parity/report.json")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default()?;
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| config.paths.logs_dir.clone());
    let _telemetry = init_tracing(&log_dir, &config.diagnostics)?;

    match cli.command {
        Commands::Render {
            pattern,
            output_dir,
            bpm,
            bars,
        } => {
            let mut engine = build_engine(&config, pattern.as_deref())?;
            if let Some(bpm) = bpm {
                engine.set_bpm(bpm);
            }
            if let Some(bars) = bars {
                engine.set_bars(bars)?;
            }
            let output_dir = output_dir.unwrap_or_else(|| config.paths.export_dir.clone());
            let path = engine.export_loop(&output_dir)?;
            tracing::info!(path = %path.display(), "render finished");
        }
        Commands::Play {
            pattern,
            loops,
            capture,
        } => {
            let mut engine = build_engine(&config, pattern.as_deref())?;
            let captured = play(&mut engine, loops, config.audio.block_frames.max(1));
            if let Some(capture) = capture {
                let bytes = encode_wav(&captured)?;
                write_wav_file(&capture, &bytes)?;
                tracing::info!(
                    path = %capture.display(),
                    frames = captured.frame_count(),
                    "capture written"
                );
            }
        }
        Commands::Parity { output } => {
            let engine = build_engine(&config, None)?;
            let report = generate_parity_report(
                engine.session(),
                engine.samples(),
                engine.format(),
                config.audio.block_frames,
            )?;
            write_parity_report(&output, &report)?;
            tracing::info!(
                path = %output.display(),
                matches = report.matches,
                "parity report generated"
            );
        }
    }

    Ok(())
}

fn build_engine(config: &AppConfig, pattern: Option<&Path>) -> anyhow::Result<Engine> {
    let session = match pattern {
        Some(path) => load_session(path)?,
        None if config.kit.is_empty() => {
            let mut session = demo_session();
            session.bpm = config.session.default_bpm;
            session
        }
        None => config.session()?,
    };

    let format = config.output_format();
    let mut samples = SampleStore::new(session.instruments.len());
    samples.load_kit(&session.instruments);
    let synthesized =
        fill_missing_with_demo_kit(&mut samples, session.instruments.len(), format.sample_rate);
    tracing::debug!(synthesized, "demo kit filled empty slots");

    let mut engine = Engine::new(session, samples, format);
    engine.set_master_volume(config.session.master_volume);
    Ok(engine)
}

fn load_session(path: &Path) -> anyhow::Result<Session> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read pattern: {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse pattern json: {}", path.display()))
}

/// Ticks on the wall clock and pulls audio as fast as it is due, like an output callback would.
fn play(engine: &mut Engine, loops: u32, block_frames: usize) -> PcmBuffer {
    let format = engine.format();
    let target_ticks = engine.session().total_steps() * loops as usize;
    let block_duration =
        Duration::from_secs_f64(block_frames as f64 / f64::from(format.sample_rate));
    let mut captured = PcmBuffer::silent(format.sample_rate, format.channels, 0);

    engine.start();
    let started = Instant::now();
    let mut driver = TickDriver::new(started, step_interval(engine.session().bpm));
    let mut ticks = 0;

    while ticks < target_ticks {
        let now = Instant::now();
        let due_frames = (now - started).as_secs_f64() * f64::from(format.sample_rate);
        while (engine.graph().frames_rendered() as f64) < due_frames {
            captured.append(&engine.render_live_block(block_frames));
        }

        if driver.poll(now, step_interval(engine.session().bpm)) {
            if let Some(step) = engine.tick() {
                tracing::trace!(step, "tick");
            }
            ticks += 1;
        }
        thread::sleep(driver.time_until_due(Instant::now()).min(block_duration));
    }

    engine.stop();
    while engine.graph().active_voices() > 0 {
        captured.append(&engine.render_live_block(block_frames));
    }
    captured
}
