use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

pub const DEFAULT_LOG_FILTER: &str = "info,gridbeat_core=trace";

/// Keeps the file writer alive for the lifetime of the process.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_file: Option<PathBuf>,
    _file_guard: Option<WorkerGuard>,
}

#[must_use]
pub fn trace_file_name(prefix: &str, started_at: DateTime<Utc>) -> String {
    format!("{prefix}-{}.log", started_at.format("%Y%m%d-%H%M%S"))
}

/// `RUST_LOG` wins over the configured filter. A malformed configured filter is an error.
pub fn build_env_filter(diagnostics: &DiagnosticsConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&diagnostics.rust_log_filter).with_context(|| {
        format!(
            "invalid rust_log_filter in config: {}",
            diagnostics.rust_log_filter
        )
    })
}

/// Installs the layers enabled in `diagnostics`: compact stdout and a JSON file under `log_dir`.
///
/// The log directory is only created when the file layer is on. A second call keeps the first
/// subscriber.
pub fn init_tracing(
    log_dir: impl AsRef<Path>,
    diagnostics: &DiagnosticsConfig,
) -> anyhow::Result<TelemetryGuard> {
    let env_filter = build_env_filter(diagnostics)?;
    let session_id = Uuid::new_v4();

    let (file_layer, file_guard, log_file) = if diagnostics.json_file {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;
        let file_name = trace_file_name(&diagnostics.trace_file_prefix, Utc::now());
        let log_file = log_dir.join(&file_name);
        let file_appender = tracing_appender::rolling::never(log_dir, file_name);
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(file_writer);
        (Some(layer), Some(file_guard), Some(log_file))
    } else {
        (None, None, None)
    };

    let stdout_layer = diagnostics.stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_thread_ids(diagnostics.thread_ids)
            .with_target(true)
    });

    if let Err(error) = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        warn!(?error, "global tracing subscriber already initialized");
    } else {
        info!(
            %session_id,
            log_file = log_file.as_ref().map(|path| path.display().to_string()),
            "tracing initialized"
        );
    }

    Ok(TelemetryGuard {
        session_id,
        log_file,
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn trace_file_name_uses_prefix_and_utc_stamp() {
        let started_at = Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("valid timestamp");
        assert_eq!(
            trace_file_name("gridbeat", started_at),
            "gridbeat-20240309-140507.log"
        );
    }

    #[test]
    fn malformed_filter_is_rejected_when_env_is_unset() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let diagnostics = DiagnosticsConfig {
            rust_log_filter: "info,[broken".to_string(),
            ..DiagnosticsConfig::default()
        };
        assert!(build_env_filter(&diagnostics).is_err());
        assert!(build_env_filter(&DiagnosticsConfig::default()).is_ok());
    }

    #[test]
    fn disabled_file_layer_creates_no_log_directory() {
        let temp_dir = tempfile::tempdir().expect("tempdir should work");
        let log_dir = temp_dir.path().join("logs");
        let diagnostics = DiagnosticsConfig {
            rust_log_filter: "warn".to_string(),
            stdout: false,
            json_file: false,
            ..DiagnosticsConfig::default()
        };

        let guard = init_tracing(&log_dir, &diagnostics).expect("tracing should init");
        assert!(guard.log_file.is_none());
        assert!(!log_dir.exists());
    }
}
