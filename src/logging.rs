use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LedgerConfig, DEFAULT_LOG_FILTER};

const LOG_FILE_PREFIX: &str = "hearthledger.log";

fn env_filter(config: &LedgerConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber: JSON lines on stderr, plus a daily rolling
/// file under the data directory when `file_sink` is set.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the process. Calling this twice is harmless.
pub fn init(config: &LedgerConfig, file_sink: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = if file_sink {
        let dir = config.logs_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create log directory {}", dir.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(rolling::daily(&dir, LOG_FILE_PREFIX));
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filter_falls_back_to_default() {
        let mut config = LedgerConfig::load_from(|_| None);
        config.log_filter = "hearthledger=notalevel".into();
        assert_eq!(env_filter(&config).to_string(), EnvFilter::new(DEFAULT_LOG_FILTER).to_string());
    }

    #[test]
    fn file_sink_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::with_data_dir(dir.path());
        let guard = init(&config, true).unwrap();
        assert!(guard.is_some());
        assert!(config.logs_dir().is_dir());
    }
}
