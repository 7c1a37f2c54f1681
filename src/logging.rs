use crate::config::{LoggerConfig, LoggerInfrastructure};
use anyhow::anyhow;
use std::fmt;
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

/// Local wall-clock timestamps, second precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// issue messages. Returns `Ok(false)` when logging is silenced.
pub fn init(config: &LoggerConfig) -> crate::Result<bool> {
    if config.infrastructure == LoggerInfrastructure::Silent {
        return Ok(false);
    }

    let level: Level = config
        .level
        .parse()
        .map_err(|_| anyhow!("unknown log level '{}'", config.level))?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_timer(LocalTime)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {}", e))?;

    Ok(true)
}
