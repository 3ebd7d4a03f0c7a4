//! Log setup: level and output format from the command line, `RUST_LOG` wins when set.

use clap::ValueEnum;
use std::sync::Once;
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Plain text without colours
    Text,
    /// ANSI-coloured text
    Color,
    /// One JSON object per line
    Json,
}

pub fn setup(level: LogLevel, format: LogFormat) {
    let filter = map_to_level_filter(level);

    if filter == LevelFilter::OFF {
        return;
    }

    INIT.call_once(|| {
        stderr_init(filter, format);
    });
}

fn map_to_level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Silent => LevelFilter::OFF,
    }
}

fn stderr_init(filter: LevelFilter, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter.to_string()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    let () = match format {
        LogFormat::Text => builder.with_ansi(false).init(),
        LogFormat::Color => builder.with_ansi(true).init(),
        LogFormat::Json => builder.json().init(),
    };

    debug!("Logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(map_to_level_filter(LogLevel::Debug), LevelFilter::DEBUG);
        assert_eq!(map_to_level_filter(LogLevel::Error), LevelFilter::ERROR);
        assert_eq!(map_to_level_filter(LogLevel::Silent), LevelFilter::OFF);
    }
}
