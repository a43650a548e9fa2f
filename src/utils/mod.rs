// src/utils/mod.rs
pub mod timing;

use log::{info, LevelFilter};
use std::str::FromStr;

pub use timing::{clamp_period, deadline_after, FAR_FUTURE};

/// Level for the logger installed before configuration is loaded, so that config
/// validation messages are not lost. Reads `LOG_LEVEL` through `lookup`.
pub fn bootstrap_log_level<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("LOG_LEVEL")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Installs the process logger. `level` is a `log` level name; unknown names fall
/// back to `info`.
pub fn setup_logging(level: &str) -> Result<(), fern::InitError> {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("rustls", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    info!("Logging initialized at {}", level);
    Ok(())
}
