//! Logger initialization.

use std::io::Write;

use log::LevelFilter;

use crate::config::LogFormat;
use crate::errors::Result;

/// Initializes `env_logger` with the given level and format.
///
/// The logger reads `RUST_LOG` first, then applies the explicit level so
/// CLI control wins; chatty HTTP internals are pinned to info and above.
pub fn init_logger(level: LevelFilter, format: LogFormat) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.filter_module("reqwest", LevelFilter::Info);
    builder.filter_module("hyper", LevelFilter::Info);
    builder.filter_module("rustls", LevelFilter::Warn);

    if let LogFormat::Json = format {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "ts": chrono::Utc::now().to_rfc3339(),
                "level": record.level().to_string(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{line}")
        });
    }

    builder
        .try_init()
        .map_err(|e| anyhow::anyhow!("logger initialization: {e}"))?;
    Ok(())
}
