use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, WarpError};

/// Installs a global `tracing` subscriber filtered by `level` (e.g. `"info"`,
/// `"warpgraph=debug,warn"`). Safe to call once per process; a second call
/// returns an error rather than panicking.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| WarpError::InvalidConfigKey(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| WarpError::InvalidConfigKey("logging already initialized".into()))
}
