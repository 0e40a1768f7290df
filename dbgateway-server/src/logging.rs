//! Tracing initialization. The gateway logs through `tracing` end to end
//! (§7: "every error is logged at `error` or higher"; debug spans record SQL
//! text with parameter *counts*, never values), with the filter level driven
//! by `application.logLevel` in the config file.

use crate::config::LogLevel;

pub fn init(level: LogLevel) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_tracing_filter()));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
