//! Tracing subscriber setup for the binary.

use super::LogFormat;
use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives; overrides `-v`.
pub const LOG_ENV: &str = "STAGELOCK_LOG";

/// Installs the global tracing subscriber, writing to stderr.
///
/// # Errors
///
/// Returns an error if the filter directives are invalid or a subscriber is
/// already installed.
pub fn init_tracing(verbosity: u8, format: LogFormat) -> anyhow::Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::new(default_directives(verbosity)),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

fn default_directives(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,stagelock=info",
        1 => "warn,stagelock=debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_directives_parse() {
        for verbosity in 0..3 {
            assert!(EnvFilter::try_new(default_directives(verbosity)).is_ok());
        }
    }
}
