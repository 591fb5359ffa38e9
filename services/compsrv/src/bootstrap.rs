//! Process bootstrap: command line parsing and logging setup

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Air compressor supervision service
#[derive(Parser, Debug)]
#[command(name = "compsrv", version, about)]
pub struct Args {
    /// Path to the service configuration file
    #[arg(short, long, env = "COMPSRV_CONFIG", default_value = "config/compsrv.yaml")]
    pub config: PathBuf,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "COMPSRV_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["compsrv"]);
        assert_eq!(args.config, PathBuf::from("config/compsrv.yaml"));
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn overrides() {
        let args = Args::parse_from(["compsrv", "-c", "/etc/compsrv.yaml", "--log-level", "debug"]);
        assert_eq!(args.config, PathBuf::from("/etc/compsrv.yaml"));
        assert_eq!(args.log_level, "debug");
    }
}
