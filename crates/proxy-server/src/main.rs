use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use ariproxy_core::config::ProxyConfig;
use ariproxy_core::logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
use ariproxy_server::ProxyServer;

/// Proxy between the Asterisk REST Interface and queue based consumers
///
/// Dialogue queues live in an in-process broker. No external message broker
/// is spoken, so consumers must run inside this process; the binary is
/// suited to trying out configurations and the admin API, not to serving
/// remote consumers.
#[derive(Parser, Debug)]
#[command(name = "ariproxy", version)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "ariproxy.json")]
    config: PathBuf,

    /// Log level, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ProxyConfig::load(&args.config)?;

    let level = parse_log_level(args.log_level.as_deref().unwrap_or(&config.log_level))?;
    let mut logging = LoggingConfig::new(level);
    if args.json_logs {
        logging = logging.with_json();
    }
    setup_logging(logging)?;
    log_welcome("ariproxy", env!("CARGO_PKG_VERSION"));

    info!(
        server_id = %config.server_id,
        ari = %config.ari_base_url(),
        applications = config.applications.len(),
        "Starting ARI proxy"
    );
    warn!("Dialogue queues are in-process only; external consumers cannot attach");

    let server = ProxyServer::new(config, Some(args.config))?;
    server.start().await;
    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_help_states_queue_scope() {
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("in-process"));
    }

    #[test]
    fn test_default_config_path() {
        let args = Args::parse_from(["ariproxy"]);
        assert_eq!(args.config, PathBuf::from("ariproxy.json"));
        assert!(!args.json_logs);
    }
}
