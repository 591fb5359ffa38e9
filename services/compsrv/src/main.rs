//! Service entry point

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use compsrv::bootstrap::{init_logging, Args};
use compsrv::compressor::Compressor;
use compsrv::config::CompressorConfig;
use compsrv::session::ModbusTcpSession;
use compsrv::sink::RedisSink;
use compsrv::state::{LocalSupervisory, SupervisoryState};
use compsrv::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = CompressorConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    info!(
        "supervising compressor at {}:{} (unit {})",
        config.host, config.port, config.unit_id
    );

    let session = ModbusTcpSession::from_config(&config);
    let sink = RedisSink::new(&config.sink).context("setting up telemetry sink")?;
    let supervisory = LocalSupervisory::new(SupervisoryState::Disabled);
    let supervisor = Supervisor::new(
        Compressor::new(Box::new(session)),
        sink,
        Box::new(supervisory),
        &config,
    );

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    supervisor.run(token).await?;
    Ok(())
}
