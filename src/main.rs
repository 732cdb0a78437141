//! Cluster gateway binary.
//!
//! ```text
//!     Client ──▶ access gate ──▶ route table ──▶ forwarder ──▶ cluster manager
//!        │                                                         ▲
//!        └── /api/exec (websocket) ──▶ hijack engine ──────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use cluster_gateway::lifecycle::{resolve_config, run};
use cluster_gateway::observability::init_logging;

#[derive(Parser, Debug)]
#[command(name = "cluster-gateway", version, about = "Control-plane gateway for a container cluster")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "CLUSTER_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match resolve_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    init_logging(&config.observability.log_level);
    tracing::info!("cluster-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
