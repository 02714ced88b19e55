//! Deployment service daemon.
//!
//! Serves install, update and remove requests on a Unix socket until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use deploy_protocol::SocketListener;
use deployd::{DeploymentService, ServiceConfig, ServiceHost};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

/// Command-line arguments for the deployment daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Endpoint name to listen under (overrides the config file)
    #[arg(long)]
    service_name: Option<String>,

    /// Directory for the endpoint socket (overrides the config file)
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Installer program (overrides the config file)
    #[arg(long)]
    installer: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.debug {
            EnvFilter::new("debug,deployd=debug,deploy_protocol=debug")
        } else {
            EnvFilter::new("info")
        }
    });
    fmt().with_env_filter(filter).init();

    let mut config = ServiceConfig::load_or_default(args.config.as_deref())
        .await
        .context("failed to load configuration")?;
    if let Some(name) = args.service_name {
        config = config.service_name(name);
    }
    if let Some(dir) = args.socket_dir {
        config = config.socket_dir(dir);
    }
    if let Some(program) = args.installer {
        config.installer.program = program;
    }

    let eligible = config.volumes.iter().filter(|v| v.is_eligible()).count();
    if eligible == 0 {
        tracing::warn!("no configured volume accepts full-trust installs; install and update requests will fail");
    }

    let listener = SocketListener::bind(&config.socket_dir, &config.service_name)
        .with_context(|| format!("failed to bind {}", config.socket_path().display()))?;
    let service = DeploymentService::new(config.command_installer());
    let shutdown = CancellationToken::new();
    let host = ServiceHost::new(service, shutdown.clone());

    tracing::info!(
        service = %config.service_name,
        installer = %config.installer.program.display(),
        "deployment service running. Press Ctrl+C to exit."
    );
    let running = tokio::spawn(host.run(listener));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    shutdown.cancel();
    running.await.context("service host task failed")?;

    Ok(())
}
