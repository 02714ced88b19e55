//! Command-line front end for self-updates.
//!
//! Checks a published manifest and asks the deployment service to install,
//! update or remove packages, printing progress as it arrives.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use deploy_protocol::ProgressEvent;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};
use updater::{
    ClientConfig, DeploymentClient, DeploymentResult, HttpManifestFetcher, UpdateAvailability,
    UpdateChecker, UpdateInfo, UpdaterError,
};
use url::Url;

/// Command-line arguments for the update front end
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Endpoint name of the deployment service
    #[arg(long)]
    service_name: Option<String>,

    /// Directory holding the service socket
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Seconds to wait for the service or the manifest server
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a manifest offers a newer build of a package
    Check {
        #[arg(long)]
        manifest: Url,
        /// Installed package name
        #[arg(long)]
        name: String,
        /// Installed package version
        #[arg(long)]
        version: String,
    },

    /// Show the package a manifest points at
    Info {
        #[arg(long)]
        manifest: Url,
    },

    /// Check for an update and deploy it if one is available
    Update {
        #[arg(long)]
        manifest: Url,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
    },

    /// Install the package a manifest points at
    Install {
        #[arg(long)]
        manifest: Url,
    },

    /// Remove an installed package
    Remove {
        /// Full package identifier
        full_name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.debug {
            EnvFilter::new("debug,updater=debug,deploy_protocol=debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let timeout = Duration::from_secs(args.timeout);
    let mut config = ClientConfig::default().connect_timeout(timeout);
    if let Some(name) = args.service_name {
        config.service_name = name;
    }
    if let Some(dir) = args.socket_dir {
        config = config.socket_dir(dir);
    }

    let checker = UpdateChecker::new(HttpManifestFetcher::builder().timeout(timeout).build()?);
    let client = DeploymentClient::new(config.socket_connector(), config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match args.command {
        Commands::Check {
            manifest,
            name,
            version,
        } => {
            let availability = checker.check_for_updates(&manifest, &name, &version).await;
            let info = availability_or_error(availability)?;
            let descriptor = info.descriptor();
            if info.should_update() {
                println!("update available: {} {}", descriptor.name(), descriptor.version());
            } else {
                println!("{} {} is up to date", name, version);
            }
        }
        Commands::Info { manifest } => {
            let info = availability_or_error(checker.package_info(&manifest).await)?;
            let descriptor = info.descriptor();
            println!("name:     {}", descriptor.name());
            println!("version:  {}", descriptor.version());
            println!("location: {}", descriptor.download_url());
        }
        Commands::Update {
            manifest,
            name,
            version,
        } => {
            let info = availability_or_error(
                checker.check_for_updates(&manifest, &name, &version).await,
            )?;
            let result = client.update(&info, print_progress(), &cancel).await;
            if let DeploymentResult::Failed(UpdaterError::AlreadyUpToDate) = result {
                println!("{} {} is up to date", name, version);
                return Ok(());
            }
            finish(result)?;
        }
        Commands::Install { manifest } => {
            let info = availability_or_error(checker.package_info(&manifest).await)?;
            finish(client.install(&info, print_progress(), &cancel).await)?;
        }
        Commands::Remove { full_name } => {
            finish(client.remove(&full_name, &cancel).await)?;
        }
    }

    Ok(())
}

fn availability_or_error(availability: UpdateAvailability) -> anyhow::Result<UpdateInfo> {
    availability
        .into_result()
        .context("update check failed")
}

fn print_progress() -> impl FnMut(ProgressEvent) + Send {
    |event| println!("progress: {event}")
}

fn finish(result: DeploymentResult) -> anyhow::Result<()> {
    match result {
        DeploymentResult::Succeeded => {
            println!("done");
            Ok(())
        }
        DeploymentResult::Failed(err) => Err(anyhow!(err).context("deployment failed")),
    }
}
