//! Privileged deployment service.
//!
//! Listens on a named endpoint for install, update and remove requests from
//! applications that want to update themselves, performs them through a
//! [`PackageInstaller`], streams progress back and answers every request
//! exactly once.
//!
//! ```ignore
//! use deployd::{DeploymentService, ServiceConfig, ServiceHost};
//! use deploy_protocol::SocketListener;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> deployd::Result<()> {
//! let config = ServiceConfig::default();
//! let listener = SocketListener::bind(&config.socket_dir, &config.service_name)?;
//! let service = DeploymentService::new(config.command_installer());
//! ServiceHost::new(service, CancellationToken::new()).run(listener).await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod host;
mod installer;
mod service;

pub use config::{InstallerConfig, ServiceConfig};
pub use error::{Result, ServiceError};
pub use host::{ConnectionSource, Deferral, ServiceHost};
pub use installer::{
    select_volume, CommandInstaller, DeployMode, DeploymentOutcome, PackageInstaller,
    PackageVolume,
};
pub use service::DeploymentService;
