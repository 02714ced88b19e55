//! Client side of the self-update flow.
//!
//! An application checks a published app-installer manifest for a newer build
//! of itself, then asks the privileged deployment service to install it. The
//! service streams progress back while the deployment runs.
//!
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//! use updater::{ClientConfig, DeploymentClient, HttpManifestFetcher, UpdateChecker};
//!
//! # async fn demo() -> updater::Result<()> {
//! let checker = UpdateChecker::new(HttpManifestFetcher::builder().build()?);
//! let manifest_url = url::Url::parse("https://updates.example.com/App.appinstaller").unwrap();
//! let info = checker
//!     .check_for_updates(&manifest_url, "App", "1.2.0.0")
//!     .await
//!     .into_result()?;
//!
//! let config = ClientConfig::default();
//! let client = DeploymentClient::new(config.socket_connector(), config);
//! client
//!     .update(&info, |p| println!("{p}"), &CancellationToken::new())
//!     .await
//!     .into_result()?;
//! # Ok(())
//! # }
//! ```

mod checker;
mod client;
mod config;
mod error;
mod fetcher;
mod manifest;
mod version;

pub use checker::{InstalledPackage, UpdateAvailability, UpdateChecker, UpdateInfo};
pub use client::{DeploymentClient, DeploymentResult, DeploymentTask};
pub use config::ClientConfig;
pub use error::{MalformedVersion, ParseError, Result, UpdaterError};
pub use fetcher::{FetchResponse, HttpManifestFetcher, HttpManifestFetcherBuilder, ManifestFetcher};
pub use manifest::{parse, parse_manifest, Manifest, PackageDescriptor};
pub use version::{is_newer, PackageVersion};
