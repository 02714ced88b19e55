//! Configuration for the deployment service.

use crate::error::{Result, ServiceError};
use crate::installer::{CommandInstaller, PackageVolume};
use deploy_protocol::{default_socket_dir, socket_path, DEFAULT_SERVICE_NAME};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the deployment service, read from TOML.
///
/// ```toml
/// service_name = "autoupdate.deployment"
/// socket_dir = "/run/autoupdate"
///
/// [installer]
/// program = "/usr/libexec/autoupdate/pkg-deploy"
/// args = ["--quiet"]
///
/// [[volumes]]
/// name = "system"
/// path = "/var/lib/autoupdate/packages"
/// supports_install = true
/// full_trust = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default = "default_volumes")]
    pub volumes: Vec<PackageVolume>,
}

/// External program that performs package operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerConfig {
    #[serde(default = "default_program")]
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            socket_dir: default_socket_dir(),
            installer: InstallerConfig::default(),
            volumes: default_volumes(),
        }
    }
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_program() -> PathBuf {
    PathBuf::from("pkg-deploy")
}

fn default_volumes() -> Vec<PackageVolume> {
    vec![PackageVolume {
        name: "system".into(),
        path: PathBuf::from("/var/lib/autoupdate/packages"),
        supports_install: true,
        full_trust: true,
    }]
}

impl ServiceConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| ServiceError::Config(err.to_string()))
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&text).map_err(|err| match err {
            ServiceError::Config(reason) => {
                ServiceError::Config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    /// Load from `path`, falling back to defaults when no file exists there.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match Self::load_from_file(path).await {
            Err(ServiceError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found; using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Set the service name
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the socket directory
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Path of the endpoint socket.
    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.socket_dir, &self.service_name)
    }

    /// Installer running the configured program against the configured volumes.
    pub fn command_installer(&self) -> CommandInstaller {
        CommandInstaller::new(
            self.installer.program.clone(),
            self.installer.args.clone(),
            self.volumes.clone(),
        )
    }
}
