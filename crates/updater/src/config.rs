//! Configuration for talking to the deployment service.

use deploy_protocol::{default_socket_dir, SocketConnector, DEFAULT_SERVICE_NAME};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::DeploymentClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint name the deployment service listens under
    pub service_name: String,
    /// Directory holding service endpoint sockets
    pub socket_dir: PathBuf,
    /// How long to wait for the service channel to open
    pub connect_timeout: Duration,
    /// Capacity of the progress channel between transport and caller
    pub progress_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            socket_dir: default_socket_dir(),
            connect_timeout: Duration::from_secs(10),
            progress_buffer: 32,
        }
    }
}

impl ClientConfig {
    /// Create a config targeting `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Set the socket directory
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the progress channel capacity
    pub fn progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity.max(1);
        self
    }

    /// Socket connector for the configured directory and timeout.
    pub fn socket_connector(&self) -> SocketConnector {
        SocketConnector::new(self.socket_dir.clone(), self.connect_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.service_name, "autoupdate.deployment");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.progress_buffer > 0);
    }

    #[test]
    fn test_config_setters() {
        let config = ClientConfig::new("custom.updater")
            .socket_dir("/run/custom")
            .progress_buffer(0);
        assert_eq!(config.service_name, "custom.updater");
        assert_eq!(config.socket_dir, PathBuf::from("/run/custom"));
        assert_eq!(config.progress_buffer, 1);
    }
}
