use deploy_protocol::ProtocolError;

/// Convenient result alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors raised while handling a deployment request or starting the service.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    /// No configured volume supports installs with full trust.
    #[error("Could not find a volume to install the package on.")]
    VolumeUnavailable,
    /// The installer reported an error text.
    #[error("{0}")]
    InstallerFailed(String),
    /// The request message could not be decoded.
    #[error("invalid request: {0}")]
    Protocol(#[from] ProtocolError),
    /// A request handler panicked.
    #[error("request handler panicked: {0}")]
    Panicked(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
