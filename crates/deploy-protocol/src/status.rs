use std::fmt;

/// Why a service channel could not be opened.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No endpoint is registered under the requested name.
    #[error("ServiceNotFound")]
    ServiceNotFound,
    /// The endpoint exists but is not accepting connections.
    #[error("ServiceUnavailable")]
    ServiceUnavailable,
    /// The broker that routes connections is gone.
    #[error("BrokerUnavailable")]
    BrokerUnavailable,
    /// The caller may not talk to the endpoint.
    #[error("NotAuthorized")]
    NotAuthorized,
    /// The endpoint did not answer within the connect timeout.
    #[error("TimedOut")]
    TimedOut,
    /// Any other connect failure.
    #[error("Unknown")]
    Unknown,
}

impl ConnectionStatus {
    /// Classify a failed socket connect.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => ConnectionStatus::ServiceNotFound,
            ErrorKind::ConnectionRefused => ConnectionStatus::ServiceUnavailable,
            ErrorKind::PermissionDenied => ConnectionStatus::NotAuthorized,
            ErrorKind::TimedOut => ConnectionStatus::TimedOut,
            _ => ConnectionStatus::Unknown,
        }
    }
}

/// Transport-level status of a request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// A reply arrived; its payload decides the outcome.
    Success,
    /// The channel broke after the request left the caller.
    Failure,
    /// The request could not be handed to the service at all.
    RemoteSystemUnavailable,
    ResourceLimitsExceeded,
    MessageSizeTooLarge,
    Unknown,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseStatus::Success => "Success",
            ResponseStatus::Failure => "Failure",
            ResponseStatus::RemoteSystemUnavailable => "RemoteSystemUnavailable",
            ResponseStatus::ResourceLimitsExceeded => "ResourceLimitsExceeded",
            ResponseStatus::MessageSizeTooLarge => "MessageSizeTooLarge",
            ResponseStatus::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}
