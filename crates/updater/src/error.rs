use deploy_protocol::{ConnectionStatus, ResponseStatus};

/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// A version string that is not a dotted sequence of non-negative integers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed version `{0}`")]
pub struct MalformedVersion(pub String);

/// Errors produced while reading a manifest document.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The document is not well-formed markup.
    #[error("manifest is not well-formed: {0}")]
    Malformed(String),
    /// A required element or attribute is absent or empty.
    #[error("manifest is missing `{0}`")]
    MissingField(&'static str),
    /// The package location is not an absolute URI.
    #[error("manifest package location `{0}` is not an absolute URI")]
    InvalidUri(String),
}

/// Errors that can occur while checking for or requesting a deployment.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdaterError {
    /// The update service channel could not be opened.
    #[error("could not reach update service: {0}")]
    TransportUnavailable(ConnectionStatus),
    /// The manifest download failed or returned a non-success status.
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    /// The manifest could not be parsed or carries an unusable version.
    #[error("invalid manifest")]
    ManifestInvalid(String),
    /// The manifest describes a package other than the installed one.
    #[error("update is for a different package")]
    IdentityMismatch {
        /// Name of the installed package.
        expected: String,
        /// Name found in the manifest.
        found: String,
    },
    /// The descriptor is not newer than what is installed; no request was sent.
    #[error("the package is already up to date")]
    AlreadyUpToDate,
    /// The service or its installer reported an error.
    #[error("{0}")]
    InstallerFailed(String),
    /// The channel returned a status that is neither a reply nor a broken channel.
    #[error("unexpected service status: {0}")]
    UnexpectedServiceStatus(ResponseStatus),
    /// The caller cancelled the request. A reply that still arrives is discarded.
    #[error("the deployment was cancelled")]
    Cancelled,
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl From<ParseError> for UpdaterError {
    fn from(err: ParseError) -> Self {
        UpdaterError::ManifestInvalid(err.to_string())
    }
}

impl From<MalformedVersion> for UpdaterError {
    fn from(err: MalformedVersion) -> Self {
        UpdaterError::ManifestInvalid(err.to_string())
    }
}
