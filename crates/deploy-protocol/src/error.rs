/// Convenient result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding, decoding, or carrying protocol messages.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    /// A field the message kind requires is absent or empty.
    #[error("message is missing required field `{0}`")]
    MissingField(&'static str),
    /// A field is present but carries an unusable value.
    #[error("message field `{field}` is invalid: {reason}")]
    InvalidField {
        /// Wire name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// The verb discriminant names no known operation.
    #[error("unknown verb `{0}`")]
    UnknownVerb(String),
    /// A socket frame could not be encoded or decoded.
    #[error("envelope codec failed: {0}")]
    Codec(#[from] serde_json::Error),
    /// Failed to perform socket I/O.
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Helper for wrapping field validation failures.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
