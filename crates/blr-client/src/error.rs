#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// `connect` was called without a usable key.
    #[error("a non-empty key is required to connect")]
    MissingKey,

    /// A frame that is not a recognised push payload. Logged and dropped.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The transport went away without the application asking for it.
    #[error("unclean disconnect: {0}")]
    UncleanDisconnect(String),

    /// The stream URL could not be built.
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
}
