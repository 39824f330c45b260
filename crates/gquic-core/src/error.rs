use thiserror::Error;

/// Protocol-level handshake errors with their stable wire text.
///
/// The rendered form is the error code name, followed by `: detail` when a
/// detail string is attached. Peers and interop tests match on this text, so
/// the strings here must not change.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QuicError {
    /// The handshake stream produced something that could not be parsed.
    #[error("HandshakeFailed")]
    HandshakeFailed,
    /// A message other than a CHLO arrived on the handshake stream.
    #[error("InvalidCryptoMessageType")]
    InvalidCryptoMessageType,
    /// A required tag is absent.
    #[error("CryptoMessageParameterNotFound: {0}")]
    CryptoMessageParameterNotFound(&'static str),
    /// A tag is present but its value is malformed.
    #[error("InvalidCryptoMessageParameter: {0}")]
    InvalidCryptoMessageParameter(&'static str),
    /// A value has an invalid length.
    #[error("CryptoInvalidValueLength: {0}")]
    CryptoInvalidValueLength(&'static str),
    /// The client's algorithm selection cannot be satisfied.
    #[error("CryptoNoSupport: {0}")]
    CryptoNoSupport(&'static str),
    /// The client hello names a supported version other than the one this
    /// connection negotiated.
    #[error("VersionNegotiationMismatch: {0}")]
    VersionNegotiationMismatch(&'static str),
}

/// Rejection for CHLOs taking part in Chrome's head-of-line-blocking
/// experiment, which this implementation does not speak.
pub const HOL_EXPERIMENT: QuicError =
    QuicError::InvalidCryptoMessageParameter("HOL experiment. Unsupported");
