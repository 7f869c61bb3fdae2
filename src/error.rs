use thiserror::Error;

/// Errors that can occur while running the daemon core.
#[derive(Error, Debug)]
pub enum StatError {
    /// A custom error with a free-form message.
    #[error("Custom error: {0}")]
    Custom(String),

    /// An I/O error from the standard library.
    #[error("Std Io error: {0}")]
    StdIo(#[from] std::io::Error),

    /// A connection-fatal protocol violation.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<String> for StatError {
    fn from(value: String) -> Self {
        Self::Custom(value)
    }
}

impl From<&str> for StatError {
    fn from(value: &str) -> Self {
        Self::Custom(value.to_string())
    }
}

/// Malformed input that terminates a connection.
///
/// Incomplete input is not an error (the handler simply waits for more
/// bytes); these variants cover input that can never become valid. The
/// handler logs the offending bytes and the transport closes the connection.
/// Samples accepted before the failure are retained.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// A binary frame did not begin with the magic byte.
    #[error("bad magic byte: {0:#04x}")]
    BadMagic(u8),

    /// A binary frame declared a type code outside the known set.
    #[error("unknown binary metric type: {0:#04x}")]
    UnknownBinaryType(u8),

    /// A length-prefixed string field was not NUL-terminated.
    #[error("missing NUL terminator in {0}")]
    MissingTerminator(&'static str),

    /// A text line lacked a `:` or `|` separator.
    #[error("malformed metric line")]
    MalformedLine,

    /// A text line declared an unknown metric type byte.
    #[error("unknown metric type: {0:#04x}")]
    UnknownTextType(u8),

    /// A metric value failed numeric conversion.
    #[error("invalid metric value")]
    BadValue,

    /// A counter sample rate failed numeric conversion.
    #[error("invalid sample rate")]
    BadSampleRate,
}
