use std::fmt;
use std::io;

/// Non-fatal error conditions. Protocol violations (batch overflow, unknown
/// inbox type, field-type mismatch) are not represented here - they are
/// fatal and surface as a panic at the point of violation, per the taxonomy
/// in the design notes.
#[derive(Debug)]
pub enum Error {
    /// No server is currently registered under the requested label.
    TransportMissing(String),
    /// A send/recv on a remote connection failed; the caller should log
    /// and continue rather than treat this as fatal.
    TransportTransient(io::Error),
    /// A JSON payload on ingress failed to parse or decode.
    Malformed(String),
    /// A blocking primitive observed the shutdown flag before completing.
    ShutdownInProgress,
    /// A reply frame's signature did not match the live receiver session.
    StaleSignature,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::TransportMissing(label) => write!(f, "no server registered for label: {}", label),
            Error::TransportTransient(e) => write!(f, "transient transport error: {}", e),
            Error::Malformed(msg) => write!(f, "malformed payload: {}", msg),
            Error::ShutdownInProgress => write!(f, "shutdown in progress"),
            Error::StaleSignature => write!(f, "stale reply signature"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::TransportTransient(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Malformed(e.to_string())
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
