use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds a D-Bus client operation can fail with.
///
/// Transport and protocol errors are terminal for the connection they
/// occurred on; dispatch errors are only ever surfaced to the remote peer
/// as an `Error` message and never close the connection; everything else
/// surfaces directly to the call site that triggered it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The socket could not be read from or written to, or was closed by
    /// the peer.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// A framed message violated the wire protocol (bad endianness tag,
    /// unknown message type, oversized frame, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A signature string failed to parse or validate.
    #[error("invalid signature: {0}")]
    Signature(String),

    /// A value did not match its declared signature, or a string/path/
    /// signature failed its content validation, while marshaling or
    /// unmarshaling.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// A name (bus, interface, member, error) failed validation.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Raised as a D-Bus `Error` reply to the caller; never closes the
    /// connection it occurred on.
    #[error("{name}: {message}")]
    Dispatch { name: String, message: String },

    /// A `PendingCall` was not resolved before its deadline elapsed.
    #[error("method call timed out")]
    Timeout,

    /// A `PendingCall` was cancelled by its owner before it resolved.
    #[error("method call was cancelled")]
    Cancelled,

    /// The connection is not in a state that allows this operation (e.g.
    /// sending on a `CLOSED` connection).
    #[error("connection is {0:?}")]
    NotReady(crate::connection::State),

    /// The bus address string could not be parsed or resolved.
    #[error("invalid bus address: {0}")]
    Address(String),

    /// The SASL handshake with the bus daemon failed.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Transport(err)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Error {
        Error::Marshal(format!("invalid UTF-8: {}", err))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Error {
        Error::Marshal(format!("invalid UTF-8: {}", err))
    }
}
