use std::{io, sync::Arc};

use thiserror::Error;

/// Failure of the bus below the SCPI layer: sockets, the VISA library or its sessions.
#[derive(Error, Clone, Debug)]
pub enum TransportError {
    #[error("IO Error: {0:?}")]
    Io(Arc<io::Error>),
    #[error("Other Error: {0}")]
    Other(Arc<anyhow::Error>),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(Arc::new(err))
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(x: anyhow::Error) -> Self {
        TransportError::Other(Arc::new(x))
    }
}

/// The instrument answered, but not in a way we understand.
#[derive(Error, Clone, Debug)]
pub enum ProtocolError {
    #[error("Timeout")]
    Timeout,
    #[error("Unexpected Response: {0}")]
    UnexpectedResponse(String),
    #[error("Invalid binary block header")]
    InvalidBinaryHeader,
    #[error("Other Error: {0}")]
    Other(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for ProtocolError {
    fn from(x: anyhow::Error) -> Self {
        ProtocolError::Other(Arc::new(x))
    }
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Transport Error {0}")]
    Transport(TransportError),
    #[error("Protocol Error {0}")]
    Protocol(ProtocolError),
    #[error("Argument Error {0}")]
    Argument(Arc<anyhow::Error>),
    #[error("Internal Error {0}")]
    Internal(Arc<anyhow::Error>),
    #[error("Instrument is not connected")]
    NotConnected,
}

impl Error {
    pub fn transport<T: Into<TransportError>>(err: T) -> Self {
        Self::Transport(err.into())
    }

    pub fn protocol<T: Into<ProtocolError>>(err: T) -> Self {
        Self::Protocol(err.into())
    }

    pub fn protocol_timeout() -> Self {
        Error::Protocol(ProtocolError::Timeout)
    }

    pub fn unexpected_response<T: Into<String>>(reply: T) -> Self {
        Error::Protocol(ProtocolError::UnexpectedResponse(reply.into()))
    }

    pub fn invalid_binary_header() -> Self {
        Error::Protocol(ProtocolError::InvalidBinaryHeader)
    }

    pub fn internal<T: Into<anyhow::Error>>(err: T) -> Self {
        Self::Internal(Arc::new(err.into()))
    }

    pub fn argument<T: Into<anyhow::Error>>(err: T) -> Self {
        Self::Argument(Arc::new(err.into()))
    }

    /// True if the bus gave up waiting for the instrument.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Protocol(ProtocolError::Timeout) => true,
            Error::Transport(TransportError::Io(err)) => err.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(x: io::Error) -> Self {
        Error::Transport(TransportError::Io(Arc::new(x)))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_recognized() {
        assert!(Error::protocol_timeout().is_timeout());
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "late").into();
        assert!(err.is_timeout());
        assert!(!Error::NotConnected.is_timeout());
        assert!(!Error::unexpected_response("foo").is_timeout());
    }
}
