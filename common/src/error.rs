use std::{fmt, io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Broad classification of an [`EchoError`].
///
/// Both binaries treat every kind as fatal; the distinction exists so that a
/// caller embedding the libraries can decide its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing, unreadable or inconsistent certificates, keys or addresses.
    Config,
    /// Listening, dialing or TLS handshake failures.
    Transport,
    /// The RPC itself failed or ran past its deadline.
    Call,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "configuration",
            ErrorKind::Transport => "transport",
            ErrorKind::Call => "call",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EchoError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed PEM data in {path:?}: {source}")]
    Pem {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no valid certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("private key in {0:?} does not match the certificate")]
    KeyMismatch(PathBuf),
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr:   String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr:   String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("not connected to server")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[cfg(feature = "reflection")]
    #[error("reflection service error: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),
    #[error("echo call failed: {0}")]
    Call(#[from] tonic::Status),
    #[error("echo call exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl EchoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EchoError::Io { .. }
            | EchoError::Pem { .. }
            | EchoError::NoCertificates(_)
            | EchoError::NoPrivateKey(_)
            | EchoError::KeyMismatch(_)
            | EchoError::Tls(_)
            | EchoError::InvalidAddress(_) => ErrorKind::Config,
            #[cfg(feature = "reflection")]
            EchoError::Reflection(_) => ErrorKind::Config,
            EchoError::Bind { .. }
            | EchoError::Connect { .. }
            | EchoError::NotConnected
            | EchoError::Transport(_) => ErrorKind::Transport,
            EchoError::Call(_) | EchoError::DeadlineExceeded(_) => ErrorKind::Call,
        }
    }
}

pub type Result<T, E = EchoError> = std::result::Result<T, E>;
