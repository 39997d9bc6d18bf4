//! Echo Common Library
//!
//! Shared pieces of the TLS-secured gRPC echo service, used by both the
//! server and the client:
//!
//! - The `echo.EchoService` schema and its generated bindings
//! - Certificate loading and rustls configuration for both ends
//! - Default addresses, file locations and the call deadline
//! - A typed error separating configuration, transport and call failures
//!
//! Only the server authenticates itself; clients are not asked for a
//! certificate.

/// Default paths, addresses and limits
pub mod config;

/// Error type shared by the server and client libraries
pub mod error;

/// Generated protobuf and gRPC types
pub mod proto;

/// gRPC server reflection for `echo.EchoService`
#[cfg(feature = "reflection")]
pub mod reflection;

/// Certificate loading and TLS configuration
pub mod tls;

// Re-export commonly used types for convenience
pub use config::{
    ClientCertPath, ServerCertPath, CALL_DEADLINE, DEFAULT_ECHO_TEXT, DEFAULT_LISTEN_ADDR,
    DEFAULT_SERVER_ADDR,
};
pub use error::{EchoError, ErrorKind};
pub use proto::EchoMessage;
