//! Echo Client Library
//!
//! Calls `echo.EchoService/Echo` over a TLS connection whose server
//! certificate is validated against a caller-supplied root bundle. The
//! client presents no certificate of its own.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use echo_client::{ClientConfig, EchoClient};
//!
//! # async fn run() -> Result<(), echo_common::EchoError> {
//! let config = ClientConfig::new()
//!     .with_server_addr("frontend.local:4443")
//!     .with_timeout(Duration::from_secs(10));
//!
//! let mut client = EchoClient::new(config)?;
//! client.connect().await?;
//!
//! let reply = client.echo("hello world").await?;
//! println!("Server replied: {reply}");
//!
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::*;
// Re-export important types from echo-common for convenience
pub use echo_common::{ClientCertPath, EchoError, EchoMessage, ErrorKind};
