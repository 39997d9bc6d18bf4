//! Protobuf types and gRPC bindings for `proto/echo.proto`.

#[allow(clippy::all)]
mod echo {
    include!("prost/echo.rs");
}

pub use echo::{
    echo_service_client::EchoServiceClient,
    echo_service_server::{EchoService, EchoServiceServer, SERVICE_NAME},
    EchoMessage,
};

/// Protobuf package of the echo schema
pub const PACKAGE: &str = "echo";

impl EchoMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl From<&str> for EchoMessage {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for EchoMessage {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}
