//! Echo Server Library
//!
//! Terminates TLS with a certificate/key pair loaded once at startup and
//! serves `echo.EchoService/Echo`, which returns its input unchanged.
//!
//! Startup is split into three steps so every failure surfaces before the
//! next resource is acquired:
//!
//! ```no_run
//! use echo_common::{ServerCertPath, DEFAULT_LISTEN_ADDR};
//! use echo_server::EchoServer;
//!
//! # async fn run() -> Result<(), echo_common::EchoError> {
//! let server = EchoServer::new(ServerCertPath::new(), DEFAULT_LISTEN_ADDR)?; // identity
//! let bound = server.bind().await?; // listener
//! bound.run().await // serve until Ctrl+C
//! # }
//! ```

use std::{future::Future, net::SocketAddr, sync::Arc};

use echo_common::{
    error::{EchoError, Result},
    proto::{EchoMessage, EchoService, EchoServiceServer},
    tls, ServerCertPath,
};
use rustls::ServerConfig;
use tokio::{net::TcpListener, sync::watch};
use tokio_rustls::TlsAcceptor;
use tonic::{transport::Server, Request, Response, Status};

mod incoming;

pub use incoming::{tls_incoming, ConnectionTracker, TlsConnection};

/// Handler for `echo.EchoService`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[tonic::async_trait]
impl EchoService for EchoHandler {
    async fn echo(
        &self,
        request: Request<EchoMessage>,
    ) -> std::result::Result<Response<EchoMessage>, Status> {
        let peer = request.remote_addr();
        let message = request.into_inner();
        tracing::debug!(?peer, "Echoing {} byte(s)", message.text.len());
        Ok(Response::new(message))
    }
}

/// An echo server whose TLS identity has been loaded but which is not yet
/// listening.
#[derive(Clone)]
pub struct EchoServer {
    tls_config:  Arc<ServerConfig>,
    listen_addr: String,
    reflection:  bool,
}

impl EchoServer {
    /// Loads the server identity.
    ///
    /// # Arguments
    /// * `cert_path` - Server certificate and key paths
    /// * `listen_addr` - Address to bind, e.g. `0.0.0.0:50051`
    ///
    /// Fails with a configuration error if the files are missing or
    /// malformed, or if the key does not match the certificate.
    pub fn new(cert_path: ServerCertPath, listen_addr: impl Into<String>) -> Result<Self> {
        let config = tls::server_config(&cert_path)?;
        Ok(Self {
            tls_config:  Arc::new(config),
            listen_addr: listen_addr.into(),
            reflection:  cfg!(feature = "reflection"),
        })
    }

    /// Enables or disables gRPC server reflection.
    pub fn with_reflection(mut self, enabled: bool) -> Self {
        self.reflection = enabled;
        self
    }

    /// Address this server will bind
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Binds the TCP listener.
    pub async fn bind(self) -> Result<BoundEchoServer> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|source| {
                EchoError::Bind {
                    addr: self.listen_addr.clone(),
                    source,
                }
            })?;
        let local_addr = listener.local_addr().map_err(|source| {
            EchoError::Bind {
                addr: self.listen_addr.clone(),
                source,
            }
        })?;

        tracing::info!("✓ Echo server bound to {local_addr}");

        Ok(BoundEchoServer {
            listener,
            local_addr,
            tls_config: self.tls_config,
            reflection: self.reflection,
            connections: ConnectionTracker::new(),
        })
    }
}

/// An echo server holding its listener, ready to serve.
pub struct BoundEchoServer {
    listener:    TcpListener,
    local_addr:  SocketAddr,
    tls_config:  Arc<ServerConfig>,
    reflection:  bool,
    connections: ConnectionTracker,
}

impl BoundEchoServer {
    /// The address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle reporting how many TLS connections are currently open.
    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Serves until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `signal` resolves, then drops the listener and closes
    /// every open connection, including idle ones. Calls still in flight at
    /// that point may be cut off.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let router = Server::builder().add_service(EchoServiceServer::new(EchoHandler));

        #[cfg(feature = "reflection")]
        let router = if self.reflection {
            tracing::info!("gRPC reflection enabled");
            echo_common::reflection::register(router)?
        } else {
            router
        };

        #[cfg(not(feature = "reflection"))]
        if self.reflection {
            tracing::warn!("Reflection requested but the `reflection` feature is not compiled in");
        }

        tracing::info!(
            "Listening on {}. Press Ctrl+C to stop.",
            self.local_addr
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let acceptor = TlsAcceptor::from(self.tls_config);
        let incoming = tls_incoming(self.listener, acceptor, self.connections, stop_rx);
        let stop = async move {
            signal.await;
            let _ = stop_tx.send(true);
        };
        router.serve_with_incoming_shutdown(incoming, stop).await?;

        tracing::info!("Echo server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Server shutdown signal received, stopping"),
        Err(e) => {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use echo_common::{ClientCertPath, ErrorKind};
    use rustls::pki_types::ServerName;
    use tokio::{net::TcpStream, sync::oneshot};
    use tokio_rustls::TlsConnector;

    use super::*;

    fn testdata(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../certs/testdata")
            .join(name)
    }

    fn cert_path() -> ServerCertPath {
        ServerCertPath::from_files(testdata("backend.cert"), testdata("backend.key"))
    }

    #[tokio::test]
    async fn handler_returns_its_input() {
        for text in ["hello world", "", "naïve café ☕ 日本語"] {
            let response = EchoHandler
                .echo(Request::new(EchoMessage::new(text)))
                .await
                .unwrap();
            assert_eq!(response.into_inner().text, text);
        }
    }

    #[test]
    fn mismatched_key_fails_before_listening() {
        let paths = ServerCertPath::from_files(testdata("backend.cert"), testdata("mismatched.key"));
        let err = EchoServer::new(paths, "127.0.0.1:0").err().unwrap();
        assert!(matches!(err, EchoError::KeyMismatch(_)), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn bind_reports_the_assigned_port() {
        let bound = EchoServer::new(cert_path(), "127.0.0.1:0")
            .unwrap()
            .bind()
            .await
            .unwrap();
        assert_ne!(bound.local_addr().port(), 0);
        assert_eq!(bound.connections().open_connections(), 0);
    }

    #[tokio::test]
    async fn port_in_use_is_a_transport_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = EchoServer::new(cert_path(), addr.clone())
            .unwrap()
            .bind()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EchoError::Bind { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains(&addr));
    }

    async fn released(addr: SocketAddr) -> bool {
        for _ in 0..100 {
            if TcpListener::bind(addr).await.is_ok() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn listen_addr_is_kept_until_bind() {
        let server = EchoServer::new(cert_path(), "127.0.0.1:0").unwrap();
        assert_eq!(server.listen_addr(), "127.0.0.1:0");
    }

    #[tokio::test]
    async fn shutdown_signal_stops_serving() {
        let bound = EchoServer::new(cert_path(), "127.0.0.1:0")
            .unwrap()
            .with_reflection(false)
            .bind()
            .await
            .unwrap();
        let addr = bound.local_addr();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(bound.run_until(async {
            let _ = stop_rx.await;
        }));

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();

        assert!(released(addr).await, "listener on {addr} was not released");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_is_not_held_up_by_a_silent_peer() {
        let bound = EchoServer::new(cert_path(), "127.0.0.1:0")
            .unwrap()
            .bind()
            .await
            .unwrap();
        let addr = bound.local_addr();
        let connections = bound.connections();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(bound.run_until(async {
            let _ = stop_rx.await;
        }));

        // Completes the handshake and never sends an HTTP/2 preface
        let roots = ClientCertPath::from_file(testdata("frontend.cert"));
        let connector = TlsConnector::from(Arc::new(tls::client_config(&roots).unwrap()));
        let tcp = TcpStream::connect(addr).await.unwrap();
        let _peer = connector
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap();
        for _ in 0..100 {
            if connections.open_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(connections.open_connections(), 1);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("server waited on an idle connection")
            .unwrap()
            .unwrap();

        for _ in 0..100 {
            if connections.open_connections() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(connections.open_connections(), 0);
        assert!(released(addr).await, "listener on {addr} was not released");
    }
}
