use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
};
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tonic::transport::server::{Connected, TcpConnectInfo};

/// Handshakes that take longer than this are abandoned
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes waiting to be picked up by the gRPC server
const PENDING_CONNECTIONS: usize = 64;

/// Counts the TLS connections currently open on the server side.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of established connections that have not been closed yet
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn track(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            open: Arc::clone(&self.open),
        }
    }
}

#[derive(Debug)]
struct ConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// A server-side TLS connection handed to the gRPC server.
///
/// The connection is counted by its [`ConnectionTracker`] until dropped.
/// Once the server shuts down, reads report end of stream and writes fail,
/// which closes the connection even if the peer never sends a byte.
pub struct TlsConnection {
    stream:   TlsStream<TcpStream>,
    shutdown: Pin<Box<dyn Future<Output = ()> + Send>>,
    closed:   bool,
    _guard:   ConnectionGuard,
}

impl TlsConnection {
    /// ALPN protocol agreed during the handshake
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.stream.get_ref().1.alpn_protocol()
    }

    fn poll_closed(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.closed {
            self.closed = self.shutdown.as_mut().poll(cx).is_ready();
        }
        self.closed
    }
}

fn shutting_down() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "server is shutting down")
}

impl Connected for TlsConnection {
    type ConnectInfo = TcpConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.stream.get_ref().0.connect_info()
    }
}

impl AsyncRead for TlsConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.poll_closed(cx) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.poll_closed(cx) {
            return Poll::Ready(Err(shutting_down()));
        }
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        if self.poll_closed(cx) {
            return Poll::Ready(Err(shutting_down()));
        }
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Turns a bound listener into a stream of established TLS connections.
///
/// Every accepted socket is handshaken in its own task, so a slow or hostile
/// peer never holds up the accept loop. Failed handshakes are logged and
/// dropped.
///
/// Sending `true` on `shutdown` (or dropping its sender) closes the listener
/// right away and closes every connection this stream has produced. Dropping
/// the stream only stops the accept loop and closes the listener.
pub fn tls_incoming(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    tracker: ConnectionTracker,
    shutdown: watch::Receiver<bool>,
) -> BoxStream<'static, io::Result<TlsConnection>> {
    let (tx, rx) = mpsc::channel(PENDING_CONNECTIONS);
    tokio::spawn(accept_loop(listener, acceptor, tracker, shutdown, tx));

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|conn| (conn, rx)) }).boxed()
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    tracker: ConnectionTracker,
    shutdown: watch::Receiver<bool>,
    tx: mpsc::Sender<io::Result<TlsConnection>>,
) {
    let server_stopped = stopped(shutdown.clone());
    tokio::pin!(server_stopped);

    loop {
        let (tcp, peer) = tokio::select! {
            _ = tx.closed() => break,
            () = &mut server_stopped => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Connection error: {e}");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            },
        };

        tracing::debug!("New connection received from {peer}");
        let acceptor = acceptor.clone();
        let tracker = tracker.clone();
        let tx = tx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(tcp));
            let handshake = tokio::select! {
                () = stopped(shutdown.clone()) => return,
                handshake = handshake => handshake,
            };
            match handshake {
                Ok(Ok(stream)) => {
                    tracing::debug!("✓ TLS connection established with {peer}");
                    let conn = TlsConnection {
                        stream,
                        shutdown: Box::pin(stopped(shutdown)),
                        closed: false,
                        _guard: tracker.track(),
                    };
                    // The server is shutting down if nobody is receiving
                    let _ = tx.send(Ok(conn)).await;
                }
                Ok(Err(e)) => tracing::warn!("TLS handshake with {peer} failed: {e}"),
                Err(_) => tracing::warn!("TLS handshake with {peer} timed out"),
            }
        });
    }

    tracing::debug!("Accept loop stopped, releasing listener");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use echo_common::{ClientCertPath, ServerCertPath};
    use futures_util::StreamExt;
    use rustls::pki_types::ServerName;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::{client, TlsConnector};

    use super::*;

    fn testdata(name: &str) -> String {
        format!("{}/../certs/testdata/{name}", env!("CARGO_MANIFEST_DIR"))
    }

    fn acceptor() -> TlsAcceptor {
        let paths = ServerCertPath::from_files(testdata("backend.cert"), testdata("backend.key"));
        TlsAcceptor::from(Arc::new(echo_common::tls::server_config(&paths).unwrap()))
    }

    /// Completes a TLS handshake with `addr` and then stays silent.
    async fn silent_peer(addr: SocketAddr) -> client::TlsStream<TcpStream> {
        let roots = ClientCertPath::from_file(testdata("frontend.cert"));
        let connector = TlsConnector::from(Arc::new(echo_common::tls::client_config(&roots).unwrap()));
        let tcp = TcpStream::connect(addr).await.unwrap();
        connector
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap()
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
    fn tracker_counts_live_guards() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.open_connections(), 0);

        let first = tracker.track();
        let second = tracker.clone().track();
        assert_eq!(tracker.open_connections(), 2);

        drop(first);
        assert_eq!(tracker.open_connections(), 1);
        drop(second);
        assert_eq!(tracker.open_connections(), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (_stop_tx, stop_rx) = watch::channel(false);
        let incoming = tls_incoming(listener, acceptor(), ConnectionTracker::new(), stop_rx);
        drop(incoming);

        assert!(released(addr).await, "listener on {addr} was never released");
    }

    #[tokio::test]
    async fn handshake_negotiates_h2() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tracker = ConnectionTracker::new();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let mut incoming = tls_incoming(listener, acceptor(), tracker.clone(), stop_rx);

        let peer = silent_peer(addr).await;
        let conn = incoming.next().await.unwrap().unwrap();
        assert_eq!(conn.alpn_protocol(), Some(&b"h2"[..]));
        assert_eq!(peer.get_ref().1.alpn_protocol(), Some(&b"h2"[..]));
        assert_eq!(conn.connect_info().remote_addr(), Some(peer.get_ref().0.local_addr().unwrap()));
        assert_eq!(tracker.open_connections(), 1);

        drop(conn);
        assert_eq!(tracker.open_connections(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_listener_and_idle_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tracker = ConnectionTracker::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut incoming = tls_incoming(listener, acceptor(), tracker.clone(), stop_rx);

        let _peer = silent_peer(addr).await;
        let mut conn = incoming.next().await.unwrap().unwrap();

        stop_tx.send(true).unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), conn.read(&mut buf))
            .await
            .expect("idle connection stayed open after shutdown")
            .unwrap();
        assert_eq!(read, 0);
        assert!(conn.write_all(b"late").await.is_err());

        drop(conn);
        assert_eq!(tracker.open_connections(), 0);
        assert!(released(addr).await, "listener on {addr} outlived shutdown");

        // The stream is still held, but nothing new is accepted
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
