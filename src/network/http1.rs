// HTTP/1.1 over TCP implementation using Hyper
// Accept loop with graceful connection draining

use super::handler::Handler;
use crate::config::{GracefulConfig, ServerConfig};
use crate::observability;
use crate::server::{Drain, DrainError};
use anyhow::Result;
use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

/// A running HTTP/1.1 server that can be drained
pub struct HttpServer {
    local_addr: SocketAddr,
    active: Arc<AtomicUsize>,
    accepted: Arc<AtomicU64>,
    running: Mutex<Option<Running>>,
}

struct Running {
    /// Carries the caller's drain deadline to the accept loop
    stop: oneshot::Sender<Option<Duration>>,
    task: JoinHandle<Result<(), DrainError>>,
}

impl HttpServer {
    /// Bind and start accepting connections in the background
    pub async fn serve<H: Handler>(config: &GracefulConfig, handler: Arc<H>) -> Result<Self> {
        let addr = config.server.socket_addr()?;
        let socket = create_socket(&addr, &config.server)?;

        let std_listener: std::net::TcpListener = socket.into();
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        let active = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicU64::new(0));
        let (stop, stop_rx) = oneshot::channel();

        let accept = AcceptLoop {
            listener,
            handler,
            active: active.clone(),
            accepted: accepted.clone(),
            nodelay: config.server.tcp_nodelay,
            default_deadline: config.shutdown.drain_timeout(),
        };
        let task = tokio::spawn(accept.run(stop_rx));

        info!(addr = %local_addr, "HTTP/1.1 server listening");

        Ok(Self {
            local_addr,
            active,
            accepted,
            running: Mutex::new(Some(Running { stop, task })),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently open, including idle keep-alive ones
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Connections accepted since the server started
    pub fn accepted_connections(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Drain for HttpServer {
    /// Stop accepting, then wait for open connections to finish their requests.
    /// Without an explicit deadline the configured drain timeout applies.
    async fn drain(&self, deadline: Option<Duration>) -> Result<(), DrainError> {
        let Running { stop, task } = self
            .running
            .lock()
            .take()
            .ok_or(DrainError::AlreadyDrained)?;

        // The accept loop may already be gone (it died); the join below reports why
        let _ = stop.send(deadline);
        task.await?
    }
}

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct AcceptLoop<H> {
    listener: TcpListener,
    handler: Arc<H>,
    active: Arc<AtomicUsize>,
    accepted: Arc<AtomicU64>,
    nodelay: bool,
    default_deadline: Option<Duration>,
}

impl<H: Handler> AcceptLoop<H> {
    async fn run(self, mut stop: oneshot::Receiver<Option<Duration>>) -> Result<(), DrainError> {
        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();

        // A dropped HttpServer counts as a drain request with no explicit deadline
        let deadline = loop {
            tokio::select! {
                // Stop wins over a ready accept so nothing is admitted after drain
                biased;

                requested = &mut stop => break requested.ok().flatten().or(self.default_deadline),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        self.spawn_connection(stream, peer_addr, &graceful, &mut connections);
                    }
                    Err(e) => accept_failed(e).await,
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        let AcceptLoop { listener, active, .. } = self;
        drop(listener);
        info!(
            open_connections = active.load(Ordering::SeqCst),
            ?deadline,
            "Stopped accepting connections - waiting for in-flight requests"
        );

        let result = match deadline {
            None => {
                graceful.shutdown().await;
                Ok(())
            }
            Some(deadline) => match tokio::time::timeout(deadline, graceful.shutdown()).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    let open_connections = active.load(Ordering::SeqCst);
                    warn!(open_connections, "Drain deadline exceeded - force-closing connections");
                    connections.abort_all();
                    Err(DrainError::DeadlineExceeded {
                        deadline,
                        open_connections,
                    })
                }
            },
        };

        while connections.join_next().await.is_some() {}
        debug!("All HTTP/1.1 connections closed");
        result
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        graceful: &GracefulShutdown,
        connections: &mut JoinSet<()>,
    ) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = stream.set_nodelay(self.nodelay) {
            debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let handler = self.handler.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            let span = observability::request_span(req.method().as_str(), req.uri().path());
            async move { Ok::<_, Infallible>(handler.handle(req).await) }.instrument(span)
        });

        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        let watched = graceful.watch(conn);
        let open = OpenConnection::new(self.active.clone());

        debug!(peer = %peer_addr, "New HTTP/1.1 connection");
        connections.spawn(async move {
            let _open = open;
            if let Err(e) = watched.await {
                debug!(peer = %peer_addr, error = %e, "HTTP/1.1 connection error");
            }
        });
    }
}

/// EMFILE and friends persist, so back off instead of spinning on accept
async fn accept_failed(e: std::io::Error) {
    error!("Failed to accept HTTP/1.1 connection: {}", e);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Keeps the open-connection gauge honest even when a task is aborted
struct OpenConnection(Arc<AtomicUsize>);

impl OpenConnection {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Create a listening TCP socket with the configured options
pub(crate) fn create_socket(addr: &SocketAddr, config: &ServerConfig) -> Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Allow quick restarts while old connections sit in TIME_WAIT
    socket.set_reuse_address(true)?;
    socket.set_nodelay(config.tcp_nodelay)?;
    socket.set_keepalive(true)?;

    socket.bind(&(*addr).into())?;
    socket.listen(config.backlog)?;

    debug!(
        addr = %addr,
        backlog = config.backlog,
        nodelay = config.tcp_nodelay,
        "TCP socket created"
    );

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handler::{text_response, HealthHandler};
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::{Response, StatusCode};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Notify;
    use tokio_test::{assert_err, assert_ok};

    /// Sleeps before answering and announces when a request has arrived
    struct SlowHandler {
        delay: Duration,
        arrived: Arc<Notify>,
    }

    #[async_trait]
    impl Handler for SlowHandler {
        async fn handle(&self, _req: Request<Incoming>) -> Response<Full<Bytes>> {
            self.arrived.notify_one();
            tokio::time::sleep(self.delay).await;
            text_response(StatusCode::OK, "done\n")
        }
    }

    fn local_config(drain_timeout_ms: Option<u64>) -> GracefulConfig {
        let mut config = GracefulConfig::default();
        config.server.bind_addr = "127.0.0.1".to_string();
        config.server.port = 0;
        config.shutdown.drain_timeout_ms = drain_timeout_ms;
        config
    }

    async fn send_get(addr: SocketAddr, path: &str) -> std::io::Result<TcpStream> {
        let mut stream = TcpStream::connect(addr).await?;
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await?;
        Ok(stream)
    }

    async fn read_response(mut stream: TcpStream) -> String {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = HttpServer::serve(&local_config(None), Arc::new(HealthHandler::new()))
            .await
            .unwrap();

        let stream = send_get(server.local_addr(), "/health").await.unwrap();
        let response = read_response(stream).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains(r#""status":"healthy""#));

        let stream = send_get(server.local_addr(), "/missing").await.unwrap();
        assert!(read_response(stream).await.starts_with("HTTP/1.1 404 Not Found"));

        assert_ok!(server.drain(None).await);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_request() {
        let arrived = Arc::new(Notify::new());
        let handler = Arc::new(SlowHandler {
            delay: Duration::from_millis(150),
            arrived: arrived.clone(),
        });
        let server = HttpServer::serve(&local_config(None), handler).await.unwrap();
        let addr = server.local_addr();

        let stream = send_get(addr, "/slow").await.unwrap();
        let reader = tokio::spawn(read_response(stream));
        arrived.notified().await;
        assert_eq!(server.active_connections(), 1);

        let started = Instant::now();
        assert_ok!(server.drain(None).await);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(server.active_connections(), 0);

        let response = reader.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("done\n"));

        // Listener is gone once drain has returned
        assert_err!(TcpStream::connect(addr).await);
    }

    #[tokio::test]
    async fn test_drain_deadline_force_closes() {
        let arrived = Arc::new(Notify::new());
        let handler = Arc::new(SlowHandler {
            delay: Duration::from_secs(30),
            arrived: arrived.clone(),
        });
        let server = HttpServer::serve(&local_config(None), handler).await.unwrap();

        let _stream = send_get(server.local_addr(), "/stuck").await.unwrap();
        arrived.notified().await;

        let started = Instant::now();
        let err = server.drain(Some(Duration::from_millis(50))).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            err,
            DrainError::DeadlineExceeded { open_connections: 1, .. }
        ));
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_configured_drain_timeout_applies() {
        let arrived = Arc::new(Notify::new());
        let handler = Arc::new(SlowHandler {
            delay: Duration::from_secs(30),
            arrived: arrived.clone(),
        });
        let server = HttpServer::serve(&local_config(Some(50)), handler).await.unwrap();

        let _stream = send_get(server.local_addr(), "/stuck").await.unwrap();
        arrived.notified().await;

        let err = server.drain(None).await.unwrap_err();
        assert!(matches!(
            err,
            DrainError::DeadlineExceeded { deadline, .. } if deadline == Duration::from_millis(50)
        ));
    }

    #[tokio::test]
    async fn test_second_drain_is_rejected() {
        let server = HttpServer::serve(&local_config(None), Arc::new(HealthHandler::new()))
            .await
            .unwrap();

        assert_ok!(server.drain(None).await);
        assert!(matches!(
            server.drain(None).await,
            Err(DrainError::AlreadyDrained)
        ));
    }

    #[tokio::test]
    async fn test_no_accept_after_drain_requested() {
        for _ in 0..20 {
            let server = HttpServer::serve(&local_config(None), Arc::new(HealthHandler::new()))
                .await
                .unwrap();

            // The accept loop has not run yet on this single-threaded runtime, so the
            // queued connection and the stop request are ready at the same time
            let _client = std::net::TcpStream::connect(server.local_addr()).unwrap();

            assert_ok!(server.drain(None).await);
            assert_eq!(server.accepted_connections(), 0);
        }
    }

    #[tokio::test]
    async fn test_accept_error_backs_off() {
        let started = Instant::now();
        accept_failed(std::io::Error::from_raw_os_error(24)).await;
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }
}
