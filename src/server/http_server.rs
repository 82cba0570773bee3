use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{read_body, HttpAdapter};
use crate::dispatcher::DispatcherPool;

/// Blocking HTTP listener in front of a [`DispatcherPool`].
///
/// Every worker thread pulls requests off one shared `tiny_http` server and
/// runs them through an [`HttpAdapter`]. Whether dispatches actually overlap
/// is still decided by the pool's `allow_concurrency` flag.
#[derive(Debug, Clone)]
pub struct HttpServer {
    pool: Arc<DispatcherPool>,
    workers: usize,
}

/// Handle to a running HTTP server
///
/// Provides methods for waiting until the server is ready, stopping it gracefully,
/// or joining the worker threads.
pub struct ServerHandle {
    addr: SocketAddr,
    server: Arc<tiny_http::Server>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// Polls the server address by attempting TCP connections until successful.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` error if the server doesn't become ready within ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting requests and wait for every worker to finish its current one.
    pub fn stop(self) {
        for _ in &self.workers {
            self.server.unblock();
        }
        for worker in self.workers {
            if worker.join().is_err() {
                warn!("HTTP worker thread panicked during shutdown");
            }
        }
        info!(addr = %self.addr, "HTTP server stopped");
    }

    /// Block until every worker thread exits.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread panicked.
    pub fn join(self) -> thread::Result<()> {
        for worker in self.workers {
            worker.join()?;
        }
        Ok(())
    }
}

impl HttpServer {
    pub fn new(pool: Arc<DispatcherPool>) -> Self {
        Self { pool, workers: 1 }
    }

    /// Number of worker threads; at least one.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Start the HTTP server on the given address
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let server = tiny_http::Server::http(addr).map_err(io::Error::other)?;
        let addr = server.server_addr().to_ip().unwrap_or(addr);
        let server = Arc::new(server);

        let adapter = HttpAdapter::new(self.pool);
        let mut workers = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let server = Arc::clone(&server);
            let adapter = adapter.clone();
            let worker = thread::Builder::new()
                .name(format!("railyard-http-{index}"))
                .spawn(move || serve_requests(&server, &adapter))?;
            workers.push(worker);
        }
        info!(addr = %addr, workers = self.workers, "HTTP server listening");
        Ok(ServerHandle {
            addr,
            server,
            workers,
        })
    }
}

fn serve_requests(server: &tiny_http::Server, adapter: &HttpAdapter) {
    for mut incoming in server.incoming_requests() {
        let response = match to_http_request(&mut incoming) {
            Ok(req) => adapter.call(req),
            Err(reason) => adapter.reject_malformed(&reason),
        };
        if let Err(e) = incoming.respond(to_tiny_response(response)) {
            warn!(error = %e, "Failed to write HTTP response");
        }
    }
    debug!("HTTP worker exiting");
}

fn to_http_request(incoming: &mut tiny_http::Request) -> Result<http::Request<Vec<u8>>, String> {
    let expected = incoming.body_length();
    let body = read_body(incoming.as_reader(), expected).map_err(|e| e.to_string())?;

    let method = incoming.method().to_string();
    let mut builder = http::Request::builder()
        .method(method.as_str())
        .uri(incoming.url());
    for header in incoming.headers() {
        builder = builder.header(header.field.as_str().as_str(), header.value.as_str());
    }
    builder.body(body).map_err(|e| e.to_string())
}

fn to_tiny_response(response: http::Response<Vec<u8>>) -> tiny_http::Response<io::Cursor<Vec<u8>>> {
    let (parts, body) = response.into_parts();
    let mut out = tiny_http::Response::from_data(body).with_status_code(parts.status.as_u16());
    for (name, value) in &parts.headers {
        // tiny_http derives Content-Length from the body it is given.
        if *name == http::header::CONTENT_LENGTH {
            continue;
        }
        match tiny_http::Header::from_bytes(name.as_str().as_bytes(), value.as_bytes()) {
            Ok(header) => out.add_header(header),
            Err(()) => warn!(header = %name, "Dropping response header tiny_http refused"),
        }
    }
    out
}
