//! Remote command server: one request line per TCP connection.
//!
//! The request is a shell-quoted argument list. The response is the run's
//! output, streamed as it is produced; the server closes its write side when
//! the run is over.

use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::io::output::{SharedSink, Sink, SocketSink};

/// Executes one remote request.
pub trait RequestHandler: Send + Sync + 'static {
    /// Run `args`, writing all output to `sink`. Errors the client should
    /// see are written to `sink`; nothing else is.
    fn handle(&self, args: Vec<String>, sink: SharedSink);
}

/// Running accept loop.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections. Requests already accepted finish on
    /// their own threads.
    pub fn stop(mut self) {
        self.shutdown_accept_loop();
    }

    fn shutdown_accept_loop(&mut self) {
        let Some(accept) = self.accept.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocking accept.
        if let Err(err) = TcpStream::connect(self.addr) {
            debug!(error = %err, "wake connection failed");
        }
        if accept.join().is_err() {
            error!("server accept thread panicked");
        }
        debug!(addr = %self.addr, "server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown_accept_loop();
    }
}

/// Listen on `127.0.0.1:port` (0 picks a free port) and serve requests on
/// a thread per connection.
pub fn serve(port: u16, handler: Arc<dyn RequestHandler>) -> Result<ServerHandle> {
    let listener =
        TcpListener::bind(("127.0.0.1", port)).with_context(|| format!("bind port {port}"))?;
    let addr = listener.local_addr().context("server address")?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let stop = Arc::clone(&shutdown);
    let accept = thread::Builder::new()
        .name("warmspec-server".to_string())
        .spawn(move || accept_loop(&listener, &stop, &handler))
        .context("spawn server thread")?;

    Ok(ServerHandle {
        addr,
        shutdown,
        accept: Some(accept),
    })
}

fn accept_loop(listener: &TcpListener, shutdown: &AtomicBool, handler: &Arc<dyn RequestHandler>) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let handler = Arc::clone(handler);
                let spawned = thread::Builder::new()
                    .name("warmspec-connection".to_string())
                    .spawn(move || handle_connection(stream, handler.as_ref()));
                if let Err(err) = spawned {
                    error!(error = %err, "could not spawn connection thread");
                }
            }
            Err(err) => warn!(error = %err, "accept failed"),
        }
    }
}

fn handle_connection(stream: TcpStream, handler: &dyn RequestHandler) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let line = match read_request(&stream) {
        Ok(Some(line)) => line,
        Ok(None) => {
            debug!(%peer, "connection closed without a request");
            return;
        }
        Err(err) => {
            warn!(%peer, error = %format!("{err:#}"), "could not read request");
            return;
        }
    };

    let sink = Arc::new(SocketSink::new(stream));
    match shlex::split(&line) {
        Some(args) => {
            debug!(%peer, ?args, "remote request");
            let out: SharedSink = sink.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(args, out)));
            if outcome.is_err() {
                error!(%peer, "remote request handler panicked");
            }
        }
        None => sink.writeln("unbalanced quotes in request"),
    }
    sink.finish();
}

fn read_request(stream: &TcpStream) -> Result<Option<String>> {
    let reader = stream.try_clone().context("clone connection")?;
    let mut line = String::new();
    let read = BufReader::new(reader)
        .read_line(&mut line)
        .context("read request line")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
