//! Output sinks and routing.
//!
//! Run output is written through a [`Sink`]. Two mechanisms make one pair of
//! console channels behave like independently addressable outputs:
//!
//! - [`SinkSlot`]: scoped substitution. A slot holds the current sink and
//!   [`SinkSlot::substitute`] rebinds it until the returned guard drops,
//!   on every exit path including unwinding.
//! - [`ThreadRouter`]: thread-keyed multiplexing. Each thread may register its
//!   own sink; unregistered threads fall through to the default slot.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// Destination for textual run output.
///
/// Writes are infallible from the caller's point of view: a sink that can no
/// longer deliver text reports [`Sink::is_closed`] and drops further writes.
pub trait Sink: Send + Sync {
    fn print(&self, text: &str);

    fn writeln(&self, text: &str) {
        self.print(&format!("{text}\n"));
    }

    fn flush(&self);

    fn is_closed(&self) -> bool;
}

pub type SharedSink = Arc<dyn Sink>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

/// The process terminal.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    stream: ConsoleStream,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self {
            stream: ConsoleStream::Stdout,
        }
    }

    pub fn stderr() -> Self {
        Self {
            stream: ConsoleStream::Stderr,
        }
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        match self.stream {
            ConsoleStream::Stdout => io::stdout().lock().write_all(bytes),
            ConsoleStream::Stderr => io::stderr().lock().write_all(bytes),
        }
    }
}

impl Sink for ConsoleSink {
    fn print(&self, text: &str) {
        if let Err(err) = self.write(text.as_bytes()) {
            debug!(err = %err, stream = ?self.stream, "console write failed");
        }
    }

    fn flush(&self) {
        let result = match self.stream {
            ConsoleStream::Stdout => io::stdout().lock().flush(),
            ConsoleStream::Stderr => io::stderr().lock().flush(),
        };
        if let Err(err) = result {
            debug!(err = %err, stream = ?self.stream, "console flush failed");
        }
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// In-memory sink, used to hold startup diagnostics and in tests.
#[derive(Debug, Default)]
pub struct BufferSink {
    buf: Mutex<String>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buf.lock().clone()
    }

    /// Return everything written so far and clear the buffer.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buf.lock())
    }
}

impl Sink for BufferSink {
    fn print(&self, text: &str) {
        self.buf.lock().push_str(text);
    }

    fn flush(&self) {}

    fn is_closed(&self) -> bool {
        false
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl Sink for NullSink {
    fn print(&self, _text: &str) {}

    fn flush(&self) {}

    fn is_closed(&self) -> bool {
        false
    }
}

/// Streams text to a remote peer as it is produced.
///
/// Write errors mark the sink closed; later writes are skipped.
#[derive(Debug)]
pub struct SocketSink {
    stream: Mutex<TcpStream>,
    closed: AtomicBool,
}

impl SocketSink {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }

    /// Half-close the write side so the peer sees end-of-response.
    pub fn finish(&self) {
        self.flush();
        let stream = self.stream.lock();
        if let Err(err) = stream.shutdown(Shutdown::Write) {
            debug!(err = %err, "socket shutdown failed");
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    fn mark_closed(&self, err: &io::Error) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(err = %err, "remote peer gone, dropping further output");
        }
    }
}

impl Sink for SocketSink {
    fn print(&self, text: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let result = self.stream.lock().write_all(text.as_bytes());
        if let Err(err) = result {
            self.mark_closed(&err);
        }
    }

    fn flush(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let result = self.stream.lock().flush();
        if let Err(err) = result {
            self.mark_closed(&err);
        }
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        let stream = self.stream.lock();
        if peer_hung_up(&stream) {
            self.closed.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }
}

/// Probe the socket without consuming data. A zero-length peek means the peer
/// closed its write side; requests are one line, so nothing else is expected.
fn peer_hung_up(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut byte = [0u8; 1];
    let hung_up = match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
        Err(_) => true,
    };
    if stream.set_nonblocking(false).is_err() {
        return true;
    }
    hung_up
}

/// A rebindable sink.
pub struct SinkSlot {
    current: RwLock<SharedSink>,
}

impl SinkSlot {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            current: RwLock::new(sink),
        }
    }

    pub fn current(&self) -> SharedSink {
        self.current.read().clone()
    }

    /// Bind `sink` until the returned guard drops, then restore the previous one.
    #[must_use = "the previous sink is restored when the guard drops"]
    pub fn substitute(&self, sink: SharedSink) -> SlotGuard<'_> {
        let previous = std::mem::replace(&mut *self.current.write(), sink);
        SlotGuard {
            slot: self,
            previous: Some(previous),
        }
    }
}

impl Sink for SinkSlot {
    fn print(&self, text: &str) {
        self.current().print(text);
    }

    fn flush(&self) {
        self.current().flush();
    }

    fn is_closed(&self) -> bool {
        self.current().is_closed()
    }
}

pub struct SlotGuard<'a> {
    slot: &'a SinkSlot,
    previous: Option<SharedSink>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.slot.current.write() = previous;
        }
    }
}

/// Routes writes by the calling thread.
pub struct ThreadRouter {
    routes: DashMap<ThreadId, SharedSink>,
    default: SinkSlot,
}

impl ThreadRouter {
    pub fn new(default: SharedSink) -> Self {
        Self {
            routes: DashMap::new(),
            default: SinkSlot::new(default),
        }
    }

    /// Send this thread's output to `sink` until the guard drops.
    #[must_use = "the route is removed when the guard drops"]
    pub fn route(&self, sink: SharedSink) -> RouteGuard<'_> {
        let id = thread::current().id();
        let previous = self.routes.insert(id, sink);
        RouteGuard {
            router: self,
            id,
            previous,
        }
    }

    /// Sink the current thread writes to.
    pub fn current(&self) -> SharedSink {
        let id = thread::current().id();
        match self.routes.get(&id) {
            Some(entry) => entry.value().clone(),
            None => self.default.current(),
        }
    }

    /// Slot for threads without a route (the terminal, normally).
    pub fn default_slot(&self) -> &SinkSlot {
        &self.default
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl Sink for ThreadRouter {
    fn print(&self, text: &str) {
        self.current().print(text);
    }

    fn flush(&self) {
        self.current().flush();
    }

    fn is_closed(&self) -> bool {
        self.current().is_closed()
    }
}

pub struct RouteGuard<'a> {
    router: &'a ThreadRouter,
    id: ThreadId,
    previous: Option<SharedSink>,
}

impl Drop for RouteGuard<'_> {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => {
                self.router.routes.insert(self.id, previous);
            }
            None => {
                self.router.routes.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read};
    use std::net::TcpListener;
    use std::sync::Barrier;

    #[test]
    fn writeln_appends_newline() {
        let sink = BufferSink::new();
        sink.print("a");
        sink.writeln("b");
        assert_eq!(sink.take(), "ab\n");
        assert_eq!(sink.contents(), "");
    }

    #[test]
    fn substitution_restores_on_error_and_panic() {
        let original = Arc::new(BufferSink::new());
        let slot = SinkSlot::new(original.clone());

        let failing = || -> Result<(), String> {
            let _guard = slot.substitute(Arc::new(NullSink));
            slot.writeln("dropped");
            Err("boom".to_string())
        };
        assert!(failing().is_err());
        slot.writeln("after error");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = slot.substitute(Arc::new(NullSink));
            panic!("inside substitution");
        }));
        assert!(result.is_err());
        slot.writeln("after panic");

        assert_eq!(original.contents(), "after error\nafter panic\n");
    }

    #[test]
    fn nested_substitution_unwinds_in_order() {
        let outer = Arc::new(BufferSink::new());
        let inner = Arc::new(BufferSink::new());
        let slot = SinkSlot::new(Arc::new(NullSink));
        {
            let _a = slot.substitute(outer.clone());
            {
                let _b = slot.substitute(inner.clone());
                slot.print("inner");
            }
            slot.print("outer");
        }
        slot.print("nowhere");
        assert_eq!(inner.contents(), "inner");
        assert_eq!(outer.contents(), "outer");
    }

    #[test]
    fn three_threads_write_only_to_their_own_sink() {
        let fallback = Arc::new(BufferSink::new());
        let router = Arc::new(ThreadRouter::new(fallback.clone()));
        let sinks: Vec<Arc<BufferSink>> = (0..3).map(|_| Arc::new(BufferSink::new())).collect();
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = sinks
            .iter()
            .enumerate()
            .map(|(i, sink)| {
                let router = router.clone();
                let sink = sink.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let _route = router.route(sink);
                    barrier.wait();
                    for n in 0..50 {
                        router.writeln(&format!("task{i} line{n}"));
                    }
                    barrier.wait();
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        for (i, sink) in sinks.iter().enumerate() {
            let text = sink.contents();
            assert_eq!(text.lines().count(), 50);
            assert!(text.lines().all(|line| line.starts_with(&format!("task{i} "))));
        }
        assert_eq!(fallback.contents(), "");
        assert_eq!(router.route_count(), 0);
    }

    #[test]
    fn unrouted_thread_uses_default_slot() {
        let fallback = Arc::new(BufferSink::new());
        let router = ThreadRouter::new(fallback.clone());
        let routed = Arc::new(BufferSink::new());
        {
            let _route = router.route(routed.clone());
            router.print("mine");
        }
        router.print("default");
        assert_eq!(routed.contents(), "mine");
        assert_eq!(fallback.contents(), "default");
    }

    #[test]
    fn socket_sink_streams_and_detects_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = TcpStream::connect(addr).expect("connect");
        let (server_side, _) = listener.accept().expect("accept");

        let sink = SocketSink::new(server_side);
        sink.writeln("first");
        let mut reader = BufReader::new(client.try_clone().expect("clone"));
        let mut line = String::new();
        reader.read_line(&mut line).expect("read");
        assert_eq!(line, "first\n");
        assert!(!sink.is_closed());

        client.shutdown(Shutdown::Both).expect("shutdown");
        drop(reader);
        drop(client);
        // The hangup may take a moment to be observable.
        let mut closed = false;
        for _ in 0..50 {
            if sink.is_closed() {
                closed = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(closed);
        sink.writeln("ignored");
    }

    #[test]
    fn finish_signals_end_of_response() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let mut client = TcpStream::connect(addr).expect("connect");
        let (server_side, _) = listener.accept().expect("accept");

        let sink = SocketSink::new(server_side);
        sink.print("whole response");
        sink.finish();
        sink.print("after finish");

        let mut received = String::new();
        client.read_to_string(&mut received).expect("read");
        assert_eq!(received, "whole response");
    }
}
