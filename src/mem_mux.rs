use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use crate::mux::{Multiplexer, VirtualConn, VirtualListener, EPHEMERAL_ADDR};

const FIRST_EPHEMERAL_PORT: u32 = 49152;


/// An in-process [Multiplexer]: listeners live in a shared registry, and a dialed connection is a
///  pair of in-memory duplex streams.
///
/// Addresses in a non-empty scope are registered as `scope/addr`, and that is also the address
///  to dial. It keeps count of live listeners and connection ends so that tests can check for
///  leaked resources.
#[derive(Clone)]
pub struct MemoryMultiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    buffer_size: usize,
    backlog: usize,
    listeners: Mutex<FxHashMap<String, mpsc::Sender<Box<dyn VirtualConn>>>>,
    next_ephemeral_port: AtomicU32,
    open_listeners: Arc<AtomicUsize>,
    open_connection_ends: Arc<AtomicUsize>,
}

impl MemoryMultiplexer {
    pub fn new() -> MemoryMultiplexer {
        Self::with_buffer_size(64*1024, 128)
    }

    /// `buffer_size` is the number of bytes that can be in flight in each direction of a
    ///  connection, `backlog` the number of dialed connections that can be pending acceptance
    pub fn with_buffer_size(buffer_size: usize, backlog: usize) -> MemoryMultiplexer {
        MemoryMultiplexer {
            inner: Arc::new(MuxInner {
                buffer_size,
                backlog,
                listeners: Default::default(),
                next_ephemeral_port: AtomicU32::new(FIRST_EPHEMERAL_PORT),
                open_listeners: Default::default(),
                open_connection_ends: Default::default(),
            }),
        }
    }

    pub fn open_listeners(&self) -> usize {
        self.inner.open_listeners.load(Ordering::Acquire)
    }

    /// Each connection has two ends, both of which count until they are dropped
    pub fn open_connection_ends(&self) -> usize {
        self.inner.open_connection_ends.load(Ordering::Acquire)
    }

    fn registry_key(&self, scope: &str, addr: &str) -> String {
        let addr = if addr.is_empty() || addr == EPHEMERAL_ADDR {
            format!(":{}", self.inner.next_ephemeral_port.fetch_add(1, Ordering::AcqRel))
        }
        else {
            addr.to_string()
        };

        if scope.is_empty() {
            addr
        }
        else {
            format!("{}/{}", scope, addr)
        }
    }

    fn new_conn_end(&self, stream: DuplexStream) -> Box<dyn VirtualConn> {
        Box::new(MemoryConn {
            stream,
            _guard: CountGuard::new(self.inner.open_connection_ends.clone()),
        })
    }
}

impl Default for MemoryMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for MemoryMultiplexer {
    async fn bind(&self, scope: &str, addr: &str) -> anyhow::Result<Box<dyn VirtualListener>> {
        let key = self.registry_key(scope, addr);
        let (sender, incoming) = mpsc::channel(self.inner.backlog);

        {
            let mut listeners = self.inner.listeners.lock().unwrap();
            if listeners.contains_key(&key) {
                bail!("address {} is already in use", key);
            }
            listeners.insert(key.clone(), sender);
        }

        debug!("bound in-memory listener at {}", key);
        Ok(Box::new(MemoryListener {
            addr: key,
            incoming,
            mux: self.inner.clone(),
            _guard: CountGuard::new(self.inner.open_listeners.clone()),
        }))
    }

    async fn dial(&self, addr: &str) -> anyhow::Result<Box<dyn VirtualConn>> {
        let sender = self.inner.listeners.lock().unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| anyhow!("connection refused: nothing is listening at {}", addr))?;

        let (client_end, server_end) = duplex(self.inner.buffer_size);
        let client_end = self.new_conn_end(client_end);
        let server_end = self.new_conn_end(server_end);

        if sender.send(server_end).await.is_err() {
            bail!("connection refused: listener at {} was closed", addr);
        }
        trace!("dialed {}", addr);
        Ok(client_end)
    }
}


struct MemoryListener {
    addr: String,
    incoming: mpsc::Receiver<Box<dyn VirtualConn>>,
    mux: Arc<MuxInner>,
    _guard: CountGuard,
}

#[async_trait]
impl VirtualListener for MemoryListener {
    async fn accept(&mut self) -> anyhow::Result<Box<dyn VirtualConn>> {
        self.incoming.recv().await
            .ok_or_else(|| anyhow!("listener at {} was closed", self.addr))
    }

    fn local_addr(&self) -> String {
        self.addr.clone()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        debug!("releasing in-memory listener at {}", self.addr);
        self.mux.listeners.lock().unwrap()
            .remove(&self.addr);
    }
}


struct MemoryConn {
    stream: DuplexStream,
    _guard: CountGuard,
}

impl AsyncRead for MemoryConn {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryConn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}


struct CountGuard {
    counter: Arc<AtomicUsize>,
}
impl CountGuard {
    fn new(counter: Arc<AtomicUsize>) -> CountGuard {
        counter.fetch_add(1, Ordering::AcqRel);
        CountGuard { counter }
    }
}
impl Drop for CountGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
