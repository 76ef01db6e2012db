//! Server role.
//!
//! A `Service` owns the listening control socket, performs the server side
//! of the handshake, runs one receiver thread per connection, dispatches
//! inbound requests to the installed handler, and broadcasts notifications
//! to every live connection. Teardown is centralized in [`Service::stop`];
//! connection workers never free their own resources.

use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::control;
use crate::error::{RpcError, Status, status};
use crate::frame::{FRAME_HEADER_SIZE, FrameFlags, FrameHeader, PROTOCOL_VERSION};
use crate::region::RegionMap;

/// Request handler: `(message_id, request payload)` in, `(status, response
/// payload)` out. Non-negative statuses are handler-defined and travel to
/// the caller verbatim.
///
/// Handlers run on the receiving connection's thread: requests from one
/// peer are serialized, requests from different peers are not.
pub type RequestHandler = Arc<dyn Fn(u32, &[u8]) -> (Status, Vec<u8>) + Send + Sync>;

struct ConnectionShared {
    socket: OwnedFd,
    region: RegionMap,
    /// Serializes the two `server_to_client` producers: the connection's
    /// receiver thread writing responses and any thread broadcasting a
    /// notify. Held for one frame write plus one signal send.
    tx: Mutex<()>,
}

struct Connection {
    shared: Arc<ConnectionShared>,
    worker: Option<JoinHandle<()>>,
}

struct ServiceInner {
    name: String,
    running: AtomicBool,
    listener: Mutex<Option<Arc<OwnedFd>>>,
    connections: Mutex<Vec<Connection>>,
    handler: Mutex<Option<RequestHandler>>,
}

/// The server end of a named local RPC endpoint.
pub struct Service {
    inner: Arc<ServiceInner>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                name: name.into(),
                running: AtomicBool::new(false),
                listener: Mutex::new(None),
                connections: Mutex::new(Vec::new()),
                handler: Mutex::new(None),
            }),
            acceptor: Mutex::new(None),
        }
    }

    /// Install or replace the request handler.
    pub fn set_request_handler<F>(&self, handler: F)
    where
        F: Fn(u32, &[u8]) -> (Status, Vec<u8>) + Send + Sync + 'static,
    {
        *self.inner.handler.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Bind the control endpoint and start accepting clients.
    ///
    /// A no-op while already running. `stop` followed by `start` is legal.
    pub fn start(&self) -> io::Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = match control::listen_endpoint(&self.inner.name) {
            Ok(fd) => Arc::new(fd),
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        *self.inner.listener.lock().unwrap() = Some(Arc::clone(&listener));

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::spawn(move || accept_loop(&inner, &listener));
        *self.acceptor.lock().unwrap() = Some(handle);

        debug!(service = %self.inner.name, "listening");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Broadcast a notification to every live connection.
    ///
    /// Delivery is best-effort: the first connection whose outbound ring
    /// lacks space fails the whole call with [`RpcError::RingFull`], and a
    /// dead control socket fails it with [`RpcError::Disconnected`].
    pub fn notify(&self, service_id: u32, notify_id: u32, payload: &[u8]) -> Result<(), RpcError> {
        let header = FrameHeader::notify(service_id, notify_id, payload.len() as u32);
        let encoded = header.encode();

        let connections = self.inner.connections.lock().unwrap();
        for conn in connections.iter() {
            let shared = &conn.shared;
            let _tx = shared.tx.lock().unwrap();
            if !shared
                .region
                .region()
                .server_to_client
                .write_vectored(&[&encoded, payload])
            {
                return Err(RpcError::RingFull);
            }
            if control::send_signal(shared.socket.as_fd()).is_err() {
                return Err(RpcError::Disconnected);
            }
        }
        Ok(())
    }

    /// Stop accepting, unblock and join every worker, release all
    /// connection resources. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Wake the acceptor out of accept(), then reap it. The listening
        // descriptor closes once both Arcs are gone.
        if let Some(listener) = self.inner.listener.lock().unwrap().take() {
            control::shutdown_socket(listener.as_fd());
        }
        if let Some(acceptor) = self.acceptor.lock().unwrap().take() {
            let _ = acceptor.join();
        }

        // Unblock every receiver, join, then drop connections; each region
        // unmaps and each descriptor closes exactly once.
        let mut connections = std::mem::take(&mut *self.inner.connections.lock().unwrap());
        for conn in connections.iter() {
            control::shutdown_socket(conn.shared.socket.as_fd());
        }
        for conn in connections.iter_mut() {
            if let Some(worker) = conn.worker.take() {
                let _ = worker.join();
            }
        }
        drop(connections);

        debug!(service = %self.inner.name, "stopped");
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(inner: &Arc<ServiceInner>, listener: &OwnedFd) {
    while inner.running.load(Ordering::SeqCst) {
        let socket = match control::accept_connection(listener.as_fd()) {
            Ok(fd) => fd,
            Err(_) => {
                if inner.running.load(Ordering::SeqCst) {
                    continue;
                }
                break;
            }
        };

        let (version, region_fd) = match control::recv_handshake(socket.as_fd()) {
            Ok((version, Some(fd))) => (version, fd),
            Ok((_, None)) | Err(_) => {
                debug!(service = %inner.name, "bad handshake, dropping connection");
                continue;
            }
        };

        let accepted = version == PROTOCOL_VERSION;
        if control::send_ack(socket.as_fd(), accepted).is_err() {
            continue;
        }
        if !accepted {
            debug!(service = %inner.name, version, "protocol version rejected");
            continue;
        }

        let region = match RegionMap::from_fd(region_fd) {
            Ok(region) => region,
            Err(e) => {
                warn!(service = %inner.name, "mapping shared region failed: {e}");
                continue;
            }
        };

        let shared = Arc::new(ConnectionShared {
            socket,
            region,
            tx: Mutex::new(()),
        });
        let worker = {
            let inner = Arc::clone(inner);
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || connection_loop(&inner, &shared))
        };
        inner
            .connections
            .lock()
            .unwrap()
            .push(Connection { shared, worker: Some(worker) });
        debug!(service = %inner.name, "connection accepted");
    }
}

fn connection_loop(inner: &ServiceInner, conn: &ConnectionShared) {
    while inner.running.load(Ordering::SeqCst) {
        match control::recv_signal(conn.socket.as_fd()) {
            Ok(n) if n > 0 => {}
            // EOF, socket error, or shutdown from stop(): peer is gone.
            _ => break,
        }
        drain_requests(inner, conn);
    }
    debug!(service = %inner.name, "connection worker exiting");
}

fn drain_requests(inner: &ServiceInner, conn: &ConnectionShared) {
    let rx = &conn.region.region().client_to_server;
    loop {
        let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
        if !rx.peek(&mut header_bytes) {
            break;
        }
        let Some(header) = FrameHeader::decode(&header_bytes) else {
            break;
        };
        let payload_len = header.payload_bytes as usize;
        if rx.read_available() < FRAME_HEADER_SIZE + payload_len {
            // Partial frame; the producer will signal once it is complete.
            break;
        }
        rx.skip(FRAME_HEADER_SIZE);
        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            rx.read(&mut payload);
        }

        if header.flags.contains(FrameFlags::REQUEST) {
            respond(inner, conn, &header, &payload);
        }
        // Client-to-server notifies are consumed here; the core installs no
        // sink for them.
    }
}

fn respond(inner: &ServiceInner, conn: &ConnectionShared, request: &FrameHeader, payload: &[u8]) {
    // Snapshot the handler and invoke it outside the slot mutex.
    let handler = inner.handler.lock().unwrap().clone();
    let (code, response_payload) = match handler {
        Some(handler) => handler(request.message_id, payload),
        None => (status::INVALID_METHOD, Vec::new()),
    };

    let response = FrameHeader::response(request, code, response_payload.len() as u32);
    let _tx = conn.tx.lock().unwrap();
    if !conn
        .region
        .region()
        .server_to_client
        .write_vectored(&[&response.encode(), &response_payload])
    {
        // The caller's timeout covers this; nothing to retry here.
        warn!(service = %inner.name, seq = request.seq, "response dropped, outbound ring full");
        return;
    }
    let _ = control::send_signal(conn.socket.as_fd());
}
