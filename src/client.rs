//! Client role.
//!
//! A `Client` owns one connection to a named service: it allocates and maps
//! the shared region, performs the client side of the handshake, and runs a
//! single receiver thread. Blocking [`call`](Client::call)s are correlated
//! to responses by sequence number; inbound notifications go to the
//! installed handler.

use std::collections::HashMap;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::config::ConnectConfig;
use crate::control;
use crate::error::{ConnectError, RpcError, Status, status};
use crate::frame::{FRAME_HEADER_SIZE, FrameFlags, FrameHeader};
use crate::region::RegionMap;

/// Notification handler: `(notify_id, payload)`. Runs on the client's
/// receiver thread.
pub type NotifyHandler = Arc<dyn Fn(u32, &[u8]) + Send + Sync>;

/// A completed call: the handler's non-negative status plus the response
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Vec<u8>,
}

struct CallState {
    done: bool,
    status: Status,
    payload: Vec<u8>,
}

/// One in-flight call, owned by the pending table and the caller.
struct PendingCall {
    state: Mutex<CallState>,
    completed: Condvar,
}

impl PendingCall {
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState {
                done: false,
                status: status::SUCCESS,
                payload: Vec::new(),
            }),
            completed: Condvar::new(),
        }
    }

    /// First completion wins; later ones are ignored.
    fn complete(&self, code: Status, payload: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        if !state.done {
            state.done = true;
            state.status = code;
            state.payload = payload;
            self.completed.notify_one();
        }
    }
}

struct ClientInner {
    socket: OwnedFd,
    region: RegionMap,
    running: AtomicBool,
    next_seq: AtomicU32,
    /// Serializes the `client_to_server` producers: concurrent `call` and
    /// `notify` threads. Held for one frame write plus one signal send.
    tx: Mutex<()>,
    pending: Mutex<HashMap<u32, Arc<PendingCall>>>,
    notify_handler: Mutex<Option<NotifyHandler>>,
}

/// The client end of one connection to a named service.
pub struct Client {
    inner: Arc<ClientInner>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect with the default [`ConnectConfig`].
    pub fn connect(service: &str) -> Result<Self, ConnectError> {
        Self::connect_with(service, &ConnectConfig::default())
    }

    /// Connect, retrying the endpoint until `config.max_attempts` is spent.
    pub fn connect_with(service: &str, config: &ConnectConfig) -> Result<Self, ConnectError> {
        let mut socket = None;
        for attempt in 0..config.max_attempts {
            match control::connect_endpoint(service) {
                Ok(fd) => {
                    socket = Some(fd);
                    break;
                }
                Err(_) if attempt + 1 < config.max_attempts => {
                    std::thread::sleep(config.retry_interval);
                }
                Err(_) => {}
            }
        }
        let Some(socket) = socket else {
            debug!(service, "connection attempts exhausted");
            return Err(ConnectError::Unreachable);
        };

        // The region must be zeroed before its descriptor leaves this
        // process; the service maps it as-is.
        let region = RegionMap::create()?;
        region.reset();

        control::send_handshake(socket.as_fd(), config.version, region.fd())?;
        match control::recv_ack(socket.as_fd())? {
            Some(true) => {}
            Some(false) | None => return Err(ConnectError::Rejected),
        }

        let inner = Arc::new(ClientInner {
            socket,
            region,
            running: AtomicBool::new(true),
            next_seq: AtomicU32::new(1),
            tx: Mutex::new(()),
            pending: Mutex::new(HashMap::new()),
            notify_handler: Mutex::new(None),
        });
        let receiver = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || receiver_loop(&inner))
        };
        Ok(Self {
            inner,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Install or replace the notification handler.
    pub fn set_notify_handler<F>(&self, handler: F)
    where
        F: Fn(u32, &[u8]) + Send + Sync + 'static,
    {
        *self.inner.notify_handler.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Invoke `method_id` on the service and block for the response.
    ///
    /// Returns the response with its handler status (`>= 0`) on success.
    /// Framework failures, including a negative status returned by the
    /// service, map to [`RpcError`].
    pub fn call(
        &self,
        service_id: u32,
        method_id: u32,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Response, RpcError> {
        let inner = &*self.inner;
        if !inner.running.load(Ordering::SeqCst) {
            return Err(RpcError::Disconnected);
        }

        let pending = Arc::new(PendingCall::new());
        let seq;
        {
            let _tx = inner.tx.lock().unwrap();
            seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
            let header = FrameHeader::request(service_id, method_id, seq, request.len() as u32);

            // Register before the frame can become visible: a server
            // draining off an earlier coalesced signal may answer ahead of
            // our own signal, and the receiver must find the entry.
            inner.pending.lock().unwrap().insert(seq, Arc::clone(&pending));

            if !inner
                .region
                .region()
                .client_to_server
                .write_vectored(&[&header.encode(), request])
            {
                inner.pending.lock().unwrap().remove(&seq);
                return Err(RpcError::RingFull);
            }
            if control::send_signal(inner.socket.as_fd()).is_err() {
                inner.pending.lock().unwrap().remove(&seq);
                return Err(RpcError::Disconnected);
            }
        }

        let (mut state, wait) = pending
            .completed
            .wait_timeout_while(pending.state.lock().unwrap(), timeout, |s| !s.done)
            .unwrap();
        if wait.timed_out() {
            drop(state);
            inner.pending.lock().unwrap().remove(&seq);
            return Err(RpcError::Timeout);
        }

        let code = state.status;
        let payload = std::mem::take(&mut state.payload);
        drop(state);
        inner.pending.lock().unwrap().remove(&seq);

        match RpcError::from_code(code) {
            Some(err) => Err(err),
            None => Ok(Response {
                status: code,
                payload,
            }),
        }
    }

    /// Send a one-way notification to the service.
    pub fn notify(&self, service_id: u32, notify_id: u32, payload: &[u8]) -> Result<(), RpcError> {
        let inner = &*self.inner;
        if !inner.running.load(Ordering::SeqCst) {
            return Err(RpcError::Disconnected);
        }

        let header = FrameHeader::notify(service_id, notify_id, payload.len() as u32);
        let _tx = inner.tx.lock().unwrap();
        if !inner
            .region
            .region()
            .client_to_server
            .write_vectored(&[&header.encode(), payload])
        {
            return Err(RpcError::RingFull);
        }
        control::send_signal(inner.socket.as_fd()).map_err(|_| RpcError::Disconnected)
    }

    /// Tear the connection down. Idempotent; pending calls fail with
    /// [`RpcError::Stopped`].
    pub fn disconnect(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        control::shutdown_socket(self.inner.socket.as_fd());
        if let Some(receiver) = self.receiver.lock().unwrap().take() {
            let _ = receiver.join();
        }

        let mut pending = self.inner.pending.lock().unwrap();
        for call in pending.values() {
            call.complete(status::STOPPED, Vec::new());
        }
        pending.clear();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn receiver_loop(inner: &ClientInner) {
    while inner.running.load(Ordering::SeqCst) {
        match control::recv_signal(inner.socket.as_fd()) {
            Ok(n) if n > 0 => {}
            _ => break,
        }
        drain_inbound(inner);
    }

    // Transport-fatal exit: fail whatever is still waiting. A deliberate
    // disconnect() clears running first and reports Stopped itself.
    if inner.running.load(Ordering::SeqCst) {
        let pending = inner.pending.lock().unwrap();
        for call in pending.values() {
            call.complete(status::DISCONNECTED, Vec::new());
        }
        debug!("receiver exited, {} pending call(s) failed", pending.len());
    }
}

fn drain_inbound(inner: &ClientInner) {
    let rx = &inner.region.region().server_to_client;
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
            break;
        }
        rx.skip(FRAME_HEADER_SIZE);
        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            rx.read(&mut payload);
        }

        if header.flags.contains(FrameFlags::RESPONSE) {
            let call = inner.pending.lock().unwrap().get(&header.seq).cloned();
            match call {
                Some(call) => call.complete(header.status(), payload),
                // Sequence already abandoned by a timeout.
                None => debug!(seq = header.seq, "late response dropped"),
            }
        } else if header.flags.contains(FrameFlags::NOTIFY) {
            let handler = inner.notify_handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler(header.message_id, &payload);
            }
        }
    }
}
