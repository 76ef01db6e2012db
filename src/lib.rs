//! Local inter-process RPC over shared memory.
//!
//! Two processes on the same host exchange request/response pairs and
//! one-way notifications through per-connection shared-memory rings, with a
//! Unix `SOCK_SEQPACKET` control socket carrying the handshake and one-byte
//! wakeups.
//!
//! ```text
//! ┌────────┐  control socket (handshake, wakeup bytes)  ┌─────────┐
//! │ Client │◄──────────────────────────────────────────►│ Service │
//! │        │      shared region (memfd, mmap'd)         │         │
//! │ produce├──────────► client_to_server ──────────────►│ consume │
//! │ consume│◄────────── server_to_client ◄──────────────┤ produce │
//! └────────┘                                            └─────────┘
//! ```
//!
//! ## Service API
//!
//! - `start()` / `stop()` — bind the endpoint, accept clients, tear down
//! - `set_request_handler(f)` — `(message_id, request) -> (status, response)`
//! - `notify(service_id, notify_id, payload)` — best-effort broadcast
//!
//! ## Client API
//!
//! - `connect(name)` — retrying connect + shared-region handshake
//! - `call(service_id, method_id, request, timeout)` — blocking, correlated
//!   by sequence number; concurrent calls from many threads are fine
//! - `notify(service_id, notify_id, payload)` — one-way, client to service
//! - `set_notify_handler(f)` — inbound notification sink
//!
//! Payloads are opaque byte slices; interface definitions, typed stubs, and
//! value serialization live in higher layers.

pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod region;
pub mod ring;
pub mod shm;

mod client;
mod service;

pub use client::{Client, NotifyHandler, Response};
pub use config::ConnectConfig;
pub use dispatcher::EventDispatcher;
pub use error::{ConnectError, RpcError, Status, status};
pub use frame::{FRAME_HEADER_SIZE, FrameFlags, FrameHeader, PROTOCOL_VERSION};
pub use region::{REGION_SIZE, RING_CAPACITY, RegionMap, SharedRegion};
pub use ring::RingBuffer;
pub use service::{RequestHandler, Service};
pub use shm::SharedMemory;
