//! Error types and wire status codes.

use std::fmt;
use std::io;

/// Signed status carried in a response frame's `aux` field.
///
/// Negative values are reserved by the framework; `0` is success; positive
/// values belong to request handlers and travel to the caller verbatim.
pub type Status = i32;

/// Framework-reserved wire status codes.
pub mod status {
    use super::Status;

    /// Operation completed; handler returned success.
    pub const SUCCESS: Status = 0;
    /// Peer gone or transport failed.
    pub const DISCONNECTED: Status = -1;
    /// Call timed out waiting for a response.
    pub const TIMEOUT: Status = -2;
    /// Reserved for higher layers.
    pub const INVALID_SERVICE: Status = -3;
    /// No handler installed or unknown method.
    pub const INVALID_METHOD: Status = -4;
    /// Handshake rejected for a protocol version mismatch.
    pub const VERSION_MISMATCH: Status = -5;
    /// Outbound ring had insufficient space.
    pub const RING_FULL: Status = -6;
    /// Pending call failed because the endpoint is shutting down.
    pub const STOPPED: Status = -7;
}

/// Runtime RPC failure, mirroring the framework's negative wire statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    /// Peer gone or transport failed.
    Disconnected,
    /// Call timed out waiting for a response.
    Timeout,
    /// Reserved for higher layers.
    InvalidService,
    /// No handler installed or unknown method.
    InvalidMethod,
    /// Handshake rejected for a protocol version mismatch.
    VersionMismatch,
    /// Outbound ring had insufficient space; the caller may back off and retry.
    RingFull,
    /// Pending call failed because the endpoint is shutting down.
    Stopped,
    /// Unrecognized framework-range (negative) status from the peer.
    Other(Status),
}

impl RpcError {
    /// The wire status code for this error.
    pub fn code(self) -> Status {
        match self {
            RpcError::Disconnected => status::DISCONNECTED,
            RpcError::Timeout => status::TIMEOUT,
            RpcError::InvalidService => status::INVALID_SERVICE,
            RpcError::InvalidMethod => status::INVALID_METHOD,
            RpcError::VersionMismatch => status::VERSION_MISMATCH,
            RpcError::RingFull => status::RING_FULL,
            RpcError::Stopped => status::STOPPED,
            RpcError::Other(code) => code,
        }
    }

    /// Map a negative wire status back to an error.
    ///
    /// Returns `None` for non-negative statuses, which are not errors.
    pub fn from_code(code: Status) -> Option<Self> {
        match code {
            c if c >= status::SUCCESS => None,
            status::DISCONNECTED => Some(RpcError::Disconnected),
            status::TIMEOUT => Some(RpcError::Timeout),
            status::INVALID_SERVICE => Some(RpcError::InvalidService),
            status::INVALID_METHOD => Some(RpcError::InvalidMethod),
            status::VERSION_MISMATCH => Some(RpcError::VersionMismatch),
            status::RING_FULL => Some(RpcError::RingFull),
            status::STOPPED => Some(RpcError::Stopped),
            c => Some(RpcError::Other(c)),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Disconnected => write!(f, "peer disconnected"),
            RpcError::Timeout => write!(f, "call timed out"),
            RpcError::InvalidService => write!(f, "invalid service"),
            RpcError::InvalidMethod => write!(f, "no handler for method"),
            RpcError::VersionMismatch => write!(f, "protocol version mismatch"),
            RpcError::RingFull => write!(f, "outbound ring full"),
            RpcError::Stopped => write!(f, "endpoint stopped"),
            RpcError::Other(code) => write!(f, "rpc failed with status {}", code),
        }
    }
}

impl std::error::Error for RpcError {}

/// Failure while establishing a client connection.
#[derive(Debug)]
pub enum ConnectError {
    /// No endpoint answered within the configured retry budget.
    Unreachable,
    /// The service answered but refused the handshake (version NACK or EOF).
    Rejected,
    /// Local resource setup failed (shared memory, mapping, socket I/O).
    Io(io::Error),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Unreachable => write!(f, "service endpoint unreachable"),
            ConnectError::Rejected => write!(f, "handshake rejected by service"),
            ConnectError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectError {
    fn from(e: io::Error) -> Self {
        ConnectError::Io(e)
    }
}
