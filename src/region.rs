//! Per-connection shared region layout.
//!
//! Layout (one region per connection, mapped by both ends):
//!   Offset 0:                 client_to_server ring (control block + data)
//!   Offset 128 + RING_CAPACITY: server_to_client ring (control block + data)
//!
//! The client creates the region, resets both rings, and ships the
//! descriptor to the service during the handshake. The service maps it as-is
//! and never initializes anything.

use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};

use crate::ring::RingBuffer;
use crate::shm::SharedMemory;

/// Bytes per direction.
pub const RING_CAPACITY: usize = 256 * 1024;

/// The two directional rings of one connection.
#[repr(C)]
pub struct SharedRegion {
    /// Producer: client. Consumer: service.
    pub client_to_server: RingBuffer<RING_CAPACITY>,
    /// Producer: service. Consumer: client.
    pub server_to_client: RingBuffer<RING_CAPACITY>,
}

/// Exact size of the shared mapping.
pub const REGION_SIZE: usize = std::mem::size_of::<SharedRegion>();

// Two rings, each a 128-byte control block plus its data array.
const _: () = assert!(REGION_SIZE == 2 * (128 + RING_CAPACITY));

/// A [`SharedRegion`] view over a mapped [`SharedMemory`].
pub struct RegionMap {
    shm: SharedMemory,
}

impl RegionMap {
    /// Allocate and map a fresh region (client side). Rings are not yet
    /// reset; callers do that before handing the descriptor out.
    pub fn create() -> io::Result<Self> {
        Ok(Self {
            shm: SharedMemory::create(REGION_SIZE)?,
        })
    }

    /// Map a region received from the peer (service side).
    pub fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self {
            shm: SharedMemory::from_fd(fd, REGION_SIZE)?,
        })
    }

    #[inline]
    pub fn region(&self) -> &SharedRegion {
        // The mapping is page-aligned, REGION_SIZE bytes long, and shared
        // only between the two roles defined by the ring discipline.
        unsafe { &*(self.shm.as_ptr() as *const SharedRegion) }
    }

    /// Zero both rings. Client side, before the descriptor leaves the
    /// process.
    pub fn reset(&self) {
        self.region().client_to_server.reset();
        self.region().server_to_client.reset();
    }

    /// Borrow the backing descriptor for the handshake message.
    #[inline]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.shm.fd()
    }
}
