//! Anonymous shared memory regions.
//!
//! A region is created as a `memfd` by the client, mapped on both sides, and
//! travels to the service as a file descriptor in the handshake message. No
//! filesystem name is ever involved.

use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::ptr::NonNull;

use nix::sys::memfd::{MemFdCreateFlag, memfd_create};
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};
use nix::unistd::ftruncate;

/// A mapped anonymous shared memory region.
///
/// Unmaps and closes on drop; the descriptor is owned exactly once.
pub struct SharedMemory {
    ptr: NonNull<libc::c_void>,
    size: usize,
    fd: OwnedFd,
}

unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Create a fresh region of exactly `size` bytes and map it read/write.
    pub fn create(size: usize) -> io::Result<Self> {
        let fd = memfd_create(c"shmrpc", MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        ftruncate(&fd, size as libc::off_t)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Self::map(fd, size)
    }

    /// Map a region received from the peer, taking ownership of `fd`.
    pub fn from_fd(fd: OwnedFd, size: usize) -> io::Result<Self> {
        Self::map(fd, size)
    }

    fn map(fd: OwnedFd, size: usize) -> io::Result<Self> {
        let len = NonZeroUsize::new(size)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "size must be non-zero"))?;
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(Self { ptr, size, fd })
    }

    /// Start of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Borrow the backing descriptor, e.g. to send it over a control socket.
    #[inline]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr, self.size);
        }
        // fd closes via OwnedFd
    }
}
