//! Lock-free single-producer single-consumer byte ring.
//!
//! Designed to live in shared memory: the control block (head/tail counters)
//! and the data array are laid out contiguously with `#[repr(C)]` so the
//! whole buffer can sit inside a single mapped region and be shared across
//! processes.
//!
//! Key design points:
//! - Offsets are monotonically increasing `u32` counters, masked when
//!   indexing into the data array; capacity must be a power of two.
//! - Producer publishes with a release store of `head` after the payload is
//!   fully copied in; consumer publishes with a release store of `tail`.
//! - Exactly one thread plays each role. The two roles may live in
//!   different processes mapping the same region.
//! - Insufficient space or data is a `false` return, never an error.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// Producer and consumer cursors, each on its own cache line.
#[repr(C, align(64))]
struct ControlBlock {
    head: AtomicU32, // written by producer
    _pad0: [u8; 60],
    tail: AtomicU32, // written by consumer
    _pad1: [u8; 60],
}

const _: () = assert!(std::mem::size_of::<ControlBlock>() == 128);

/// Lock-free SPSC byte queue of `N` bytes (`N` a power of two).
#[repr(C)]
pub struct RingBuffer<const N: usize> {
    ctrl: ControlBlock,
    data: UnsafeCell<[u8; N]>,
}

// One producer and one consumer may touch the ring concurrently; all shared
// state is either atomic or published through the acquire/release cursors.
unsafe impl<const N: usize> Send for RingBuffer<N> {}
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    const MASK: u32 = (N as u32).wrapping_sub(1);

    /// Create an empty ring.
    ///
    /// Instances inside a shared-memory mapping are not constructed; they
    /// are produced by casting the mapping and calling [`reset`](Self::reset).
    pub fn new() -> Self {
        debug_assert!(N > 0 && N.is_power_of_two(), "capacity must be a power of two");
        Self {
            ctrl: ControlBlock {
                head: AtomicU32::new(0),
                _pad0: [0; 60],
                tail: AtomicU32::new(0),
                _pad1: [0; 60],
            },
            data: UnsafeCell::new([0; N]),
        }
    }

    /// Zero both cursors. Only safe while both ends are known to be idle;
    /// used once at region initialization, before the peer maps the region.
    pub fn reset(&self) {
        debug_assert!(N > 0 && N.is_power_of_two(), "capacity must be a power of two");
        self.ctrl.head.store(0, Ordering::Relaxed);
        self.ctrl.tail.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes the producer may currently write.
    #[inline]
    pub fn write_available(&self) -> usize {
        let head = self.ctrl.head.load(Ordering::Relaxed);
        let tail = self.ctrl.tail.load(Ordering::Acquire);
        N - head.wrapping_sub(tail) as usize
    }

    /// Bytes the consumer may currently read.
    #[inline]
    pub fn read_available(&self) -> usize {
        let head = self.ctrl.head.load(Ordering::Acquire);
        let tail = self.ctrl.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_available() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.write_available() == 0
    }

    /// Write `bytes` into the ring. Producer role only.
    ///
    /// Returns `false` without mutating anything if the free space is
    /// insufficient.
    pub fn write(&self, bytes: &[u8]) -> bool {
        self.write_vectored(&[bytes])
    }

    /// Write all of `parts` as one contiguous unit. Producer role only.
    ///
    /// Space for the *total* length is checked up front and the new head is
    /// published with a single release store, so the consumer either sees
    /// every part or none of them. This is what keeps a header + payload
    /// frame from ever being torn.
    pub fn write_vectored(&self, parts: &[&[u8]]) -> bool {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        let head = self.ctrl.head.load(Ordering::Relaxed);
        let tail = self.ctrl.tail.load(Ordering::Acquire);
        if len > N - head.wrapping_sub(tail) as usize {
            return false;
        }

        let mut pos = head;
        for part in parts {
            unsafe { self.copy_in(pos, part) };
            pos = pos.wrapping_add(part.len() as u32);
        }

        self.ctrl.head.store(head.wrapping_add(len as u32), Ordering::Release);
        true
    }

    /// Copy the next `dest.len()` bytes out without consuming them.
    /// Consumer role only.
    pub fn peek(&self, dest: &mut [u8]) -> bool {
        let head = self.ctrl.head.load(Ordering::Acquire);
        let tail = self.ctrl.tail.load(Ordering::Relaxed);
        if (head.wrapping_sub(tail) as usize) < dest.len() {
            return false;
        }
        unsafe { self.copy_out(tail, dest) };
        true
    }

    /// Copy the next `dest.len()` bytes out and consume them.
    /// Consumer role only.
    pub fn read(&self, dest: &mut [u8]) -> bool {
        let head = self.ctrl.head.load(Ordering::Acquire);
        let tail = self.ctrl.tail.load(Ordering::Relaxed);
        if (head.wrapping_sub(tail) as usize) < dest.len() {
            return false;
        }
        unsafe { self.copy_out(tail, dest) };
        self.ctrl
            .tail
            .store(tail.wrapping_add(dest.len() as u32), Ordering::Release);
        true
    }

    /// Consume `len` bytes without copying them. Consumer role only.
    pub fn skip(&self, len: usize) -> bool {
        let head = self.ctrl.head.load(Ordering::Acquire);
        let tail = self.ctrl.tail.load(Ordering::Relaxed);
        if (head.wrapping_sub(tail) as usize) < len {
            return false;
        }
        self.ctrl
            .tail
            .store(tail.wrapping_add(len as u32), Ordering::Release);
        true
    }

    /// Copy `bytes` into the data array at virtual position `pos`, splitting
    /// the copy when it crosses the wrap point.
    unsafe fn copy_in(&self, pos: u32, bytes: &[u8]) {
        let base = self.data.get() as *mut u8;
        let offset = (pos & Self::MASK) as usize;
        let first = bytes.len().min(N - offset);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(offset), first);
            if first < bytes.len() {
                std::ptr::copy_nonoverlapping(bytes.as_ptr().add(first), base, bytes.len() - first);
            }
        }
    }

    /// Counterpart of [`copy_in`](Self::copy_in) for the consumer side.
    unsafe fn copy_out(&self, pos: u32, dest: &mut [u8]) {
        let base = self.data.get() as *const u8;
        let offset = (pos & Self::MASK) as usize;
        let first = dest.len().min(N - offset);
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(offset), dest.as_mut_ptr(), first);
            if first < dest.len() {
                std::ptr::copy_nonoverlapping(base, dest.as_mut_ptr().add(first), dest.len() - first);
            }
        }
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FRAME_HEADER_SIZE, FrameHeader};

    const TEST_CAPACITY: usize = 4096;

    fn ring() -> Box<RingBuffer<TEST_CAPACITY>> {
        Box::new(RingBuffer::new())
    }

    #[test]
    fn single_write_read() {
        let ring = ring();
        let header = FrameHeader::request(42, 0, 1, 4);
        let payload = 0xDEAD_BEEF_u32.to_le_bytes();

        assert!(ring.write(&header.encode()));
        assert!(ring.write(&payload));

        let mut buf = [0u8; FRAME_HEADER_SIZE];
        assert!(ring.read(&mut buf));
        assert_eq!(FrameHeader::decode(&buf), Some(header));

        let mut out = [0u8; 4];
        assert!(ring.read(&mut out));
        assert_eq!(u32::from_le_bytes(out), 0xDEAD_BEEF);
        assert!(ring.is_empty());
    }

    #[test]
    fn fifo_order_across_many_frames() {
        let ring = ring();
        for i in 0..50u32 {
            let header = FrameHeader::request(1, i, i, 4);
            assert!(ring.write_vectored(&[&header.encode(), &(i * 100).to_le_bytes()]));
        }
        for i in 0..50u32 {
            let mut buf = [0u8; FRAME_HEADER_SIZE];
            assert!(ring.read(&mut buf));
            let header = FrameHeader::decode(&buf).unwrap();
            assert_eq!(header.message_id, i);
            assert_eq!(header.seq, i);
            let mut out = [0u8; 4];
            assert!(ring.read(&mut out));
            assert_eq!(u32::from_le_bytes(out), i * 100);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn wraparound_preserves_payloads() {
        // 48-byte frames, enough rounds to push the cursors well past the
        // capacity so the copy path wraps several times.
        let ring = ring();
        let frame_len = 48usize;
        let rounds = (TEST_CAPACITY * 3) / frame_len;
        let batch = (TEST_CAPACITY * 3 / 4) / frame_len;

        let mut written = 0u32;
        let mut read = 0u32;
        while (read as usize) < rounds {
            while (written as usize) < rounds && written - read < batch as u32 {
                let mut frame = vec![0u8; frame_len];
                for (i, b) in frame.iter_mut().enumerate() {
                    *b = (written as usize + i) as u8;
                }
                assert!(ring.write(&frame));
                written += 1;
            }
            let mut frame = vec![0u8; frame_len];
            assert!(ring.read(&mut frame));
            for (i, b) in frame.iter().enumerate() {
                assert_eq!(*b, (read as usize + i) as u8);
            }
            read += 1;
        }
        assert!(ring.is_empty());
        assert_eq!(ring.write_available(), TEST_CAPACITY);
    }

    #[test]
    fn full_ring_rejects_write_without_mutation() {
        let ring = ring();
        let data = vec![0xAA; TEST_CAPACITY];
        assert!(ring.write(&data));
        assert!(ring.is_full());
        assert_eq!(ring.write_available(), 0);

        assert!(!ring.write(&[0xFF]));

        let mut readback = vec![0u8; TEST_CAPACITY];
        assert!(ring.read(&mut readback));
        assert_eq!(readback, data);
        assert!(ring.is_empty());
        assert_eq!(ring.write_available(), TEST_CAPACITY);
    }

    #[test]
    fn vectored_write_is_all_or_nothing() {
        let ring = ring();
        let filler = vec![0u8; TEST_CAPACITY - 10];
        assert!(ring.write(&filler));

        // 24 + 4 bytes do not fit in the remaining 10.
        let header = FrameHeader::request(1, 1, 1, 4).encode();
        assert!(!ring.write_vectored(&[&header, &[1, 2, 3, 4]]));
        assert_eq!(ring.read_available(), TEST_CAPACITY - 10);
    }

    #[test]
    fn empty_ring_rejects_read_and_peek() {
        let ring = ring();
        let mut buf = [0u8; 64];
        assert!(ring.is_empty());
        assert_eq!(ring.read_available(), 0);
        assert!(!ring.read(&mut buf[..1]));
        assert!(!ring.read(&mut buf));
        assert!(!ring.peek(&mut buf[..1]));
        assert!(!ring.skip(1));
    }

    #[test]
    fn peek_does_not_consume() {
        let ring = ring();
        assert!(ring.write(&42u32.to_le_bytes()));

        let mut peeked = [0u8; 4];
        assert!(ring.peek(&mut peeked));
        assert_eq!(u32::from_le_bytes(peeked), 42);
        assert_eq!(ring.read_available(), 4);

        let mut out = [0u8; 4];
        assert!(ring.read(&mut out));
        assert_eq!(u32::from_le_bytes(out), 42);
        assert!(ring.is_empty());
    }

    #[test]
    fn skip_advances_past_header() {
        let ring = ring();
        let header = FrameHeader::request(1, 9, 99, 4);
        assert!(ring.write_vectored(&[&header.encode(), &0xCAFE_u32.to_le_bytes()]));

        assert!(ring.skip(FRAME_HEADER_SIZE));
        let mut out = [0u8; 4];
        assert!(ring.read(&mut out));
        assert_eq!(u32::from_le_bytes(out), 0xCAFE);
        assert!(ring.is_empty());
    }

    #[test]
    fn available_counters_are_consistent() {
        let ring = ring();
        assert_eq!(ring.capacity(), TEST_CAPACITY);
        assert_eq!(ring.write_available(), TEST_CAPACITY);
        assert_eq!(ring.read_available(), 0);

        assert!(ring.write(&[0u8; 100]));
        assert_eq!(ring.write_available(), TEST_CAPACITY - 100);
        assert_eq!(ring.read_available(), 100);
        assert_eq!(ring.write_available() + ring.read_available(), TEST_CAPACITY);

        ring.reset();
        assert_eq!(ring.write_available(), TEST_CAPACITY);
        assert_eq!(ring.read_available(), 0);
    }

    #[test]
    fn two_threads_preserve_byte_order() {
        let ring: RingBuffer<1024> = RingBuffer::new();
        let total = 64 * 1024usize;

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut sent = 0usize;
                while sent < total {
                    let chunk = (total - sent).min(97);
                    let bytes: Vec<u8> = (sent..sent + chunk).map(|i| i as u8).collect();
                    if ring.write(&bytes) {
                        sent += chunk;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut received = 0usize;
            let mut buf = [0u8; 61];
            while received < total {
                let chunk = (total - received).min(buf.len());
                if ring.read(&mut buf[..chunk]) {
                    for (i, b) in buf[..chunk].iter().enumerate() {
                        assert_eq!(*b, (received + i) as u8);
                    }
                    received += chunk;
                } else {
                    std::hint::spin_loop();
                }
            }
        });

        assert!(ring.is_empty());
    }
}
