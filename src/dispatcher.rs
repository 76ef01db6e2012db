//! Epoll-driven event loop.
//!
//! Multiplexes across file descriptors and dispatches callbacks when they
//! become readable; closures posted from other threads run on the dispatch
//! thread at the top of each iteration. No transport knowledge.
//!
//! ```ignore
//! let dispatcher = EventDispatcher::new()?;
//! dispatcher.add_fd(fd.as_fd(), |fd, events| { /* readable */ })?;
//! dispatcher.run(); // blocks until stop()
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nix::fcntl::OFlag;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::unistd::pipe2;

/// Callback for a registered descriptor: `(fd, event mask)`.
pub type FdCallback = Arc<dyn Fn(RawFd, EpollFlags) + Send + Sync>;

// Epoll token reserved for the internal wakeup pipe; real fds are
// non-negative so this can never collide.
const WAKEUP_TOKEN: u64 = u64::MAX;

const MAX_EVENTS: usize = 32;

struct FdEntry {
    fd: RawFd,
    callback: FdCallback,
}

/// A restartable fd-readability event loop with a cross-thread post queue.
pub struct EventDispatcher {
    epoll: Epoll,
    wake_rx: File,
    wake_tx: File,
    running: AtomicBool,
    stop_requested: AtomicBool,
    entries: Mutex<Vec<FdEntry>>,
    posted: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl EventDispatcher {
    pub fn new() -> io::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        let (rx, tx) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        let wake_rx = File::from(rx);
        let wake_tx = File::from(tx);
        epoll
            .add(&wake_rx, EpollEvent::new(EpollFlags::EPOLLIN, WAKEUP_TOKEN))
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(Self {
            epoll,
            wake_rx,
            wake_tx,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            entries: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
        })
    }

    /// Dispatch events on the calling thread until [`stop`](Self::stop).
    ///
    /// Returns with the stop request cleared, so the loop can be run again.
    pub fn run(&self) {
        self.running.store(true, Ordering::Release);
        let mut events = vec![EpollEvent::empty(); MAX_EVENTS];

        while !self.stop_requested.load(Ordering::Acquire) {
            self.run_posted();

            let n = match self.epoll.wait(&mut events, EpollTimeout::NONE) {
                Ok(n) => n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            };

            for event in &events[..n] {
                if event.data() == WAKEUP_TOKEN {
                    self.drain_wakeup();
                    continue;
                }

                let fd = event.data() as RawFd;
                let callback = self
                    .entries
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|entry| entry.fd == fd)
                    .map(|entry| Arc::clone(&entry.callback));
                if let Some(callback) = callback {
                    callback(fd, event.events());
                }
            }
        }

        self.running.store(false, Ordering::Release);
        self.stop_requested.store(false, Ordering::Release);
    }

    /// Ask the loop to exit. Thread-safe; callable from callbacks.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wakeup();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register `fd` for read-ready (and hangup/error) events. The caller
    /// keeps ownership of the descriptor and must remove it before closing.
    pub fn add_fd<F>(&self, fd: BorrowedFd<'_>, callback: F) -> io::Result<()>
    where
        F: Fn(RawFd, EpollFlags) + Send + Sync + 'static,
    {
        let raw = fd.as_raw_fd();
        self.epoll
            .add(
                fd,
                EpollEvent::new(
                    EpollFlags::EPOLLIN | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR,
                    raw as u64,
                ),
            )
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        self.entries.lock().unwrap().push(FdEntry {
            fd: raw,
            callback: Arc::new(callback),
        });
        Ok(())
    }

    /// Unregister a descriptor. Safe to call from within a callback.
    /// Returns `false` if it was not registered.
    pub fn remove_fd(&self, fd: RawFd) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some(index) = entries.iter().position(|entry| entry.fd == fd) else {
            return false;
        };
        // Registered fds are alive until removed, per the add_fd contract.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let _ = self.epoll.delete(borrowed);
        entries.remove(index);
        true
    }

    /// Run `f` on the dispatch thread. FIFO with respect to other posts.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.posted.lock().unwrap().push(Box::new(f));
        self.wakeup();
    }

    fn run_posted(&self) {
        let batch = std::mem::take(&mut *self.posted.lock().unwrap());
        for f in batch {
            f();
        }
    }

    fn wakeup(&self) {
        // A full pipe already guarantees a pending wakeup.
        let _ = (&self.wake_tx).write(&[1u8]);
    }

    fn drain_wakeup(&self) {
        let mut buf = [0u8; 64];
        while matches!((&self.wake_rx).read(&mut buf), Ok(n) if n > 0) {}
    }
}
