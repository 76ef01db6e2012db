//! Control socket primitives.
//!
//! One `SOCK_SEQPACKET` Unix socket per connection, named after the service
//! in the abstract namespace (`rpc_<name>`, leading NUL, no filesystem
//! artifact). The socket carries exactly three kinds of traffic:
//!
//! - the client's single handshake message: 2 bytes of little-endian
//!   protocol version plus the shared-region descriptor in SCM_RIGHTS
//!   ancillary data,
//! - the service's single ACK byte (`1` accept, `0` version mismatch),
//! - single wakeup bytes in either direction afterwards. The byte value is
//!   unused and signals may coalesce; a receiver drains its whole ring per
//!   wakeup.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::cmsg_space;
use nix::sys::socket::{
    AddressFamily, Backlog, ControlMessage, ControlMessageOwned, MsgFlags, Shutdown, SockFlag,
    SockType, UnixAddr, accept4, bind, connect, listen, recv, recvmsg, send, sendmsg, shutdown,
    socket,
};

const BACKLOG: i32 = 16;

fn errno_to_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn endpoint_addr(service: &str) -> io::Result<UnixAddr> {
    let name = format!("rpc_{service}");
    UnixAddr::new_abstract(name.as_bytes()).map_err(errno_to_io)
}

/// Bind and listen on the service's control endpoint.
pub fn listen_endpoint(service: &str) -> io::Result<OwnedFd> {
    let fd = socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(errno_to_io)?;
    let addr = endpoint_addr(service)?;
    bind(fd.as_raw_fd(), &addr).map_err(errno_to_io)?;
    listen(&fd, Backlog::new(BACKLOG).map_err(errno_to_io)?).map_err(errno_to_io)?;
    Ok(fd)
}

/// Connect to the service's control endpoint.
pub fn connect_endpoint(service: &str) -> io::Result<OwnedFd> {
    let fd = socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(errno_to_io)?;
    let addr = endpoint_addr(service)?;
    connect(fd.as_raw_fd(), &addr).map_err(errno_to_io)?;
    Ok(fd)
}

/// Accept one client on a listening endpoint.
pub fn accept_connection(listen_fd: BorrowedFd<'_>) -> io::Result<OwnedFd> {
    let fd = accept4(listen_fd.as_raw_fd(), SockFlag::SOCK_CLOEXEC).map_err(errno_to_io)?;
    // accept4 hands us a fresh descriptor we now own
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Send the handshake message: protocol version plus the region descriptor,
/// delivered atomically as one packet.
pub fn send_handshake(sock: BorrowedFd<'_>, version: u16, region: BorrowedFd<'_>) -> io::Result<()> {
    let payload = version.to_le_bytes();
    let iov = [IoSlice::new(&payload)];
    let fds = [region.as_raw_fd()];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    let sent = sendmsg::<UnixAddr>(
        sock.as_raw_fd(),
        &iov,
        &cmsgs,
        MsgFlags::MSG_NOSIGNAL,
        None,
    )
    .map_err(errno_to_io)?;
    if sent != payload.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "short handshake send",
        ));
    }
    Ok(())
}

/// Receive one handshake message and take ownership of the descriptor it
/// carries, if any. Extra descriptors in a malformed message are closed.
pub fn recv_handshake(sock: BorrowedFd<'_>) -> io::Result<(u16, Option<OwnedFd>)> {
    let mut payload = [0u8; 2];
    let mut cmsg_buffer = cmsg_space!([RawFd; 1]);
    let (bytes, received) = {
        let mut iov = [IoSliceMut::new(&mut payload)];
        let msg = recvmsg::<UnixAddr>(
            sock.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::empty(),
        )
        .map_err(errno_to_io)?;

        let mut received: Option<OwnedFd> = None;
        for cmsg in msg.cmsgs().map_err(errno_to_io)? {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                for fd in fds {
                    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
                    if received.is_none() {
                        received = Some(fd);
                    }
                }
            }
        }
        (msg.bytes, received)
    };

    if bytes == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed during handshake",
        ));
    }
    if bytes < payload.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "truncated handshake payload",
        ));
    }
    Ok((u16::from_le_bytes(payload), received))
}

/// Send the handshake verdict: `1` accept, `0` reject.
pub fn send_ack(sock: BorrowedFd<'_>, accepted: bool) -> io::Result<()> {
    send(sock.as_raw_fd(), &[accepted as u8], MsgFlags::MSG_NOSIGNAL).map_err(errno_to_io)?;
    Ok(())
}

/// Receive the handshake verdict. `None` means the peer hung up first.
pub fn recv_ack(sock: BorrowedFd<'_>) -> io::Result<Option<bool>> {
    let mut byte = [0u8; 1];
    let n = recv(sock.as_raw_fd(), &mut byte, MsgFlags::empty()).map_err(errno_to_io)?;
    Ok(if n == 0 { None } else { Some(byte[0] != 0) })
}

/// Wake the peer: at least one new frame is in the ring we produce into.
pub fn send_signal(sock: BorrowedFd<'_>) -> io::Result<()> {
    // MSG_NOSIGNAL: a vanished peer is reported as EPIPE, not SIGPIPE.
    let n = send(sock.as_raw_fd(), &[1u8], MsgFlags::MSG_NOSIGNAL).map_err(errno_to_io)?;
    if n == 0 {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "signal not sent"));
    }
    Ok(())
}

/// Block for the next wakeup. `Ok(0)` means the peer is gone.
pub fn recv_signal(sock: BorrowedFd<'_>) -> io::Result<usize> {
    let mut byte = [0u8; 1];
    recv(sock.as_raw_fd(), &mut byte, MsgFlags::empty()).map_err(errno_to_io)
}

/// Unblock any thread parked in a recv on `sock`. Errors are ignored; the
/// socket may already be gone.
pub fn shutdown_socket(sock: BorrowedFd<'_>) {
    let _ = shutdown(sock.as_raw_fd(), Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedMemory;
    use nix::sys::socket::socketpair;
    use std::os::fd::AsFd;

    fn pair() -> (OwnedFd, OwnedFd) {
        socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .unwrap()
    }

    #[test]
    fn handshake_carries_version_and_fd() {
        let (a, b) = pair();
        let shm = SharedMemory::create(4096).unwrap();

        send_handshake(a.as_fd(), 7, shm.fd()).unwrap();
        let (version, fd) = recv_handshake(b.as_fd()).unwrap();
        assert_eq!(version, 7);
        let fd = fd.expect("descriptor arrives with the handshake");

        // The received descriptor maps the same memory.
        let view = SharedMemory::from_fd(fd, 4096).unwrap();
        unsafe {
            std::ptr::write_volatile(shm.as_ptr(), 0x5Au8);
            assert_eq!(std::ptr::read_volatile(view.as_ptr()), 0x5Au8);
        }
    }

    #[test]
    fn handshake_eof_is_an_error() {
        let (a, b) = pair();
        drop(a);
        let err = recv_handshake(b.as_fd()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn ack_round_trip() {
        let (a, b) = pair();
        send_ack(a.as_fd(), true).unwrap();
        assert_eq!(recv_ack(b.as_fd()).unwrap(), Some(true));
        send_ack(a.as_fd(), false).unwrap();
        assert_eq!(recv_ack(b.as_fd()).unwrap(), Some(false));
        drop(a);
        assert_eq!(recv_ack(b.as_fd()).unwrap(), None);
    }

    #[test]
    fn signal_round_trip_and_eof() {
        let (a, b) = pair();
        send_signal(a.as_fd()).unwrap();
        assert_eq!(recv_signal(b.as_fd()).unwrap(), 1);
        drop(a);
        assert_eq!(recv_signal(b.as_fd()).unwrap(), 0);
    }

    #[test]
    fn listen_connect_accept() {
        let name = format!("shmrpc_ctl_test_{}", std::process::id());
        let listener = listen_endpoint(&name).unwrap();
        let client = connect_endpoint(&name).unwrap();
        let server_side = accept_connection(listener.as_fd()).unwrap();

        send_signal(client.as_fd()).unwrap();
        assert_eq!(recv_signal(server_side.as_fd()).unwrap(), 1);
    }

    #[test]
    fn shutdown_unblocks_receiver() {
        let (a, b) = pair();
        let t = std::thread::spawn(move || recv_signal(b.as_fd()).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(20));
        shutdown_socket(a.as_fd());
        assert_eq!(t.join().unwrap(), 0);
    }
}
