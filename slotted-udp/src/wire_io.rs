//! Platform-specific scatter/gather datagram I/O.
//!
//! On unix this is a thin wrapper around `sendmsg(2)`/`recvmsg(2)` via
//! [`nix`], so the 20-byte header and the caller's payload travel as one
//! datagram but live in two separate buffers on both the send and receive
//! side — no intermediate copy. Non-unix targets fall back to a single
//! concatenated buffer, the same split the teacher's `platform.rs` uses for
//! its unix/windows timestamp source.

use std::net::SocketAddrV4;

use crate::codec::{gather_buffers, scatter_buffers, HEADER_LEN};
use crate::error::{Error, Result};

#[cfg(unix)]
mod unix_io {
    use super::*;
    use nix::sys::socket::{recvmsg, sendmsg, MsgFlags, SockaddrIn};
    use std::os::fd::{AsRawFd, RawFd};

    pub fn send_gather(fd: RawFd, dest: SocketAddrV4, header: &[u8; HEADER_LEN], payload: &[u8]) -> Result<usize> {
        let iov = gather_buffers(header, payload);
        let dest = SockaddrIn::from(dest);
        let sent = sendmsg(fd, &iov, &[], MsgFlags::empty(), Some(&dest))
            .map_err(|errno| Error::NetworkError(std::io::Error::from(errno)))?;
        Ok(sent)
    }

    pub fn recv_scatter(
        fd: RawFd,
        header: &mut [u8; HEADER_LEN],
        payload: &mut [u8],
    ) -> Result<usize> {
        let capacity = HEADER_LEN + payload.len();
        let mut iov = scatter_buffers(header, payload);
        let msg = recvmsg::<SockaddrIn>(fd, &mut iov, None, MsgFlags::empty())
            .map_err(|errno| Error::NetworkError(std::io::Error::from(errno)))?;
        // `recvmsg(2)` reports the real datagram length in `msg.bytes` even
        // when it exceeds our iovecs — it is not clamped to `capacity`, and
        // `MSG_TRUNC` is set in that case. Either signal means the header
        // and payload buffers we handed in were too small to hold what
        // arrived; never let the caller index into its buffer past what was
        // actually copied into it.
        if msg.flags.contains(MsgFlags::MSG_TRUNC) || msg.bytes > capacity {
            return Err(Error::BufferTooSmall);
        }
        Ok(msg.bytes)
    }

    pub fn raw_fd(socket: &socket2::Socket) -> RawFd {
        socket.as_raw_fd()
    }
}

#[cfg(unix)]
pub use unix_io::{raw_fd, recv_scatter, send_gather};

#[cfg(not(unix))]
mod fallback_io {
    use super::*;
    use std::net::SocketAddr;

    /// Single-buffer fallback: concatenates header and payload before
    /// handing them to `send_to`. Used only on targets without `sendmsg`.
    pub fn send_gather(
        socket: &socket2::Socket,
        dest: SocketAddrV4,
        header: &[u8; HEADER_LEN],
        payload: &[u8],
    ) -> Result<usize> {
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(header);
        buf.extend_from_slice(payload);
        let sent = socket
            .send_to(&buf, &SocketAddr::V4(dest).into())
            .map_err(Error::NetworkError)?;
        Ok(sent)
    }

    pub fn recv_scatter(
        socket: &socket2::Socket,
        header: &mut [u8; HEADER_LEN],
        payload: &mut [u8],
    ) -> Result<usize> {
        let capacity = HEADER_LEN + payload.len();
        let mut buf = vec![0u8; capacity];
        let buf_uninit = unsafe {
            &mut *(buf.as_mut_slice() as *mut [u8] as *mut [std::mem::MaybeUninit<u8>])
        };
        let (n, _addr) = socket.recv_from(buf_uninit).map_err(Error::NetworkError)?;
        if n < HEADER_LEN {
            return Err(Error::MalformedPacket);
        }
        // `recv_from` cannot report a datagram larger than `capacity` — it has
        // no buffer to copy the excess into — so a fully-filled buffer is the
        // only truncation signal available without `MSG_TRUNC` support. Treat
        // it the same as the unix path: surface `BufferTooSmall` rather than
        // silently handing back a datagram that may have been cut short.
        if n >= capacity {
            return Err(Error::BufferTooSmall);
        }
        header.copy_from_slice(&buf[..HEADER_LEN]);
        let payload_len = n - HEADER_LEN;
        payload[..payload_len].copy_from_slice(&buf[HEADER_LEN..n]);
        Ok(n)
    }
}

#[cfg(not(unix))]
pub use fallback_io::{recv_scatter, send_gather};

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use socket2::{Domain, Socket, Type};
    use std::net::Ipv4Addr;
    use std::os::fd::AsRawFd;

    fn loopback_socket() -> Socket {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).unwrap();
        socket
            .bind(&SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0).into())
            .unwrap();
        socket
    }

    #[test]
    fn recv_scatter_accepts_datagram_that_fits() {
        let receiver = loopback_socket();
        let recv_addr = receiver.local_addr().unwrap().as_socket_ipv4().unwrap();
        let sender = loopback_socket();

        let header = [1u8; HEADER_LEN];
        let payload = vec![9u8; 16];
        send_gather(sender.as_raw_fd(), recv_addr, &header, &payload).unwrap();

        let mut recv_header = [0u8; HEADER_LEN];
        let mut recv_payload = vec![0u8; 16];
        let n = recv_scatter(receiver.as_raw_fd(), &mut recv_header, &mut recv_payload).unwrap();
        assert_eq!(n, HEADER_LEN + payload.len());
        assert_eq!(recv_header, header);
        assert_eq!(recv_payload, payload);
    }

    /// A datagram bigger than the caller's header+payload capacity must
    /// surface `BufferTooSmall`, never an out-of-bounds slice computed from
    /// `recvmsg`'s unclamped real-length report.
    #[test]
    fn recv_scatter_rejects_oversized_datagram() {
        let receiver = loopback_socket();
        let recv_addr = receiver.local_addr().unwrap().as_socket_ipv4().unwrap();
        let sender = loopback_socket();

        let header = [0u8; HEADER_LEN];
        let big_payload = vec![7u8; 64];
        send_gather(sender.as_raw_fd(), recv_addr, &header, &big_payload).unwrap();

        let mut recv_header = [0u8; HEADER_LEN];
        let mut small_payload = vec![0u8; 8];
        let err = recv_scatter(receiver.as_raw_fd(), &mut recv_header, &mut small_payload).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall));
    }
}
