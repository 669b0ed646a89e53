//! UDP endpoint construction.
//!
//! Thin wrapper around tokio's `UdpSocket` that sets the kernel send and
//! receive buffer sizes before binding. Address reuse is left off so that a
//! port already held by another process is a bind failure.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::info;

/// Largest datagram the receive loop will read.
pub const MAX_DATAGRAM: usize = 65_507;

/// Bind a UDP socket with the given buffer sizes. A size of 0 keeps the
/// system default.
pub fn bind(addr: SocketAddr, sndbuf: usize, rcvbuf: usize) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    // Buffer sizes must be set before binding
    if sndbuf > 0 {
        socket.set_send_buffer_size(sndbuf)?;
    }
    if rcvbuf > 0 {
        socket.set_recv_buffer_size(rcvbuf)?;
    }

    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    let tokio_socket = UdpSocket::from_std(std_socket)?;

    info!(
        "UDP mesh endpoint bound to {} (sndbuf={}, rcvbuf={})",
        tokio_socket.local_addr()?,
        sndbuf,
        rcvbuf
    );

    Ok(tokio_socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let socket = bind("127.0.0.1:0".parse().unwrap(), 1 << 20, 1 << 20).unwrap();
        assert!(socket.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = bind("127.0.0.1:0".parse().unwrap(), 0, 0).unwrap();
        let taken = first.local_addr().unwrap();
        assert!(bind(taken, 0, 0).is_err());
    }

    #[tokio::test]
    async fn test_send_recv() {
        let a = bind("127.0.0.1:0".parse().unwrap(), 0, 0).unwrap();
        let b = bind("127.0.0.1:0".parse().unwrap(), 0, 0).unwrap();

        a.send_to(b"hello", b.local_addr().unwrap()).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
