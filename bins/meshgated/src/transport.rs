//! Concrete wire transports. UDP is the primary,
//! always-available transport; it needs nothing beyond what
//! `tokio::net::UdpSocket` already gives us non-blocking, so there is no
//! `StreamReassembler` in the loop for it.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use mesh_core::OuterAddr;
use mesh_core::WireTransport;

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }
}

#[async_trait(?Send)]
impl WireTransport for UdpTransport {
    async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }

    async fn writable(&self) -> io::Result<()> {
        self.socket.writable().await
    }

    async fn read_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, OuterAddr)>> {
        match self.socket.try_recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, OuterAddr::from_socket_addr(addr, None)))),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write_to(&self, buf: &[u8], dest: &OuterAddr) -> io::Result<usize> {
        let Some(addr) = dest.socket_addr() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "UDP transport cannot address a non-socket destination",
            ));
        };
        self.socket.try_send_to(buf, addr)
    }

    fn is_stream(&self) -> bool {
        false
    }
}
