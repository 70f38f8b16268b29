use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use super::Address;

/// Datagram transport used by `RemoteConnection`. `recv_from` must not block.
pub trait Socket: Send + Sync {
    fn send_to(&self, bytes: &[u8], addr: Address) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Address)>>;
    fn local_addr(&self) -> io::Result<Address>;
}

/// Opens a socket bound to the given local port.
pub type SocketFactory = Box<dyn FnMut(u16) -> io::Result<Arc<dyn Socket>> + Send>;

impl Socket for UdpSocket {
    fn send_to(&self, bytes: &[u8], addr: Address) -> io::Result<usize> {
        UdpSocket::send_to(self, bytes, addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Address)>> {
        match UdpSocket::recv_from(self, buf) {
            Ok(received) => Ok(Some(received)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<Address> {
        UdpSocket::local_addr(self)
    }
}

pub fn bind_udp(port: u16) -> io::Result<Arc<dyn Socket>> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    socket.set_nonblocking(true)?;
    socket.set_broadcast(true)?;
    Ok(Arc::new(socket))
}

pub fn udp_factory() -> SocketFactory {
    Box::new(bind_udp)
}
