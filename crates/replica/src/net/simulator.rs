use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::Address;
use super::socket::{Socket, SocketFactory};
use super::stats::PacketLossSimulation;

const FIRST_EPHEMERAL_PORT: u16 = 49152;

#[derive(Debug)]
struct DelayedPacket {
    release_time: Instant,
    payload: Vec<u8>,
    from: Address,
    to: Address,
}

impl PartialEq for DelayedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time
    }
}

impl Eq for DelayedPacket {}

impl PartialOrd for DelayedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other.release_time.cmp(&self.release_time)
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    mailboxes: HashMap<Address, VecDeque<(Vec<u8>, Address)>>,
    conditions: HashMap<Address, PacketLossSimulation>,
    in_flight: BinaryHeap<DelayedPacket>,
    next_ephemeral: u16,
}

impl LoopbackState {
    fn release_due(&mut self, now: Instant) {
        while self
            .in_flight
            .peek()
            .is_some_and(|packet| packet.release_time <= now)
        {
            let Some(packet) = self.in_flight.pop() else {
                break;
            };
            if let Some(mailbox) = self.mailboxes.get_mut(&packet.to) {
                mailbox.push_back((packet.payload, packet.from));
            }
        }
    }

    fn deliver(&mut self, from: Address, to: Address, bytes: &[u8]) {
        let conditions = self.conditions.get(&to).cloned().unwrap_or_default();
        if conditions.should_drop() {
            log::debug!("loopback dropped {} bytes {} -> {}", bytes.len(), from, to);
            return;
        }

        let delay = Duration::from_millis(conditions.delay_ms() as u64);
        if delay.is_zero() {
            if let Some(mailbox) = self.mailboxes.get_mut(&to) {
                mailbox.push_back((bytes.to_vec(), from));
            }
        } else {
            self.in_flight.push(DelayedPacket {
                release_time: Instant::now() + delay,
                payload: bytes.to_vec(),
                from,
                to,
            });
        }
    }
}

/// In-process datagram network. Sockets bound on it only see each other;
/// sends to a broadcast address reach every socket bound to that port.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bind(&self, addr: Address) -> io::Result<Arc<dyn Socket>> {
        let mut state = self.lock();

        let addr = if addr.port() == 0 {
            let mut port = state.next_ephemeral.max(FIRST_EPHEMERAL_PORT);
            while state.mailboxes.contains_key(&SocketAddr::new(addr.ip(), port)) {
                port = port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
            }
            state.next_ephemeral = port.wrapping_add(1);
            SocketAddr::new(addr.ip(), port)
        } else {
            addr
        };

        if state.mailboxes.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} already bound on loopback network"),
            ));
        }
        state.mailboxes.insert(addr, VecDeque::new());

        Ok(Arc::new(LoopbackSocket {
            addr,
            network: self.clone(),
        }))
    }

    pub fn factory(&self, ip: IpAddr) -> SocketFactory {
        let network = self.clone();
        Box::new(move |port| network.bind(SocketAddr::new(ip, port)))
    }

    /// Conditions applied to datagrams arriving at `addr`.
    pub fn set_conditions(&self, addr: Address, conditions: PacketLossSimulation) {
        let mut state = self.lock();
        if conditions.enabled {
            state.conditions.insert(addr, conditions);
        } else {
            state.conditions.remove(&addr);
        }
    }

    pub fn is_bound(&self, addr: Address) -> bool {
        self.lock().mailboxes.contains_key(&addr)
    }

    fn send(&self, from: Address, to: Address, bytes: &[u8]) -> usize {
        let mut state = self.lock();

        if is_broadcast(to.ip()) {
            let targets: Vec<Address> = state
                .mailboxes
                .keys()
                .filter(|addr| addr.port() == to.port() && **addr != from)
                .copied()
                .collect();
            for target in targets {
                state.deliver(from, target, bytes);
            }
        } else {
            state.deliver(from, to, bytes);
        }
        bytes.len()
    }

    fn recv(&self, at: Address) -> Option<(Vec<u8>, Address)> {
        let mut state = self.lock();
        state.release_due(Instant::now());
        state.mailboxes.get_mut(&at)?.pop_front()
    }

    fn unbind(&self, addr: Address) {
        let mut state = self.lock();
        state.mailboxes.remove(&addr);
        state.conditions.remove(&addr);
    }
}

fn is_broadcast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_broadcast(),
        IpAddr::V6(_) => false,
    }
}

#[derive(Debug)]
pub struct LoopbackSocket {
    addr: Address,
    network: LoopbackNetwork,
}

impl Socket for LoopbackSocket {
    fn send_to(&self, bytes: &[u8], addr: Address) -> io::Result<usize> {
        Ok(self.network.send(self.addr, addr, bytes))
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Address)>> {
        let Some((payload, from)) = self.network.recv(self.addr) else {
            return Ok(None);
        };
        // Same truncation behaviour as a real datagram socket.
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> io::Result<Address> {
        Ok(self.addr)
    }
}

impl Drop for LoopbackSocket {
    fn drop(&mut self) {
        self.network.unbind(self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn local(port: u16) -> Address {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn unicast_delivery() {
        let network = LoopbackNetwork::new();
        let a = network.bind(local(1000)).unwrap();
        let b = network.bind(local(1001)).unwrap();

        a.send_to(b"hello", local(1001)).unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, local(1000));
        assert!(a.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn broadcast_reaches_every_socket_on_the_port() {
        let network = LoopbackNetwork::new();
        let server = network.bind(local(27015)).unwrap();
        let first = network.bind(SocketAddr::from(([10, 0, 0, 1], 27016))).unwrap();
        let second = network.bind(SocketAddr::from(([10, 0, 0, 2], 27016))).unwrap();
        let other = network.bind(local(27017)).unwrap();

        server
            .send_to(b"beacon", SocketAddr::from((Ipv4Addr::BROADCAST, 27016)))
            .unwrap();

        let mut buf = [0u8; 16];
        assert!(first.recv_from(&mut buf).unwrap().is_some());
        assert!(second.recv_from(&mut buf).unwrap().is_some());
        assert!(other.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn double_bind_fails_and_drop_unbinds() {
        let network = LoopbackNetwork::new();
        let socket = network.bind(local(2000)).unwrap();
        let err = network.bind(local(2000)).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        drop(socket);
        assert!(!network.is_bound(local(2000)));
        assert!(network.bind(local(2000)).is_ok());
    }

    #[test]
    fn ephemeral_ports_are_unique() {
        let network = LoopbackNetwork::new();
        let a = network.bind(local(0)).unwrap();
        let b = network.bind(local(0)).unwrap();
        assert_ne!(a.local_addr().unwrap(), b.local_addr().unwrap());
    }

    #[test]
    fn lossy_receiver_drops_everything() {
        let network = LoopbackNetwork::new();
        let a = network.bind(local(3000)).unwrap();
        let b = network.bind(local(3001)).unwrap();
        network.set_conditions(local(3001), PacketLossSimulation::lossy(100.0));

        for _ in 0..8 {
            a.send_to(b"x", local(3001)).unwrap();
        }

        let mut buf = [0u8; 4];
        assert!(b.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn delayed_packets_arrive_later() {
        let network = LoopbackNetwork::new();
        let a = network.bind(local(4000)).unwrap();
        let b = network.bind(local(4001)).unwrap();
        network.set_conditions(
            local(4001),
            PacketLossSimulation {
                enabled: true,
                min_latency_ms: 20,
                max_latency_ms: 20,
                ..Default::default()
            },
        );

        a.send_to(b"late", local(4001)).unwrap();

        let mut buf = [0u8; 8];
        assert!(b.recv_from(&mut buf).unwrap().is_none());
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.recv_from(&mut buf).unwrap().is_some());
    }
}
