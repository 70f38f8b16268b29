use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::Address;
use super::codec::{self, BATCH_TOTAL_SIZE, CodecError, MessageBuffer};
use super::dispatcher::{Datagram, DispatchQueue};
use super::socket::Socket;
use super::stats::{ConnectionStats, StatsSnapshot};

const IDLE_POLL: Duration = Duration::from_millis(4);
const RECEIVE_BUFFER_SIZE: usize = BATCH_TOTAL_SIZE * 2;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("no free port in {start}..={end}")]
    NoFreePort { start: u16, end: u16 },
    #[error("server is not listening")]
    NotListening,
    #[error("not connected to a server")]
    NotConnected,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Status snapshot for overlays and logs.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub local_addr: Option<Address>,
    pub stats: StatsSnapshot,
    pub clients: Vec<String>,
}

/// Outbound side of a connection as seen by the replicators.
pub trait NetworkPipe {
    fn send_to(&mut self, buffer: &mut MessageBuffer, addr: Address) -> Result<usize, NetError>;

    fn connection_info(&self) -> ConnectionInfo;
}

/// Owns a socket, a background receive thread feeding a `DispatchQueue`,
/// and the send path used from the simulation thread.
pub struct RemoteConnection {
    socket: Arc<dyn Socket>,
    local_addr: Address,
    stats: Arc<ConnectionStats>,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
    compress: bool,
    next_batch_id: u32,
}

impl RemoteConnection {
    pub fn open(
        socket: Arc<dyn Socket>,
        queue: DispatchQueue,
        compress: bool,
    ) -> Result<Self, NetError> {
        let local_addr = socket.local_addr()?;
        let stats = Arc::new(ConnectionStats::new());
        let running = Arc::new(AtomicBool::new(true));

        let receiver = {
            let socket = Arc::clone(&socket);
            let stats = Arc::clone(&stats);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("net-recv-{}", local_addr.port()))
                .spawn(move || receive_loop(socket, queue, stats, running))?
        };

        log::debug!("connection open on {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            stats,
            running,
            receiver: Some(receiver),
            compress,
            next_batch_id: 0,
        })
    }

    pub fn local_addr(&self) -> Address {
        self.local_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stamps the batch id and sends, compressing the payload when that
    /// makes the datagram smaller.
    pub fn send_to(&mut self, buffer: &mut MessageBuffer, addr: Address) -> Result<usize, NetError> {
        buffer.set_id(self.next_batch_id);
        self.next_batch_id = self.next_batch_id.wrapping_add(1);

        let raw = buffer.as_bytes();
        let compressed = if self.compress {
            codec::compress_batch(raw)
        } else {
            None
        };
        let wire = compressed.as_deref().unwrap_or(raw);

        let sent = self.socket.send_to(wire, addr)?;
        self.stats.record_sent(raw.len(), sent);
        Ok(sent)
    }

    pub fn close(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.receiver.take() {
            if handle.join().is_err() {
                log::warn!("receive thread for {} panicked", self.local_addr);
            }
            log::debug!("connection on {} closed", self.local_addr);
        }
    }
}

impl Drop for RemoteConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(
    socket: Arc<dyn Socket>,
    queue: DispatchQueue,
    stats: Arc<ConnectionStats>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; RECEIVE_BUFFER_SIZE];

    while running.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok(Some((len, sender))) => match codec::decompress_batch(&buf[..len]) {
                Ok(payload) => {
                    stats.record_received(payload.len(), len);
                    queue.push(Datagram::new(sender, payload.into_owned()));
                }
                Err(e) => {
                    stats.record_dropped();
                    log::warn!("dropping datagram from {}: {}", sender, e);
                }
            },
            Ok(None) => thread::sleep(IDLE_POLL),
            Err(e) => {
                log::warn!("receive error: {}", e);
                thread::sleep(IDLE_POLL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::TransformMessage;
    use crate::net::simulator::LoopbackNetwork;
    use std::net::SocketAddr;
    use std::time::Instant;

    fn local(port: u16) -> Address {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn wait_for(queue: &DispatchQueue, count: usize) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(500) {
            if queue.len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn full_buffer() -> MessageBuffer {
        let mut buffer = MessageBuffer::new();
        let mut id = 0;
        while buffer.push(&TransformMessage {
            entity_id: id,
            ..Default::default()
        }) {
            id += 1;
        }
        buffer
    }

    #[test]
    fn compressed_send_arrives_decompressed() {
        let network = LoopbackNetwork::new();
        let queue_a = DispatchQueue::new();
        let queue_b = DispatchQueue::new();
        let mut a = RemoteConnection::open(network.bind(local(5000)).unwrap(), queue_a, true).unwrap();
        let _b = RemoteConnection::open(network.bind(local(5001)).unwrap(), queue_b.clone(), true).unwrap();

        let mut buffer = full_buffer();
        let sent = a.send_to(&mut buffer, local(5001)).unwrap();
        assert!(sent < buffer.len());

        assert!(wait_for(&queue_b, 1));
        let received = queue_b.take();
        assert_eq!(received[0].payload, buffer.as_bytes());
        assert_eq!(received[0].sender, local(5000));

        let stats = a.stats();
        assert_eq!(stats.packages_sent, 1);
        assert_eq!(stats.bytes_sent, buffer.len() as u64);
        assert_eq!(stats.wire_bytes_sent, sent as u64);
    }

    #[test]
    fn batch_ids_increase_per_send() {
        let network = LoopbackNetwork::new();
        let mut a =
            RemoteConnection::open(network.bind(local(5100)).unwrap(), DispatchQueue::new(), false).unwrap();
        let _sink = network.bind(local(5101)).unwrap();

        let mut buffer = MessageBuffer::new();
        a.send_to(&mut buffer, local(5101)).unwrap();
        assert_eq!(buffer.header().id, 0);
        a.send_to(&mut buffer, local(5101)).unwrap();
        assert_eq!(buffer.header().id, 1);
    }

    #[test]
    fn close_stops_receive_thread() {
        let network = LoopbackNetwork::new();
        let mut a =
            RemoteConnection::open(network.bind(local(5200)).unwrap(), DispatchQueue::new(), false).unwrap();
        assert!(a.is_running());
        a.close();
        assert!(!a.is_running());
    }
}
