use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use super::Address;
use super::codec::{self, CodecError};
use super::protocol::{Message, WireMessage};

/// A received, already decompressed batch.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub sender: Address,
    pub payload: Vec<u8>,
    pub received_at: Instant,
}

impl Datagram {
    pub fn new(sender: Address, payload: Vec<u8>) -> Self {
        Self {
            sender,
            payload,
            received_at: Instant::now(),
        }
    }
}

/// Thread-safe enqueue side of a dispatcher. The network thread pushes,
/// the simulation thread swaps the whole vector out once per tick.
#[derive(Debug, Clone, Default)]
pub struct DispatchQueue {
    pending: Arc<Mutex<Vec<Datagram>>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, datagram: Datagram) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(datagram);
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn take(&self) -> Vec<Datagram> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, processing: &mut Vec<Datagram>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut *pending, processing);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub datagrams: usize,
    pub messages: usize,
    pub skipped: usize,
}

type Handler<C> = Box<dyn FnMut(&mut C, &[u8], Address) -> Result<(), CodecError> + Send>;
type Fallback<C> = Box<dyn FnMut(&mut C, Message, Address) + Send>;

pub struct MessageDispatcher<C> {
    handlers: HashMap<u32, Handler<C>>,
    fallback: Option<Fallback<C>>,
    queue: DispatchQueue,
    processing: Vec<Datagram>,
}

impl<C> Default for MessageDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MessageDispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: None,
            queue: DispatchQueue::new(),
            processing: Vec::new(),
        }
    }

    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    pub fn register<T, F>(&mut self, mut handler: F)
    where
        T: WireMessage,
        F: FnMut(&mut C, T, Address) + Send + 'static,
    {
        let previous = self.handlers.insert(
            T::TAG,
            Box::new(move |context, span, sender| {
                let message = codec::deserialize::<T>(span)?;
                handler(context, message, sender);
                Ok(())
            }),
        );
        if previous.is_some() {
            log::warn!("replaced existing handler for {}", T::NAME);
        }
    }

    /// Receives every known message that has no dedicated handler.
    pub fn register_fallback<F>(&mut self, handler: F)
    where
        F: FnMut(&mut C, Message, Address) + Send + 'static,
    {
        self.fallback = Some(Box::new(handler));
    }

    pub fn push(&self, datagram: Datagram) {
        self.queue.push(datagram);
    }

    pub fn update(&mut self, context: &mut C) -> DispatchStats {
        let mut stats = DispatchStats::default();

        let mut processing = std::mem::take(&mut self.processing);
        self.queue.swap(&mut processing);

        for datagram in processing.drain(..) {
            stats.datagrams += 1;

            let spans = match codec::unpack_batch(&datagram.payload) {
                Ok(spans) => spans,
                Err(e) => {
                    log::warn!("dropping batch from {}: {}", datagram.sender, e);
                    stats.skipped += 1;
                    continue;
                }
            };

            for span in spans {
                match self.dispatch(context, span, datagram.sender) {
                    Ok(()) => stats.messages += 1,
                    Err(e) => {
                        log::warn!("skipping message from {}: {}", datagram.sender, e);
                        stats.skipped += 1;
                    }
                }
            }
        }

        self.processing = processing;
        stats
    }

    fn dispatch(&mut self, context: &mut C, span: &[u8], sender: Address) -> Result<(), CodecError> {
        let tag = codec::peek_type(span).ok_or(CodecError::TooShort {
            expected: 4,
            actual: span.len(),
        })?;

        if let Some(handler) = self.handlers.get_mut(&tag) {
            return handler(context, span, sender);
        }

        let message = Message::decode(span)?;
        match self.fallback.as_mut() {
            Some(fallback) => fallback(context, message, sender),
            None => log::debug!("no handler for {} from {}", message.name(), sender),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::MessageBuffer;
    use crate::net::protocol::{HeartBeatMessage, PingMessage, TextMessage};

    #[derive(Default)]
    struct Recorder {
        pings: Vec<(u32, Address)>,
        heartbeats: usize,
        other: Vec<Message>,
    }

    fn sender() -> Address {
        "10.0.0.2:27016".parse().unwrap()
    }

    fn dispatcher() -> MessageDispatcher<Recorder> {
        let mut dispatcher = MessageDispatcher::new();
        dispatcher.register(|rec: &mut Recorder, ping: PingMessage, from| {
            rec.pings.push((ping.local_time_stamp, from));
        });
        dispatcher.register(|rec: &mut Recorder, _: HeartBeatMessage, _| {
            rec.heartbeats += 1;
        });
        dispatcher.register_fallback(|rec: &mut Recorder, message, _| {
            rec.other.push(message);
        });
        dispatcher
    }

    fn ping(local_time_stamp: u32) -> PingMessage {
        PingMessage {
            message_id: 0,
            local_time_stamp,
            server_time: 0,
        }
    }

    #[test]
    fn routes_messages_to_typed_handlers() {
        let mut dispatcher = dispatcher();
        let mut buffer = MessageBuffer::new();
        buffer.push(&ping(5));
        buffer.push(&HeartBeatMessage::default());
        buffer.push(&TextMessage::new("hello"));
        dispatcher.push(Datagram::new(sender(), buffer.as_bytes().to_vec()));

        let mut rec = Recorder::default();
        let stats = dispatcher.update(&mut rec);

        assert_eq!(stats.datagrams, 1);
        assert_eq!(stats.messages, 3);
        assert_eq!(rec.pings, vec![(5, sender())]);
        assert_eq!(rec.heartbeats, 1);
        assert!(matches!(rec.other.as_slice(), [Message::Text(t)] if t.text() == "hello"));
    }

    #[test]
    fn bad_entry_does_not_block_the_rest_of_the_batch() {
        let mut buffer = MessageBuffer::new();
        buffer.push(&ping(1));
        buffer.push(&ping(2));
        buffer.push(&ping(3));

        // Corrupt the tag of the middle entry: header(12) + entry(4 + 16) + length prefix(4).
        let mut bytes = buffer.as_bytes().to_vec();
        let tag_offset = 12 + 20 + 4;
        bytes[tag_offset..tag_offset + 4].copy_from_slice(&0xFFFFu32.to_le_bytes());

        let mut dispatcher = dispatcher();
        dispatcher.push(Datagram::new(sender(), bytes));

        let mut rec = Recorder::default();
        let stats = dispatcher.update(&mut rec);

        assert_eq!(stats.skipped, 1);
        assert_eq!(rec.pings.iter().map(|p| p.0).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn malformed_batch_is_skipped() {
        let mut dispatcher = dispatcher();
        dispatcher.push(Datagram::new(sender(), vec![1, 2, 3]));

        let mut rec = Recorder::default();
        let stats = dispatcher.update(&mut rec);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.messages, 0);
    }

    #[test]
    fn queue_is_shared_across_threads() {
        let mut dispatcher = dispatcher();
        let queue = dispatcher.queue();

        let handle = std::thread::spawn(move || {
            for i in 0..4 {
                let mut buffer = MessageBuffer::new();
                buffer.push(&ping(i));
                queue.push(Datagram::new(sender(), buffer.as_bytes().to_vec()));
            }
        });
        handle.join().unwrap();

        let mut rec = Recorder::default();
        dispatcher.update(&mut rec);
        assert_eq!(rec.pings.len(), 4);

        // Swapped out, not replayed.
        let stats = dispatcher.update(&mut rec);
        assert_eq!(stats.datagrams, 0);
    }
}
