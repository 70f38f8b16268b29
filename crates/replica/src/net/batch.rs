use std::collections::VecDeque;

use super::Address;
use super::codec::MessageBuffer;
use super::protocol::{Message, WireMessage};

#[derive(Debug, Clone)]
pub struct OutgoingBatch {
    pub addr: Address,
    pub buffer: MessageBuffer,
}

/// Completed datagrams waiting for the socket.
#[derive(Debug, Default)]
pub struct SendQueue {
    batches: VecDeque<OutgoingBatch>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch: OutgoingBatch) {
        self.batches.push_back(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn pop(&mut self) -> Option<OutgoingBatch> {
        self.batches.pop_front()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&OutgoingBatch) -> bool) {
        self.batches.retain(|batch| keep(batch));
    }

    /// Drops the oldest batches until at most `limit` remain. Returns how
    /// many were dropped.
    pub fn truncate_oldest(&mut self, limit: usize) -> usize {
        let excess = self.batches.len().saturating_sub(limit);
        self.batches.drain(..excess);
        excess
    }
}

/// Packs messages for one address, starting a new datagram whenever the
/// current one is full. Whatever is left is flushed on drop.
pub struct BatchedMessageSender<'a> {
    addr: Address,
    buffer: MessageBuffer,
    queue: &'a mut SendQueue,
    messages: usize,
}

impl<'a> BatchedMessageSender<'a> {
    pub fn new(addr: Address, queue: &'a mut SendQueue) -> Self {
        Self {
            addr,
            buffer: MessageBuffer::new(),
            queue,
            messages: 0,
        }
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn messages(&self) -> usize {
        self.messages
    }

    pub fn send<T: WireMessage>(&mut self, message: &T) -> bool {
        if !self.buffer.push(message) {
            self.flush();
            if !self.buffer.push(message) {
                log::warn!(
                    "{} ({} bytes) does not fit in an empty datagram",
                    T::NAME,
                    T::wire_size()
                );
                return false;
            }
        }
        self.messages += 1;
        true
    }

    pub fn send_message(&mut self, message: &Message) -> bool {
        if !message.encode_into(&mut self.buffer) {
            self.flush();
            if !message.encode_into(&mut self.buffer) {
                log::warn!("{} does not fit in an empty datagram", message.name());
                return false;
            }
        }
        self.messages += 1;
        true
    }

    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let buffer = std::mem::take(&mut self.buffer);
        self.queue.push(OutgoingBatch {
            addr: self.addr,
            buffer,
        });
    }
}

impl Drop for BatchedMessageSender<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
