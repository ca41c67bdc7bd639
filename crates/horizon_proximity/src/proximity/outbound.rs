//! FIFO queues of finished result messages awaiting delivery.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct OutboundQueue<M> {
    pending: VecDeque<M>,
}

impl<M> OutboundQueue<M> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, message: M) {
        self.pending.push_back(message);
    }

    /// Hands messages to `send` oldest first and stops at the first refusal.
    /// The refused message and everything behind it stay queued. Returns the
    /// number of messages sent.
    pub fn drain_with(&mut self, mut send: impl FnMut(&M) -> bool) -> usize {
        let mut sent = 0;
        while let Some(message) = self.pending.front() {
            if !send(message) {
                break;
            }
            self.pending.pop_front();
            sent += 1;
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<M> Default for OutboundQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}
