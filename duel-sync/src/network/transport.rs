//! Message Channels
//!
//! The session layer only needs an ordered, reliable pipe that can be
//! polled once per frame. [`MessageChannel`] is that seam; the WebSocket
//! channel lives in `ws.rs`, and [`LoopbackChannel`] connects two peers in
//! one process for tests and the demo.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::network::protocol::{NetMessage, ProtocolError, WireFormat};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ordered, reliable, non-blocking message pipe to the peer.
pub trait MessageChannel {
    fn send(&mut self, message: &NetMessage) -> Result<(), TransportError>;

    /// Next inbound message, `Ok(None)` if nothing is waiting.
    fn try_recv(&mut self) -> Result<Option<NetMessage>, TransportError>;
}

// =============================================================================
// LOOPBACK
// =============================================================================

type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// One end of an in-process channel pair. Messages are really encoded so
/// the codec is exercised exactly as on a socket.
#[derive(Debug)]
pub struct LoopbackChannel {
    format: WireFormat,
    inbox: Queue,
    outbox: Queue,
    closed: Rc<Cell<bool>>,
    sent_bytes: u64,
}

impl LoopbackChannel {
    pub fn pair(format: WireFormat) -> (Self, Self) {
        let a_to_b: Queue = Rc::default();
        let b_to_a: Queue = Rc::default();
        let closed = Rc::new(Cell::new(false));
        let a = Self {
            format,
            inbox: b_to_a.clone(),
            outbox: a_to_b.clone(),
            closed: closed.clone(),
            sent_bytes: 0,
        };
        let b = Self {
            format,
            inbox: a_to_b,
            outbox: b_to_a,
            closed,
            sent_bytes: 0,
        };
        (a, b)
    }

    /// Close both ends. Already queued messages can still be read.
    pub fn close(&self) {
        self.closed.set(true);
    }

    /// Messages waiting for this end.
    pub fn pending(&self) -> usize {
        self.inbox.borrow().len()
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }
}

impl MessageChannel for LoopbackChannel {
    fn send(&mut self, message: &NetMessage) -> Result<(), TransportError> {
        if self.closed.get() {
            return Err(TransportError::Closed);
        }
        let bytes = message.encode(self.format)?;
        self.sent_bytes += bytes.len() as u64;
        self.outbox.borrow_mut().push_back(bytes);
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<NetMessage>, TransportError> {
        let next = self.inbox.borrow_mut().pop_front();
        match next {
            Some(bytes) => Ok(Some(NetMessage::decode(&bytes, self.format)?)),
            None if self.closed.get() => Err(TransportError::Closed),
            None => Ok(None),
        }
    }
}
