/// Notifications a transport queues for its owner. They are drained once
/// per tick, never delivered in the middle of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Close,
    Message(Vec<u8>),
}

/// An unreliable, unordered datagram link to exactly one peer.
pub trait Transport {
    /// Opaque identifier of the remote peer.
    fn peer_id(&self) -> &str;

    /// Sends one datagram. Returns `false` when the link is not open or the
    /// datagram could not be handed to the network.
    fn send(&mut self, datagram: &[u8]) -> bool;

    fn close(&mut self);

    fn poll_event(&mut self) -> Option<TransportEvent>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn peer_id(&self) -> &str {
        (**self).peer_id()
    }

    fn send(&mut self, datagram: &[u8]) -> bool {
        (**self).send(datagram)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        (**self).poll_event()
    }
}
