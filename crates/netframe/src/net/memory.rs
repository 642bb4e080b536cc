use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use super::stats::PacketLossSimulation;
use super::transport::{Transport, TransportEvent};

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    order: u64,
    data: Vec<u8>,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Everything travelling towards one side of the link.
#[derive(Debug, Default)]
struct Inbox {
    events: VecDeque<TransportEvent>,
    delayed: BinaryHeap<DelayedDatagram>,
}

/// Conditions applied to datagrams leaving one side.
#[derive(Debug, Default)]
struct Outbound {
    simulation: PacketLossSimulation,
    blocked: bool,
    last_sent: Option<Vec<u8>>,
}

#[derive(Debug)]
struct Link {
    inbox: [Inbox; 2],
    outbound: [Outbound; 2],
    open: bool,
    next_order: u64,
}

impl Link {
    fn deliver(&mut self, to: usize, data: Vec<u8>, release_time: Instant) {
        let order = self.next_order;
        self.next_order += 1;
        self.inbox[to].delayed.push(DelayedDatagram {
            release_time,
            order,
            data,
        });
    }
}

/// One end of an in-process datagram link. Both ends share the link state
/// and must live on the same thread.
#[derive(Debug)]
pub struct MemoryTransport {
    peer_id: String,
    side: usize,
    link: Rc<RefCell<Link>>,
}

impl MemoryTransport {
    /// Creates a linked pair that is already open; each side's first event
    /// is `Open`. `a.peer_id()` is `b_id` and vice versa.
    pub fn pair(a_id: &str, b_id: &str) -> (Self, Self) {
        let mut link = Link {
            inbox: Default::default(),
            outbound: Default::default(),
            open: true,
            next_order: 0,
        };
        for inbox in &mut link.inbox {
            inbox.events.push_back(TransportEvent::Open);
        }
        let link = Rc::new(RefCell::new(link));

        (
            Self {
                peer_id: b_id.to_string(),
                side: 0,
                link: Rc::clone(&link),
            },
            Self {
                peer_id: a_id.to_string(),
                side: 1,
                link,
            },
        )
    }

    /// Handle for adjusting this side's outbound conditions after the
    /// transport has been moved into a channel.
    pub fn controls(&self) -> LinkControl {
        LinkControl {
            side: self.side,
            link: Rc::clone(&self.link),
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.borrow().open
    }
}

impl Transport for MemoryTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn send(&mut self, datagram: &[u8]) -> bool {
        let mut link = self.link.borrow_mut();
        if !link.open {
            return false;
        }

        let outbound = &mut link.outbound[self.side];
        outbound.last_sent = Some(datagram.to_vec());
        if outbound.blocked || outbound.simulation.should_drop() {
            return true;
        }
        let release_time = Instant::now() + outbound.simulation.delay();

        link.deliver(1 - self.side, datagram.to_vec(), release_time);
        true
    }

    fn close(&mut self) {
        let mut link = self.link.borrow_mut();
        if !link.open {
            return;
        }
        link.open = false;
        for inbox in &mut link.inbox {
            inbox.delayed.clear();
            inbox.events.push_back(TransportEvent::Close);
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let mut link = self.link.borrow_mut();
        let inbox = &mut link.inbox[self.side];

        if inbox.events.front() == Some(&TransportEvent::Open) {
            return inbox.events.pop_front();
        }

        let now = Instant::now();
        if inbox.delayed.peek().is_some_and(|d| d.release_time <= now) {
            return inbox.delayed.pop().map(|d| TransportEvent::Message(d.data));
        }

        inbox.events.pop_front()
    }
}

/// Test and demo knobs for one direction of a memory link.
#[derive(Debug, Clone)]
pub struct LinkControl {
    side: usize,
    link: Rc<RefCell<Link>>,
}

impl LinkControl {
    pub fn set_simulation(&self, simulation: PacketLossSimulation) {
        self.link.borrow_mut().outbound[self.side].simulation = simulation;
    }

    /// While blocked, sends still report success but nothing arrives.
    pub fn set_blocked(&self, blocked: bool) {
        self.link.borrow_mut().outbound[self.side].blocked = blocked;
    }

    /// Delivers another copy of the last datagram this side sent, even if
    /// the original was dropped.
    pub fn replay_last(&self) -> bool {
        let mut link = self.link.borrow_mut();
        if !link.open {
            return false;
        }
        let Some(data) = link.outbound[self.side].last_sent.clone() else {
            return false;
        };
        link.deliver(1 - self.side, data, Instant::now());
        true
    }

    /// Drops everything in flight towards the other side.
    pub fn discard_in_flight(&self) {
        self.link.borrow_mut().inbox[1 - self.side].delayed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(transport: &mut MemoryTransport) -> Vec<TransportEvent> {
        std::iter::from_fn(|| transport.poll_event()).collect()
    }

    #[test]
    fn pair_opens_and_delivers_in_order() {
        let (mut a, mut b) = MemoryTransport::pair("a", "b");
        assert_eq!(a.peer_id(), "b");
        assert_eq!(b.peer_id(), "a");

        assert!(a.send(&[1]));
        assert!(a.send(&[2]));

        assert_eq!(
            drain(&mut b),
            vec![
                TransportEvent::Open,
                TransportEvent::Message(vec![1]),
                TransportEvent::Message(vec![2]),
            ]
        );
        assert_eq!(drain(&mut a), vec![TransportEvent::Open]);
    }

    #[test]
    fn close_reaches_both_sides_and_stops_sends() {
        let (mut a, mut b) = MemoryTransport::pair("a", "b");
        a.send(&[9]);
        b.close();

        assert!(!a.send(&[1]));
        assert!(!a.is_open());
        assert_eq!(drain(&mut a), vec![TransportEvent::Open, TransportEvent::Close]);
        assert_eq!(drain(&mut b), vec![TransportEvent::Open, TransportEvent::Close]);
    }

    #[test]
    fn blocked_direction_drops_silently_and_replay_duplicates() {
        let (mut a, mut b) = MemoryTransport::pair("a", "b");
        let controls = a.controls();
        drain(&mut b);

        controls.set_blocked(true);
        assert!(a.send(&[7]));
        assert!(drain(&mut b).is_empty());

        assert!(controls.replay_last());
        assert!(controls.replay_last());
        assert_eq!(
            drain(&mut b),
            vec![TransportEvent::Message(vec![7]), TransportEvent::Message(vec![7])]
        );
    }

    #[test]
    fn total_loss_simulation() {
        let (mut a, mut b) = MemoryTransport::pair("a", "b");
        a.controls().set_simulation(PacketLossSimulation::lossy(100.0));
        drain(&mut b);

        for i in 0..10 {
            assert!(a.send(&[i]));
        }
        assert!(drain(&mut b).is_empty());
    }
}
