use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::stats::PacketLossSimulation;
use super::transport::{Transport, TransportEvent};

const HELLO: &[u8; 4] = b"NFH1";
const WELCOME: &[u8; 4] = b"NFW1";
const BYE: &[u8; 4] = b"NFB1";

const HANDSHAKE_RETRY: Duration = Duration::from_millis(250);
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("no address found for {0}")]
    Unresolved(String),
    #[error("no welcome from {addr} within {timeout:?}")]
    HandshakeTimeout { addr: SocketAddr, timeout: Duration },
}

fn unspecified_for(addr: &SocketAddr) -> SocketAddr {
    if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    }
}

/// Client side of a UDP link to a `UdpHost`.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer_id: String,
    events: VecDeque<TransportEvent>,
    open: bool,
    recv_buffer: Vec<u8>,
}

/// One byte past the largest accepted datagram, so oversized datagrams show
/// up as too long instead of arriving truncated.
fn receive_buffer(max_packet_size: usize) -> Vec<u8> {
    vec![0u8; max_packet_size + 1]
}

impl UdpTransport {
    /// Resolves `addr`, then repeats a hello until the host answers or
    /// `timeout` elapses. The returned transport never blocks. Datagrams
    /// longer than `max_packet_size` are dropped.
    pub async fn connect(
        addr: &str,
        timeout: Duration,
        max_packet_size: usize,
    ) -> Result<Self, NetError> {
        let remote = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| NetError::Unresolved(addr.to_string()))?;

        let socket = tokio::net::UdpSocket::bind(unspecified_for(&remote)).await?;
        socket.connect(remote).await?;

        let handshake = async {
            let mut buffer = [0u8; 64];
            loop {
                socket.send(HELLO).await?;
                match tokio::time::timeout(HANDSHAKE_RETRY, socket.recv(&mut buffer)).await {
                    Ok(Ok(size)) if &buffer[..size] == WELCOME => return Ok::<_, io::Error>(()),
                    Ok(Ok(_)) => continue,
                    // The host may not be bound yet.
                    Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                        tokio::time::sleep(HANDSHAKE_RETRY).await;
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => log::debug!("Handshake with {} timed out, retrying", remote),
                }
            }
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| NetError::HandshakeTimeout {
                addr: remote,
                timeout,
            })??;

        let socket = socket.into_std()?;
        socket.set_nonblocking(true)?;
        log::info!("Connected to {} from {}", remote, socket.local_addr()?);

        Ok(Self {
            socket,
            peer_id: remote.to_string(),
            events: VecDeque::from([TransportEvent::Open]),
            open: true,
            recv_buffer: receive_buffer(max_packet_size),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn mark_closed(&mut self) {
        if self.open {
            self.open = false;
            self.events.push_back(TransportEvent::Close);
        }
    }
}

impl Transport for UdpTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn send(&mut self, datagram: &[u8]) -> bool {
        if !self.open {
            return false;
        }
        match self.socket.send(datagram) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Send to {} failed: {}", self.peer_id, e);
                false
            }
        }
    }

    fn close(&mut self) {
        if self.open {
            let _ = self.socket.send(BYE);
        }
        self.mark_closed();
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        if !self.open {
            return None;
        }

        loop {
            match self.socket.recv(&mut self.recv_buffer) {
                Ok(size) if size == self.recv_buffer.len() => {
                    log::warn!("Dropping oversized datagram from {}", self.peer_id);
                }
                Ok(size) => {
                    let data = &self.recv_buffer[..size];
                    if data == BYE {
                        log::info!("Host {} closed the link", self.peer_id);
                        self.mark_closed();
                        return self.events.pop_front();
                    }
                    if data == WELCOME {
                        continue;
                    }
                    return Some(TransportEvent::Message(data.to_vec()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    log::warn!("Host {} unreachable", self.peer_id);
                    self.mark_closed();
                    return self.events.pop_front();
                }
                Err(e) => {
                    log::warn!("Receive from {} failed: {}", self.peer_id, e);
                    return None;
                }
            }
        }
    }
}

#[derive(Debug)]
struct PeerInbox {
    events: VecDeque<TransportEvent>,
    open: bool,
    last_heard: Instant,
}

impl PeerInbox {
    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.events.push_back(TransportEvent::Close);
        }
    }
}

/// Server-side UDP socket shared by every connected peer.
#[derive(Debug)]
pub struct UdpHost {
    socket: Rc<UdpSocket>,
    peers: HashMap<SocketAddr, Rc<RefCell<PeerInbox>>>,
    recv_buffer: Vec<u8>,
    peer_timeout: Duration,
    simulation: Option<PacketLossSimulation>,
}

impl UdpHost {
    /// Binds the shared socket. Datagrams longer than `max_packet_size` are
    /// dropped.
    pub fn bind<A: ToSocketAddrs>(addr: A, max_packet_size: usize) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket: Rc::new(socket),
            peers: HashMap::new(),
            recv_buffer: receive_buffer(max_packet_size),
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            simulation: None,
        })
    }

    /// Random outbound loss applied to peers created after this call.
    /// Latency settings are ignored on real sockets.
    pub fn set_simulation(&mut self, simulation: Option<PacketLossSimulation>) {
        self.simulation = simulation.filter(|s| s.enabled);
    }

    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Reads every waiting datagram, routes it to its peer and returns the
    /// peers that said hello since the last call.
    pub fn poll(&mut self) -> Vec<UdpPeer> {
        let mut joined = Vec::new();

        loop {
            let (size, addr) = match self.socket.recv_from(&mut self.recv_buffer) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP errors from a vanished client surface here on some platforms.
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    log::warn!("Host receive failed: {}", e);
                    break;
                }
            };
            if size == self.recv_buffer.len() {
                log::warn!("Dropping oversized datagram from {}", addr);
                continue;
            }
            let data = &self.recv_buffer[..size];

            if data == HELLO {
                if let Err(e) = self.socket.send_to(WELCOME, addr) {
                    log::warn!("Welcome to {} failed: {}", addr, e);
                    continue;
                }
                if !self.peers.contains_key(&addr) {
                    log::debug!("Hello from {}", addr);
                    let inbox = Rc::new(RefCell::new(PeerInbox {
                        events: VecDeque::from([TransportEvent::Open]),
                        open: true,
                        last_heard: Instant::now(),
                    }));
                    self.peers.insert(addr, Rc::clone(&inbox));
                    joined.push(UdpPeer {
                        addr,
                        peer_id: addr.to_string(),
                        socket: Rc::clone(&self.socket),
                        inbox,
                        simulation: self.simulation.clone(),
                    });
                }
                continue;
            }

            let Some(inbox) = self.peers.get(&addr) else {
                log::debug!("Dropping {} bytes from unknown address {}", size, addr);
                continue;
            };
            let mut inbox = inbox.borrow_mut();
            inbox.last_heard = Instant::now();
            if data == BYE {
                log::debug!("Goodbye from {}", addr);
                inbox.close();
            } else if inbox.open {
                inbox.events.push_back(TransportEvent::Message(data.to_vec()));
            }
        }

        let timeout = self.peer_timeout;
        for (addr, inbox) in &self.peers {
            let mut inbox = inbox.borrow_mut();
            if inbox.open && inbox.last_heard.elapsed() > timeout {
                log::info!("Peer {} timed out", addr);
                inbox.close();
            }
        }

        // Forget peers that were closed or dropped by their owner.
        self.peers
            .retain(|_, inbox| inbox.borrow().open && Rc::strong_count(inbox) > 1);

        joined
    }
}

/// One client as seen by a `UdpHost`. Its peer id is the client's socket
/// address.
#[derive(Debug)]
pub struct UdpPeer {
    addr: SocketAddr,
    peer_id: String,
    socket: Rc<UdpSocket>,
    inbox: Rc<RefCell<PeerInbox>>,
    simulation: Option<PacketLossSimulation>,
}

impl UdpPeer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Transport for UdpPeer {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn send(&mut self, datagram: &[u8]) -> bool {
        if !self.inbox.borrow().open {
            return false;
        }
        if self.simulation.as_ref().is_some_and(|s| s.should_drop()) {
            return true;
        }
        match self.socket.send_to(datagram, self.addr) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Send to {} failed: {}", self.addr, e);
                false
            }
        }
    }

    fn close(&mut self) {
        let mut inbox = self.inbox.borrow_mut();
        if inbox.open {
            let _ = self.socket.send_to(BYE, self.addr);
        }
        inbox.close();
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.inbox.borrow_mut().events.pop_front()
    }
}
