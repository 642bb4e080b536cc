#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    PeerJoined {
        peer_id: String,
    },
    PeerConnected {
        peer_id: String,
    },
    PeerLeft {
        peer_id: String,
        reason: DisconnectReason,
    },
    PeerDenied {
        peer_id: String,
        reason: String,
    },
    VisibilityChanged {
        peer_id: String,
        visible: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport closed, from either end.
    Closed,
    /// Removed locally through the module.
    Kicked,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Closed => "disconnected",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Shutdown => "server shutdown",
        }
    }
}
