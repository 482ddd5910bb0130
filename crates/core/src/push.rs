//! Push channel events: ticket changes plus connection lifecycle signals.

use serde::{Deserialize, Serialize};

use crate::{Ticket, TxnKey};

/// Hub method names carried on the wire.
pub const TICKET_ADDED: &str = "TicketAdded";
pub const TICKET_UPDATED: &str = "TicketUpdated";
pub const TICKET_REMOVED: &str = "TicketRemoved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PushEvent {
    Added(Ticket),
    Updated(Ticket),
    Removed(TxnKey),
}

impl PushEvent {
    pub fn key(&self) -> &str {
        match self {
            PushEvent::Added(t) | PushEvent::Updated(t) => &t.transaction_no,
            PushEvent::Removed(k) => k,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
            LinkState::Reconnecting => "Reconnecting",
            LinkState::Disconnected => "Disconnected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkEvent {
    StateChanged { from: LinkState, to: LinkState },
    Reconnecting,
    Reconnected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PushMessage {
    Ticket(PushEvent),
    Link(LinkEvent),
}
