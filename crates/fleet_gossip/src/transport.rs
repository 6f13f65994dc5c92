//! The seam between the protocol and whatever moves bytes between agents.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::GossipResult;
use crate::item::WireItem;
use crate::AgentId;

/// Which loop produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    /// The frequent epidemic round.
    #[display(fmt = "gossip")]
    Gossip,
    /// The slower reconciliation round.
    #[display(fmt = "anti_entropy")]
    AntiEntropy,
}

/// A batch of items sent from one agent to one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipMessage {
    /// The sending agent.
    pub from: AgentId,
    /// Which loop sent it.
    pub round: RoundKind,
    /// The items, already encoded for the wire.
    pub items: Vec<WireItem>,
}

impl GossipMessage {
    /// Total payload bytes carried.
    pub fn payload_bytes(&self) -> usize {
        self.items.iter().map(|i| i.payload.len()).sum()
    }
}

/// Delivers gossip messages to peers.
///
/// A successful future means the message was handed off, not that the peer
/// accepted any item in it. Delivery is at-least-once at best; the receive
/// path is idempotent.
#[cfg_attr(any(test, feature = "test_utils"), mockall::automock)]
pub trait GossipTransport: 'static + Send + Sync {
    /// Hand `msg` to `peer`.
    fn send(&self, peer: AgentId, msg: GossipMessage) -> BoxFuture<'static, GossipResult<()>>;
}

/// A shareable transport.
pub type DynTransport = Arc<dyn GossipTransport>;
