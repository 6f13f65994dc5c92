//! Notifications emitted as items move through the protocol.

use fleet_timestamp::Timestamp;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::conflict::Resolution;
use crate::item::ItemId;
use crate::AgentId;

/// Something observable happened inside a protocol instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipEvent {
    /// An item was handed to a peer.
    ItemShared {
        /// The item.
        item_id: ItemId,
        /// The receiving peer.
        peer_id: AgentId,
    },
    /// A remote item was accepted into the store.
    ItemReceived {
        /// The item.
        item_id: ItemId,
        /// The agent that authored it.
        source_agent_id: AgentId,
    },
    /// Two versions of an item met and one survived.
    ConflictResolved {
        /// The item.
        item_id: ItemId,
        /// How it was decided.
        resolution: Resolution,
    },
    /// Items were removed by expiry or to make room.
    ItemsEvicted {
        /// Removed because expired.
        expired: usize,
        /// Removed to stay within max_items.
        overflow: usize,
    },
    /// A gossip round finished.
    RoundCompleted {
        /// Items selected for the round.
        items: usize,
        /// Peers targeted.
        peers: usize,
        /// When the round finished.
        at: Timestamp,
    },
    /// An anti-entropy round finished.
    AntiEntropyCompleted {
        /// Items pushed.
        items: usize,
        /// Peers targeted.
        peers: usize,
        /// When the round finished.
        at: Timestamp,
    },
}

/// Fan-out of [`GossipEvent`]s to any number of subscribers.
///
/// Emitting never blocks and never fails: with no subscribers the event is
/// dropped, and a lagging subscriber loses the oldest events.
#[derive(Debug, Clone)]
pub(crate) struct EventChannel(broadcast::Sender<GossipEvent>);

impl EventChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self(tx)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<GossipEvent> {
        self.0.subscribe()
    }

    pub(crate) fn emit(&self, evt: GossipEvent) {
        // only fails when nobody is listening
        let _ = self.0.send(evt);
    }
}
