//! Protocol counters.

use std::sync::atomic::{AtomicU64, Ordering};

use fleet_timestamp::Timestamp;
use serde::Serialize;

use crate::content::KnowledgeKind;

macro_rules! mk_stats {
    ($($(#[doc = $doc:expr])* $i:ident,)*) => {
        /// Monotonic counters updated from any task without locking.
        #[derive(Debug, Default)]
        pub(crate) struct ProtocolStats {
            $(
                pub(crate) $i: AtomicU64,
            )*
        }

        /// A point-in-time copy of the protocol counters.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct GossipStats {
            /// Knowledge family of the instance.
            pub kind: Option<KnowledgeKind>,
            $(
                $(#[doc = $doc])*
                pub $i: u64,
            )*
            /// Items currently held.
            pub current_items: u64,
            /// Active peers eligible for this kind.
            pub active_peers: u64,
            /// When the last gossip round completed.
            pub last_gossip_round: Option<Timestamp>,
            /// When the last anti-entropy round completed.
            pub last_anti_entropy_round: Option<Timestamp>,
        }

        impl ProtocolStats {
            pub(crate) fn snapshot(&self) -> GossipStats {
                GossipStats {
                    $(
                        $i: self.$i.load(Ordering::Relaxed),
                    )*
                    ..Default::default()
                }
            }
        }
    };
}

mk_stats! {
    /// Items authored locally via share.
    items_originated,
    /// Item hand-offs to peers, counted per item per peer.
    items_shared,
    /// Remote items accepted into the store.
    items_received,
    /// Items accepted through import.
    items_imported,
    /// Arrivals identical to what we already held, including our own echoes.
    duplicates_filtered,
    /// Arrivals that failed checksum, id, clock or decode checks.
    integrity_rejected,
    /// Arrivals that were already expired.
    expired_rejected,
    /// Arrivals that lost conflict resolution to the local version.
    stale_rejected,
    /// Items removed by TTL expiry.
    expired_purged,
    /// Items removed to stay within max_items.
    overflow_evicted,
    /// Payload bytes handed to the transport.
    bytes_transferred,
    /// Payloads sent in compressed form.
    items_compressed,
    /// Bytes saved by compression across all sent payloads.
    bytes_saved_by_compression,
    /// Conflicts resolved between two versions of an item.
    conflicts_resolved,
    /// Gossip rounds completed.
    gossip_rounds,
    /// Anti-entropy rounds completed.
    anti_entropy_rounds,
    /// Peer hand-offs that failed or timed out.
    send_failures,
}

impl ProtocolStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub(crate) fn add(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_copies_counters() {
        let s = ProtocolStats::default();
        ProtocolStats::incr(&s.items_shared);
        ProtocolStats::add(&s.bytes_transferred, 42);
        let snap = s.snapshot();
        assert_eq!(snap.items_shared, 1);
        assert_eq!(snap.bytes_transferred, 42);
        assert_eq!(snap.items_received, 0);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["bytesTransferred"], 42);
    }
}
