//! The set of agents this instance gossips with.

use std::collections::BTreeMap;

use fleet_timestamp::Timestamp;
use rand::seq::IteratorRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::content::KnowledgeKind;
use crate::vector_clock::VectorClock;
use crate::AgentId;

/// Which kinds of knowledge a peer wants to receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    /// Task experiences only.
    Experience,
    /// Test patterns only.
    Pattern,
    /// Everything.
    #[default]
    Any,
}

impl PeerKind {
    /// True if items of `kind` may be sent to this peer.
    pub fn accepts(&self, kind: KnowledgeKind) -> bool {
        match self {
            Self::Any => true,
            Self::Experience => kind == KnowledgeKind::Experience,
            Self::Pattern => kind == KnowledgeKind::Pattern,
        }
    }
}

impl From<KnowledgeKind> for PeerKind {
    fn from(k: KnowledgeKind) -> Self {
        match k {
            KnowledgeKind::Experience => Self::Experience,
            KnowledgeKind::Pattern => Self::Pattern,
        }
    }
}

/// What we know about a registered peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// The peer's agent id.
    pub peer_id: AgentId,
    /// Which knowledge it wants.
    pub kind: PeerKind,
    /// When it was registered here.
    pub registered_at: Timestamp,
    /// When we last received something from it, if ever.
    pub last_seen: Option<Timestamp>,
    /// Union of the clocks of items received from it.
    pub last_known_clock: VectorClock,
    /// Whether it is eligible as a gossip target.
    pub active: bool,
}

/// Registered peers, ordered by id so random selection is reproducible
/// under a seeded rng.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<AgentId, PeerRecord>,
}

impl PeerRegistry {
    /// Add or re-activate a peer. Registering an existing peer updates its
    /// kind and keeps its history.
    pub fn register(&mut self, peer_id: AgentId, kind: PeerKind, now: Timestamp) {
        self.peers
            .entry(peer_id.clone())
            .and_modify(|r| {
                r.kind = kind;
                r.active = true;
            })
            .or_insert_with(|| PeerRecord {
                peer_id,
                kind,
                registered_at: now,
                last_seen: None,
                last_known_clock: VectorClock::new(),
                active: true,
            });
    }

    /// Forget a peer. Returns false if it was unknown.
    pub fn unregister(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id).is_some()
    }

    /// Mark a peer as (in)eligible without forgetting it.
    pub fn set_active(&mut self, peer_id: &str, active: bool) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(r) => {
                r.active = active;
                true
            }
            None => false,
        }
    }

    /// Record that `peer_id` just sent us something with `clock`.
    pub fn touch(&mut self, peer_id: &str, now: Timestamp, clock: Option<&VectorClock>) {
        if let Some(r) = self.peers.get_mut(peer_id) {
            r.last_seen = Some(now);
            if let Some(clock) = clock {
                r.last_known_clock.merge(clock);
            }
        }
    }

    /// A copy of one peer's record.
    pub fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.get(peer_id).cloned()
    }

    /// All registered peer ids.
    pub fn ids(&self) -> Vec<AgentId> {
        self.peers.keys().cloned().collect()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True if no peers are registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Active peers that accept `kind`.
    pub fn eligible(&self, kind: KnowledgeKind) -> impl Iterator<Item = &AgentId> {
        self.peers
            .values()
            .filter(move |r| r.active && r.kind.accepts(kind))
            .map(|r| &r.peer_id)
    }

    /// Number of active peers that accept `kind`.
    pub fn eligible_count(&self, kind: KnowledgeKind) -> usize {
        self.eligible(kind).count()
    }

    /// Up to `fanout` distinct eligible peers, chosen uniformly at random.
    pub fn choose<R: Rng + ?Sized>(
        &self,
        kind: KnowledgeKind,
        fanout: usize,
        rng: &mut R,
    ) -> Vec<AgentId> {
        self.eligible(kind)
            .cloned()
            .choose_multiple(rng, fanout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn registry(n: usize) -> PeerRegistry {
        let mut r = PeerRegistry::default();
        for i in 0..n {
            r.register(format!("peer-{}", i).into(), PeerKind::Any, Timestamp::ZERO);
        }
        r
    }

    #[test]
    fn choose_is_distinct_and_bounded() {
        let r = registry(10);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for fanout in [0, 1, 3, 10, 20] {
            let chosen = r.choose(KnowledgeKind::Pattern, fanout, &mut rng);
            assert_eq!(chosen.len(), fanout.min(10));
            let distinct: HashSet<_> = chosen.iter().collect();
            assert_eq!(distinct.len(), chosen.len());
        }
    }

    #[test]
    fn choose_respects_kind_and_active() {
        let mut r = registry(2);
        r.register("exp".into(), PeerKind::Experience, Timestamp::ZERO);
        r.set_active("peer-0", false);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut chosen = r.choose(KnowledgeKind::Pattern, 10, &mut rng);
        chosen.sort();
        assert_eq!(chosen, vec![AgentId::from("peer-1")]);
        assert_eq!(r.eligible_count(KnowledgeKind::Experience), 2);
    }

    #[test]
    fn register_is_idempotent_and_touch_merges_clock() {
        let mut r = registry(1);
        r.register("peer-0".into(), PeerKind::Pattern, Timestamp::from_micros(5));
        assert_eq!(r.len(), 1);
        let now = Timestamp::from_micros(10);
        r.touch("peer-0", now, Some(&[("peer-0", 2)].into_iter().collect()));
        r.touch("peer-0", now, Some(&[("x", 1)].into_iter().collect()));
        let rec = r.get("peer-0").unwrap();
        assert_eq!(rec.kind, PeerKind::Pattern);
        assert_eq!(rec.registered_at, Timestamp::ZERO);
        assert_eq!(rec.last_seen, Some(now));
        assert_eq!(rec.last_known_clock.get("peer-0"), 2);
        assert_eq!(rec.last_known_clock.get("x"), 1);
        assert!(r.unregister("peer-0"));
        assert!(!r.unregister("peer-0"));
    }
}
