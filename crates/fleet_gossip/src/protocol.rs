//! One gossip protocol instance per agent and knowledge kind.

use std::sync::Arc;

use fleet_timestamp::Timestamp;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::Instrument;

use crate::codec::CompressionCodec;
use crate::config::{GossipConfig, GossipTuningParams};
use crate::conflict::{self, Resolution, Winner};
use crate::content::KnowledgeContent;
use crate::error::{GossipError, GossipResult};
use crate::event::{EventChannel, GossipEvent};
use crate::item::{ContentDigest, ItemId, SharedItem, WireItem};
use crate::peers::{PeerKind, PeerRecord, PeerRegistry};
use crate::scheduler::Scheduler;
use crate::select::select_items;
use crate::share::Share;
use crate::stats::{GossipStats, ProtocolStats};
use crate::store::{EvictionReport, ItemStore, MemItemStore};
use crate::transport::{DynTransport, GossipMessage, RoundKind};
use crate::vector_clock::{ClockOrdering, VectorClock};
use crate::AgentId;

/// What a single gossip or anti-entropy round did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    /// Items selected and encoded.
    pub items: usize,
    /// Peers targeted.
    pub peers: usize,
    /// Peers the message was handed to.
    pub delivered: usize,
    /// Peers whose hand-off failed or timed out.
    pub failed: usize,
}

struct GossipState<C: KnowledgeContent> {
    clock: VectorClock,
    store: Box<dyn ItemStore<C>>,
    peers: PeerRegistry,
    rng: StdRng,
    last_gossip_round: Option<Timestamp>,
    last_anti_entropy_round: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Remote,
    Import,
}

enum Arrival {
    Accepted {
        resolution: Option<Resolution>,
        evicted: EvictionReport,
    },
    Duplicate,
    Stale(Resolution),
}

/// Epidemic dissemination of one kind of knowledge for one agent.
///
/// All state is owned by the instance and serialized behind a single lock
/// which is never held across an `.await`. Peers only ever see items through
/// the [`GossipTransport`](crate::GossipTransport).
pub struct KnowledgeGossip<C: KnowledgeContent> {
    agent_id: AgentId,
    tuning: GossipTuningParams,
    codec: CompressionCodec,
    transport: DynTransport,
    state: Share<GossipState<C>>,
    stats: ProtocolStats,
    events: EventChannel,
    pub(crate) scheduler: parking_lot::Mutex<Option<Scheduler>>,
}

impl<C: KnowledgeContent> std::fmt::Debug for KnowledgeGossip<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeGossip")
            .field("agent_id", &self.agent_id)
            .field("kind", &C::KIND)
            .finish()
    }
}

fn normalize_priority(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl<C: KnowledgeContent> KnowledgeGossip<C> {
    /// Construct an instance backed by an in-memory store.
    pub fn new(config: GossipConfig, transport: DynTransport) -> GossipResult<Arc<Self>> {
        Self::with_store(config, transport, Box::new(MemItemStore::new()))
    }

    /// Construct an instance backed by `store`. Fails fast on invalid config.
    pub fn with_store(
        config: GossipConfig,
        transport: DynTransport,
        store: Box<dyn ItemStore<C>>,
    ) -> GossipResult<Arc<Self>> {
        config.validate()?;
        let GossipConfig { agent_id, tuning } = config;
        tracing::debug!(agent = %agent_id, kind = %C::KIND, ?tuning, "new gossip instance");
        Ok(Arc::new(Self {
            codec: CompressionCodec::from_tuning(&tuning),
            events: EventChannel::new(tuning.event_channel_capacity as usize),
            state: Share::new(GossipState {
                clock: VectorClock::new(),
                store,
                peers: PeerRegistry::default(),
                rng: StdRng::from_entropy(),
                last_gossip_round: None,
                last_anti_entropy_round: None,
            }),
            stats: ProtocolStats::default(),
            scheduler: parking_lot::Mutex::new(None),
            agent_id,
            tuning,
            transport,
        }))
    }

    /// The local agent.
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The tuning params this instance runs with.
    pub fn tuning(&self) -> &GossipTuningParams {
        &self.tuning
    }

    /// Replace the peer-selection rng with a seeded one, making gossip target
    /// choice reproducible.
    pub fn reseed(&self, seed: u64) {
        self.state.write(|s| s.rng = StdRng::seed_from_u64(seed));
    }

    /// Subscribe to protocol notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GossipEvent> {
        self.events.subscribe()
    }

    /// Make `peer_id` a gossip target. Registering ourselves is ignored.
    pub fn register_peer(&self, peer_id: impl Into<AgentId>, kind: PeerKind) {
        let peer_id = peer_id.into();
        if peer_id == self.agent_id {
            tracing::debug!(agent = %self.agent_id, "ignoring self registration");
            return;
        }
        let now = Timestamp::now();
        self.state.write(|s| s.peers.register(peer_id, kind, now));
    }

    /// Stop gossiping with `peer_id`. Returns false if it was unknown.
    pub fn unregister_peer(&self, peer_id: &str) -> bool {
        self.state.write(|s| s.peers.unregister(peer_id))
    }

    /// Pause or resume gossip to `peer_id` without forgetting what we know
    /// about it. Returns false if it was unknown.
    pub fn set_peer_active(&self, peer_id: &str, active: bool) -> bool {
        let known = self.state.write(|s| s.peers.set_active(peer_id, active));
        if known {
            tracing::debug!(agent = %self.agent_id, %peer_id, active, "peer activity changed");
        }
        known
    }

    /// Record that `peer_id` was just heard from.
    pub fn touch_peer(&self, peer_id: &str) {
        let now = Timestamp::now();
        self.state.write(|s| s.peers.touch(peer_id, now, None));
    }

    /// Ids of every registered peer.
    pub fn peer_ids(&self) -> Vec<AgentId> {
        self.state.read(|s| s.peers.ids())
    }

    /// A copy of one peer's record.
    pub fn peer(&self, peer_id: &str) -> Option<PeerRecord> {
        self.state.read(|s| s.peers.get(peer_id))
    }

    /// A copy of the local vector clock.
    pub fn local_clock(&self) -> VectorClock {
        self.state.read(|s| s.clock.clone())
    }

    /// Author a new item from `content`. Without an explicit priority the
    /// content's own estimate is used. Out-of-range priorities are clamped.
    pub fn share(&self, content: C, priority: Option<f64>) -> GossipResult<ItemId> {
        if C::KIND.has_quality_floor() {
            let quality = content.quality();
            let floor = self.tuning.min_quality_to_share;
            if quality < floor {
                return Err(GossipError::BelowQualityFloor { quality, floor });
            }
        }
        let priority = normalize_priority(priority.unwrap_or_else(|| content.priority()));
        let digest = ContentDigest::of(&content)?;
        let now = Timestamp::now();
        let ttl = self.tuning.item_ttl();
        let max_items = self.tuning.max_items as usize;

        let (item_id, evicted) = self.state.write(|s| -> GossipResult<_> {
            s.clock.increment(&self.agent_id);
            let item = SharedItem::new(
                content,
                digest,
                self.agent_id.clone(),
                s.clock.clone(),
                priority,
                now,
                ttl,
            )?;
            let item_id = item.id.clone();
            s.store.put(item);
            Ok((item_id, s.store.evict(now, max_items)))
        })?;

        ProtocolStats::incr(&self.stats.items_originated);
        self.record_eviction(&evicted);
        tracing::debug!(agent = %self.agent_id, %item_id, priority, "shared item");
        Ok(item_id)
    }

    /// Validate and merge an item that arrived from a peer.
    ///
    /// Never fails: integrity problems, expiry and lost conflicts are logged,
    /// counted and reported as `false`.
    pub fn receive(&self, wire: WireItem) -> bool {
        let item_id = wire.id.clone();
        let source = wire.source_agent_id.clone();
        match SharedItem::<C>::from_wire(wire, &self.codec) {
            Ok(item) => self.accept(item, Origin::Remote),
            Err(err) => {
                ProtocolStats::incr(&self.stats.integrity_rejected);
                tracing::warn!(agent = %self.agent_id, %item_id, %source, reason = %err, "rejected gossip item");
                false
            }
        }
    }

    /// [`Self::receive`] for a JSON-encoded [`WireItem`].
    pub fn receive_bytes(&self, bytes: &[u8]) -> bool {
        match WireItem::decode(bytes) {
            Ok(wire) => self.receive(wire),
            Err(err) => {
                ProtocolStats::incr(&self.stats.integrity_rejected);
                tracing::warn!(agent = %self.agent_id, reason = %err, "undecodable gossip item");
                false
            }
        }
    }

    /// Receive every item in a message. Returns how many were accepted.
    pub fn receive_message(&self, msg: GossipMessage) -> usize {
        let GossipMessage { from, round, items } = msg;
        self.touch_peer(&from);
        let total = items.len();
        let accepted = items
            .into_iter()
            .map(|w| self.receive(w))
            .filter(|accepted| *accepted)
            .count();
        tracing::trace!(agent = %self.agent_id, %from, %round, total, accepted, "received gossip message");
        accepted
    }

    /// Load previously exported items. Each goes through the same validation
    /// and conflict path as a received item. Returns how many were accepted.
    pub fn import_items(&self, items: Vec<SharedItem<C>>) -> usize {
        let mut imported = 0;
        for item in items {
            if let Err(err) = item.verify() {
                ProtocolStats::incr(&self.stats.integrity_rejected);
                tracing::warn!(agent = %self.agent_id, item_id = %item.id, reason = %err, "rejected imported item");
                continue;
            }
            if self.accept(item, Origin::Import) {
                imported += 1;
            }
        }
        imported
    }

    fn accept(&self, item: SharedItem<C>, origin: Origin) -> bool {
        let now = Timestamp::now();
        let item_id = item.id.clone();
        let source = item.source_agent_id.clone();

        if item.is_expired(now) {
            ProtocolStats::incr(&self.stats.expired_rejected);
            let reason = GossipError::Expired(item_id.to_string().into_boxed_str());
            tracing::debug!(agent = %self.agent_id, %item_id, %source, %reason, "rejected gossip item");
            return false;
        }

        let max_items = self.tuning.max_items as usize;
        let arrival = self.state.write(|s| {
            s.clock.merge(&item.vector_clock);
            s.peers.touch(&source, now, Some(&item.vector_clock));

            let mut item = item;
            let local = s.store.get(&item.id).filter(|l| !l.is_expired(now));
            let mut resolution = None;
            if let Some(mut local) = local {
                let ordering = local.vector_clock.compare(&item.vector_clock);
                let echo = source == self.agent_id && ordering == ClockOrdering::After;
                if ordering == ClockOrdering::Equal || echo {
                    return Arrival::Duplicate;
                }
                let r = conflict::resolve(&local, &item);
                match r.winner {
                    Winner::Local => {
                        // the survivor absorbs the loser's history
                        local.vector_clock.merge(&item.vector_clock);
                        s.store.put(local);
                        return Arrival::Stale(r);
                    }
                    Winner::Remote => {
                        item.vector_clock.merge(&local.vector_clock);
                        resolution = Some(r);
                    }
                }
            }
            s.store.put(item);
            Arrival::Accepted {
                resolution,
                evicted: s.store.evict(now, max_items),
            }
        });

        match arrival {
            Arrival::Duplicate => {
                ProtocolStats::incr(&self.stats.duplicates_filtered);
                tracing::trace!(agent = %self.agent_id, %item_id, %source, "duplicate gossip item");
                false
            }
            Arrival::Stale(resolution) => {
                ProtocolStats::incr(&self.stats.conflicts_resolved);
                ProtocolStats::incr(&self.stats.stale_rejected);
                self.events.emit(GossipEvent::ConflictResolved {
                    item_id: item_id.clone(),
                    resolution,
                });
                tracing::debug!(agent = %self.agent_id, %item_id, %source, reason = "stale", ordering = %resolution.ordering, "kept local version");
                false
            }
            Arrival::Accepted {
                resolution,
                evicted,
            } => {
                if let Some(resolution) = resolution {
                    ProtocolStats::incr(&self.stats.conflicts_resolved);
                    self.events.emit(GossipEvent::ConflictResolved {
                        item_id: item_id.clone(),
                        resolution,
                    });
                }
                match origin {
                    Origin::Remote => ProtocolStats::incr(&self.stats.items_received),
                    Origin::Import => ProtocolStats::incr(&self.stats.items_imported),
                }
                self.record_eviction(&evicted);
                tracing::debug!(agent = %self.agent_id, %item_id, %source, ?origin, "accepted gossip item");
                self.events.emit(GossipEvent::ItemReceived {
                    item_id,
                    source_agent_id: source,
                });
                true
            }
        }
    }

    /// A live item by id. Expired items are treated as absent.
    pub fn get_item(&self, id: &ItemId) -> Option<SharedItem<C>> {
        let now = Timestamp::now();
        self.state
            .read(|s| s.store.get(id))
            .filter(|i| !i.is_expired(now))
    }

    /// Every live item.
    pub fn get_all_items(&self) -> Vec<SharedItem<C>> {
        let now = Timestamp::now();
        let mut items: Vec<_> = self
            .state
            .read(|s| s.store.all())
            .into_iter()
            .filter(|i| !i.is_expired(now))
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Up to `limit` live items relevant to `context`, best first, scored by
    /// relevance times priority. An empty context matches everything.
    pub fn get_relevant_items(&self, context: &[String], limit: usize) -> Vec<SharedItem<C>> {
        let mut scored: Vec<(f64, SharedItem<C>)> = self
            .get_all_items()
            .into_iter()
            .filter_map(|i| {
                let relevance = i.content.relevance(context);
                (relevance > 0.0).then_some((relevance * i.priority, i))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.into_iter().take(limit).map(|(_, i)| i).collect()
    }

    /// Every live item, for an external persistence layer.
    pub fn export_items(&self) -> Vec<SharedItem<C>> {
        self.get_all_items()
    }

    /// Drop expired items and enforce `max_items` now. Returns how many
    /// items were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Timestamp::now();
        let max_items = self.tuning.max_items as usize;
        let evicted = self.state.write(|s| s.store.evict(now, max_items));
        self.record_eviction(&evicted);
        evicted.len()
    }

    /// A snapshot of the protocol counters.
    pub fn get_stats(&self) -> GossipStats {
        let mut stats = self.stats.snapshot();
        stats.kind = Some(C::KIND);
        self.state.read(|s| {
            stats.current_items = s.store.len() as u64;
            stats.active_peers = s.peers.eligible_count(C::KIND) as u64;
            stats.last_gossip_round = s.last_gossip_round;
            stats.last_anti_entropy_round = s.last_anti_entropy_round;
        });
        stats
    }

    /// When the last gossip round completed.
    pub fn last_gossip_round(&self) -> Option<Timestamp> {
        self.state.read(|s| s.last_gossip_round)
    }

    /// When the last anti-entropy round completed.
    pub fn last_anti_entropy_round(&self) -> Option<Timestamp> {
        self.state.read(|s| s.last_anti_entropy_round)
    }

    /// Run one epidemic round: pick the best under-propagated items and
    /// push them to `fanout` random peers.
    pub async fn run_gossip_round(&self) -> RoundReport {
        let span = tracing::debug_span!("gossip_round", agent = %self.agent_id);
        self.round(RoundKind::Gossip).instrument(span).await
    }

    /// Run one anti-entropy round: push the best items to every eligible
    /// peer. Does nothing for kinds without anti-entropy.
    pub async fn run_anti_entropy_round(&self) -> RoundReport {
        if !C::KIND.supports_anti_entropy() {
            tracing::trace!(agent = %self.agent_id, kind = %C::KIND, "no anti-entropy for kind");
            return RoundReport::default();
        }
        let span = tracing::debug_span!("anti_entropy_round", agent = %self.agent_id);
        self.round(RoundKind::AntiEntropy).instrument(span).await
    }

    async fn round(&self, kind: RoundKind) -> RoundReport {
        let now = Timestamp::now();
        let min_priority = self.tuning.min_share_priority;
        let limit = self.tuning.max_items_per_round as usize;
        let fanout = self.tuning.fanout as usize;

        let (items, peers) = self.state.write(|s| {
            let items = select_items(s.store.all(), now, min_priority, limit);
            let peers = match kind {
                RoundKind::Gossip => s.peers.choose(C::KIND, fanout, &mut s.rng),
                RoundKind::AntiEntropy => s.peers.eligible(C::KIND).cloned().collect(),
            };
            (items, peers)
        });

        let wire: Vec<WireItem> = items
            .iter()
            .filter_map(|i| match i.to_wire(&self.codec) {
                Ok(w) => Some(w),
                Err(err) => {
                    tracing::warn!(item_id = %i.id, ?err, "failed to encode item");
                    None
                }
            })
            .collect();

        let mut report = RoundReport {
            items: wire.len(),
            peers: peers.len(),
            ..Default::default()
        };

        if !wire.is_empty() && !peers.is_empty() {
            let msg = GossipMessage {
                from: self.agent_id.clone(),
                round: kind,
                items: wire,
            };
            let delivered = self.send_to_all(&msg, peers, &mut report).await;
            self.record_transfer(&msg, delivered.len());

            if kind == RoundKind::Gossip && !delivered.is_empty() {
                let by = u32::try_from(delivered.len()).unwrap_or(u32::MAX);
                self.state.write(|s| {
                    for w in &msg.items {
                        s.store.increment_share_count(&w.id, by);
                    }
                });
                ProtocolStats::add(
                    &self.stats.items_shared,
                    (msg.items.len() * delivered.len()) as u64,
                );
                for peer_id in &delivered {
                    for w in &msg.items {
                        self.events.emit(GossipEvent::ItemShared {
                            item_id: w.id.clone(),
                            peer_id: peer_id.clone(),
                        });
                    }
                }
            }
        }

        let at = Timestamp::now();
        match kind {
            RoundKind::Gossip => {
                self.state.write(|s| s.last_gossip_round = Some(at));
                ProtocolStats::incr(&self.stats.gossip_rounds);
                self.events.emit(GossipEvent::RoundCompleted {
                    items: report.items,
                    peers: report.peers,
                    at,
                });
            }
            RoundKind::AntiEntropy => {
                self.state.write(|s| s.last_anti_entropy_round = Some(at));
                ProtocolStats::incr(&self.stats.anti_entropy_rounds);
                self.events.emit(GossipEvent::AntiEntropyCompleted {
                    items: report.items,
                    peers: report.peers,
                    at,
                });
            }
        }
        tracing::debug!(
            items = report.items,
            peers = report.peers,
            delivered = report.delivered,
            failed = report.failed,
            "round complete"
        );
        report
    }

    /// Hand `msg` to every peer concurrently, each bounded by the send
    /// timeout. Returns the peers that took it.
    async fn send_to_all(
        &self,
        msg: &GossipMessage,
        peers: Vec<AgentId>,
        report: &mut RoundReport,
    ) -> Vec<AgentId> {
        let timeout = self.tuning.send_timeout();
        let sends = peers.into_iter().map(|peer_id| {
            let send = self.transport.send(peer_id.clone(), msg.clone());
            async move { (peer_id, tokio::time::timeout(timeout, send).await) }
        });

        let mut delivered = Vec::new();
        for (peer_id, result) in futures::future::join_all(sends).await {
            match result {
                Ok(Ok(())) => delivered.push(peer_id),
                Ok(Err(err)) => {
                    report.failed += 1;
                    ProtocolStats::incr(&self.stats.send_failures);
                    tracing::warn!(%peer_id, ?err, "gossip send failed");
                }
                Err(_) => {
                    report.failed += 1;
                    ProtocolStats::incr(&self.stats.send_failures);
                    tracing::warn!(%peer_id, ?timeout, "gossip send timed out");
                }
            }
        }
        report.delivered = delivered.len();
        delivered
    }

    fn record_transfer(&self, msg: &GossipMessage, handoffs: usize) {
        if handoffs == 0 {
            return;
        }
        let n = handoffs as u64;
        let mut compressed = 0u64;
        let mut saved = 0u64;
        for w in msg.items.iter().filter(|w| w.is_compressed) {
            compressed += 1;
            saved += w.uncompressed_size.saturating_sub(w.payload.len()) as u64;
        }
        ProtocolStats::add(&self.stats.bytes_transferred, msg.payload_bytes() as u64 * n);
        ProtocolStats::add(&self.stats.items_compressed, compressed * n);
        ProtocolStats::add(&self.stats.bytes_saved_by_compression, saved * n);
    }

    fn record_eviction(&self, evicted: &EvictionReport) {
        if evicted.is_empty() {
            return;
        }
        ProtocolStats::add(&self.stats.expired_purged, evicted.expired.len() as u64);
        ProtocolStats::add(&self.stats.overflow_evicted, evicted.overflow.len() as u64);
        tracing::debug!(
            agent = %self.agent_id,
            expired = evicted.expired.len(),
            overflow = evicted.overflow.len(),
            "evicted items"
        );
        self.events.emit(GossipEvent::ItemsEvicted {
            expired: evicted.expired.len(),
            overflow: evicted.overflow.len(),
        });
    }
}
