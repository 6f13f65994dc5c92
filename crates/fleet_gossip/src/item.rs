//! The unit of gossip: a piece of knowledge plus the metadata needed to
//! version, prioritise, verify and expire it.

use std::sync::Arc;
use std::time::Duration;

use fleet_timestamp::Timestamp;
use serde::{Deserialize, Serialize};

use crate::codec::CompressionCodec;
use crate::content::{KnowledgeContent, KnowledgeKind};
use crate::error::{GossipError, GossipResult};
use crate::vector_clock::VectorClock;
use crate::AgentId;

/// Stable, content-derived identifier of a shared item.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct ItemId(Arc<str>);

impl ItemId {
    /// Derive the id for content of `kind` whose canonical bytes are `payload`.
    ///
    /// The source agent is deliberately not part of the id: identical knowledge
    /// learned by two agents collapses into one entry.
    pub fn derive(kind: KnowledgeKind, payload: &[u8]) -> Self {
        let hash = blake2b_simd::Params::new()
            .hash_length(16)
            .to_state()
            .update(kind.tag())
            .update(b":")
            .update(payload)
            .finalize();
        Self(hex::encode(hash.as_bytes()).into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// Integrity hash of canonical payload bytes.
pub fn checksum(payload: &[u8]) -> String {
    hex::encode(blake2b_simd::blake2b(payload).as_bytes())
}

/// The canonical serialization of a piece of content. Ids and checksums are
/// always computed over these bytes, never over a compressed form.
pub fn canonical_payload<C: KnowledgeContent>(content: &C) -> GossipResult<Vec<u8>> {
    Ok(serde_json::to_vec(content)?)
}

/// Id, checksum and size of a piece of content, computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Content-derived id.
    pub id: ItemId,
    /// Hash of the canonical payload.
    pub checksum: String,
    /// Length of the canonical payload.
    pub size: usize,
}

impl ContentDigest {
    /// Digest `content`.
    pub fn of<C: KnowledgeContent>(content: &C) -> GossipResult<Self> {
        let payload = canonical_payload(content)?;
        Ok(Self::of_payload(C::KIND, &payload))
    }

    fn of_payload(kind: KnowledgeKind, payload: &[u8]) -> Self {
        Self {
            id: ItemId::derive(kind, payload),
            checksum: checksum(payload),
            size: payload.len(),
        }
    }
}

/// A locally held, decoded shared item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "C: KnowledgeContent")]
pub struct SharedItem<C: KnowledgeContent> {
    /// Content-derived id.
    pub id: ItemId,
    /// The knowledge itself.
    pub content: C,
    /// The agent that authored this version.
    pub source_agent_id: AgentId,
    /// Causal version as of creation or last local update.
    pub vector_clock: VectorClock,
    /// Value estimate in `[0, 1]`; higher shares first.
    pub priority: f64,
    /// How many times this item has been handed to a peer.
    pub share_count: u32,
    /// Hash of the canonical payload.
    pub checksum: String,
    /// Length of the canonical payload.
    pub uncompressed_size: usize,
    /// When this version was created.
    pub created_at: Timestamp,
    /// After this instant the item is treated as absent.
    pub expires_at: Timestamp,
}

impl<C: KnowledgeContent> SharedItem<C> {
    /// Assemble a freshly authored item.
    pub fn new(
        content: C,
        digest: ContentDigest,
        source_agent_id: AgentId,
        vector_clock: VectorClock,
        priority: f64,
        created_at: Timestamp,
        ttl: Duration,
    ) -> GossipResult<Self> {
        let expires_at = (created_at + ttl)?;
        Ok(Self {
            id: digest.id,
            content,
            source_agent_id,
            vector_clock,
            priority,
            share_count: 0,
            checksum: digest.checksum,
            uncompressed_size: digest.size,
            created_at,
            expires_at,
        })
    }

    /// The knowledge family.
    pub fn kind(&self) -> KnowledgeKind {
        C::KIND
    }

    /// True once `now` is past `expires_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }

    /// Value used to break ties between concurrent versions.
    pub fn quality_score(&self) -> f64 {
        self.priority * self.content.quality()
    }

    /// Gossip selection score: value discounted by how widely the item has
    /// already been sent.
    pub fn selection_score(&self) -> f64 {
        self.priority / (self.share_count as f64 + 1.0)
    }

    /// Re-derive id and checksum from the content and check every invariant a
    /// stored item must satisfy.
    pub fn verify(&self) -> GossipResult<()> {
        let payload = canonical_payload(&self.content)?;
        self.verify_payload(&payload)
    }

    fn verify_payload(&self, payload: &[u8]) -> GossipResult<()> {
        let digest = ContentDigest::of_payload(C::KIND, payload);
        if digest.checksum != self.checksum {
            return Err(GossipError::integrity(&self.id, "checksum mismatch"));
        }
        if digest.id != self.id {
            return Err(GossipError::integrity(
                &self.id,
                "id does not match content",
            ));
        }
        self.verify_metadata()
    }

    fn verify_metadata(&self) -> GossipResult<()> {
        if self.source_agent_id.is_empty() {
            return Err(GossipError::integrity(&self.id, "empty source agent"));
        }
        if self.vector_clock.get(&self.source_agent_id) == 0 {
            return Err(GossipError::integrity(
                &self.id,
                "vector clock has no entry for its source agent",
            ));
        }
        if !(0.0..=1.0).contains(&self.priority) {
            return Err(GossipError::integrity(
                &self.id,
                format!("priority {} out of range", self.priority),
            ));
        }
        if self.expires_at <= self.created_at {
            return Err(GossipError::integrity(
                &self.id,
                "expires_at is not after created_at",
            ));
        }
        Ok(())
    }

    /// Encode for transmission, compressing the payload if `codec` says so.
    pub fn to_wire(&self, codec: &CompressionCodec) -> GossipResult<WireItem> {
        let payload = canonical_payload(&self.content)?;
        let encoded = codec.encode(&payload)?;
        Ok(WireItem {
            id: self.id.clone(),
            kind: C::KIND,
            compressed_size: encoded.is_compressed.then_some(encoded.bytes.len()),
            payload: encoded.bytes,
            is_compressed: encoded.is_compressed,
            uncompressed_size: payload.len(),
            source_agent_id: self.source_agent_id.clone(),
            vector_clock: self.vector_clock.clone(),
            priority: self.priority,
            share_count: self.share_count,
            checksum: self.checksum.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }

    /// Decode and fully verify an item received from the wire.
    ///
    /// Payloads declaring more than the codec's bound are refused before
    /// decompression. The checksum is checked against the decompressed bytes
    /// before the content is even parsed.
    pub fn from_wire(wire: WireItem, codec: &CompressionCodec) -> GossipResult<Self> {
        if wire.kind != C::KIND {
            return Err(GossipError::integrity(
                &wire.id,
                format!("expected {} item, got {}", C::KIND, wire.kind),
            ));
        }
        let payload = codec
            .decode(wire.payload, wire.is_compressed, wire.uncompressed_size)
            .map_err(|e| GossipError::integrity(&wire.id, e.to_string()))?;
        if checksum(&payload) != wire.checksum {
            return Err(GossipError::integrity(&wire.id, "checksum mismatch"));
        }
        let content: C = serde_json::from_slice(&payload)?;
        let item = Self {
            id: wire.id,
            content,
            source_agent_id: wire.source_agent_id,
            vector_clock: wire.vector_clock,
            priority: wire.priority,
            share_count: wire.share_count,
            checksum: wire.checksum,
            uncompressed_size: payload.len(),
            created_at: wire.created_at,
            expires_at: wire.expires_at,
        };
        item.verify_payload(&payload)?;
        Ok(item)
    }
}

/// The transport-agnostic envelope of one gossiped item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireItem {
    /// Content-derived id.
    pub id: ItemId,
    /// Knowledge family of the payload.
    pub kind: KnowledgeKind,
    /// Canonical payload, or its gzip form if `is_compressed`.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Whether `payload` is gzip.
    pub is_compressed: bool,
    /// Length of the canonical payload.
    pub uncompressed_size: usize,
    /// Length of the gzip payload, if compressed.
    pub compressed_size: Option<usize>,
    /// The agent that authored this version.
    pub source_agent_id: AgentId,
    /// Causal version.
    pub vector_clock: VectorClock,
    /// Value estimate in `[0, 1]`.
    pub priority: f64,
    /// Sender's transmission count.
    pub share_count: u32,
    /// Hash of the canonical payload.
    pub checksum: String,
    /// When this version was created.
    pub created_at: Timestamp,
    /// After this instant the item is treated as absent.
    pub expires_at: Timestamp,
}

impl WireItem {
    /// Serialize to JSON bytes.
    pub fn encode(&self) -> GossipResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse JSON bytes.
    pub fn decode(bytes: &[u8]) -> GossipResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::TestPattern;
    use crate::test_utils::{pattern_fixture, shared_pattern};
    use pretty_assertions::assert_eq;

    fn codec() -> CompressionCodec {
        CompressionCodec::new(true, 1024)
    }

    fn big_pattern() -> TestPattern {
        let mut p = pattern_fixture("big", 0.9, 0.9);
        p.template = "expect(result).toEqual(expected);\n".repeat(200);
        p
    }

    #[test]
    fn id_is_content_derived_and_source_independent() {
        let a = shared_pattern("agent-a", pattern_fixture("p", 0.9, 0.9));
        let b = shared_pattern("agent-b", pattern_fixture("p", 0.9, 0.9));
        let c = shared_pattern("agent-a", pattern_fixture("q", 0.9, 0.9));
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.checksum, b.checksum);
    }

    #[test]
    fn wire_round_trip_uncompressed() {
        let item = shared_pattern("agent-a", pattern_fixture("p", 0.9, 0.9));
        let codec = CompressionCodec::new(true, 1024);
        let wire = item.to_wire(&codec).unwrap();
        assert!(!wire.is_compressed);
        assert_eq!(wire.compressed_size, None);
        let bytes = wire.encode().unwrap();
        let back = SharedItem::<TestPattern>::from_wire(WireItem::decode(&bytes).unwrap(), &codec).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn wire_round_trip_compressed() {
        let item = shared_pattern("agent-a", big_pattern());
        let codec = CompressionCodec::new(true, 1024);
        let wire = item.to_wire(&codec).unwrap();
        assert!(wire.is_compressed);
        assert_eq!(wire.compressed_size, Some(wire.payload.len()));
        assert!(wire.payload.len() < wire.uncompressed_size);
        let back = SharedItem::<TestPattern>::from_wire(wire, &codec).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn mutated_payload_with_stale_checksum_is_rejected() {
        let item = shared_pattern("agent-a", pattern_fixture("p", 0.9, 0.9));
        let mut wire = item.to_wire(&CompressionCodec::new(false, 0)).unwrap();
        wire.payload = canonical_payload(&pattern_fixture("tampered", 0.9, 0.9)).unwrap();
        let err = SharedItem::<TestPattern>::from_wire(wire, &codec()).unwrap_err();
        assert!(err.is_integrity(), "{:?}", err);
    }

    #[test]
    fn corrupt_compressed_payload_is_rejected() {
        let item = shared_pattern("agent-a", big_pattern());
        let mut wire = item.to_wire(&CompressionCodec::new(true, 1024)).unwrap();
        let mid = wire.payload.len() / 2;
        wire.payload.truncate(mid);
        assert!(SharedItem::<TestPattern>::from_wire(wire, &codec()).is_err());
    }

    #[test]
    fn forged_id_is_rejected() {
        let item = shared_pattern("agent-a", pattern_fixture("p", 0.9, 0.9));
        let mut wire = item.to_wire(&CompressionCodec::new(false, 0)).unwrap();
        wire.id = "not-the-real-id".into();
        assert!(SharedItem::<TestPattern>::from_wire(wire, &codec()).is_err());
    }

    #[test]
    fn clock_without_source_component_is_rejected() {
        let mut item = shared_pattern("agent-a", pattern_fixture("p", 0.9, 0.9));
        item.vector_clock = [("agent-b", 3)].into_iter().collect();
        assert!(item.verify().unwrap_err().is_integrity());
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let item = shared_pattern("agent-a", pattern_fixture("p", 0.9, 0.9));
        let mut wire = item.to_wire(&CompressionCodec::new(false, 0)).unwrap();
        wire.kind = KnowledgeKind::Experience;
        assert!(SharedItem::<TestPattern>::from_wire(wire, &codec()).is_err());
    }

    #[test]
    fn oversized_declared_payload_is_an_integrity_failure() {
        let item = shared_pattern("agent-a", big_pattern());
        let mut wire = item.to_wire(&codec()).unwrap();
        assert!(wire.is_compressed);
        wire.uncompressed_size = usize::MAX / 2;
        let err = SharedItem::<TestPattern>::from_wire(wire, &codec()).unwrap_err();
        assert!(matches!(err, GossipError::Integrity { .. }), "{:?}", err);

        let wire = item.to_wire(&codec()).unwrap();
        let small = codec().with_max_payload_bytes(wire.uncompressed_size - 1);
        assert!(SharedItem::<TestPattern>::from_wire(wire, &small).is_err());
    }

    #[test]
    fn selection_score_decays_with_share_count() {
        let mut item = shared_pattern("agent-a", pattern_fixture("p", 0.9, 0.9));
        item.priority = 0.8;
        assert_eq!(item.selection_score(), 0.8);
        item.share_count = 3;
        assert_eq!(item.selection_score(), 0.2);
    }
}
