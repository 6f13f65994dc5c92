#![deny(missing_docs)]
//! Epidemic gossip of learned knowledge across an agent fleet.
//!
//! Each agent runs one [`KnowledgeGossip`] instance per kind of knowledge it
//! shares. Producers inject items with [`KnowledgeGossip::share`]; a periodic
//! round pushes the most valuable, least propagated items to a few random
//! peers, and a slower anti-entropy round (patterns only) pushes to every
//! peer to bound staleness. Receivers verify checksums, drop expired items
//! and settle competing versions by vector-clock causality, falling back to a
//! quality tiebreak for concurrent edits.
//!
//! Moving bytes between agents is the job of a [`GossipTransport`]
//! implementation supplied by the caller.
//!
//! ```no_run
//! # async fn example(transport: fleet_gossip::DynTransport) -> fleet_gossip::GossipResult<()> {
//! use fleet_gossip::*;
//!
//! let gossip = PatternGossip::new(GossipConfig::new("agent-1"), transport)?;
//! gossip.register_peer("agent-2", PeerKind::Pattern);
//! gossip.start()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

/// Identity of an agent in the fleet.
pub type AgentId = Arc<str>;

mod codec;
mod config;
mod conflict;
mod content;
mod error;
mod event;
mod item;
mod peers;
mod protocol;
mod scheduler;
mod select;
mod share;
mod stats;
mod store;
mod transport;
mod vector_clock;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use codec::{compress, decompress, CompressionCodec, Encoded, DEFAULT_MAX_PAYLOAD_BYTES};
pub use config::{GossipConfig, GossipTuningParams};
pub use conflict::{resolve, Resolution, Winner};
pub use content::{KnowledgeContent, KnowledgeKind, TaskExperience, TestPattern};
pub use error::{GossipError, GossipResult};
pub use event::GossipEvent;
pub use item::{canonical_payload, checksum, ContentDigest, ItemId, SharedItem, WireItem};
pub use peers::{PeerKind, PeerRecord, PeerRegistry};
pub use protocol::{KnowledgeGossip, RoundReport};
pub use select::select_items;
pub use stats::GossipStats;
pub use store::{EvictionReport, ItemStore, MemItemStore};
pub use transport::{DynTransport, GossipMessage, GossipTransport, RoundKind};
pub use vector_clock::{ClockOrdering, VectorClock};

pub use fleet_timestamp::Timestamp;

#[cfg(any(test, feature = "test_utils"))]
pub use transport::MockGossipTransport;

/// Gossip of task experiences between learning agents.
pub type ExperienceGossip = KnowledgeGossip<TaskExperience>;

/// Gossip of test patterns between test-generation agents.
pub type PatternGossip = KnowledgeGossip<TestPattern>;
