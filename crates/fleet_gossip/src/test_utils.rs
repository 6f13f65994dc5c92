//! Utilities for testing gossip between instances in one process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fleet_timestamp::Timestamp;
use futures::future::{BoxFuture, FutureExt};

use crate::config::{GossipConfig, GossipTuningParams};
use crate::content::{KnowledgeContent, TaskExperience, TestPattern};
use crate::error::{GossipError, GossipResult};
use crate::item::{ContentDigest, SharedItem};
use crate::peers::PeerKind;
use crate::protocol::KnowledgeGossip;
use crate::share::Share;
use crate::transport::{DynTransport, GossipMessage, GossipTransport};
use crate::AgentId;

struct MemNetworkState<C: KnowledgeContent> {
    nodes: HashMap<AgentId, Weak<KnowledgeGossip<C>>>,
    silent: HashSet<AgentId>,
    messages_delivered: u64,
}

/// An in-memory switchboard that routes gossip messages between protocol
/// instances. Messages are round-tripped through JSON, as a real transport
/// would, and delivered synchronously.
pub struct MemNetwork<C: KnowledgeContent> {
    state: Share<MemNetworkState<C>>,
}

impl<C: KnowledgeContent> MemNetwork<C> {
    /// An empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Share::new(MemNetworkState {
                nodes: HashMap::new(),
                silent: HashSet::new(),
                messages_delivered: 0,
            }),
        })
    }

    /// Make `node` reachable under its agent id.
    pub fn join(&self, node: &Arc<KnowledgeGossip<C>>) {
        let id = node.agent_id().clone();
        let node = Arc::downgrade(node);
        self.state.write(|s| s.nodes.insert(id, node));
    }

    /// Make `agent` unreachable. Sends to it never complete, like a peer
    /// that accepted a connection and then went quiet.
    pub fn set_silent(&self, agent: &str, silent: bool) {
        let agent: AgentId = agent.into();
        self.state.write(|s| {
            if silent {
                s.silent.insert(agent);
            } else {
                s.silent.remove(&agent);
            }
        });
    }

    /// Number of messages handed to a live node so far.
    pub fn messages_delivered(&self) -> u64 {
        self.state.read(|s| s.messages_delivered)
    }

    /// Spawn `n` instances named `agent-0..n`, joined to this network and
    /// registered with each other.
    pub fn spawn_fleet(
        self: &Arc<Self>,
        n: usize,
        tuning: GossipTuningParams,
    ) -> GossipResult<Vec<Arc<KnowledgeGossip<C>>>> {
        let ids: Vec<AgentId> = (0..n).map(|i| format!("agent-{}", i).into()).collect();
        let mut fleet = Vec::with_capacity(n);
        for id in ids.iter() {
            let transport: DynTransport = self.clone();
            let node = KnowledgeGossip::new(
                GossipConfig::new(id.clone()).with_tuning(tuning.clone()),
                transport,
            )?;
            for peer in ids.iter() {
                node.register_peer(peer.clone(), PeerKind::Any);
            }
            self.join(&node);
            fleet.push(node);
        }
        Ok(fleet)
    }
}

impl<C: KnowledgeContent> GossipTransport for MemNetwork<C> {
    fn send(&self, peer: AgentId, msg: GossipMessage) -> BoxFuture<'static, GossipResult<()>> {
        let (target, silent) = self.state.read(|s| {
            (
                s.nodes.get(&peer).and_then(Weak::upgrade),
                s.silent.contains(&peer),
            )
        });
        if silent {
            return futures::future::pending().boxed();
        }
        let Some(target) = target else {
            return async move {
                Err::<(), _>(GossipError::transport(format!("no route to {}", peer)))
            }
            .boxed();
        };
        self.state.write(|s| s.messages_delivered += 1);
        async move {
            let bytes = serde_json::to_vec(&msg)?;
            let msg: GossipMessage = serde_json::from_slice(&bytes)?;
            target.receive_message(msg);
            Ok::<(), GossipError>(())
        }
        .boxed()
    }
}

/// A pattern that clears the default quality floor when both scores are
/// at least `0.71`.
pub fn pattern_fixture(name: &str, confidence: f64, success_rate: f64) -> TestPattern {
    TestPattern {
        name: name.to_string(),
        framework: "jest".to_string(),
        category: "unit".to_string(),
        template: format!("it('{}', () => {{ expect(subject()).toBeTruthy(); }});", name),
        description: String::new(),
        tags: Vec::new(),
        confidence,
        success_rate,
        usage_count: 0,
    }
}

/// An experience of `task_type` with the given reward.
pub fn experience_fixture(task_type: &str, reward: f64) -> TaskExperience {
    TaskExperience {
        task_id: format!("task-{}", task_type),
        task_type: task_type.to_string(),
        agent_type: "test-generator".to_string(),
        action: "generate".to_string(),
        reward,
        outcome: "passed".to_string(),
        tags: Vec::new(),
        recorded_at: Timestamp::from_micros(1_700_000_000_000_000),
    }
}

/// A freshly authored item as `agent` would create it with its first share:
/// clock `{agent: 1}`, content priority, one hour TTL.
pub fn shared_item<C: KnowledgeContent>(agent: &str, content: C) -> SharedItem<C> {
    let digest = ContentDigest::of(&content).expect("digest fixture content");
    let priority = content.priority();
    SharedItem::new(
        content,
        digest,
        agent.into(),
        [(agent, 1)].into_iter().collect(),
        priority,
        Timestamp::now(),
        Duration::from_secs(3600),
    )
    .expect("build fixture item")
}

/// [`shared_item`] for patterns.
pub fn shared_pattern(agent: &str, content: TestPattern) -> SharedItem<TestPattern> {
    shared_item(agent, content)
}
