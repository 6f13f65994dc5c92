//! Per-agent logical counters used to order versions of a shared item.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::AgentId;

/// How two vector clocks relate under the component-wise partial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
pub enum ClockOrdering {
    /// Every component of `self` is `<=` the other's and at least one is `<`.
    #[display(fmt = "before")]
    Before,
    /// Mirror of `Before`.
    #[display(fmt = "after")]
    After,
    /// Identical histories.
    #[display(fmt = "equal")]
    Equal,
    /// Neither dominates.
    #[display(fmt = "concurrent")]
    Concurrent,
}

/// A map from agent id to a counter. Missing agents count as zero.
///
/// Backed by a `BTreeMap` so serialization is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<AgentId, u64>);

impl VectorClock {
    /// An empty clock, which happens-before every non-empty one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter for `agent`, zero if never seen.
    pub fn get(&self, agent: &str) -> u64 {
        self.0.get(agent).copied().unwrap_or(0)
    }

    /// Advance `agent`'s component and return its new value.
    pub fn increment(&mut self, agent: &AgentId) -> u64 {
        let c = self.0.entry(agent.clone()).or_insert(0);
        *c = c.saturating_add(1);
        *c
    }

    /// Component-wise max with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (agent, &count) in other.0.iter() {
            let c = self.0.entry(agent.clone()).or_insert(0);
            *c = (*c).max(count);
        }
    }

    /// Relate `self` to `other`.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;
        for agent in self.0.keys().chain(other.0.keys()) {
            match self.get(agent).cmp(&other.get(agent)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => (),
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }
        match (less, greater) {
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (false, false) => ClockOrdering::Equal,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Which side is further along the longest history the two clocks
    /// disagree on.
    ///
    /// Among the agents whose counters differ, only those with the largest
    /// counter on either side count. `Greater` if `self` is ahead on all of
    /// them, `Less` if `other` is, `Equal` if they split or nothing differs.
    /// Swapping the arguments reverses the result.
    pub fn deepest_lead(&self, other: &VectorClock) -> Ordering {
        let mut depth = 0;
        let mut lead = Ordering::Equal;
        let mut split = false;
        for agent in self.0.keys().chain(other.0.keys()) {
            let (a, b) = (self.get(agent), other.get(agent));
            if a == b {
                continue;
            }
            let d = a.max(b);
            if d > depth {
                depth = d;
                lead = a.cmp(&b);
                split = false;
            } else if d == depth && a.cmp(&b) != lead {
                split = true;
            }
        }
        if split {
            Ordering::Equal
        } else {
            lead
        }
    }

    /// True if `self` strictly happened before `other`.
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Before
    }

    /// Agents with a non-zero component.
    pub fn agents(&self) -> impl Iterator<Item = &AgentId> {
        self.0.iter().filter(|(_, c)| **c > 0).map(|(a, _)| a)
    }

    /// True if no agent has a non-zero component.
    pub fn is_empty(&self) -> bool {
        self.agents().next().is_none()
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.compare(other) {
            ClockOrdering::Before => Some(Ordering::Less),
            ClockOrdering::After => Some(Ordering::Greater),
            ClockOrdering::Equal => Some(Ordering::Equal),
            ClockOrdering::Concurrent => None,
        }
    }
}

impl<A: Into<AgentId>> FromIterator<(A, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (A, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(a, c)| (a.into(), c)).collect())
    }
}
