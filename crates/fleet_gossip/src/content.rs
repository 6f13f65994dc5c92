//! The kinds of knowledge agents share, and the capability the protocol
//! needs from them.

use std::collections::BTreeSet;

use fleet_timestamp::Timestamp;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Which family of knowledge an item carries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    /// A task experience produced by a learning agent.
    #[display(fmt = "experience")]
    Experience,
    /// A reusable test pattern produced by a test-generation agent.
    #[display(fmt = "pattern")]
    Pattern,
}

impl KnowledgeKind {
    /// Only patterns are reconciled by the slower anti-entropy loop.
    pub fn supports_anti_entropy(&self) -> bool {
        matches!(self, Self::Pattern)
    }

    /// Only patterns are gated by `min_quality_to_share`.
    pub fn has_quality_floor(&self) -> bool {
        matches!(self, Self::Pattern)
    }

    pub(crate) fn tag(&self) -> &'static [u8] {
        match self {
            Self::Experience => b"experience",
            Self::Pattern => b"pattern",
        }
    }
}

/// What the protocol needs to know about a piece of knowledge. Everything
/// else about the content is opaque.
pub trait KnowledgeContent:
    'static + Send + Sync + Clone + std::fmt::Debug + PartialEq + Serialize + DeserializeOwned
{
    /// The family this content belongs to.
    const KIND: KnowledgeKind;

    /// Default sharing priority in `[0, 1]` when the producer supplies none.
    fn priority(&self) -> f64;

    /// Quality used to break ties between concurrent versions.
    fn quality(&self) -> f64;

    /// How relevant this content is to a set of context tags, in `[0, 1]`.
    /// An empty context matches everything.
    fn relevance(&self, context: &[String]) -> f64;
}

fn tag_overlap<'a>(own: impl IntoIterator<Item = &'a str>, context: &[String]) -> f64 {
    if context.is_empty() {
        return 1.0;
    }
    let own: BTreeSet<String> = own.into_iter().map(str::to_lowercase).collect();
    let hits = context
        .iter()
        .filter(|c| own.contains(&c.to_lowercase()))
        .count();
    hits as f64 / context.len() as f64
}

/// The outcome of an agent performing one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExperience {
    /// The task this experience was recorded for.
    pub task_id: String,
    /// e.g. "unit-test-generation", "coverage-analysis".
    pub task_type: String,
    /// The kind of agent that performed the task.
    pub agent_type: String,
    /// What the agent did.
    pub action: String,
    /// Learning signal, conventionally in `[-1, 1]`.
    pub reward: f64,
    /// Free-form result description.
    pub outcome: String,
    /// Additional context tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the experience happened.
    pub recorded_at: Timestamp,
}

impl KnowledgeContent for TaskExperience {
    const KIND: KnowledgeKind = KnowledgeKind::Experience;

    fn priority(&self) -> f64 {
        if self.reward.is_finite() {
            self.reward.abs().clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn quality(&self) -> f64 {
        if self.reward.is_finite() {
            self.reward.abs()
        } else {
            0.0
        }
    }

    fn relevance(&self, context: &[String]) -> f64 {
        tag_overlap(
            [self.task_type.as_str(), self.agent_type.as_str()]
                .into_iter()
                .chain(self.tags.iter().map(String::as_str)),
            context,
        )
    }
}

/// A learned, reusable test pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPattern {
    /// Human readable name.
    pub name: String,
    /// e.g. "jest", "pytest", "cargo-test".
    pub framework: String,
    /// e.g. "unit", "integration", "edge-case".
    pub category: String,
    /// The pattern body, typically a code template.
    pub template: String,
    /// What the pattern is for.
    #[serde(default)]
    pub description: String,
    /// Additional context tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Producer's confidence in `[0, 1]`.
    pub confidence: f64,
    /// Observed success rate in `[0, 1]`.
    pub success_rate: f64,
    /// How often the pattern has been applied.
    #[serde(default)]
    pub usage_count: u64,
}

impl TestPattern {
    /// Upper bound of the priority bonus earned through usage.
    const MAX_USAGE_BONUS: f64 = 0.1;
}

impl KnowledgeContent for TestPattern {
    const KIND: KnowledgeKind = KnowledgeKind::Pattern;

    fn priority(&self) -> f64 {
        let bonus = (self.usage_count as f64 / 1000.0).min(Self::MAX_USAGE_BONUS);
        let p = self.quality() + bonus;
        if p.is_finite() {
            p.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn quality(&self) -> f64 {
        let q = self.confidence * self.success_rate;
        if q.is_finite() {
            q
        } else {
            0.0
        }
    }

    fn relevance(&self, context: &[String]) -> f64 {
        tag_overlap(
            [self.framework.as_str(), self.category.as_str()]
                .into_iter()
                .chain(self.tags.iter().map(String::as_str)),
            context,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{experience_fixture, pattern_fixture};

    #[test]
    fn pattern_quality_is_confidence_times_success() {
        let p = pattern_fixture("p", 0.8, 0.5);
        assert!((p.quality() - 0.4).abs() < 1e-9);
        assert!((p.priority() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn pattern_priority_usage_bonus_is_capped() {
        let mut p = pattern_fixture("p", 1.0, 0.95);
        p.usage_count = 1_000_000;
        assert_eq!(p.priority(), 1.0);
    }

    #[test]
    fn experience_priority_is_reward_magnitude() {
        assert_eq!(experience_fixture("t", -0.7).priority(), 0.7);
        assert_eq!(experience_fixture("t", 3.0).priority(), 1.0);
        assert_eq!(experience_fixture("t", f64::NAN).priority(), 0.0);
    }

    #[test]
    fn relevance_counts_matching_context_tags() {
        let p = pattern_fixture("p", 0.9, 0.9);
        assert_eq!(p.relevance(&[]), 1.0);
        assert_eq!(p.relevance(&["JEST".into(), "unit".into()]), 1.0);
        assert_eq!(p.relevance(&["jest".into(), "python".into()]), 0.5);
        assert_eq!(p.relevance(&["python".into()]), 0.0);
    }
}
