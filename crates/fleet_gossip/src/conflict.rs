//! Picking the surviving version when two agents hold the same item.

use std::cmp::Ordering;

use serde::Serialize;

use crate::content::KnowledgeContent;
use crate::item::SharedItem;
use crate::vector_clock::ClockOrdering;

/// Which side of a conflict survived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// The version already held locally.
    #[display(fmt = "local")]
    Local,
    /// The version that just arrived.
    #[display(fmt = "remote")]
    Remote,
}

/// The outcome of [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// The survivor.
    pub winner: Winner,
    /// How the local clock related to the remote one.
    pub ordering: ClockOrdering,
    /// True if causality could not decide and quality did.
    pub by_quality: bool,
}

/// Resolve two versions of the same item.
///
/// Causality decides first: a version that happened-before the other loses.
/// Concurrent clocks go to the version further along the deepest history
/// they disagree on (see [`VectorClock::deepest_lead`]), which both sides
/// compute alike. Only when that splits, or the clocks are equal, does
/// `priority * quality` decide, and the remote version must then be strictly
/// better to replace the local one. An exact tie therefore keeps whichever
/// version the resolving agent already held.
///
/// [`VectorClock::deepest_lead`]: crate::VectorClock::deepest_lead
pub fn resolve<C: KnowledgeContent>(local: &SharedItem<C>, remote: &SharedItem<C>) -> Resolution {
    let ordering = local.vector_clock.compare(&remote.vector_clock);
    let lead = match ordering {
        ClockOrdering::Before => Some(Winner::Remote),
        ClockOrdering::After => Some(Winner::Local),
        ClockOrdering::Concurrent => match local.vector_clock.deepest_lead(&remote.vector_clock) {
            Ordering::Greater => Some(Winner::Local),
            Ordering::Less => Some(Winner::Remote),
            Ordering::Equal => None,
        },
        ClockOrdering::Equal => None,
    };
    let (winner, by_quality) = match lead {
        Some(winner) => (winner, false),
        None if remote.quality_score() > local.quality_score() => (Winner::Remote, true),
        None => (Winner::Local, true),
    };
    Resolution {
        winner,
        ordering,
        by_quality,
    }
}
