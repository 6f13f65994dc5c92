//! Choosing what to send in a gossip round.

use fleet_timestamp::Timestamp;

use crate::content::KnowledgeContent;
use crate::item::SharedItem;

/// The top `limit` live items with `priority >= min_priority`, ordered by
/// [`SharedItem::selection_score`] descending.
///
/// Equal scores are ordered by priority, then id, so a selection is a pure
/// function of the store contents.
pub fn select_items<C: KnowledgeContent>(
    items: Vec<SharedItem<C>>,
    now: Timestamp,
    min_priority: f64,
    limit: usize,
) -> Vec<SharedItem<C>> {
    let mut candidates: Vec<SharedItem<C>> = items
        .into_iter()
        .filter(|i| !i.is_expired(now) && i.priority >= min_priority)
        .collect();
    candidates.sort_by(|a, b| {
        b.selection_score()
            .total_cmp(&a.selection_score())
            .then_with(|| b.priority.total_cmp(&a.priority))
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(limit);
    candidates
}
