//! Bounded, expiring storage for shared items.

use std::collections::HashMap;

use fleet_timestamp::Timestamp;

use crate::content::KnowledgeContent;
use crate::item::{ItemId, SharedItem};

/// What one eviction pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Items removed because they were past `expires_at`.
    pub expired: Vec<ItemId>,
    /// Items removed to get back under `max_items`.
    pub overflow: Vec<ItemId>,
}

impl EvictionReport {
    /// Total number of items removed.
    pub fn len(&self) -> usize {
        self.expired.len() + self.overflow.len()
    }

    /// True if nothing was removed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage backend for one protocol instance.
///
/// Implementations hold decoded items keyed by id. They are called with the
/// protocol lock held and must not block.
pub trait ItemStore<C: KnowledgeContent>: 'static + Send + Sync {
    /// Insert or replace.
    fn put(&mut self, item: SharedItem<C>);

    /// Fetch a copy of an item, expired or not.
    fn get(&self, id: &ItemId) -> Option<SharedItem<C>>;

    /// Copies of every held item.
    fn all(&self) -> Vec<SharedItem<C>>;

    /// Remove an item, returning it if present.
    fn remove(&mut self, id: &ItemId) -> Option<SharedItem<C>>;

    /// Number of held items.
    fn len(&self) -> usize;

    /// True if nothing is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `by` to an item's share count. Returns false if the item is gone.
    fn increment_share_count(&mut self, id: &ItemId, by: u32) -> bool;

    /// Drop everything expired at `now`, then drop lowest-priority items
    /// until at most `max_items` remain.
    fn evict(&mut self, now: Timestamp, max_items: usize) -> EvictionReport;
}

/// The default in-memory store.
#[derive(Debug)]
pub struct MemItemStore<C: KnowledgeContent> {
    items: HashMap<ItemId, SharedItem<C>>,
}

impl<C: KnowledgeContent> Default for MemItemStore<C> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<C: KnowledgeContent> MemItemStore<C> {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: KnowledgeContent> ItemStore<C> for MemItemStore<C> {
    fn put(&mut self, item: SharedItem<C>) {
        self.items.insert(item.id.clone(), item);
    }

    fn get(&self, id: &ItemId) -> Option<SharedItem<C>> {
        self.items.get(id).cloned()
    }

    fn all(&self) -> Vec<SharedItem<C>> {
        self.items.values().cloned().collect()
    }

    fn remove(&mut self, id: &ItemId) -> Option<SharedItem<C>> {
        self.items.remove(id)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn increment_share_count(&mut self, id: &ItemId, by: u32) -> bool {
        match self.items.get_mut(id) {
            Some(item) => {
                item.share_count = item.share_count.saturating_add(by);
                true
            }
            None => false,
        }
    }

    fn evict(&mut self, now: Timestamp, max_items: usize) -> EvictionReport {
        let mut report = EvictionReport::default();

        self.items.retain(|id, item| {
            if item.is_expired(now) {
                report.expired.push(id.clone());
                false
            } else {
                true
            }
        });

        if self.items.len() > max_items {
            let mut victims: Vec<(&ItemId, f64, Timestamp)> = self
                .items
                .iter()
                .map(|(id, item)| (id, item.priority, item.created_at))
                .collect();
            // lowest priority, then oldest, then id
            victims.sort_by(|a, b| {
                a.1.total_cmp(&b.1)
                    .then_with(|| a.2.cmp(&b.2))
                    .then_with(|| a.0.cmp(b.0))
            });
            let excess = self.items.len() - max_items;
            let victims: Vec<ItemId> = victims
                .into_iter()
                .take(excess)
                .map(|(id, _, _)| id.clone())
                .collect();
            for id in victims {
                self.items.remove(&id);
                report.overflow.push(id);
            }
        }

        report
    }
}
