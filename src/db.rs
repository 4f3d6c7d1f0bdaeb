//! Durable scheduling records.
//!
//! The only thing the checker persists is the [`CheckerItem`] work
//! descriptor. Key blocks deliberately have no durable representation at
//! this layer: nothing here accepts one, so the unsupported path is absent
//! at compile time rather than failing at runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::request::GetterId;
use crate::store::BlockSet;

/// `chosen_by` value of an item no boot session has adopted.
pub const UNADOPTED: u64 = 0;

/// Identifier of a stored [`CheckerItem`].
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
pub struct ItemId(pub u64);

/// Durable descriptor of one persistent datastore check.
///
/// Stored when the request is queued, adopted (`chosen_by` stamped with the
/// boot id) when a checker picks it up, and reset to [`UNADOPTED`] if the
/// work is shed again before dispatch. On restart the loader re-adopts
/// whatever is left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerItem {
    /// The request this check belongs to.
    pub getter: GetterId,
    /// The owning node installation.
    pub node_db_handle: u64,
    /// Priority class of the request; smaller is more urgent.
    pub prio: usize,
    /// Boot session that adopted this item, or [`UNADOPTED`].
    pub chosen_by: u64,
    /// Pre-staged blocks to probe instead of the store. Session-scoped:
    /// not serialized, absent after a restart.
    #[serde(skip)]
    pub blocks: Option<BlockSet>,
}

impl CheckerItem {
    /// Build an unadopted item.
    pub fn new(
        getter: GetterId,
        node_db_handle: u64,
        prio: usize,
        blocks: Option<BlockSet>,
    ) -> Self {
        Self {
            getter,
            node_db_handle,
            prio,
            chosen_by: UNADOPTED,
            blocks,
        }
    }
}

/// The durable item database, as seen by the checker.
///
/// Implementations are touched only from the database executor; handles are
/// clonable with interior mutability so tests can observe state from
/// outside.
pub trait CheckerDb: Send + Sync + 'static {
    /// Store a new item, minting its id.
    fn insert(&self, item: CheckerItem) -> ItemId;

    /// Fetch an item by id.
    fn get(&self, id: ItemId) -> Option<CheckerItem>;

    /// Update an item's `chosen_by` stamp.
    fn set_chosen(&self, id: ItemId, chosen_by: u64);

    /// Delete an item. Deleting an absent id is a no-op.
    fn delete(&self, id: ItemId);

    /// Whether `id` is stored.
    fn is_stored(&self, id: ItemId) -> bool;

    /// All items of one node installation at one priority, oldest first.
    fn query(&self, node_db_handle: u64, prio: usize) -> Vec<(ItemId, CheckerItem)>;
}

/// An in-memory [`CheckerDb`]. Handles are cheap clones of one shared map.
#[derive(Debug, Clone, Default)]
pub struct MemDb {
    inner: Arc<Mutex<MemDbInner>>,
}

#[derive(Debug, Default)]
struct MemDbInner {
    next_id: u64,
    items: BTreeMap<ItemId, CheckerItem>,
}

impl MemDb {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the database is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

impl CheckerDb for MemDb {
    fn insert(&self, item: CheckerItem) -> ItemId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ItemId(inner.next_id);
        inner.items.insert(id, item);
        id
    }

    fn get(&self, id: ItemId) -> Option<CheckerItem> {
        self.inner.lock().items.get(&id).cloned()
    }

    fn set_chosen(&self, id: ItemId, chosen_by: u64) {
        if let Some(item) = self.inner.lock().items.get_mut(&id) {
            item.chosen_by = chosen_by;
        }
    }

    fn delete(&self, id: ItemId) {
        self.inner.lock().items.remove(&id);
    }

    fn is_stored(&self, id: ItemId) -> bool {
        self.inner.lock().items.contains_key(&id)
    }

    fn query(&self, node_db_handle: u64, prio: usize) -> Vec<(ItemId, CheckerItem)> {
        self.inner
            .lock()
            .items
            .iter()
            .filter(|(_, item)| item.node_db_handle == node_db_handle && item.prio == prio)
            .map(|(id, item)| (*id, item.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crud_and_query() {
        let db = MemDb::new();
        let a = db.insert(CheckerItem::new(GetterId(1), 10, 2, None));
        let b = db.insert(CheckerItem::new(GetterId(2), 10, 2, None));
        let c = db.insert(CheckerItem::new(GetterId(3), 10, 3, None));
        let _other = db.insert(CheckerItem::new(GetterId(4), 11, 2, None));

        assert!(db.is_stored(a));
        assert_eq!(db.get(a).unwrap().getter, GetterId(1));

        let at_two: Vec<_> = db.query(10, 2).into_iter().map(|(id, _)| id).collect();
        assert_eq!(at_two, vec![a, b], "oldest first");
        assert_eq!(db.query(10, 3).len(), 1);
        assert_eq!(db.query(12, 2).len(), 0);

        db.set_chosen(c, 77);
        assert_eq!(db.get(c).unwrap().chosen_by, 77);

        db.delete(b);
        assert!(!db.is_stored(b));
        db.delete(b);
        assert_eq!(db.len(), 3);
    }
}
