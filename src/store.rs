//! Local block storage interfaces.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::keys::{Block, Key};

/// A node-local block store. This trait seam keeps the checker testable
/// without real disk I/O.
pub trait BlockStore: Send + Sync + 'static {
    /// Look up `key`. With `dont_cache` set the store must not promote the
    /// block into any cache layer it keeps; the request asked for the block
    /// without leaving a trace of interest.
    fn fetch(&self, key: &Key, dont_cache: bool) -> Option<Block>;
}

/// An in-memory [`BlockStore`]. Handles are cheap clones of one shared map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blocks: Arc<RwLock<HashMap<Key, Block>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block under its own key.
    pub fn put(&self, block: Block) {
        self.blocks.write().insert(block.key(), block);
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockStore for MemoryStore {
    fn fetch(&self, key: &Key, _dont_cache: bool) -> Option<Block> {
        // A flat map has no cache layer to bypass.
        self.blocks.read().get(key).cloned()
    }
}

/// A caller-scoped set of pre-staged blocks, probed instead of the store for
/// requests that carry one.
#[derive(Debug, Clone, Default)]
pub struct BlockSet {
    blocks: Arc<HashMap<Key, Block>>,
}

impl BlockSet {
    /// Build a set from blocks, each keyed under its own key.
    pub fn new(blocks: impl IntoIterator<Item = Block>) -> Self {
        Self {
            blocks: Arc::new(
                blocks
                    .into_iter()
                    .map(|block| (block.key(), block))
                    .collect(),
            ),
        }
    }

    /// Look up `key` in the set.
    pub fn get(&self, key: &Key) -> Option<Block> {
        self.blocks.get(key).cloned()
    }

    /// Number of blocks in the set.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
