//! Retrieval requests and the seams around them.
//!
//! The checker never owns a request; it holds a [`GetterId`] and resolves it
//! through the [`RequestRegistry`] when it needs the request's keys or its
//! scheduler. Removing a request from the registry is the cancellation
//! signal: work referring to an unresolvable id is dropped silently and any
//! durable record for it is purged.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::db::{CheckerDb, ItemId};
use crate::keys::{Block, Key};

/// Identifier of a registered retrieval request.
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
pub struct GetterId(pub u64);

/// A pending retrieval request, as seen by the checker.
pub trait SendableGet: Send + Sync + 'static {
    /// The candidate keys to probe, most significant first.
    fn list_keys(&self) -> Vec<Key>;

    /// The request's priority class; smaller is more urgent.
    fn priority_class(&self) -> usize;

    /// Whether store probes for this request must avoid promoting blocks
    /// into caches.
    fn dont_cache(&self) -> bool;

    /// The scheduler that receives this request's tripped blocks and its
    /// registration outcome.
    fn scheduler(&self, context: &ClientContext) -> Arc<dyn RequestScheduler>;
}

/// The downstream request scheduler, invoked by the checker.
pub trait RequestScheduler: Send + Sync + 'static {
    /// Hand a block found in the datastore to whatever is waiting on its key.
    fn trip_pending_key(&self, block: &Block);

    /// Conclude a request's datastore check. `any_valid` is set when at
    /// least one key was not found locally and still needs the network.
    /// For persistent requests this runs on the database executor with the
    /// database and the durable item attached.
    fn finish_register(
        &self,
        getters: &[GetterId],
        persistent: bool,
        on_database_thread: bool,
        db: Option<&dyn CheckerDb>,
        any_valid: bool,
        item: Option<ItemId>,
    );
}

/// Maps [`GetterId`]s to live requests. Handles are cheap clones.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    requests: RwLock<HashMap<GetterId, Arc<dyn SendableGet>>>,
}

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, minting its id.
    pub fn register(&self, getter: Arc<dyn SendableGet>) -> GetterId {
        let id = GetterId(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.inner.requests.write().insert(id, getter);
        id
    }

    /// Resolve an id to its request, if still registered.
    pub fn resolve(&self, id: GetterId) -> Option<Arc<dyn SendableGet>> {
        self.inner.requests.read().get(&id).cloned()
    }

    /// Whether `id` is still registered.
    pub fn contains(&self, id: GetterId) -> bool {
        self.inner.requests.read().contains_key(&id)
    }

    /// Remove a request. This is the implicit cancellation path: pending
    /// checker work for the id is dropped when next touched.
    pub fn remove(&self, id: GetterId) -> Option<Arc<dyn SendableGet>> {
        self.inner.requests.write().remove(&id)
    }
}

impl fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RequestRegistry({} requests)",
            self.inner.requests.read().len()
        )
    }
}

/// Immutable per-boot context handed to the checker at construction.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Identifier of this boot session; never zero, which marks unadopted
    /// durable items.
    pub boot_id: u64,
    /// Identifier of the owning node installation inside the durable
    /// database.
    pub node_db_handle: u64,
    /// The registry resolving getter ids to live requests.
    pub registry: RequestRegistry,
}

impl ClientContext {
    /// Build a context. `boot_id` must be non-zero.
    pub fn new(boot_id: u64, node_db_handle: u64, registry: RequestRegistry) -> Self {
        assert_ne!(boot_id, 0, "boot id zero is reserved for unadopted items");
        Self {
            boot_id,
            node_db_handle,
            registry,
        }
    }
}
