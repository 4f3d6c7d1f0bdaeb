//! Check pending retrieval requests against the local datastore.
//!
//! The [`DatastoreChecker`] sits between request registration and network
//! fetch. Every pending retrieval — transient or persistent — first has its
//! candidate keys probed against the local [`BlockStore`]; blocks found
//! locally are tripped straight to the request's scheduler, and only
//! requests with keys left over are registered for the network.
//!
//! The checker interacts with three collaborators:
//! - [`BlockStore`]: the local store probed for each key.
//! - [`RequestScheduler`]: receives tripped blocks and the registration
//!   outcome of each checked request.
//! - [`JobRunner`]: the database executor. Persistent work descriptors live
//!   in the durable database and all access to them is queued there.
//!
//! Work is organized as one FIFO per priority class, twice: transient
//! requests and persistent ones. Selection is priority-then-arrival, and at
//! equal priority transient work wins. Persistent work is bounded: at most
//! [`MAX_PERSISTENT_KEYS`] keys are held in memory, the loader replenishes
//! the queues from the durable database when they run dry, and the trimmer
//! sheds the least urgent adopted work (resetting its adoption stamp so the
//! loader can pick it up again later) when the bound is exceeded.
//!
//! The dispatch loop also watches the depth of the completion lane on the
//! database executor. Probing the store is much faster than draining
//! completions; when the lane is deep the loop degrades to transient-only
//! work, and past a higher watermark it stops probing entirely for a while.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error_span, trace, warn, Instrument};

use crate::db::{CheckerDb, CheckerItem, ItemId, UNADOPTED};
use crate::jobs::{self, JobRunner};
use crate::keys::Key;
use crate::request::{ClientContext, GetterId, RequestScheduler};
use crate::store::{BlockSet, BlockStore};

mod invariants;

/// Cap on keys queued in memory for persistent requests, summed over all
/// priorities.
pub const MAX_PERSISTENT_KEYS: usize = 1024;

/// Deduplication tag for queued loader jobs.
const LOADER_TAG: &str = "datastore-checker-loader";

/// Thresholds and waits for the dispatch loop.
#[derive(Debug, Clone)]
pub struct CheckerLimits {
    /// Completion-lane depth above which the dispatcher stops probing
    /// entirely and sleeps.
    pub stall_backlog: usize,
    /// Completion-lane depth above which only transient work is served.
    pub transient_only_backlog: usize,
    /// How long to sleep when the completion lane is past `stall_backlog`.
    pub stall_sleep: Duration,
    /// Upper bound on one wait for new work; a safety net, not a schedule.
    pub idle_wait: Duration,
}

impl Default for CheckerLimits {
    fn default() -> Self {
        CheckerLimits {
            stall_backlog: 500,
            transient_only_backlog: 100,
            stall_sleep: Duration::from_secs(10),
            idle_wait: Duration::from_secs(100),
        }
    }
}

/// Handle to the datastore checker. Clones share one set of queues.
#[derive(Debug, Clone)]
pub struct DatastoreChecker {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn BlockStore>,
    jobs: JobRunner,
    context: Arc<ClientContext>,
    limits: CheckerLimits,
    /// The checker monitor. Never held across a store probe, a scheduler
    /// callback, or a database query.
    state: Mutex<Queues>,
    notify: Notify,
}

/// One FIFO per priority class, for each kind of request.
struct Queues {
    transient: Vec<VecDeque<TransientEntry>>,
    persistent: Vec<VecDeque<PersistentEntry>>,
}

struct TransientEntry {
    keys: Vec<Key>,
    getter: GetterId,
    blocks: Option<BlockSet>,
}

/// Everything a persistent check needs at dispatch time, snapshotted at
/// adoption so dispatch never goes back to the database.
struct PersistentEntry {
    keys: Vec<Key>,
    getter: GetterId,
    dont_cache: bool,
    scheduler: Arc<dyn RequestScheduler>,
    item: ItemId,
    blocks: Option<BlockSet>,
}

enum Work {
    Transient(TransientEntry),
    Persistent(PersistentEntry),
}

impl Queues {
    fn new(priorities: usize) -> Self {
        Queues {
            transient: (0..priorities).map(|_| VecDeque::new()).collect(),
            persistent: (0..priorities).map(|_| VecDeque::new()).collect(),
        }
    }

    fn keys_in(queue: &VecDeque<PersistentEntry>) -> usize {
        queue.iter().map(|entry| entry.keys.len()).sum()
    }

    /// Persistent keys queued across all priorities.
    fn persistent_keys_total(&self) -> usize {
        self.persistent.iter().map(Self::keys_in).sum()
    }

    /// Persistent keys queued at `prio` or more urgent.
    fn persistent_keys_at_or_above(&self, prio: usize) -> usize {
        self.persistent[..=prio].iter().map(Self::keys_in).sum()
    }

    /// Persistent keys queued strictly more urgent than `prio`.
    fn persistent_keys_above(&self, prio: usize) -> usize {
        self.persistent[..prio].iter().map(Self::keys_in).sum()
    }

    /// Persistent keys queued strictly less urgent than `prio`.
    fn persistent_keys_below(&self, prio: usize) -> usize {
        self.persistent[prio + 1..].iter().map(Self::keys_in).sum()
    }

    fn has_persistent_getter(&self, prio: usize, getter: GetterId) -> bool {
        self.persistent[prio]
            .iter()
            .any(|entry| entry.getter == getter)
    }
}

impl DatastoreChecker {
    /// Create a checker over `store` with default [`CheckerLimits`].
    ///
    /// `priorities` fixes the number of priority classes and must match the
    /// host scheduler's classification.
    pub fn new(
        store: Arc<dyn BlockStore>,
        jobs: JobRunner,
        context: Arc<ClientContext>,
        priorities: usize,
    ) -> Self {
        Self::with_limits(store, jobs, context, priorities, CheckerLimits::default())
    }

    /// Create a checker with explicit limits.
    pub fn with_limits(
        store: Arc<dyn BlockStore>,
        jobs: JobRunner,
        context: Arc<ClientContext>,
        priorities: usize,
        limits: CheckerLimits,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                jobs,
                context,
                limits,
                state: Mutex::new(Queues::new(priorities)),
                notify: Notify::new(),
            }),
        }
    }

    /// Queue the loader once at high database priority, then spawn the
    /// dispatch loop.
    pub fn start(&self, name: &str) -> JoinHandle<()> {
        self.inner.queue_loader();
        let inner = self.inner.clone();
        let span = error_span!("datastore-checker", %name);
        tokio::spawn(async move { inner.run().await }.instrument(span))
    }

    /// Release a dispatcher waiting for work.
    pub fn wake_up(&self) {
        self.inner.notify.notify_one();
    }

    /// Queue a transient request for a datastore check. Its keys and
    /// priority are read from the request now; the check happens on the
    /// dispatch loop and concludes with a direct `finish_register` call.
    pub fn queue_transient_request(&self, getter: GetterId, blocks: Option<BlockSet>) {
        let Some(get) = self.inner.context.registry.resolve(getter) else {
            warn!(%getter, "transient request not registered, dropping");
            return;
        };
        let keys = get.list_keys();
        let prio = get.priority_class();
        {
            let mut state = self.inner.state.lock();
            state.transient[prio].push_back(TransientEntry {
                keys,
                getter,
                blocks,
            });
            #[cfg(any(test, debug_assertions))]
            self.inner.check_invariants(&state);
        }
        self.inner.notify.notify_one();
    }

    /// Queue a persistent request for a datastore check.
    ///
    /// A [`CheckerItem`] is stored in the durable database regardless; the
    /// in-memory queues only admit it while the keys queued at its priority
    /// or more urgent do not exceed [`MAX_PERSISTENT_KEYS`]. Whatever is not
    /// admitted now stays unadopted in the database for the loader. Runs on
    /// the database executor.
    pub fn queue_persistent_request(&self, getter: GetterId, blocks: Option<BlockSet>) {
        let inner = self.inner.clone();
        self.inner.jobs.queue(
            jobs::NORM_PRIORITY,
            Box::new(move |db, context| {
                inner.queue_persistent_request_on_db(getter, blocks, db, context);
                Ok(())
            }),
        );
    }
}

impl Inner {
    fn queue_loader(self: &Arc<Self>) {
        let inner = self.clone();
        self.jobs.queue_unique(
            jobs::HIGH_PRIORITY,
            LOADER_TAG,
            Box::new(move |db, context| {
                inner.load_persistent_requests(db, context);
                Ok(())
            }),
        );
    }

    fn queue_persistent_request_on_db(
        self: &Arc<Self>,
        getter: GetterId,
        blocks: Option<BlockSet>,
        db: &dyn CheckerDb,
        context: &ClientContext,
    ) {
        let Some(get) = context.registry.resolve(getter) else {
            debug!(%getter, "persistent request deleted before queueing, dropping");
            return;
        };
        let keys = get.list_keys();
        let prio = get.priority_class();
        let dont_cache = get.dont_cache();
        let scheduler = get.scheduler(context);
        let item = db.insert(CheckerItem::new(
            getter,
            context.node_db_handle,
            prio,
            blocks.clone(),
        ));

        {
            let mut state = self.state.lock();
            // Only keys queued at no lower urgency than this request count
            // against admission.
            if state.persistent_keys_at_or_above(prio) > MAX_PERSISTENT_KEYS {
                trace!(%getter, prio, "persistent queue full, leaving item for the loader");
                return;
            }
            db.set_chosen(item, context.boot_id);
            state.persistent[prio].push_back(PersistentEntry {
                keys,
                getter,
                dont_cache,
                scheduler,
                item,
                blocks,
            });
            self.trim_persistent_queue(&mut state, prio, db);
            #[cfg(any(test, debug_assertions))]
            self.check_invariants(&state);
        }
        self.notify.notify_one();
    }

    /// Replenish the persistent queues from the durable database.
    ///
    /// Runs on the database executor: at boot, whenever the dispatcher runs
    /// dry, and inline after each persistent completion.
    fn load_persistent_requests(self: &Arc<Self>, db: &dyn CheckerDb, context: &ClientContext) {
        let priorities = {
            let state = self.state.lock();
            if state.persistent_keys_total() > MAX_PERSISTENT_KEYS {
                trace!("persistent queue already full, not loading");
                return;
            }
            state.persistent.len()
        };
        for prio in 0..priorities {
            for (item_id, item) in db.query(context.node_db_handle, prio) {
                if item.chosen_by == context.boot_id {
                    // Already adopted this boot.
                    continue;
                }
                let Some(get) = context.registry.resolve(item.getter) else {
                    debug!(getter = %item.getter, "request gone from the registry, purging its item");
                    db.delete(item_id);
                    continue;
                };
                let dont_cache = get.dont_cache();
                let scheduler = get.scheduler(context);
                // Snapshot the keys now; the queues hold plain values with
                // no tie back to the database.
                let keys = get.list_keys();
                let blocks = item.blocks.clone();

                let mut state = self.state.lock();
                if state.has_persistent_getter(prio, item.getter) {
                    continue;
                }
                db.set_chosen(item_id, context.boot_id);
                state.persistent[prio].push_back(PersistentEntry {
                    keys,
                    getter: item.getter,
                    dont_cache,
                    scheduler,
                    item: item_id,
                    blocks,
                });
                #[cfg(any(test, debug_assertions))]
                self.check_invariants(&state);
                self.notify.notify_one();
                if state.persistent_keys_total() > MAX_PERSISTENT_KEYS
                    && self.trim_persistent_queue(&mut state, prio, db)
                {
                    return;
                }
            }
        }
    }

    /// Shed persistent work until the queue is back under
    /// [`MAX_PERSISTENT_KEYS`], never dropping anything at `prio` or more
    /// urgent. Dropped items have their adoption stamp reset so the loader
    /// re-adopts them when room frees up.
    ///
    /// Returns true unless the queue ended under the limit.
    fn trim_persistent_queue(&self, state: &mut Queues, prio: usize, db: &dyn CheckerDb) -> bool {
        let pre_size = state.persistent_keys_above(prio);
        if pre_size > MAX_PERSISTENT_KEYS {
            // More urgent work alone already exceeds the cap. Yield
            // everything less urgent back to the database; the excess above
            // `prio` is left untouched.
            for queue in state.persistent[prio + 1..].iter_mut() {
                while let Some(entry) = queue.pop_back() {
                    db.set_chosen(entry.item, UNADOPTED);
                }
            }
            return true;
        }
        let mut post_size = state.persistent_keys_below(prio);
        if pre_size + post_size < MAX_PERSISTENT_KEYS {
            return false;
        }
        // Shed from the least urgent end upward, stopping short of `prio`.
        for queue in state.persistent[prio + 1..].iter_mut().rev() {
            while let Some(entry) = queue.pop_back() {
                db.set_chosen(entry.item, UNADOPTED);
                post_size -= entry.keys.len();
                if pre_size + post_size < MAX_PERSISTENT_KEYS {
                    return false;
                }
            }
        }
        true
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.run_once().await;
            tokio::task::yield_now().await;
        }
    }

    async fn run_once(self: &Arc<Self>) {
        // If completions are draining slower than the store can be probed,
        // back off: a popular key can satisfy a persistent and a transient
        // request at once, and unbounded tripping piles blocks up in memory.
        let backlog = self.jobs.queue_len(jobs::TRIP_PENDING_PRIORITY);
        if backlog > self.limits.stall_backlog {
            debug!(backlog, "completion lane overloaded, stalling");
            tokio::time::sleep(self.limits.stall_sleep).await;
            return;
        }
        let only_transient = backlog > self.limits.transient_only_backlog;

        let work = loop {
            let notified = self.notify.notified();
            if let Some(work) = self.take_next(only_transient) {
                break work;
            }
            self.queue_loader();
            let _ = tokio::time::timeout(self.limits.idle_wait, notified).await;
        };

        match work {
            Work::Transient(entry) => self.dispatch_transient(entry),
            Work::Persistent(entry) => self.dispatch_persistent(entry),
        }
    }

    /// Select the next work item: priority first, transient before
    /// persistent at equal priority, FIFO within a queue.
    fn take_next(&self, only_transient: bool) -> Option<Work> {
        let mut state = self.state.lock();
        for prio in 0..state.transient.len() {
            if let Some(entry) = state.transient[prio].pop_front() {
                return Some(Work::Transient(entry));
            }
            if !only_transient {
                if let Some(entry) = state.persistent[prio].pop_front() {
                    return Some(Work::Persistent(entry));
                }
            }
        }
        None
    }

    fn dispatch_transient(&self, entry: TransientEntry) {
        let TransientEntry {
            keys,
            getter,
            blocks,
        } = entry;
        let Some(get) = self.context.registry.resolve(getter) else {
            debug!(%getter, "transient request deleted before its check, dropping");
            return;
        };
        let dont_cache = get.dont_cache();
        let scheduler = get.scheduler(&self.context);
        let any_valid = self.probe(&keys, dont_cache, &blocks, &scheduler);
        scheduler.finish_register(&[getter], false, false, None, any_valid, None);
    }

    fn dispatch_persistent(self: &Arc<Self>, entry: PersistentEntry) {
        let PersistentEntry {
            keys,
            getter,
            dont_cache,
            scheduler,
            item,
            blocks,
        } = entry;
        let any_valid = self.probe(&keys, dont_cache, &blocks, &scheduler);
        self.queue_loader();
        let inner = self.clone();
        self.jobs.queue(
            jobs::NORM_PRIORITY,
            Box::new(move |db, context| {
                if !context.registry.contains(getter) {
                    // Completed and deleted while the check ran.
                    debug!(%getter, "request deleted before finish, dropping");
                    return Ok(());
                }
                scheduler.finish_register(&[getter], true, true, Some(db), any_valid, Some(item));
                inner.load_persistent_requests(db, context);
                Ok(())
            }),
        );
    }

    /// Probe every key and trip what is found. Returns whether at least one
    /// key was not found and still needs the network.
    fn probe(
        &self,
        keys: &[Key],
        dont_cache: bool,
        blocks: &Option<BlockSet>,
        scheduler: &Arc<dyn RequestScheduler>,
    ) -> bool {
        let mut any_valid = false;
        for key in keys {
            // A caller-supplied block set replaces the store outright; a
            // miss in the set does not fall through to it.
            let block = match blocks {
                Some(set) => set.get(key),
                None => self.store.fetch(key, dont_cache),
            };
            match block {
                Some(block) => {
                    trace!(?key, "found key in datastore");
                    scheduler.trip_pending_key(&block);
                }
                None => any_valid = true,
            }
        }
        any_valid
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DatastoreChecker")
            .field("priorities", &state.transient.len())
            .field("persistent_keys", &state.persistent_keys_total())
            .finish_non_exhaustive()
    }
}
