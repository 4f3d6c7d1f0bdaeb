//! The database executor.
//!
//! The durable database is owned by a single consumer task; everything that
//! touches it is queued as a job on one of the priority lanes and runs
//! serially in lane order. The checker's dispatch loop also reads the
//! [`TRIP_PENDING_PRIORITY`] lane depth as its backpressure signal: that
//! lane is where downstream schedulers queue the completion work for blocks
//! the checker trips.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{error_span, warn, Instrument};

use crate::db::CheckerDb;
use crate::request::ClientContext;

/// Lane for work that must preempt everything else (the loader).
pub const HIGH_PRIORITY: usize = 0;
/// Lane where tripped-block completions are queued by schedulers.
pub const TRIP_PENDING_PRIORITY: usize = 1;
/// Lane for ordinary database work.
pub const NORM_PRIORITY: usize = 2;

const LANES: usize = 3;

/// A unit of database work. Failures are logged and swallowed; the executor
/// must outlive any single job.
pub type DbJob =
    Box<dyn FnOnce(&dyn CheckerDb, &ClientContext) -> anyhow::Result<()> + Send + 'static>;

struct QueuedJob {
    tag: Option<&'static str>,
    run: DbJob,
}

/// Handle to the database executor. Clones share one queue and one consumer.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    lanes: Mutex<[VecDeque<QueuedJob>; LANES]>,
    notify: Notify,
}

impl JobRunner {
    /// Spawn the consumer task owning `db` and return a handle to its queue.
    pub fn spawn(db: impl CheckerDb, context: Arc<ClientContext>) -> Self {
        let runner = Self {
            inner: Arc::new(RunnerInner {
                lanes: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
                notify: Notify::new(),
            }),
        };
        let inner = runner.inner.clone();
        tokio::spawn(
            async move { inner.run(db, context).await }.instrument(error_span!("db-executor")),
        );
        runner
    }

    /// Queue a job on `lane`.
    pub fn queue(&self, lane: usize, job: DbJob) {
        self.push(lane, QueuedJob {
            tag: None,
            run: job,
        });
    }

    /// Queue a job on `lane` unless a job with the same `tag` is already
    /// pending on any lane.
    pub fn queue_unique(&self, lane: usize, tag: &'static str, job: DbJob) {
        let mut lanes = self.inner.lanes.lock();
        let pending = lanes
            .iter()
            .flatten()
            .any(|queued| queued.tag == Some(tag));
        if pending {
            return;
        }
        lanes[lane].push_back(QueuedJob {
            tag: Some(tag),
            run: job,
        });
        drop(lanes);
        self.inner.notify.notify_one();
    }

    /// Number of jobs pending on `lane`.
    pub fn queue_len(&self, lane: usize) -> usize {
        self.inner.lanes.lock()[lane].len()
    }

    fn push(&self, lane: usize, job: QueuedJob) {
        self.inner.lanes.lock()[lane].push_back(job);
        self.inner.notify.notify_one();
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lanes = self.inner.lanes.lock();
        write!(f, "JobRunner(")?;
        for (lane, queue) in lanes.iter().enumerate() {
            if lane > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", queue.len())?;
        }
        write!(f, ")")
    }
}

impl RunnerInner {
    async fn run(&self, db: impl CheckerDb, context: Arc<ClientContext>) {
        loop {
            let job = loop {
                let notified = self.notify.notified();
                if let Some(job) = self.pop() {
                    break job;
                }
                notified.await;
            };
            if let Err(err) = (job.run)(&db, &context) {
                warn!("database job failed: {err:#}");
            }
        }
    }

    /// Pop the next job, most urgent lane first.
    fn pop(&self) -> Option<QueuedJob> {
        self.lanes.lock().iter_mut().find_map(VecDeque::pop_front)
    }
}
