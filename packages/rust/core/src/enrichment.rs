//! Background enrichment queue.
//!
//! Every craft made on behalf of a user produces one [`EnrichmentJob`]. Jobs
//! go through a bounded channel to a dispatcher that fans them out over
//! `workers` lanes. A user always maps to the same lane and a lane runs its
//! jobs one at a time in admission order, so a craft's rank is computed only
//! after every earlier craft by that user has been logged. A job:
//!
//! 1. registers the result if no material of that name exists yet, with an
//!    embedding when one can be computed
//! 2. computes the per-user rank of the craft
//! 3. appends the provenance row
//!
//! Failures are logged and counted, never returned to the crafting caller.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use opencraft_providers::EmbeddingProvider;
use opencraft_shared::{Combination, CombinationId, EnrichmentConfig, OpenCraftError, Result};
use opencraft_storage::Storage;

use crate::rank::craft_rank;

/// Jobs buffered per lane before the dispatcher waits on it.
const LANE_CAPACITY: usize = 16;

/// Side effects owed for one craft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentJob {
    pub first_word: String,
    pub second_word: String,
    pub result_name: String,
    pub result_emoji: String,
    pub username: String,
    pub is_discovery: bool,
}

/// Snapshot of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    /// Jobs admitted but not yet started.
    pub queued: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    /// Admitted and not yet finished (queued + in flight).
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// What a running job needs.
struct JobContext {
    storage: Arc<Storage>,
    embedder: Arc<dyn EmbeddingProvider>,
}

/// Bounded enrichment worker pool, ordered per user.
pub struct EnrichmentQueue {
    sender: Mutex<Option<mpsc::Sender<EnrichmentJob>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    idle: Arc<Notify>,
}

impl EnrichmentQueue {
    /// Spawn the dispatcher. Must be called inside a Tokio runtime.
    pub fn start(
        storage: Arc<Storage>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &EnrichmentConfig,
    ) -> Self {
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let counters = Arc::new(Counters::default());
        let idle = Arc::new(Notify::new());
        let ctx = Arc::new(JobContext { storage, embedder });

        let handle = tokio::spawn(dispatch(rx, ctx, workers, counters.clone(), idle.clone()));
        info!(workers, capacity, "enrichment queue started");

        Self {
            sender: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(handle)),
            counters,
            idle,
        }
    }

    /// Admit a job, waiting while the queue is full. Returns once the job is
    /// queued, not once it has run.
    pub async fn submit(&self, job: EnrichmentJob) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| OpenCraftError::EnrichmentFailed("queue lock poisoned".into()))?
            .clone()
            .ok_or_else(|| OpenCraftError::EnrichmentFailed("queue is shut down".into()))?;

        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(job).await.is_err() {
            self.finish_one();
            return Err(OpenCraftError::EnrichmentFailed(
                "queue is shut down".into(),
            ));
        }
        Ok(())
    }

    pub fn stats(&self) -> EnrichmentStats {
        let pending = self.counters.pending.load(Ordering::SeqCst);
        let in_flight = self.counters.in_flight.load(Ordering::SeqCst);
        EnrichmentStats {
            queued: pending.saturating_sub(in_flight),
            in_flight,
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Wait until every admitted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.counters.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop admitting jobs and wait for everything already admitted to run.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        let handle = self.dispatcher.lock().ok().and_then(|mut h| h.take());
        drop(sender);

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "enrichment dispatcher panicked");
            }
            let stats = self.stats();
            info!(
                completed = stats.completed,
                failed = stats.failed,
                "enrichment queue shut down"
            );
        }
    }

    fn finish_one(&self) {
        release(&self.counters, &self.idle);
    }
}

fn release(counters: &Counters, idle: &Notify) {
    if counters.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        idle.notify_waiters();
    }
}

/// Lane index for `username`. Stable for the lifetime of the process.
fn lane_for(username: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    username.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

/// Route jobs to their user's lane until the channel closes, then wait for
/// every lane to drain.
async fn dispatch(
    mut rx: mpsc::Receiver<EnrichmentJob>,
    ctx: Arc<JobContext>,
    workers: usize,
    counters: Arc<Counters>,
    idle: Arc<Notify>,
) {
    let mut lanes = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for lane in 0..workers {
        let (tx, lane_rx) = mpsc::channel(LANE_CAPACITY);
        lanes.push(tx);
        handles.push(tokio::spawn(run_lane(
            lane,
            lane_rx,
            ctx.clone(),
            counters.clone(),
            idle.clone(),
        )));
    }

    while let Some(job) = rx.recv().await {
        let lane = lane_for(&job.username, workers);
        if let Err(mpsc::error::SendError(job)) = lanes[lane].send(job).await {
            warn!(lane, user = %job.username, "enrichment lane closed; dropping job");
            counters.failed.fetch_add(1, Ordering::SeqCst);
            release(&counters, &idle);
        }
    }

    drop(lanes);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "enrichment lane panicked");
        }
    }
}

/// Run one lane's jobs sequentially.
async fn run_lane(
    lane: usize,
    mut rx: mpsc::Receiver<EnrichmentJob>,
    ctx: Arc<JobContext>,
    counters: Arc<Counters>,
    idle: Arc<Notify>,
) {
    while let Some(job) = rx.recv().await {
        counters.in_flight.fetch_add(1, Ordering::SeqCst);
        match run_job(&ctx, &job).await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(
                    lane,
                    result = %job.result_name,
                    user = %job.username,
                    error = %e,
                    "enrichment job failed"
                );
                counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        release(&counters, &idle);
    }
}

#[instrument(skip_all, fields(result = %job.result_name, user = %job.username, discovery = job.is_discovery))]
async fn run_job(ctx: &JobContext, job: &EnrichmentJob) -> Result<()> {
    // A result first produced by an anonymous craft has no material row yet.
    let register = job.is_discovery
        || ctx
            .storage
            .get_material(&job.result_name)
            .await
            .map_err(|e| OpenCraftError::EnrichmentFailed(format!("lookup: {e}")))?
            .is_none();

    if register {
        let embedding = match ctx.embedder.embed(&job.result_name).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "embedding failed; registering without one");
                None
            }
        };

        let won = ctx
            .storage
            .register_material(
                &job.result_name,
                &job.result_emoji,
                Some(&job.username),
                embedding.as_deref(),
            )
            .await
            .map_err(|e| OpenCraftError::EnrichmentFailed(format!("register: {e}")))?;

        match (won, job.is_discovery) {
            (true, true) => info!("new material discovered"),
            (true, false) => info!("registered material first crafted anonymously"),
            (false, _) => debug!("material already registered; lost the registration race"),
        }
    }

    let rank = craft_rank(&ctx.storage, &job.first_word, &job.second_word, &job.username)
        .await
        .map_err(|e| OpenCraftError::EnrichmentFailed(format!("rank: {e}")))?;

    ctx.storage
        .append_combination(&Combination {
            id: CombinationId::new(),
            first_word: job.first_word.clone(),
            second_word: job.second_word.clone(),
            result_name: job.result_name.clone(),
            result_emoji: job.result_emoji.clone(),
            username: job.username.clone(),
            timestamp: Utc::now(),
            per_user_rank: rank,
            is_discovery: job.is_discovery,
        })
        .await
        .map_err(|e| OpenCraftError::EnrichmentFailed(format!("log: {e}")))?;

    debug!(rank, "combination logged");
    Ok(())
}
