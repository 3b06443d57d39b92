/// Pipeline Module
///
/// Orchestrates the export job end to end: partition the slot range into
/// batches, fetch them on a bounded pool of workers (each with its own lazily
/// created provider client), extract normalized records, and release results
/// to the item exporter in ascending batch order.
///
/// Batch dispatch follows range order, completion order is whatever the
/// network allows, and the ordered writer reconciles the two. Admission
/// permits travel with each batch until its records reach the exporter, so
/// in-flight plus buffered-but-unreleased batches stay capped no matter how
/// uneven remote latency is.
use crate::batches::{partition, Batch, BlockRange};
use crate::errors::{FetchError, JobError};
use crate::etl::extract::{extract_block, BlockOutput};
use crate::etl::load::ItemExporter;
use crate::models::{ExportSelection, Record};
use crate::rpc::{BatchProvider, ProviderFactory, RawBlockPayload};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Retry policy for transient fetch failures.
///
/// Backoff doubles per attempt and saturates at `max_backoff`. Only transient
/// provider errors are retried; fatal ones abort the batch immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_backoff)
    }

    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }
}

/// Configuration for one export job
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub range: BlockRange,
    pub batch_size: u64,
    pub max_workers: usize,
    pub selection: ExportSelection,
    pub retry: RetryPolicy,
}

/// Lifecycle of a single-use export job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Validating,
    Running,
    Draining,
    Completed,
    Failed,
}

/// Job execution statistics
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    pub batches_total: usize,
    pub blocks_fetched: usize,
    pub blocks_exported: usize,
    pub transactions_exported: usize,
    pub instructions_exported: usize,
    pub elapsed_time: Duration,
}

impl JobStats {
    pub fn records_exported(&self) -> usize {
        self.blocks_exported + self.transactions_exported + self.instructions_exported
    }

    pub fn blocks_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.blocks_fetched as f64 / secs
        }
    }

    /// Print the final summary block
    pub fn print_summary(&self) {
        println!("\n📊 Export Statistics:");
        println!("   ⏱️  Total time: {:.2}s", self.elapsed_time.as_secs_f64());
        println!("   📦 Batches: {}", self.batches_total);
        println!("   🧱 Blocks fetched: {}", self.blocks_fetched);
        println!("   💾 Records exported: {}", self.records_exported());
        println!(
            "      blocks: {} | transactions: {} | instructions: {}",
            self.blocks_exported, self.transactions_exported, self.instructions_exported
        );
        println!("   ⚡ Speed: {:.2} blocks/sec", self.blocks_per_second());
    }
}

/// One batch admitted into the pipeline. The permit is released only when the
/// batch's records have been handed to the exporter.
struct WorkItem {
    ordinal: usize,
    batch: Batch,
    permit: OwnedSemaphorePermit,
}

/// Extraction results for one batch, tagged with its dispatch position
struct BatchOutcome {
    ordinal: usize,
    outputs: Vec<BlockOutput>,
    _permit: OwnedSemaphorePermit,
}

/// Single-use export job: partitioner → worker pool → ordered writer.
pub struct ExportJob<F: ProviderFactory, E: ItemExporter> {
    config: JobConfig,
    factory: Arc<F>,
    exporter: E,
    state: JobState,
}

impl<F, E> ExportJob<F, E>
where
    F: ProviderFactory,
    E: ItemExporter,
{
    pub fn new(config: JobConfig, factory: F, exporter: E) -> Self {
        Self { config, factory: Arc::new(factory), exporter, state: JobState::Idle }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        tracing::debug!(from = ?self.state, to = ?next, "job state transition");
        self.state = next;
    }

    /// Run the job to completion.
    ///
    /// Either the whole requested range is exported or the job fails with the
    /// first fatal error; the exporter is closed exactly once on every path
    /// after it was opened.
    pub async fn run(mut self) -> Result<JobStats, JobError> {
        self.transition(JobState::Validating);
        if let Err(e) = self.validate() {
            self.transition(JobState::Failed);
            return Err(e);
        }

        if let Err(e) = self.exporter.open().await {
            self.transition(JobState::Failed);
            return Err(JobError::ExportWrite(e));
        }

        let result = self.execute().await;
        let close_result = self.exporter.close().await;

        match result {
            Ok(stats) => {
                if let Err(e) = close_result {
                    self.transition(JobState::Failed);
                    return Err(JobError::ExportWrite(e));
                }
                self.transition(JobState::Completed);
                Ok(stats)
            }
            Err(error) => {
                if let Err(e) = close_result {
                    tracing::warn!("Exporter close failed after job error: {}", e);
                }
                self.transition(JobState::Failed);
                Err(error)
            }
        }
    }

    /// Preconditions checked before any network access.
    fn validate(&self) -> Result<(), JobError> {
        self.config.selection.validate()?;

        if self.config.max_workers == 0 {
            return Err(JobError::Configuration("max workers must be greater than 0".to_string()));
        }

        Ok(())
    }

    async fn execute(&mut self) -> Result<JobStats, JobError> {
        let batches = partition(self.config.range, self.config.batch_size)?;
        let started = Instant::now();
        let mut stats = JobStats { batches_total: batches.len(), ..Default::default() };

        self.transition(JobState::Running);
        tracing::info!(
            "Exporting slots {} to {} in {} batches with {} workers",
            self.config.range.start,
            self.config.range.end,
            batches.len(),
            self.config.max_workers
        );

        let workers = self.config.max_workers.min(batches.len());
        // In-flight + completed-but-unreleased batches share this budget.
        let admission = Arc::new(Semaphore::new(workers * 2));
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(workers);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<Result<BatchOutcome, JobError>>(workers);

        let mut tasks = JoinSet::new();

        // Dispatcher: admission-gated feed of the shared work queue, in
        // ascending range order.
        {
            let admission = admission.clone();
            let batches = batches.clone();
            tasks.spawn(async move {
                for (ordinal, batch) in batches.into_iter().enumerate() {
                    let Ok(permit) = admission.clone().acquire_owned().await else {
                        break;
                    };
                    if work_tx.send(WorkItem { ordinal, batch, permit }).await.is_err() {
                        break;
                    }
                }
                // Dropping work_tx closes the queue; workers drain and exit.
            });
        }

        for worker_id in 0..workers {
            let factory = self.factory.clone();
            let queue = work_rx.clone();
            let results = result_tx.clone();
            let retry = self.config.retry.clone();
            let selection = self.config.selection;
            tasks.spawn(run_worker(worker_id, factory, queue, results, retry, selection));
        }
        drop(result_tx);

        // Ordered sink writer: buffer out-of-order completions and release
        // them to the exporter in ascending batch order.
        let total = stats.batches_total;
        let mut buffer: BTreeMap<usize, BatchOutcome> = BTreeMap::new();
        let mut next_ordinal = 0usize;
        let mut job_error: Option<JobError> = None;

        'writer: while next_ordinal < total {
            let Some(outcome) = result_rx.recv().await else {
                // Workers are gone but batches are unaccounted for.
                panic!("result channel closed with {} of {} batches unreleased", total - next_ordinal, total);
            };

            match outcome {
                Ok(outcome) => {
                    buffer.insert(outcome.ordinal, outcome);

                    while let Some(ready) = buffer.remove(&next_ordinal) {
                        if let Err(e) = self.release(ready, &mut stats).await {
                            job_error = Some(e);
                            break 'writer;
                        }
                        next_ordinal += 1;

                        if next_ordinal % 10 == 0 || next_ordinal == total {
                            println!(
                                "   📊 Progress: {}/{} batches ({:.0}%) | {} blocks",
                                next_ordinal,
                                total,
                                (next_ordinal as f64 / total as f64) * 100.0,
                                stats.blocks_fetched
                            );
                        }
                    }
                }
                Err(e) => {
                    job_error = Some(e);
                    break 'writer;
                }
            }
        }

        if let Some(error) = job_error {
            // Cancel everything in flight and discard buffered results; the
            // job fails as a whole.
            tracing::error!("Export job failed, cancelling in-flight batches: {}", error);
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            return Err(error);
        }

        self.transition(JobState::Draining);
        result_rx.close();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }

        assert!(
            buffer.is_empty() && next_ordinal == total,
            "ordered writer terminated with unreleased batches"
        );

        stats.elapsed_time = started.elapsed();
        Ok(stats)
    }

    /// Hand one batch's records to the exporter, in on-chain order.
    async fn release(&mut self, outcome: BatchOutcome, stats: &mut JobStats) -> Result<(), JobError> {
        for output in outcome.outputs {
            tracing::trace!("Releasing {} records for slot {}", output.record_count(), output.slot);
            stats.blocks_fetched += 1;

            if let Some(block) = output.block {
                self.exporter.export(&Record::Block(block)).await.map_err(JobError::ExportWrite)?;
                stats.blocks_exported += 1;
            }

            for transaction in output.transactions {
                self.exporter
                    .export(&Record::Transaction(transaction))
                    .await
                    .map_err(JobError::ExportWrite)?;
                stats.transactions_exported += 1;
            }

            for instruction in output.instructions {
                self.exporter
                    .export(&Record::Instruction(instruction))
                    .await
                    .map_err(JobError::ExportWrite)?;
                stats.instructions_exported += 1;
            }
        }

        // The admission permit drops here, letting the dispatcher feed the
        // next batch into the pipeline.
        Ok(())
    }
}

/// One pool worker: pulls batches off the shared queue until it closes.
///
/// The provider client is built lazily on the worker's first batch and reused
/// for every batch this worker processes; it is never shared across workers.
async fn run_worker<F: ProviderFactory>(
    worker_id: usize,
    factory: Arc<F>,
    queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    results: mpsc::Sender<Result<BatchOutcome, JobError>>,
    retry: RetryPolicy,
    selection: ExportSelection,
) {
    let mut provider: Option<F::Provider> = None;

    loop {
        let item = { queue.lock().await.recv().await };
        let Some(WorkItem { ordinal, batch, permit }) = item else {
            break;
        };

        if provider.is_none() {
            match factory.provider() {
                Ok(built) => {
                    tracing::debug!("Worker {} created its provider client", worker_id);
                    provider = Some(built);
                }
                Err(e) => {
                    let error = JobError::BatchFetch {
                        from_slot: batch.from_slot,
                        to_slot: batch.to_slot,
                        attempts: 0,
                        source: e,
                    };
                    let _ = results.send(Err(error)).await;
                    break;
                }
            }
        }
        let Some(client) = provider.as_ref() else {
            break;
        };

        let result = process_batch(client, &batch, &retry, selection).await;
        let failed = result.is_err();
        let outcome = result.map(|outputs| BatchOutcome { ordinal, outputs, _permit: permit });

        if results.send(outcome).await.is_err() {
            break;
        }
        if failed {
            // Fatal errors poison the whole job; stop pulling work.
            break;
        }
    }
}

/// Fetch one batch (with retries) and extract its records.
async fn process_batch(
    provider: &impl BatchProvider,
    batch: &Batch,
    retry: &RetryPolicy,
    selection: ExportSelection,
) -> Result<Vec<BlockOutput>, JobError> {
    let payloads = fetch_with_retry(provider, batch, retry).await?;

    let mut outputs = Vec::with_capacity(payloads.len());
    for payload in &payloads {
        outputs.push(extract_block(payload, selection)?);
    }

    Ok(outputs)
}

/// Retry loop around one batch fetch. Transient errors are retried with
/// backoff and never surface past this function on eventual success.
async fn fetch_with_retry(
    provider: &impl BatchProvider,
    batch: &Batch,
    retry: &RetryPolicy,
) -> Result<Vec<RawBlockPayload>, JobError> {
    let mut attempt = 1;

    loop {
        match provider.fetch_blocks(batch).await {
            Ok(payloads) => return Ok(payloads),
            Err(e) if retry.should_retry(&e, attempt) => {
                let delay = retry.backoff(attempt);
                tracing::warn!(
                    "Fetch failed for slots {}, retrying ({}/{}) in {:?}: {}",
                    batch,
                    attempt,
                    retry.max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(JobError::BatchFetch {
                    from_slot: batch.from_slot,
                    to_slot: batch.to_slot,
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}
