//! Execution Manager - Block Scheduler and Monitor Loop
//!
//! The orchestrator for block execution. `execute` validates chain
//! linkage, builds the plan, and returns immediately; a dedicated monitor
//! thread then drains the plan slice by slice, handing items to worker
//! threads paired with executors from the pool. When the last item of the
//! last slice lands, the monitor settles fees, records a checkpoint, and
//! commits storage; a fatal item status or an abort reverts instead.
//!
//! Threading model:
//! ```text
//! caller ── execute(block) ──> pending plan ──> monitor thread
//!                                                  │ dispatch (item + executor)
//!                                                  v
//!                                           crossbeam channel
//!                                                  │
//!                                 worker threads (num_executors of them)
//!                                                  │ counters / release
//!                                                  v
//!                                           monitor wakes, next slice
//! ```
//! The monitor only does bookkeeping; all transaction work happens on the
//! workers. Storage commit/revert is invoked from the monitor thread
//! alone, so no two blocks' commits can interleave.

use crate::archive::StateArchive;
use crate::executor::{Executor, ExecutorFactory, Status};
use crate::item::ExecutionItem;
use crate::plan::ExecutionPlan;
use crate::pool::ExecutorPool;
use crate::storage::{StorageUnit, DEFAULT_CHECKPOINT_RETENTION};
use crate::sync::Waitable;
use crate::types::{Address, Block, Digest};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the execution manager
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Number of pooled executors, and worker threads to match
    pub num_executors: usize,
    /// How many committed checkpoints stay revertible
    pub checkpoint_retention: usize,
    /// Upper bound on monitor sleeps between wake signals
    pub monitor_poll: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            num_executors: 4,
            checkpoint_retention: DEFAULT_CHECKPOINT_RETENTION,
            monitor_poll: Duration::from_millis(100),
        }
    }
}

/// Observable state of the manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Active,
    /// A transaction body could not be found; the block was not committed
    TransactionsUnavailable,
    ExecutionAborted,
    ExecutionFailed,
}

/// Synchronous result of an `execute` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleStatus {
    /// The block was accepted and is executing
    Scheduled,
    /// The block was executed previously; state was restored directly
    Complete,
    NotStarted,
    AlreadyRunning,
    NoParentBlock,
    UnableToPlan,
}

/// Snapshot of the manager's progress through the chain
#[derive(Clone, Debug)]
pub struct Summary {
    pub state: State,
    pub last_block_digest: Digest,
    pub last_block_number: u64,
    pub last_block_miner: Address,
}

/// Execution progress counters, waitable by callers and tests
#[derive(Clone, Copy, Debug, Default)]
pub struct Counters {
    /// Items currently running on a worker
    pub active: usize,
    /// Items of the current block not yet finished
    pub remaining: usize,
    /// Items finished since the manager was created
    pub completed: usize,
}

/// A scheduled block awaiting the monitor thread
struct PendingBlock {
    plan: ExecutionPlan,
    digest: Digest,
    block_number: u64,
    miner: Address,
    log2_num_lanes: u32,
}

/// One unit of work handed to a worker: the item plus the executor
/// reserved for it
struct Job<E> {
    item: Arc<ExecutionItem>,
    executor: E,
}

struct Core<S: StorageUnit, E: Executor> {
    storage: Arc<S>,
    pool: ExecutorPool<E>,
    archive: StateArchive,
    summary: Waitable<Summary>,
    counters: Waitable<Counters>,
    pending: Mutex<Option<PendingBlock>>,
    wake: Arc<Waitable<bool>>,
    running: AtomicBool,
    abort: AtomicBool,
    config: ManagerConfig,
}

impl<S: StorageUnit, E: Executor> Core<S, E> {
    /// Revert storage to the checkpoint recorded for a block, if the
    /// archive still holds one
    fn restore_to(&self, digest: &Digest) -> bool {
        let Some(checkpoint) = self.archive.lookup(digest) else {
            return false;
        };
        if !self.storage.revert(checkpoint.index) {
            warn!(
                block = %digest,
                index = checkpoint.index,
                "storage refused revert to known checkpoint"
            );
            return false;
        }
        true
    }
}

/// Schedules blocks across the executor pool and tracks chain state
pub struct ExecutionManager<S: StorageUnit + 'static, E: Executor + 'static> {
    core: Arc<Core<S, E>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: StorageUnit + 'static, E: Executor + 'static> ExecutionManager<S, E> {
    pub fn new(storage: Arc<S>, factory: ExecutorFactory<E>, config: ManagerConfig) -> Self {
        let wake = Arc::new(Waitable::new(false));
        let pool = ExecutorPool::new(config.num_executors, factory, wake.clone());
        let archive = StateArchive::new(config.checkpoint_retention);

        let core = Arc::new(Core {
            storage,
            pool,
            archive,
            summary: Waitable::new(Summary {
                state: State::Idle,
                last_block_digest: Digest::ZERO,
                last_block_number: 0,
                last_block_miner: Address::ZERO,
            }),
            counters: Waitable::default(),
            pending: Mutex::new(None),
            wake,
            running: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            config,
        });

        Self {
            core,
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the monitor and worker threads. Idempotent.
    pub fn start(&self) {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return;
        }

        // first start: make the pristine state a rollback target so a
        // failed or aborted genesis block can be retried
        if self.core.archive.is_empty() {
            let state_hash = self.core.storage.hash();
            let index = self.core.archive.record(Digest::ZERO, state_hash, 0);
            self.core.storage.commit(index);
        }

        let (job_tx, job_rx) = unbounded::<Job<E>>();
        let mut threads = self.threads.lock();

        for _ in 0..self.core.config.num_executors {
            let core = Arc::clone(&self.core);
            let job_rx = job_rx.clone();
            threads.push(thread::spawn(move || worker_loop(core, job_rx)));
        }

        let core = Arc::clone(&self.core);
        threads.push(thread::spawn(move || monitor_loop(core, job_tx)));
    }

    /// Signal shutdown and join the monitor and worker threads. In-flight
    /// items finish; undispatched work is dropped, and a block interrupted
    /// mid-execution is treated as aborted. Idempotent.
    pub fn stop(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.core.wake.apply(|flag| *flag = true);
        self.core.counters.notify_all();

        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }

        // with all threads joined, a still-active block can never seal:
        // drop its partial writes and leave the chain head where it was
        *self.core.pending.lock() = None;
        if self.core.summary.read(|summary| summary.state == State::Active) {
            self.core.abort.store(false, Ordering::SeqCst);
            rollback_uncommitted(&self.core);
            self.core
                .summary
                .apply(|summary| summary.state = State::ExecutionAborted);
        }
    }

    /// Schedule a block for execution.
    ///
    /// Returns synchronously; execution proceeds on the manager's threads.
    /// A block whose parent is not the last processed block triggers a
    /// rollback to the parent's checkpoint first, and a block that was
    /// itself already committed is restored directly without re-running.
    pub fn execute(&self, block: &Block) -> ScheduleStatus {
        if !self.core.running.load(Ordering::SeqCst) {
            return ScheduleStatus::NotStarted;
        }

        let mut summary = self.core.summary.lock();
        if summary.state == State::Active {
            return ScheduleStatus::AlreadyRunning;
        }

        // the block itself may already be committed and still revertible
        if !block.digest.is_zero() && self.core.restore_to(&block.digest) {
            summary.state = State::Idle;
            summary.last_block_digest = block.digest;
            summary.last_block_number = block.block_number;
            summary.last_block_miner = block.miner;
            drop(summary);
            self.core.summary.notify_all();
            debug!(block = %block.digest, "restored previously executed block");
            return ScheduleStatus::Complete;
        }

        // a fork or replay: rewind to the requested block's parent
        if block.previous_digest != summary.last_block_digest {
            if !self.core.restore_to(&block.previous_digest) {
                return ScheduleStatus::NoParentBlock;
            }
            summary.last_block_digest = block.previous_digest;
            if let Some(checkpoint) = self.core.archive.lookup(&block.previous_digest) {
                summary.last_block_number = checkpoint.block_number;
            }
        }

        let plan = match ExecutionPlan::build(block) {
            Ok(plan) => plan,
            Err(error) => {
                warn!(block = %block.digest, %error, "unable to plan block execution");
                return ScheduleStatus::UnableToPlan;
            }
        };

        let item_count = plan.item_count();
        self.core.abort.store(false, Ordering::SeqCst);
        self.core.counters.apply(|counters| {
            counters.active = 0;
            counters.remaining = item_count;
        });
        *self.core.pending.lock() = Some(PendingBlock {
            plan,
            digest: block.digest,
            block_number: block.block_number,
            miner: block.miner,
            log2_num_lanes: block.log2_num_lanes,
        });

        summary.state = State::Active;
        drop(summary);
        self.core.summary.notify_all();
        self.core.wake.apply(|flag| *flag = true);

        debug!(
            block = %block.digest,
            slices = block.slices.len(),
            transactions = item_count,
            "block scheduled"
        );
        ScheduleStatus::Scheduled
    }

    /// Stop dispatching further work for the active block. In-flight
    /// items finish naturally; the block is not committed. Returns whether
    /// a block was active.
    pub fn abort(&self) -> bool {
        if !self.core.summary.read(|summary| summary.state == State::Active) {
            return false;
        }
        self.core.abort.store(true, Ordering::SeqCst);
        self.core.wake.apply(|flag| *flag = true);
        self.core.counters.notify_all();
        true
    }

    pub fn get_state(&self) -> State {
        self.core.summary.read(|summary| summary.state)
    }

    pub fn last_processed_block(&self) -> Digest {
        self.core.summary.read(|summary| summary.last_block_digest)
    }

    pub fn summary(&self) -> Summary {
        self.core.summary.read(Clone::clone)
    }

    /// Rewind the manager's notion of the chain head, e.g. during resync.
    /// Storage is untouched; the next `execute` drives any revert.
    pub fn set_last_processed_block(&self, digest: Digest) {
        let block_number = self
            .core
            .archive
            .lookup(&digest)
            .map(|checkpoint| checkpoint.block_number);
        self.core.summary.apply(|summary| {
            summary.state = State::Idle;
            summary.last_block_digest = digest;
            if let Some(number) = block_number {
                summary.last_block_number = number;
            }
        });
    }

    /// Total items executed since the manager was created
    pub fn completed_executions(&self) -> usize {
        self.core.counters.read(|counters| counters.completed)
    }

    pub fn counters(&self) -> Counters {
        self.core.counters.read(|counters| *counters)
    }

    /// Block until the active block (if any) reaches a terminal state
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        self.core
            .summary
            .wait_for(timeout, |summary| summary.state != State::Active)
    }

    /// Block until at least `target` items have completed overall
    pub fn wait_for_executions(&self, target: usize, timeout: Duration) -> bool {
        self.core
            .counters
            .wait_for(timeout, |counters| counters.completed >= target)
    }
}

impl<S: StorageUnit + 'static, E: Executor + 'static> Drop for ExecutionManager<S, E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<S: StorageUnit, E: Executor>(core: Arc<Core<S, E>>, jobs: Receiver<Job<E>>) {
    for job in jobs.iter() {
        let Job {
            item,
            mut executor,
        } = job;

        item.execute(&mut executor);

        // release before the counter update so a monitor woken by the
        // counters can immediately re-acquire this executor
        core.pool.release(executor);
        core.counters.apply(|counters| {
            counters.active = counters.active.saturating_sub(1);
            counters.remaining = counters.remaining.saturating_sub(1);
            counters.completed += 1;
        });
    }
}

enum MonitorState {
    Idle,
    ScheduleNextSlice,
    Running,
    Sealing,
}

fn monitor_loop<S: StorageUnit, E: Executor>(core: Arc<Core<S, E>>, job_tx: Sender<Job<E>>) {
    let poll = core.config.monitor_poll;
    let mut state = MonitorState::Idle;
    let mut pending: Option<PendingBlock> = None;
    let mut next_slice = 0usize;
    let mut slice_target = 0usize;
    let mut undispatched: VecDeque<Arc<ExecutionItem>> = VecDeque::new();

    while core.running.load(Ordering::SeqCst) {
        match state {
            MonitorState::Idle => {
                core.wake.wait_for(poll, |flag| *flag);
                core.wake.apply(|flag| *flag = false);
                if !core.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(block) = core.pending.lock().take() {
                    next_slice = 0;
                    pending = Some(block);
                    state = MonitorState::ScheduleNextSlice;
                }
            }

            MonitorState::ScheduleNextSlice => {
                let Some(block) = pending.as_ref() else {
                    state = MonitorState::Idle;
                    continue;
                };
                if core.abort.load(Ordering::SeqCst) || next_slice >= block.plan.slice_count() {
                    state = MonitorState::Sealing;
                    continue;
                }

                let items = block.plan.slice(next_slice).unwrap_or(&[]);
                slice_target = core
                    .counters
                    .read(|counters| counters.remaining.saturating_sub(items.len()));
                undispatched = items.iter().cloned().collect();
                dispatch_ready(&core, &mut undispatched, &job_tx);

                next_slice += 1;
                state = MonitorState::Running;
            }

            MonitorState::Running => {
                // wake on slice completion, or on a freed executor while
                // items of this slice still await dispatch
                let capacity = core.pool.capacity();
                let has_undispatched = !undispatched.is_empty();
                core.counters.wait_for(poll, |counters| {
                    counters.remaining <= slice_target
                        || (has_undispatched && counters.active < capacity)
                });
                if !core.running.load(Ordering::SeqCst) {
                    break;
                }

                if core.abort.load(Ordering::SeqCst) {
                    // drop what never started, let in-flight items finish
                    undispatched.clear();
                    while core.running.load(Ordering::SeqCst)
                        && !core.counters.wait_for(poll, |counters| counters.active == 0)
                    {}
                    state = MonitorState::Sealing;
                    continue;
                }

                if !undispatched.is_empty() {
                    dispatch_ready(&core, &mut undispatched, &job_tx);
                }

                if undispatched.is_empty()
                    && core
                        .counters
                        .read(|counters| counters.remaining <= slice_target)
                {
                    state = MonitorState::ScheduleNextSlice;
                }
            }

            MonitorState::Sealing => {
                undispatched.clear();
                next_slice = 0;
                if let Some(block) = pending.take() {
                    seal_block(&core, block);
                }
                state = MonitorState::Idle;
            }
        }
    }
}

/// Hand items of the current slice to workers while idle executors last
fn dispatch_ready<S: StorageUnit, E: Executor>(
    core: &Core<S, E>,
    undispatched: &mut VecDeque<Arc<ExecutionItem>>,
    job_tx: &Sender<Job<E>>,
) {
    while !undispatched.is_empty() {
        let Some(executor) = core.pool.acquire() else {
            break;
        };
        let Some(item) = undispatched.pop_front() else {
            core.pool.release(executor);
            break;
        };

        core.counters.apply(|counters| counters.active += 1);
        if let Err(error) = job_tx.send(Job { item, executor }) {
            // workers are gone; shutting down
            core.counters
                .apply(|counters| counters.active = counters.active.saturating_sub(1));
            core.pool.release(error.into_inner().executor);
            break;
        }
    }
}

/// Decide the fate of a fully drained (or aborted) block: commit on
/// success, revert on abort or any fatal item status
fn seal_block<S: StorageUnit, E: Executor>(core: &Core<S, E>, block: PendingBlock) {
    let aborted = core.abort.swap(false, Ordering::SeqCst);

    let mut saw_lookup_failure = false;
    let mut saw_other_fatal = false;
    let mut total_fees = 0u64;
    for item in block.plan.items() {
        match item.status() {
            Status::TxLookupFailure => saw_lookup_failure = true,
            status if status.is_fatal() => saw_other_fatal = true,
            _ => {}
        }
        total_fees = total_fees.saturating_add(item.fee());
    }

    if aborted {
        rollback_uncommitted(core);
        core.summary
            .apply(|summary| summary.state = State::ExecutionAborted);
        debug!(block = %block.digest, "block execution aborted");
        return;
    }

    if saw_other_fatal || saw_lookup_failure {
        rollback_uncommitted(core);
        let new_state = if saw_other_fatal {
            State::ExecutionFailed
        } else {
            State::TransactionsUnavailable
        };
        core.summary.apply(|summary| summary.state = new_state);
        warn!(block = %block.digest, state = ?new_state, "block not committed");
        return;
    }

    if total_fees > 0 {
        if let Some(mut executor) = core.pool.acquire() {
            if let Err(fault) =
                executor.settle_fees(&block.miner, total_fees, block.log2_num_lanes)
            {
                warn!(miner = %block.miner, %fault, "unable to settle block fees");
            }
            core.pool.release(executor);
        }
    }

    let state_hash = core.storage.hash();
    let index = core.archive.record(block.digest, state_hash, block.block_number);
    if !core.storage.commit(index) {
        warn!(block = %block.digest, index, "storage refused to commit block state");
    }

    core.summary.apply(|summary| {
        summary.state = State::Idle;
        summary.last_block_digest = block.digest;
        summary.last_block_number = block.block_number;
        summary.last_block_miner = block.miner;
    });
    debug!(block = %block.digest, state_hash = %state_hash, "block committed");
}

/// Rewind storage to the checkpoint of the last committed block, dropping
/// the partial writes of a block that will not commit
fn rollback_uncommitted<S: StorageUnit, E: Executor>(core: &Core<S, E>) {
    let last = core.summary.read(|summary| summary.last_block_digest);
    if !core.restore_to(&last) {
        warn!(block = %last, "no checkpoint available to roll back an uncommitted block");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorFault;
    use crate::executor::ExecutionOutcome;
    use crate::storage::InMemoryStorageUnit;
    use crate::types::{LaneIndex, Slice, TransactionLayout};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Tracker {
        current: AtomicUsize,
        peak: AtomicUsize,
        spans: Mutex<Vec<(u64, Instant, Instant)>>,
    }

    #[derive(Clone)]
    struct TestExecutor {
        storage: Arc<InMemoryStorageUnit>,
        delay: Duration,
        overrides: Arc<Vec<(Digest, Status)>>,
        panic_on: Option<Digest>,
        tracker: Option<Arc<Tracker>>,
    }

    impl Executor for TestExecutor {
        fn execute(
            &mut self,
            digest: &Digest,
            block_number: u64,
            slice_index: u64,
            lanes: &[LaneIndex],
        ) -> Result<ExecutionOutcome, ExecutorFault> {
            if self.panic_on.as_ref() == Some(digest) {
                panic!("injected executor failure");
            }

            let started = Instant::now();
            if let Some(tracker) = &self.tracker {
                let current = tracker.current.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.peak.fetch_max(current, Ordering::SeqCst);
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }

            for &lane in lanes {
                let mut value = digest.to_bytes().to_vec();
                value.extend_from_slice(&block_number.to_le_bytes());
                self.storage.set(lane, digest.as_ref(), value);
            }

            let outcome = match self.overrides.iter().find(|(d, _)| d == digest) {
                Some((_, status)) => ExecutionOutcome::failed(*status),
                None => ExecutionOutcome::success(100),
            };

            if let Some(tracker) = &self.tracker {
                tracker.current.fetch_sub(1, Ordering::SeqCst);
                tracker
                    .spans
                    .lock()
                    .push((slice_index, started, Instant::now()));
            }
            Ok(outcome)
        }

        fn settle_fees(
            &mut self,
            miner: &Address,
            amount: u64,
            _log2_num_lanes: u32,
        ) -> Result<(), ExecutorFault> {
            let mut key = b"fees:".to_vec();
            key.extend_from_slice(miner.as_ref());
            self.storage.set(0, &key, amount.to_le_bytes().to_vec());
            Ok(())
        }
    }

    struct Setup {
        storage: Arc<InMemoryStorageUnit>,
        manager: ExecutionManager<InMemoryStorageUnit, TestExecutor>,
    }

    fn setup_with(
        config: ManagerConfig,
        delay: Duration,
        overrides: Vec<(Digest, Status)>,
        panic_on: Option<Digest>,
        tracker: Option<Arc<Tracker>>,
    ) -> Setup {
        let storage = Arc::new(InMemoryStorageUnit::with_retention(
            config.checkpoint_retention,
        ));
        let overrides = Arc::new(overrides);
        let template_storage = storage.clone();
        let factory: ExecutorFactory<TestExecutor> = Arc::new(move || TestExecutor {
            storage: template_storage.clone(),
            delay,
            overrides: overrides.clone(),
            panic_on,
            tracker: tracker.clone(),
        });

        let manager = ExecutionManager::new(storage.clone(), factory, config);
        manager.start();
        Setup { storage, manager }
    }

    fn setup() -> Setup {
        setup_with(
            ManagerConfig::default(),
            Duration::ZERO,
            vec![],
            None,
            None,
        )
    }

    fn make_digest(seed: u8) -> Digest {
        Digest([seed; 32])
    }

    fn make_tx(seed: u8, lane_mask: u64) -> TransactionLayout {
        TransactionLayout::new(make_digest(seed), lane_mask, 10_000)
    }

    fn make_block(
        seed: u8,
        parent: Digest,
        number: u64,
        slices: Vec<Vec<TransactionLayout>>,
    ) -> Block {
        Block {
            digest: make_digest(seed),
            previous_digest: parent,
            merkle_root: Digest::ZERO,
            block_number: number,
            miner: Address([0xAA; 32]),
            log2_num_lanes: 3,
            slices: slices.into_iter().map(Slice::new).collect(),
        }
    }

    #[test]
    fn test_execute_before_start() {
        let storage = Arc::new(InMemoryStorageUnit::new());
        let factory: ExecutorFactory<TestExecutor> = {
            let storage = storage.clone();
            Arc::new(move || TestExecutor {
                storage: storage.clone(),
                delay: Duration::ZERO,
                overrides: Arc::new(vec![]),
                panic_on: None,
                tracker: None,
            })
        };
        let manager = ExecutionManager::new(storage, factory, ManagerConfig::default());

        let block = make_block(1, Digest::ZERO, 1, vec![vec![make_tx(0x11, 0b1)]]);
        assert_eq!(manager.execute(&block), ScheduleStatus::NotStarted);
    }

    #[test]
    fn test_single_transaction_block() {
        let Setup { manager, .. } = setup();

        let block = make_block(1, Digest::ZERO, 1, vec![vec![make_tx(0x11, 0b1)]]);
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);

        assert!(manager.wait_for_completion(WAIT));
        assert_eq!(manager.get_state(), State::Idle);
        assert_eq!(manager.completed_executions(), 1);
        assert_eq!(manager.last_processed_block(), block.digest);

        let summary = manager.summary();
        assert_eq!(summary.last_block_number, 1);
        assert_eq!(summary.last_block_miner, Address([0xAA; 32]));
    }

    #[test]
    fn test_sequential_blocks_advance_chain() {
        let Setup { manager, .. } = setup();

        let b1 = make_block(
            1,
            Digest::ZERO,
            1,
            vec![vec![make_tx(0x11, 0b01), make_tx(0x12, 0b10)]],
        );
        assert_eq!(manager.execute(&b1), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        let b2 = make_block(2, b1.digest, 2, vec![vec![make_tx(0x21, 0b100)]]);
        assert_eq!(manager.execute(&b2), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        assert_eq!(manager.get_state(), State::Idle);
        assert_eq!(manager.last_processed_block(), b2.digest);
        assert_eq!(manager.completed_executions(), 3);
    }

    #[test]
    fn test_second_execute_while_active() {
        let setup = setup_with(
            ManagerConfig::default(),
            Duration::from_millis(100),
            vec![],
            None,
            None,
        );
        let manager = &setup.manager;

        let b1 = make_block(1, Digest::ZERO, 1, vec![vec![make_tx(0x11, 0b1)]]);
        assert_eq!(manager.execute(&b1), ScheduleStatus::Scheduled);

        let b2 = make_block(2, Digest::ZERO, 1, vec![vec![make_tx(0x21, 0b1)]]);
        for _ in 0..3 {
            assert_eq!(manager.execute(&b2), ScheduleStatus::AlreadyRunning);
        }

        assert!(manager.wait_for_completion(WAIT));
        assert_eq!(manager.last_processed_block(), b1.digest);
        assert_eq!(manager.completed_executions(), 1);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let Setup { manager, .. } = setup();

        let orphan = make_block(1, make_digest(9), 5, vec![vec![make_tx(0x11, 0b1)]]);
        assert_eq!(manager.execute(&orphan), ScheduleStatus::NoParentBlock);
        assert_eq!(manager.get_state(), State::Idle);
        assert_eq!(manager.last_processed_block(), Digest::ZERO);
    }

    #[test]
    fn test_pruned_parent_rejected() {
        let config = ManagerConfig {
            checkpoint_retention: 1,
            ..ManagerConfig::default()
        };
        let setup = setup_with(config, Duration::ZERO, vec![], None, None);
        let manager = &setup.manager;

        let b1 = make_block(1, Digest::ZERO, 1, vec![vec![make_tx(0x11, 0b1)]]);
        assert_eq!(manager.execute(&b1), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        let b2 = make_block(2, b1.digest, 2, vec![vec![make_tx(0x21, 0b1)]]);
        assert_eq!(manager.execute(&b2), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        // the genesis checkpoint has been pruned; a fork from genesis is
        // no longer reachable
        let b3 = make_block(3, Digest::ZERO, 1, vec![vec![make_tx(0x31, 0b1)]]);
        assert_eq!(manager.execute(&b3), ScheduleStatus::NoParentBlock);
        assert_eq!(manager.last_processed_block(), b2.digest);
    }

    #[test]
    fn test_rollback_replay_reproduces_state() {
        let Setup { manager, storage } = setup();

        let b1 = make_block(
            1,
            Digest::ZERO,
            1,
            vec![vec![make_tx(0x11, 0b01), make_tx(0x12, 0b10)]],
        );
        assert_eq!(manager.execute(&b1), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));
        let h1 = storage.hash();

        let b2 = make_block(2, b1.digest, 2, vec![vec![make_tx(0x21, 0b100)]]);
        assert_eq!(manager.execute(&b2), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));
        let h2 = storage.hash();
        assert_ne!(h1, h2);

        // the already-committed block restores without re-execution
        assert_eq!(manager.execute(&b1), ScheduleStatus::Complete);
        assert_eq!(storage.hash(), h1);
        assert_eq!(manager.last_processed_block(), b1.digest);
        let executed_so_far = manager.completed_executions();

        // a re-derived sibling of b2 executes from b1's state and lands
        // on the same hash
        let b2_replay = make_block(4, b1.digest, 2, vec![vec![make_tx(0x21, 0b100)]]);
        assert_eq!(manager.execute(&b2_replay), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        assert_eq!(storage.hash(), h2);
        assert_eq!(manager.completed_executions(), executed_so_far + 1);
    }

    #[test]
    fn test_slice_ordering() {
        let tracker = Arc::new(Tracker::default());
        let setup = setup_with(
            ManagerConfig::default(),
            Duration::from_millis(20),
            vec![],
            None,
            Some(tracker.clone()),
        );
        let manager = &setup.manager;

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![
                vec![make_tx(0x11, 0b01), make_tx(0x12, 0b10)],
                vec![make_tx(0x21, 0b01), make_tx(0x22, 0b10)],
                vec![make_tx(0x31, 0b01), make_tx(0x32, 0b10)],
            ],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));
        assert_eq!(manager.get_state(), State::Idle);

        let spans = tracker.spans.lock();
        assert_eq!(spans.len(), 6);
        for later in 1u64..3 {
            let prior_end = spans
                .iter()
                .filter(|(slice, _, _)| *slice == later - 1)
                .map(|(_, _, end)| *end)
                .max()
                .unwrap();
            let later_start = spans
                .iter()
                .filter(|(slice, _, _)| *slice == later)
                .map(|(_, start, _)| *start)
                .min()
                .unwrap();
            assert!(
                later_start >= prior_end,
                "slice {} started before slice {} finished",
                later,
                later - 1
            );
        }
    }

    #[test]
    fn test_bounded_concurrency() {
        let tracker = Arc::new(Tracker::default());
        let config = ManagerConfig {
            num_executors: 2,
            ..ManagerConfig::default()
        };
        let setup = setup_with(
            config,
            Duration::from_millis(30),
            vec![],
            None,
            Some(tracker.clone()),
        );
        let manager = &setup.manager;

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![vec![
                make_tx(0x11, 0b00001),
                make_tx(0x12, 0b00010),
                make_tx(0x13, 0b00100),
                make_tx(0x14, 0b01000),
                make_tx(0x15, 0b10000),
            ]],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        assert_eq!(manager.completed_executions(), 5);
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(manager.get_state(), State::Idle);
    }

    #[test]
    fn test_executor_panic_fails_block() {
        let setup = setup_with(
            ManagerConfig::default(),
            Duration::ZERO,
            vec![],
            Some(make_digest(0x12)),
            None,
        );
        let manager = &setup.manager;
        let initial_hash = setup.storage.hash();

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![vec![
                make_tx(0x11, 0b001),
                make_tx(0x12, 0b010),
                make_tx(0x13, 0b100),
            ]],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        assert_eq!(manager.get_state(), State::ExecutionFailed);
        assert_eq!(manager.last_processed_block(), Digest::ZERO);
        // the other items still ran
        assert_eq!(manager.completed_executions(), 3);
        // partial writes were rolled back
        assert_eq!(setup.storage.hash(), initial_hash);
    }

    #[test]
    fn test_tx_lookup_failure_maps_to_transactions_unavailable() {
        let setup = setup_with(
            ManagerConfig::default(),
            Duration::ZERO,
            vec![(make_digest(0x12), Status::TxLookupFailure)],
            None,
            None,
        );
        let manager = &setup.manager;

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![vec![make_tx(0x11, 0b01), make_tx(0x12, 0b10)]],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        assert_eq!(manager.get_state(), State::TransactionsUnavailable);
        assert_eq!(manager.last_processed_block(), Digest::ZERO);
    }

    #[test]
    fn test_ordinary_failure_still_commits() {
        let setup = setup_with(
            ManagerConfig::default(),
            Duration::ZERO,
            vec![(make_digest(0x12), Status::InsufficientAvailableFunds)],
            None,
            None,
        );
        let manager = &setup.manager;

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![vec![make_tx(0x11, 0b01), make_tx(0x12, 0b10)]],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        assert_eq!(manager.get_state(), State::Idle);
        assert_eq!(manager.last_processed_block(), block.digest);
    }

    #[test]
    fn test_abort_stops_dispatch() {
        let setup = setup_with(
            ManagerConfig::default(),
            Duration::from_millis(60),
            vec![],
            None,
            None,
        );
        let manager = &setup.manager;

        assert!(!manager.abort());

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![
                vec![make_tx(0x11, 0b01), make_tx(0x12, 0b10)],
                vec![make_tx(0x21, 0b01), make_tx(0x22, 0b10)],
            ],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        thread::sleep(Duration::from_millis(20));
        assert!(manager.abort());

        assert!(manager.wait_for_completion(WAIT));
        assert_eq!(manager.get_state(), State::ExecutionAborted);
        assert_eq!(manager.last_processed_block(), Digest::ZERO);
        // the second slice never ran
        assert!(manager.completed_executions() <= 2);

        // a fresh block is accepted after the abort
        let retry = make_block(3, Digest::ZERO, 1, vec![vec![make_tx(0x31, 0b1)]]);
        assert_eq!(manager.execute(&retry), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));
        assert_eq!(manager.get_state(), State::Idle);
        assert_eq!(manager.last_processed_block(), retry.digest);
    }

    #[test]
    fn test_empty_block_commits() {
        let Setup { manager, .. } = setup();

        let block = make_block(1, Digest::ZERO, 1, vec![]);
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));

        assert_eq!(manager.get_state(), State::Idle);
        assert_eq!(manager.last_processed_block(), block.digest);
        assert_eq!(manager.completed_executions(), 0);
    }

    #[test]
    fn test_unplannable_block_rejected() {
        let Setup { manager, .. } = setup();

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![vec![make_tx(0x11, 0b011), make_tx(0x12, 0b110)]],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::UnableToPlan);
        assert_eq!(manager.get_state(), State::Idle);
        assert_eq!(manager.last_processed_block(), Digest::ZERO);
    }

    #[test]
    fn test_idle_state_reads_are_pure() {
        let Setup { manager, .. } = setup();

        let before = manager.counters();
        for _ in 0..10 {
            assert_eq!(manager.get_state(), State::Idle);
        }
        let after = manager.counters();
        assert_eq!(before.active, after.active);
        assert_eq!(before.remaining, after.remaining);
        assert_eq!(before.completed, after.completed);
    }

    #[test]
    fn test_set_last_processed_block() {
        let Setup { manager, .. } = setup();

        manager.set_last_processed_block(make_digest(7));
        assert_eq!(manager.last_processed_block(), make_digest(7));
        assert_eq!(manager.get_state(), State::Idle);
    }

    #[test]
    fn test_stop_and_restart() {
        let Setup { manager, .. } = setup();

        manager.stop();
        manager.stop();

        let block = make_block(1, Digest::ZERO, 1, vec![vec![make_tx(0x11, 0b1)]]);
        assert_eq!(manager.execute(&block), ScheduleStatus::NotStarted);

        manager.start();
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));
        assert_eq!(manager.last_processed_block(), block.digest);
    }

    #[test]
    fn test_stop_mid_block_aborts() {
        let setup = setup_with(
            ManagerConfig::default(),
            Duration::from_millis(50),
            vec![],
            None,
            None,
        );
        let manager = &setup.manager;
        let initial_hash = setup.storage.hash();

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![
                vec![make_tx(0x11, 0b01), make_tx(0x12, 0b10)],
                vec![make_tx(0x21, 0b01)],
            ],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        thread::sleep(Duration::from_millis(10));
        manager.stop();

        assert_eq!(manager.get_state(), State::ExecutionAborted);
        assert_eq!(manager.last_processed_block(), Digest::ZERO);
        assert_eq!(setup.storage.hash(), initial_hash);

        // the manager comes back clean after a restart
        manager.start();
        let retry = make_block(2, Digest::ZERO, 1, vec![vec![make_tx(0x31, 0b1)]]);
        assert_eq!(manager.execute(&retry), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_completion(WAIT));
        assert_eq!(manager.get_state(), State::Idle);
        assert_eq!(manager.last_processed_block(), retry.digest);
    }

    #[test]
    fn test_wait_for_executions() {
        let Setup { manager, .. } = setup();

        let block = make_block(
            1,
            Digest::ZERO,
            1,
            vec![vec![make_tx(0x11, 0b01), make_tx(0x12, 0b10)]],
        );
        assert_eq!(manager.execute(&block), ScheduleStatus::Scheduled);
        assert!(manager.wait_for_executions(2, WAIT));
        assert!(manager.wait_for_completion(WAIT));
    }
}
