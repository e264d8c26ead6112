//! In-process partitioned trigger backed by a bounded worker pool.
//!
//! Used by the dealer binary for statically configured triggers, and by tests as a
//! well-behaved trigger to reconcile against.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::TriggerError;
use crate::partition::{Checkpoint, Partition};
use crate::trigger::{PartitionView, PartitionedStream, Statistics, Trigger, WorkerAllocator};

/// Identifies a worker slot within a single pool.
pub type WorkerId = usize;

#[derive(Debug, Default)]
struct PoolState {
    next_id: WorkerId,
    busy: Vec<WorkerId>,
    idle: Vec<WorkerId>,
}

/// A bounded pool of worker slots.
///
/// Released workers stay allocated as idle and are handed out again before new ones are
/// created, until `gc` drops them.
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn allocate(&self) -> Result<WorkerId, TriggerError> {
        let mut state = self.lock();

        let worker = match state.idle.pop() {
            Some(worker) => worker,
            None => {
                if state.busy.len() >= self.max_workers {
                    return Err(TriggerError::WorkerPoolExhausted(self.max_workers));
                }
                let worker = state.next_id;
                state.next_id += 1;
                worker
            }
        };
        state.busy.push(worker);

        Ok(worker)
    }

    pub fn release(&self, worker: WorkerId) {
        let mut state = self.lock();

        if let Some(position) = state.busy.iter().position(|w| *w == worker) {
            state.busy.swap_remove(position);
            state.idle.push(worker);
        }
    }

    pub fn busy(&self) -> usize {
        self.lock().busy.len()
    }

    pub fn idle(&self) -> usize {
        self.lock().idle.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // A panic while holding the lock cannot leave the vectors half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WorkerAllocator for WorkerPool {
    async fn gc(&self) -> Result<usize, TriggerError> {
        let mut state = self.lock();
        let reclaimed = state.idle.len();
        state.idle.clear();
        Ok(reclaimed)
    }
}

#[derive(Debug, Clone)]
struct Assignment {
    checkpoint: Checkpoint,
    worker: WorkerId,
}

/// A trigger consuming numbered partitions, one worker per partition.
pub struct MemoryTrigger {
    id: String,
    partitions: RwLock<BTreeMap<u32, Assignment>>,
    pool: Arc<WorkerPool>,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl MemoryTrigger {
    pub fn new(id: impl Into<String>, max_workers: usize) -> Self {
        Self {
            id: id.into(),
            partitions: RwLock::new(BTreeMap::new()),
            pool: Arc::new(WorkerPool::new(max_workers)),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Record an event handled on a partition, moving the partition to `checkpoint`.
    pub fn record_event(
        &self,
        partition_id: &str,
        checkpoint: Checkpoint,
        success: bool,
    ) -> Result<(), TriggerError> {
        let id = parse_id(partition_id)?;
        let mut partitions = self.write();
        let assignment = partitions
            .get_mut(&id)
            .ok_or_else(|| TriggerError::PartitionNotFound(partition_id.to_owned()))?;
        assignment.checkpoint = checkpoint;

        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<u32, Assignment>> {
        self.partitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<u32, Assignment>> {
        self.partitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_id(partition_id: &str) -> Result<u32, TriggerError> {
    partition_id
        .parse()
        .map_err(|_| TriggerError::InvalidPartitionId(partition_id.to_owned()))
}

#[async_trait]
impl Trigger for MemoryTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    async fn add_partition(&self, partition: &Partition) -> Result<(), TriggerError> {
        let id = parse_id(&partition.id)?;
        let mut partitions = self.write();
        if partitions.contains_key(&id) {
            return Err(TriggerError::PartitionExists(partition.id.clone()));
        }

        let worker = self.pool.allocate()?;
        partitions.insert(
            id,
            Assignment {
                checkpoint: partition.checkpoint.clone(),
                worker,
            },
        );
        info!(trigger_id = %self.id, partition_id = id, worker, "partition added");
        Ok(())
    }

    async fn remove_partition(&self, partition: &Partition) -> Result<Checkpoint, TriggerError> {
        let id = parse_id(&partition.id)?;
        let assignment = self
            .write()
            .remove(&id)
            .ok_or_else(|| TriggerError::PartitionNotFound(partition.id.clone()))?;

        self.pool.release(assignment.worker);
        info!(
            trigger_id = %self.id,
            partition_id = id,
            checkpoint = ?assignment.checkpoint,
            "partition removed"
        );
        Ok(assignment.checkpoint)
    }

    async fn update_partition(&self, partition: &Partition) -> Result<(), TriggerError> {
        let id = parse_id(&partition.id)?;
        let mut partitions = self.write();
        let assignment = partitions
            .get_mut(&id)
            .ok_or_else(|| TriggerError::PartitionNotFound(partition.id.clone()))?;

        debug!(
            trigger_id = %self.id,
            partition_id = id,
            from = ?assignment.checkpoint,
            to = ?partition.checkpoint,
            "partition checkpoint updated"
        );
        assignment.checkpoint = partition.checkpoint.clone();
        Ok(())
    }

    fn allocator(&self) -> Arc<dyn WorkerAllocator> {
        self.pool.clone()
    }

    fn statistics(&self) -> Statistics {
        Statistics {
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
        }
    }

    fn as_partitioned(&self) -> Option<&dyn PartitionedStream> {
        Some(self)
    }
}

impl PartitionedStream for MemoryTrigger {
    fn partitions(&self) -> Vec<PartitionView> {
        self.read()
            .iter()
            .map(|(id, assignment)| PartitionView {
                id: *id,
                checkpoint: assignment.checkpoint.clone(),
            })
            .collect()
    }
}
