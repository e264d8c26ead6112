use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TriggerError;
use crate::partition::{Checkpoint, Partition};

/// Event counters a trigger keeps while dispatching events to workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub success_count: u64,
    pub failure_count: u64,
}

impl Statistics {
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

/// Manages the worker slots a trigger dispatches events to.
#[async_trait]
pub trait WorkerAllocator: Send + Sync {
    /// Reclaim idle workers, returning how many were released.
    async fn gc(&self) -> Result<usize, TriggerError>;
}

/// A live view of one partition a trigger is consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionView {
    pub id: u32,
    pub checkpoint: Checkpoint,
}

/// Capability of triggers that consume from a partitioned stream.
pub trait PartitionedStream: Send + Sync {
    fn partitions(&self) -> Vec<PartitionView>;
}

/// An in-process component pulling events from a source and dispatching them to workers.
///
/// Implementations must tolerate partition changes while their own consumption loop is
/// running.
#[async_trait]
pub trait Trigger: Send + Sync {
    fn id(&self) -> &str;

    async fn add_partition(&self, partition: &Partition) -> Result<(), TriggerError>;

    /// Stop consuming a partition, returning its final checkpoint.
    async fn remove_partition(&self, partition: &Partition) -> Result<Checkpoint, TriggerError>;

    async fn update_partition(&self, partition: &Partition) -> Result<(), TriggerError>;

    fn allocator(&self) -> Arc<dyn WorkerAllocator>;

    fn statistics(&self) -> Statistics;

    /// Returns the partitioned stream view of this trigger, if it consumes one.
    fn as_partitioned(&self) -> Option<&dyn PartitionedStream> {
        None
    }
}
