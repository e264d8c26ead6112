use thiserror::Error;

/// Enumeration of errors a trigger can return when asked to change its partitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("partition {0} is already assigned")]
    PartitionExists(String),
    #[error("partition {0} is not assigned")]
    PartitionNotFound(String),
    #[error("{0} is not a valid partition id")]
    InvalidPartitionId(String),
    #[error("worker pool exhausted, all {0} workers are busy")]
    WorkerPoolExhausted(usize),
}

/// The operation a change was running against a trigger when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Remove,
    Update,
    GarbageCollect,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Remove => "remove",
            Operation::Update => "update",
            Operation::GarbageCollect => "gc",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enumeration of errors related to calculating and applying a configuration diff.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The desired configuration references a trigger the current configuration does not know.
    #[error("unknown trigger - {0}")]
    UnknownTrigger(String),
    /// A change targets a trigger the processor is not running.
    #[error("no such trigger - {0}")]
    NoSuchTrigger(String),
    #[error("partition {partition_id} is listed more than once for trigger {trigger_id}")]
    DuplicatePartition {
        trigger_id: String,
        partition_id: String,
    },
    #[error("trigger {trigger_id} failed to {operation}: {source}")]
    Upstream {
        trigger_id: String,
        operation: Operation,
        #[source]
        source: TriggerError,
    },
}
