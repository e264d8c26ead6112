//! Reconcile a running processor's triggers with a new desired configuration.
//!
//! An `Updater` diffs two configurations into an ordered list of `Change`s and applies
//! them to the live triggers. Applying is fail-fast and not transactional: changes that
//! already went through before a failure are not undone.
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Operation, ReconcileError};
use crate::partition::{Checkpoint, Configuration, Partition, TriggerConfig};
use crate::processor::Processor;
use crate::trigger::Trigger;

/// Find a trigger by ID among the triggers a processor is running.
fn find_trigger(
    processor: &dyn Processor,
    trigger_id: &str,
) -> Result<Arc<dyn Trigger>, ReconcileError> {
    processor
        .triggers()
        .into_iter()
        .find(|trigger| trigger.id() == trigger_id)
        .ok_or_else(|| ReconcileError::NoSuchTrigger(trigger_id.to_owned()))
}

fn upstream(
    trigger_id: &str,
    operation: Operation,
) -> impl FnOnce(crate::error::TriggerError) -> ReconcileError + '_ {
    move |source| ReconcileError::Upstream {
        trigger_id: trigger_id.to_owned(),
        operation,
        source,
    }
}

/// Start consuming a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adder {
    pub trigger_id: String,
    pub partition: Partition,
}

impl Adder {
    async fn apply(&self, processor: &dyn Processor) -> Result<(), ReconcileError> {
        let trigger = find_trigger(processor, &self.trigger_id)?;
        trigger
            .add_partition(&self.partition)
            .await
            .map_err(upstream(&self.trigger_id, Operation::Add))
    }
}

/// Progress of a `Remover`: the final checkpoint is only known once the trigger let go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveState {
    Pending,
    Removed(Checkpoint),
}

/// Stop consuming a partition, keeping its final checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remover {
    pub trigger_id: String,
    pub partition: Partition,
    pub state: RemoveState,
}

impl Remover {
    async fn apply(&mut self, processor: &dyn Processor) -> Result<(), ReconcileError> {
        let trigger = find_trigger(processor, &self.trigger_id)?;
        let checkpoint = trigger
            .remove_partition(&self.partition)
            .await
            .map_err(upstream(&self.trigger_id, Operation::Remove))?;
        self.state = RemoveState::Removed(checkpoint);
        Ok(())
    }

    /// The removed partition with its final checkpoint, once applied.
    pub fn removed(&self) -> Option<Partition> {
        match &self.state {
            RemoveState::Pending => None,
            RemoveState::Removed(checkpoint) => {
                Some(Partition::new(self.partition.id.clone(), checkpoint.clone()))
            }
        }
    }
}

/// Move an already consumed partition to a new checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionUpdater {
    pub trigger_id: String,
    pub partition: Partition,
}

impl PartitionUpdater {
    async fn apply(&self, processor: &dyn Processor) -> Result<(), ReconcileError> {
        let trigger = find_trigger(processor, &self.trigger_id)?;
        trigger
            .update_partition(&self.partition)
            .await
            .map_err(upstream(&self.trigger_id, Operation::Update))
    }
}

/// Reclaim idle workers of a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collector {
    pub trigger_id: String,
}

impl Collector {
    async fn apply(&self, processor: &dyn Processor) -> Result<(), ReconcileError> {
        let trigger = find_trigger(processor, &self.trigger_id)?;
        let reclaimed = trigger
            .allocator()
            .gc()
            .await
            .map_err(upstream(&self.trigger_id, Operation::GarbageCollect))?;

        if reclaimed > 0 {
            metrics::counter!("dealer_workers_reclaimed_total", "trigger" => self.trigger_id.clone())
                .increment(reclaimed as u64);
        }
        debug!(trigger_id = %self.trigger_id, reclaimed, "collected idle workers");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Add(Adder),
    Remove(Remover),
    Update(PartitionUpdater),
    Gc(Collector),
}

impl Change {
    pub fn trigger_id(&self) -> &str {
        match self {
            Change::Add(c) => &c.trigger_id,
            Change::Remove(c) => &c.trigger_id,
            Change::Update(c) => &c.trigger_id,
            Change::Gc(c) => &c.trigger_id,
        }
    }

    /// The partition snapshot this change carries. GC changes carry none.
    pub fn partition(&self) -> Option<&Partition> {
        match self {
            Change::Add(c) => Some(&c.partition),
            Change::Remove(c) => Some(&c.partition),
            Change::Update(c) => Some(&c.partition),
            Change::Gc(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::Add(_) => "add",
            Change::Remove(_) => "remove",
            Change::Update(_) => "update",
            Change::Gc(_) => "gc",
        }
    }

    pub async fn apply(&mut self, processor: &dyn Processor) -> Result<(), ReconcileError> {
        match self {
            Change::Add(c) => c.apply(processor).await,
            Change::Remove(c) => c.apply(processor).await,
            Change::Update(c) => c.apply(processor).await,
            Change::Gc(c) => c.apply(processor).await,
        }
    }
}

/// Diff engine turning a before/after configuration pair into live trigger operations.
#[derive(Debug, Clone, Default)]
pub struct Updater {
    changes: Vec<Change>,
    configuration: Configuration,
    applied: usize,
}

impl Updater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the changes needed to move from `before` to `after`.
    ///
    /// Every trigger in `after` must exist in `before`, and list each partition ID once.
    /// For each trigger, removals come first, then checkpoint updates, then additions,
    /// each sorted by partition ID, and a single GC change always closes the trigger's run.
    pub fn calculate_diff(
        &mut self,
        before: &Configuration,
        after: &Configuration,
    ) -> Result<(), ReconcileError> {
        let mut changes = Vec::new();

        for (trigger_id, after_trigger) in &after.triggers {
            let before_trigger = before
                .trigger(trigger_id)
                .ok_or_else(|| ReconcileError::UnknownTrigger(trigger_id.clone()))?;
            if let Some(partition_id) = after_trigger.duplicate_id() {
                return Err(ReconcileError::DuplicatePartition {
                    trigger_id: trigger_id.clone(),
                    partition_id: partition_id.to_owned(),
                });
            }

            changes.extend(diff_trigger(trigger_id, before_trigger, after_trigger));
        }

        self.changes = changes;
        self.configuration = after.clone();
        self.applied = 0;

        Ok(())
    }

    /// Apply the calculated changes in order, stopping at the first failure.
    ///
    /// Partitions removed along the way are folded back into the held configuration
    /// whether or not a later change fails.
    pub async fn apply(&mut self, processor: &dyn Processor) -> Result<(), ReconcileError> {
        let result = self.apply_changes(processor).await;
        self.add_removed();
        result
    }

    async fn apply_changes(&mut self, processor: &dyn Processor) -> Result<(), ReconcileError> {
        for change in self.changes.iter_mut() {
            let kind = change.kind();
            match change.apply(processor).await {
                Ok(()) => {
                    metrics::counter!("dealer_changes_applied_total", "kind" => kind).increment(1);
                    self.applied += 1;
                }
                Err(e) => {
                    metrics::counter!("dealer_change_failures_total", "kind" => kind).increment(1);
                    warn!(
                        trigger_id = %change.trigger_id(),
                        partition_id = ?change.partition().map(|p| p.id.as_str()),
                        kind,
                        error = %e,
                        "failed to apply change, aborting"
                    );
                    return Err(e);
                }
            }
        }

        info!(changes = self.changes.len(), "applied configuration changes");
        Ok(())
    }

    /// Re-append every partition whose removal already went through, with its final
    /// checkpoint, so the held configuration keeps everything a trigger ever owned.
    pub fn add_removed(&mut self) {
        for change in &self.changes {
            let Change::Remove(remover) = change else {
                continue;
            };
            let Some(partition) = remover.removed() else {
                continue;
            };

            let trigger = self
                .configuration
                .triggers
                .entry(remover.trigger_id.clone())
                .or_default();
            if trigger.partition_ids().any(|id| id == partition.id) {
                continue;
            }
            trigger.partitions.push(partition);
        }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// The changes that went through during the last `apply`, in order.
    pub fn applied_changes(&self) -> &[Change] {
        &self.changes[..self.applied]
    }

    /// The configuration the triggers actually reached when starting from `before`:
    /// every applied change folded in, and nothing past the change that failed.
    ///
    /// After a complete `apply` each trigger named in the diffed `after` holds the same
    /// partitions as it does there.
    pub fn reached(&self, before: &Configuration) -> Configuration {
        let mut reached = before.clone();

        for change in self.applied_changes() {
            let Some(trigger) = reached.trigger_mut(change.trigger_id()) else {
                continue;
            };
            match change {
                Change::Remove(remover) => {
                    trigger.partitions.retain(|p| p.id != remover.partition.id);
                }
                Change::Update(update) => {
                    if let Some(partition) = trigger
                        .partitions
                        .iter_mut()
                        .find(|p| p.id == update.partition.id)
                    {
                        partition.checkpoint = update.partition.checkpoint.clone();
                    }
                }
                Change::Add(adder) => trigger.partitions.push(adder.partition.clone()),
                Change::Gc(_) => {}
            }
        }

        reached
    }

    /// The post-diff configuration, including removed partitions with their last checkpoint.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}

fn diff_trigger(trigger_id: &str, before: &TriggerConfig, after: &TriggerConfig) -> Vec<Change> {
    let before = before.partitions_by_id();
    let after = after.partitions_by_id();
    let mut changes = Vec::new();

    for (id, partition) in &before {
        if !after.contains_key(id) {
            changes.push(Change::Remove(Remover {
                trigger_id: trigger_id.to_owned(),
                partition: (*partition).clone(),
                state: RemoveState::Pending,
            }));
        }
    }

    for (id, partition) in &after {
        if let Some(previous) = before.get(id) {
            if previous.checkpoint != partition.checkpoint {
                changes.push(Change::Update(PartitionUpdater {
                    trigger_id: trigger_id.to_owned(),
                    partition: (*partition).clone(),
                }));
            }
        }
    }

    for (id, partition) in &after {
        if !before.contains_key(id) {
            changes.push(Change::Add(Adder {
                trigger_id: trigger_id.to_owned(),
                partition: (*partition).clone(),
            }));
        }
    }

    changes.push(Change::Gc(Collector {
        trigger_id: trigger_id.to_owned(),
    }));

    changes
}
