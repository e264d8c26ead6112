use std::collections::{BTreeMap, BTreeSet};

use serde_derive::{Deserialize, Serialize};

/// An opaque cursor marking how far a partition has been consumed.
///
/// `None` means the partition was never checkpointed, and consumption should
/// start from the source's default position.
pub type Checkpoint = Option<String>;

/// An independently consumable shard of an event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: String,
    #[serde(default)]
    pub checkpoint: Checkpoint,
}

impl Partition {
    pub fn new(id: impl Into<String>, checkpoint: Checkpoint) -> Self {
        Self {
            id: id.into(),
            checkpoint,
        }
    }
}

/// The partitions owned by a single trigger. The trigger ID is the key in the parent
/// `Configuration`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl TriggerConfig {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = &str> {
        self.partitions.iter().map(|p| p.id.as_str())
    }

    /// Index partitions by ID. A duplicate ID keeps the last occurrence.
    pub fn partitions_by_id(&self) -> BTreeMap<&str, &Partition> {
        self.partitions.iter().map(|p| (p.id.as_str(), p)).collect()
    }

    /// The first partition ID listed more than once, if any.
    pub fn duplicate_id(&self) -> Option<&str> {
        let mut seen = BTreeSet::new();
        self.partition_ids().find(|id| !seen.insert(*id))
    }
}

/// Desired partition layout of a process, keyed by trigger ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub triggers: BTreeMap<String, TriggerConfig>,
}

impl Configuration {
    pub fn trigger(&self, trigger_id: &str) -> Option<&TriggerConfig> {
        self.triggers.get(trigger_id)
    }

    pub fn trigger_mut(&mut self, trigger_id: &str) -> Option<&mut TriggerConfig> {
        self.triggers.get_mut(trigger_id)
    }
}
