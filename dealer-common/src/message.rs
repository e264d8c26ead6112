//! Wire types of the dealer protocol, spoken between a process and the orchestrator that
//! distributes partitions across process replicas.
use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

/// Lifecycle of a task as reported to the orchestrator.
///
/// Serialized as its integer code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskState {
    #[default]
    Unassigned,
    Running,
    Stopping,
    Deleted,
    Alloc,
    Completed,
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::Unassigned => 0,
            TaskState::Running => 1,
            TaskState::Stopping => 2,
            TaskState::Deleted => 3,
            TaskState::Alloc => 4,
            TaskState::Completed => 5,
        }
    }
}

impl TryFrom<u8> for TaskState {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TaskState::Unassigned),
            1 => Ok(TaskState::Running),
            2 => Ok(TaskState::Stopping),
            3 => Ok(TaskState::Deleted),
            4 => Ok(TaskState::Alloc),
            5 => Ok(TaskState::Completed),
            other => Err(format!("{other} is not a valid task state")),
        }
    }
}

impl std::fmt::Display for TaskState {
    /// Formats the integer code, which is what gets stored when a task state is recorded
    /// as a partition checkpoint.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A single partition as seen on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u32,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub checkpoint: String,
}

/// The tasks of one trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub total_tasks: usize,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Job {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            total_tasks: tasks.len(),
            tasks,
        }
    }
}

/// The full dealer envelope: function identity plus one job per trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    pub name: String,
    pub namespace: String,
    pub function: String,
    pub version: String,
    pub alias: String,
    pub ip: String,
    pub port: u16,
    pub state: u8,
    pub total_events: u64,
    #[serde(rename = "dealerURL")]
    pub dealer_url: String,
    pub jobs: BTreeMap<String, Job>,
}
