use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::{extract::State, Json};
use bytes::Bytes;
use dealer_common::message::{Job, Message, Task, TaskState};
use dealer_common::partition::{Configuration, Partition};
use dealer_common::processor::Processor;
use tracing::{debug, info, warn};

use crate::error::DealerError;

/// Identity of the function this process runs, echoed in every dealer reply.
#[derive(Debug, Clone, Default)]
pub struct FunctionIdentity {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub alias: String,
}

/// Translates between the dealer protocol and the processor's partition configuration.
///
/// The processor is expected to serialize reconciliations; the dealer holds no state of
/// its own besides where it is reachable.
#[derive(Clone)]
pub struct Dealer {
    processor: Arc<dyn Processor>,
    function: FunctionIdentity,
    host: String,
    port: u16,
}

impl Dealer {
    pub fn new(
        processor: Arc<dyn Processor>,
        function: FunctionIdentity,
        host: String,
        port: u16,
    ) -> Self {
        Self {
            processor,
            function,
            host,
            port,
        }
    }

    /// Describe the live partition assignment of every partitioned trigger.
    pub async fn reply(&self) -> Message {
        let mut message = Message {
            name: self.host.clone(),
            namespace: self.function.namespace.clone(),
            function: self.function.name.clone(),
            version: self.function.version.clone(),
            alias: self.function.alias.clone(),
            ip: self.host.clone(),
            port: self.port,
            ..Default::default()
        };

        for trigger in self.processor.triggers() {
            message.total_events += trigger.statistics().total();

            let Some(stream) = trigger.as_partitioned() else {
                continue;
            };
            let tasks = stream
                .partitions()
                .into_iter()
                .map(|partition| Task {
                    id: partition.id,
                    state: TaskState::Running,
                    checkpoint: partition.checkpoint.unwrap_or_default(),
                })
                .collect();
            message.jobs.insert(trigger.id().to_owned(), Job::new(tasks));
        }

        message
    }

    /// Reassign partitions as requested, then describe the resulting assignment.
    ///
    /// Every trigger in the request gets exactly the requested tasks. Partitions the
    /// processor still tracks for such a trigger but that were not requested are reported
    /// back as deleted.
    pub async fn deal(&self, request: &Message) -> Result<Message, DealerError> {
        let configuration = self.requested_configuration(request).await?;
        self.processor.set_configuration(configuration).await?;

        let applied = match self.processor.last_update().await {
            Some(update) => update.configuration().clone(),
            None => self.processor.configuration().await,
        };
        let deleted = deleted_tasks(request, &applied);

        let mut reply = self.reply().await;
        for (trigger_id, tasks) in deleted {
            info!(trigger_id = %trigger_id, deleted = tasks.len(), "reporting deleted partitions");
            let job = reply.jobs.entry(trigger_id).or_default();
            job.tasks.extend(tasks);
            job.total_tasks = job.tasks.len();
        }

        Ok(reply)
    }

    async fn requested_configuration(
        &self,
        request: &Message,
    ) -> Result<Configuration, DealerError> {
        let mut configuration = self.processor.configuration().await;

        for (trigger_id, job) in &request.jobs {
            let trigger = configuration
                .trigger_mut(trigger_id)
                .ok_or_else(|| DealerError::UnknownTrigger(trigger_id.clone()))?;

            // The task state, not the task checkpoint, is what the protocol stores as the
            // partition checkpoint.
            trigger.partitions = job
                .tasks
                .iter()
                .map(|task| Partition::new(task.id.to_string(), Some(task.state.to_string())))
                .collect();
        }

        Ok(configuration)
    }
}

/// Tasks for partitions present in the applied configuration of a requested trigger but
/// absent from what was requested for it.
fn deleted_tasks(request: &Message, applied: &Configuration) -> BTreeMap<String, Vec<Task>> {
    let mut deleted = BTreeMap::new();

    for (trigger_id, job) in &request.jobs {
        let Some(trigger) = applied.trigger(trigger_id) else {
            continue;
        };
        let requested: HashSet<u32> = job.tasks.iter().map(|task| task.id).collect();

        let tasks: Vec<Task> = trigger
            .partitions
            .iter()
            .filter_map(|partition| match partition.id.parse::<u32>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(
                        trigger_id = %trigger_id,
                        partition_id = %partition.id,
                        "skipping non-numeric partition"
                    );
                    None
                }
            })
            .filter(|id| !requested.contains(id))
            .map(|id| Task {
                id,
                state: TaskState::Deleted,
                checkpoint: String::new(),
            })
            .collect();

        if !tasks.is_empty() {
            deleted.insert(trigger_id.clone(), tasks);
        }
    }

    deleted
}

pub async fn get(State(dealer): State<Dealer>) -> Json<Message> {
    Json(dealer.reply().await)
}

pub async fn post(
    State(dealer): State<Dealer>,
    body: Bytes,
) -> Result<Json<Message>, DealerError> {
    let request: Message = serde_json::from_slice(&body)?;
    debug!(jobs = request.jobs.len(), "received dealer request");

    Ok(Json(dealer.deal(&request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_json_diff::assert_json_include;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
        Router,
    };
    use dealer_common::error::TriggerError;
    use dealer_common::memory::{MemoryTrigger, WorkerPool};
    use dealer_common::partition::{Checkpoint, TriggerConfig};
    use dealer_common::processor::LocalProcessor;
    use dealer_common::trigger::{PartitionedStream, Statistics, Trigger, WorkerAllocator};
    use http_body_util::BodyExt; // for `collect`
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use crate::handlers::app::app;

    /// A trigger that does not consume a partitioned stream.
    struct HttpTrigger {
        pool: Arc<WorkerPool>,
    }

    #[async_trait]
    impl Trigger for HttpTrigger {
        fn id(&self) -> &str {
            "http"
        }

        async fn add_partition(&self, partition: &Partition) -> Result<(), TriggerError> {
            Err(TriggerError::InvalidPartitionId(partition.id.clone()))
        }

        async fn remove_partition(&self, partition: &Partition) -> Result<Checkpoint, TriggerError> {
            Err(TriggerError::PartitionNotFound(partition.id.clone()))
        }

        async fn update_partition(&self, partition: &Partition) -> Result<(), TriggerError> {
            Err(TriggerError::PartitionNotFound(partition.id.clone()))
        }

        fn allocator(&self) -> Arc<dyn WorkerAllocator> {
            self.pool.clone()
        }

        fn statistics(&self) -> Statistics {
            Statistics {
                success_count: 5,
                failure_count: 1,
            }
        }
    }

    async fn setup(max_workers: usize) -> (Router, Arc<MemoryTrigger>) {
        let trigger = Arc::new(MemoryTrigger::new("t1", max_workers));
        let partitioned: Arc<dyn Trigger> = trigger.clone();
        let http: Arc<dyn Trigger> = Arc::new(HttpTrigger {
            pool: Arc::new(WorkerPool::new(1)),
        });

        let mut initial = Configuration::default();
        initial.triggers.insert(
            "t1".to_owned(),
            TriggerConfig::new(vec![Partition::new("1", None), Partition::new("2", None)]),
        );
        initial
            .triggers
            .insert("http".to_owned(), TriggerConfig::default());

        let processor = LocalProcessor::new(vec![partitioned, http], initial)
            .await
            .expect("failed to start processor");

        let dealer = Dealer::new(
            Arc::new(processor),
            FunctionIdentity {
                name: "echo".to_owned(),
                namespace: "default".to_owned(),
                version: "latest".to_owned(),
                alias: "latest".to_owned(),
            },
            "echo-0".to_owned(),
            8082,
        );

        (app(dealer, None), trigger)
    }

    async fn send(app: Router, method: http::Method, body: Body) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/dealer")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn get_reports_live_partitions() {
        let (app, trigger) = setup(4).await;
        trigger.record_event("2", Some("7".to_owned()), true).unwrap();
        trigger.record_event("2", Some("8".to_owned()), false).unwrap();

        let (status, body) = send(app, http::Method::GET, Body::empty()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "name": "echo-0",
                "namespace": "default",
                "function": "echo",
                "version": "latest",
                "alias": "latest",
                "ip": "echo-0",
                "port": 8082,
                "state": 0,
                "totalEvents": 8,
                "dealerURL": "",
                "jobs": {
                    "t1": {
                        "totalTasks": 2,
                        "tasks": [
                            {"id": 1, "state": 1, "checkpoint": ""},
                            {"id": 2, "state": 1, "checkpoint": "8"}
                        ]
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn post_reports_dropped_partitions_as_deleted() {
        let (app, trigger) = setup(4).await;

        let (status, body) = send(
            app,
            http::Method::POST,
            Body::from(r#"{"jobs":{"t1":{"tasks":[{"id":1,"state":1}]}}}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_json_include!(
            actual: body,
            expected: json!({
                "jobs": {
                    "t1": {
                        "totalTasks": 2,
                        "tasks": [
                            {"id": 1, "state": 1, "checkpoint": "1"},
                            {"id": 2, "state": 3, "checkpoint": ""}
                        ]
                    }
                }
            })
        );
        let live: Vec<u32> = trigger.partitions().iter().map(|p| p.id).collect();
        assert_eq!(live, vec![1]);
    }

    #[tokio::test]
    async fn post_adds_requested_partitions() {
        let (app, trigger) = setup(4).await;

        let (status, body) = send(
            app,
            http::Method::POST,
            Body::from(r#"{"jobs":{"t1":{"tasks":[{"id":1,"state":1},{"id":2,"state":1},{"id":3,"state":4}]}}}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_json_include!(
            actual: body,
            expected: json!({
                "jobs": {
                    "t1": {
                        "totalTasks": 3,
                        "tasks": [
                            {"id": 1, "state": 1, "checkpoint": "1"},
                            {"id": 2, "state": 1, "checkpoint": "1"},
                            {"id": 3, "state": 1, "checkpoint": "4"}
                        ]
                    }
                }
            })
        );
        assert_eq!(trigger.partitions().len(), 3);
    }

    #[tokio::test]
    async fn post_with_unknown_trigger_is_rejected() {
        let (app, trigger) = setup(4).await;

        let (status, body) = send(
            app,
            http::Method::POST,
            Body::from(r#"{"jobs":{"t9":{"tasks":[{"id":1,"state":1}]}}}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "unknown trigger - t9"}));
        assert_eq!(trigger.partitions().len(), 2);
    }

    #[tokio::test]
    async fn post_with_malformed_json_is_rejected() {
        let (app, _trigger) = setup(4).await;

        let (status, body) = send(app, http::Method::POST, Body::from("{\"jobs\": ")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("failed to parse request"));
    }

    #[tokio::test]
    async fn post_reconciliation_failure_is_a_bad_request() {
        let (app, trigger) = setup(2).await;

        let (status, body) = send(
            app,
            http::Method::POST,
            Body::from(r#"{"jobs":{"t1":{"tasks":[{"id":1,"state":1},{"id":2,"state":1},{"id":3,"state":1}]}}}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"error": "trigger t1 failed to add: worker pool exhausted, all 2 workers are busy"})
        );
        // Checkpoint updates applied before the failing add are not rolled back.
        let checkpoints: Vec<Checkpoint> = trigger
            .partitions()
            .into_iter()
            .map(|p| p.checkpoint)
            .collect();
        assert_eq!(
            checkpoints,
            vec![Some("1".to_owned()), Some("1".to_owned())]
        );
    }

    #[tokio::test]
    async fn post_after_partial_failure_is_applied() {
        let (app, trigger) = setup(2).await;

        let (status, _) = send(
            app.clone(),
            http::Method::POST,
            Body::from(r#"{"jobs":{"t1":{"tasks":[{"id":1,"state":1},{"id":3,"state":1},{"id":4,"state":1}]}}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let live: Vec<u32> = trigger.partitions().iter().map(|p| p.id).collect();
        assert_eq!(live, vec![1, 3]);

        let (status, body) = send(
            app,
            http::Method::POST,
            Body::from(r#"{"jobs":{"t1":{"tasks":[{"id":1,"state":1}]}}}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["jobs"]["t1"]["tasks"],
            json!([
                {"id": 1, "state": 1, "checkpoint": "1"},
                {"id": 3, "state": 3, "checkpoint": ""}
            ])
        );
        let live: Vec<u32> = trigger.partitions().iter().map(|p| p.id).collect();
        assert_eq!(live, vec![1]);
    }

    #[tokio::test]
    async fn post_with_repeated_task_is_rejected() {
        let (app, trigger) = setup(4).await;

        let (status, body) = send(
            app,
            http::Method::POST,
            Body::from(r#"{"jobs":{"t1":{"tasks":[{"id":1,"state":1},{"id":1,"state":4}]}}}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"error": "partition 1 is listed more than once for trigger t1"})
        );
        let checkpoints: Vec<Checkpoint> = trigger
            .partitions()
            .into_iter()
            .map(|p| p.checkpoint)
            .collect();
        assert_eq!(checkpoints, vec![None, None]);
    }

    #[tokio::test]
    async fn deleted_partitions_are_reported_once() {
        let (app, _trigger) = setup(4).await;
        let request = r#"{"jobs":{"t1":{"tasks":[{"id":1,"state":1}]}}}"#;

        let (status, _) = send(app.clone(), http::Method::POST, Body::from(request)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, http::Method::POST, Body::from(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["jobs"]["t1"]["tasks"],
            json!([{"id": 1, "state": 1, "checkpoint": "1"}])
        );
    }

    #[test]
    fn deleted_tasks_only_cover_requested_triggers() {
        let request: Message =
            serde_json::from_str(r#"{"jobs":{"a":{"tasks":[{"id":1}]}}}"#).unwrap();
        let mut applied = Configuration::default();
        applied.triggers.insert(
            "a".to_owned(),
            TriggerConfig::new(vec![
                Partition::new("1", None),
                Partition::new("2", Some("9".to_owned())),
                Partition::new("shard", None),
            ]),
        );
        applied.triggers.insert(
            "b".to_owned(),
            TriggerConfig::new(vec![Partition::new("5", None)]),
        );

        let deleted = deleted_tasks(&request, &applied);

        assert_eq!(deleted.len(), 1);
        assert_eq!(
            deleted["a"],
            vec![Task {
                id: 2,
                state: TaskState::Deleted,
                checkpoint: String::new(),
            }]
        );
    }
}
