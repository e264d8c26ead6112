use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::ReconcileError;
use crate::partition::{Configuration, TriggerConfig};
use crate::trigger::Trigger;
use crate::updater::Updater;

/// A running function process: a fixed set of triggers and the partition layout they
/// are meant to consume.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The configuration the triggers are currently reconciled to. After a failed
    /// reconciliation this includes whatever changes went through before the failure.
    async fn configuration(&self) -> Configuration;

    /// Reconcile the live triggers to a new configuration.
    ///
    /// Implementations must run at most one reconciliation at a time.
    async fn set_configuration(&self, configuration: Configuration) -> Result<(), ReconcileError>;

    fn triggers(&self) -> Vec<Arc<dyn Trigger>>;

    /// The updater of the last reconciliation that applied completely, if any. A failed
    /// reconciliation leaves it in place, even when some of its changes went through.
    async fn last_update(&self) -> Option<Arc<Updater>>;
}

struct State {
    configuration: Configuration,
    last_update: Option<Arc<Updater>>,
}

/// A `Processor` that serializes reconciliations behind a single lock.
pub struct LocalProcessor {
    triggers: Vec<Arc<dyn Trigger>>,
    state: Mutex<State>,
}

impl LocalProcessor {
    /// Start a processor, assigning the initial configuration to the triggers.
    ///
    /// Triggers are fixed for the lifetime of the processor: `initial` may only reference
    /// triggers passed in here.
    pub async fn new(
        triggers: Vec<Arc<dyn Trigger>>,
        initial: Configuration,
    ) -> Result<Self, ReconcileError> {
        let empty = Configuration {
            triggers: triggers
                .iter()
                .map(|trigger| (trigger.id().to_owned(), TriggerConfig::default()))
                .collect(),
        };

        let processor = Self {
            triggers,
            state: Mutex::new(State {
                configuration: empty,
                last_update: None,
            }),
        };
        processor.set_configuration(initial).await?;

        Ok(processor)
    }
}

#[async_trait]
impl Processor for LocalProcessor {
    async fn configuration(&self) -> Configuration {
        self.state.lock().await.configuration.clone()
    }

    async fn set_configuration(&self, configuration: Configuration) -> Result<(), ReconcileError> {
        let mut state = self.state.lock().await;

        let mut updater = Updater::new();
        let result = match updater.calculate_diff(&state.configuration, &configuration) {
            Ok(()) => updater.apply(self).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(
                    triggers = configuration.triggers.len(),
                    changes = updater.changes().len(),
                    "reconciled processor configuration"
                );
                metrics::counter!("dealer_reconciliations_total", "result" => "success")
                    .increment(1);
                state.configuration = configuration;
                state.last_update = Some(Arc::new(updater));
                Ok(())
            }
            Err(e) => {
                error!(
                    error = %e,
                    applied = updater.applied_changes().len(),
                    "failed to reconcile processor configuration"
                );
                metrics::counter!("dealer_reconciliations_total", "result" => "failure")
                    .increment(1);
                // Changes are not rolled back, so track what the triggers actually hold.
                state.configuration = updater.reached(&state.configuration);
                Err(e)
            }
        }
    }

    fn triggers(&self) -> Vec<Arc<dyn Trigger>> {
        self.triggers.clone()
    }

    async fn last_update(&self) -> Option<Arc<Updater>> {
        self.state.lock().await.last_update.clone()
    }
}
