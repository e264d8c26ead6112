use std::str::FromStr;

use dealer_common::partition::{Configuration, Partition, TriggerConfig};
use envconfig::Envconfig;
use thiserror::Error;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8082")]
    pub port: u16,

    /// Name of this replica, reported to the orchestrator as its address.
    #[envconfig(from = "HOSTNAME", default = "localhost")]
    pub hostname: String,

    #[envconfig(from = "FUNCTION_NAME", default = "")]
    pub function_name: String,

    #[envconfig(from = "FUNCTION_NAMESPACE", default = "default")]
    pub function_namespace: String,

    #[envconfig(from = "FUNCTION_VERSION", default = "latest")]
    pub function_version: String,

    #[envconfig(from = "FUNCTION_ALIAS", default = "latest")]
    pub function_alias: String,

    #[envconfig(from = "TRIGGERS", default = "")]
    pub triggers: TriggerLayout,

    #[envconfig(from = "MAX_WORKERS", default = "16")]
    pub max_workers: usize,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The partitions each trigger starts with, written as
/// `<trigger>=<id>[:<checkpoint>],...` entries separated by `;`.
///
/// A trigger with no partitions is written `<trigger>=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerLayout(pub Configuration);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseTriggerLayoutError {
    #[error("trigger entry {0:?} is missing '='")]
    MissingSeparator(String),
    #[error("trigger entry {0:?} has an empty trigger id")]
    EmptyTriggerId(String),
    #[error("trigger {0} is listed more than once")]
    DuplicateTrigger(String),
    #[error("partition {partition} is listed more than once for trigger {trigger}")]
    DuplicatePartition { trigger: String, partition: String },
}

impl FromStr for TriggerLayout {
    type Err = ParseTriggerLayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut configuration = Configuration::default();

        for entry in s.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (trigger_id, partitions) = entry
                .split_once('=')
                .ok_or_else(|| ParseTriggerLayoutError::MissingSeparator(entry.to_owned()))?;
            let trigger_id = trigger_id.trim();
            if trigger_id.is_empty() {
                return Err(ParseTriggerLayoutError::EmptyTriggerId(entry.to_owned()));
            }

            let mut trigger = TriggerConfig::default();
            for partition in partitions.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let partition = match partition.split_once(':') {
                    Some((id, checkpoint)) => Partition::new(id, Some(checkpoint.to_owned())),
                    None => Partition::new(partition, None),
                };
                if trigger.partition_ids().any(|id| id == partition.id) {
                    return Err(ParseTriggerLayoutError::DuplicatePartition {
                        trigger: trigger_id.to_owned(),
                        partition: partition.id,
                    });
                }
                trigger.partitions.push(partition);
            }

            if configuration
                .triggers
                .insert(trigger_id.to_owned(), trigger)
                .is_some()
            {
                return Err(ParseTriggerLayoutError::DuplicateTrigger(
                    trigger_id.to_owned(),
                ));
            }
        }

        Ok(TriggerLayout(configuration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partitions_and_checkpoints() {
        let layout: TriggerLayout = "kafka=0,1:42 ; kinesis=".parse().unwrap();

        let kafka = layout.0.trigger("kafka").unwrap();
        assert_eq!(
            kafka.partitions,
            vec![
                Partition::new("0", None),
                Partition::new("1", Some("42".to_owned()))
            ]
        );
        assert!(layout.0.trigger("kinesis").unwrap().partitions.is_empty());
    }

    #[test]
    fn empty_layout_has_no_triggers() {
        let layout: TriggerLayout = "".parse().unwrap();
        assert!(layout.0.triggers.is_empty());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert_eq!(
            "kafka".parse::<TriggerLayout>(),
            Err(ParseTriggerLayoutError::MissingSeparator("kafka".to_owned()))
        );
        assert_eq!(
            "=1".parse::<TriggerLayout>(),
            Err(ParseTriggerLayoutError::EmptyTriggerId("=1".to_owned()))
        );
        assert_eq!(
            "a=1;a=2".parse::<TriggerLayout>(),
            Err(ParseTriggerLayoutError::DuplicateTrigger("a".to_owned()))
        );
        assert_eq!(
            "a=1,1:5".parse::<TriggerLayout>(),
            Err(ParseTriggerLayoutError::DuplicatePartition {
                trigger: "a".to_owned(),
                partition: "1".to_owned()
            })
        );
    }

    #[test]
    fn bind_joins_host_and_port() {
        let config = Config::init_from_hashmap(&Default::default()).unwrap();
        assert_eq!(config.bind(), "0.0.0.0:8082");
        assert_eq!(config.max_workers, 16);
        assert!(config.triggers.0.triggers.is_empty());
    }
}
