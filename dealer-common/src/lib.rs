pub mod error;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod partition;
pub mod processor;
pub mod trigger;
pub mod updater;
