//! Chain tunables and the configuration property store.

/// Chain construction and streaming tunables.
pub mod chain;
/// Property store with change notification.
pub mod store;

pub use chain::ChainConfig;
pub use store::{ConfigEvent, ConfigLookup, ConfigStore};
