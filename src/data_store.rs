//! Pluggable persistence for the ruleset document (e.g. Redis, a local file). The core writes
//! the raw ruleset JSON after every accepted non-DataStore update and can bootstrap from it at
//! initialize, surviving collector outages across restarts.
use crate::Result;

/// The key under which the core persists the ruleset document.
pub const STORAGE_KEY: &str = "statsig.cache";

pub trait DataStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Whether background sync should poll this store for updates instead of the network.
    fn should_be_used_for_querying_updates(&self, key: &str) -> bool;

    fn shutdown(&self) -> Result<()>;
}
