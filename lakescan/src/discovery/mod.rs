/// Delta transaction-log snapshot discovery
pub mod delta;
/// Hive-style `key=value` directory discovery
pub mod hive;

use crate::error::Result;
use crate::partition::Partition;
use async_trait::async_trait;
use futures::StreamExt;
use object_store::{ObjectStore, path::Path};
use std::sync::Arc;

/// A strategy producing the partitions of a table root.
///
/// Implementations return partitions in stable order (sorted by path) so
/// pruning and enumeration are deterministic.
#[async_trait]
pub trait PartitionDiscovery: Send + Sync + std::fmt::Debug {
    async fn discover(&self) -> Result<Vec<Partition>>;

    /// Drops any cached snapshot so the next discovery re-reads storage.
    fn clear_cache(&self) {}
}

/// Selects the discovery strategy for a root: a `_delta_log/` prefix with
/// at least one entry selects Delta, anything else walks Hive layout.
pub async fn detect_strategy(
    store: Arc<dyn ObjectStore>,
    root: Path,
    delta_log_ttl: std::time::Duration,
) -> Result<Arc<dyn PartitionDiscovery>> {
    let log_prefix = root.child(delta::DELTA_LOG_DIR);
    let has_log = store
        .list(Some(&log_prefix))
        .next()
        .await
        .transpose()?
        .is_some();
    if has_log {
        Ok(Arc::new(delta::DeltaDiscovery::new(
            store,
            root,
            delta_log_ttl,
        )))
    } else {
        Ok(Arc::new(hive::HiveDiscovery::new(store, root)))
    }
}
