use super::PartitionDiscovery;
use crate::error::{Error, Result};
use crate::partition::{ParquetFile, Partition};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::debug;
use moka::future::Cache;
use object_store::{ObjectStore, path::Path};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

pub const DELTA_LOG_DIR: &str = "_delta_log";

/// Default snapshot freshness window (5 minutes)
pub const DEFAULT_DELTA_LOG_TTL: Duration = Duration::from_secs(300);

/// One `add` action of the transaction log: a live data file with its
/// partition values.
#[derive(Debug, Clone, Deserialize)]
pub struct AddAction {
    pub path: String,
    #[serde(default, rename = "partitionValues")]
    pub partition_values: HashMap<String, String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub stats: Option<String>,
}

/// Per-file statistics a writer may embed in an `add` action, JSON-encoded
/// in the `stats` field. Only the row count is consumed; min/max pruning
/// works from parquet footers.
#[derive(Debug, Default, Deserialize)]
struct AddStats {
    #[serde(default, rename = "numRecords")]
    num_records: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoveAction {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaDataAction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "partitionColumns")]
    pub partition_columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolAction {
    #[serde(default, rename = "minReaderVersion")]
    pub min_reader_version: Option<i32>,
    #[serde(default, rename = "minWriterVersion")]
    pub min_writer_version: Option<i32>,
}

/// One newline-delimited action record. Unknown action kinds deserialize
/// with every field absent and are ignored.
#[derive(Debug, Default, Deserialize)]
struct ActionRecord {
    #[serde(default)]
    add: Option<AddAction>,
    #[serde(default)]
    remove: Option<RemoveAction>,
    #[serde(default, rename = "metaData")]
    meta_data: Option<MetaDataAction>,
    #[serde(default)]
    protocol: Option<ProtocolAction>,
}

/// The table state after folding all log versions in order: the live
/// files, plus the latest metadata and protocol actions.
#[derive(Debug, Clone, Default)]
pub struct DeltaSnapshot {
    /// Live adds keyed by path. Duplicate adds are idempotent (the last
    /// one wins); a remove deletes regardless of how often the path was
    /// added.
    pub active_files: BTreeMap<String, AddAction>,
    pub metadata: Option<MetaDataAction>,
    pub protocol: Option<ProtocolAction>,
}

impl DeltaSnapshot {
    fn apply_line(&mut self, line: &str) -> Result<()> {
        let record: ActionRecord = serde_json::from_str(line)
            .map_err(|e| Error::Format(format!("malformed delta action: {e}")))?;
        if let Some(add) = record.add {
            self.active_files.insert(add.path.clone(), add);
        }
        if let Some(remove) = record.remove {
            self.active_files.remove(&remove.path);
        }
        if let Some(meta) = record.meta_data {
            self.metadata = Some(meta);
        }
        if let Some(protocol) = record.protocol {
            self.protocol = Some(protocol);
        }
        Ok(())
    }
}

/// Discovers partitions from a `_delta_log/` prefix.
///
/// The folded snapshot is cached for a bounded duration to keep repeated
/// enumerations from re-listing and re-parsing the log; `clear_cache`
/// forces the next discovery to refresh.
pub struct DeltaDiscovery {
    store: Arc<dyn ObjectStore>,
    root: Path,
    snapshot_cache: Cache<String, Arc<DeltaSnapshot>>,
}

impl std::fmt::Debug for DeltaDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaDiscovery")
            .field("root", &self.root.to_string())
            .finish()
    }
}

impl DeltaDiscovery {
    pub fn new(store: Arc<dyn ObjectStore>, root: Path, ttl: Duration) -> Self {
        let snapshot_cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        Self {
            store,
            root,
            snapshot_cache,
        }
    }

    /// Reads and folds the transaction log into a snapshot, going through
    /// the TTL cache.
    pub async fn snapshot(&self) -> Result<Arc<DeltaSnapshot>> {
        self.snapshot_cache
            .try_get_with(self.root.to_string(), async {
                self.load_snapshot().await.map(Arc::new)
            })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())
    }

    async fn load_snapshot(&self) -> Result<DeltaSnapshot> {
        let log_prefix = self.root.child(DELTA_LOG_DIR);
        let mut commits: Vec<Path> = self
            .store
            .list(Some(&log_prefix))
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .map(|meta| meta.location)
            .filter(|location| is_commit_file(location))
            .collect();
        // file names are zero-padded versions, lexicographic order is
        // version order
        commits.sort_by(|a, b| a.to_string().cmp(&b.to_string()));

        let mut snapshot = DeltaSnapshot::default();
        for commit in &commits {
            let payload = self.store.get(commit).await?.bytes().await?;
            let text = std::str::from_utf8(&payload)
                .map_err(|_| Error::Format(format!("delta log {commit} is not utf-8")))?;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                snapshot.apply_line(line)?;
            }
        }
        debug!(
            "delta_snapshot root={} commits={} active_files={}",
            self.root,
            commits.len(),
            snapshot.active_files.len()
        );
        Ok(snapshot)
    }

    fn partitions_from_snapshot(&self, snapshot: &DeltaSnapshot) -> Vec<Partition> {
        // canonical key order: the table's declared partition columns,
        // falling back to sorted keys for logs without metadata
        let declared_order: Vec<String> = snapshot
            .metadata
            .as_ref()
            .map(|m| m.partition_columns.iter().map(|c| c.to_lowercase()).collect())
            .unwrap_or_default();

        let mut partitions: BTreeMap<String, Partition> = BTreeMap::new();
        for add in snapshot.active_files.values() {
            let relative = add.path.trim_start_matches('/');
            let directory = match relative.rsplit_once('/') {
                Some((dir, _file)) => format!("{}/{}", self.root, dir),
                None => self.root.to_string(),
            };
            let partition = partitions.entry(directory.clone()).or_insert_with(|| {
                let mut values: Vec<(String, String)> = add
                    .partition_values
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.clone()))
                    .collect();
                values.sort_by_key(|(k, _)| {
                    let declared = declared_order
                        .iter()
                        .position(|c| c == k)
                        .unwrap_or(declared_order.len());
                    (declared, k.clone())
                });
                Partition {
                    path: directory,
                    values,
                    files: Vec::new(),
                }
            });
            let mut file = ParquetFile::new(format!("{}/{}", self.root, relative));
            file.size_bytes = add.size;
            // embedded writer stats are best-effort, malformed ones are
            // simply absent
            file.row_count = add
                .stats
                .as_deref()
                .and_then(|raw| serde_json::from_str::<AddStats>(raw).ok())
                .and_then(|stats| stats.num_records);
            partition.files.push(file);
        }
        let mut result: Vec<Partition> = partitions.into_values().collect();
        for partition in &mut result {
            partition.files.sort_by(|a, b| a.path.cmp(&b.path));
        }
        result
    }
}

fn is_commit_file(location: &Path) -> bool {
    let Some(name) = location.filename() else {
        return false;
    };
    let Some(stem) = name.strip_suffix(".json") else {
        return false;
    };
    stem.len() == 20 && stem.bytes().all(|b| b.is_ascii_digit())
}

#[async_trait]
impl PartitionDiscovery for DeltaDiscovery {
    async fn discover(&self) -> Result<Vec<Partition>> {
        let snapshot = self.snapshot().await?;
        Ok(self.partitions_from_snapshot(&snapshot))
    }

    fn clear_cache(&self) {
        self.snapshot_cache.invalidate_all();
    }
}
