use super::PartitionDiscovery;
use crate::error::{Error, Result};
use crate::partition::{ParquetFile, Partition};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::debug;
use object_store::{ObjectStore, path::Path};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Walks a root for `key=value` directory segments.
///
/// A partition is a leaf directory holding at least one parquet file;
/// intermediate segments that do not look like `key=value` contribute to
/// the partition path but bind no key. A root without any key segments
/// yields a single unkeyed partition, so flat tables scan like any other.
#[derive(Debug)]
pub struct HiveDiscovery {
    store: Arc<dyn ObjectStore>,
    root: Path,
}

impl HiveDiscovery {
    pub fn new(store: Arc<dyn ObjectStore>, root: Path) -> Self {
        Self { store, root }
    }
}

#[async_trait]
impl PartitionDiscovery for HiveDiscovery {
    async fn discover(&self) -> Result<Vec<Partition>> {
        let objects: Vec<_> = self.store.list(Some(&self.root)).try_collect().await?;
        // directory path -> partition, sorted for deterministic pruning
        let mut partitions: BTreeMap<String, Partition> = BTreeMap::new();
        let root_depth = self.root.parts().count();
        for meta in objects {
            if meta.location.extension() != Some("parquet") {
                continue;
            }
            let segments: Vec<String> = meta
                .location
                .parts()
                .skip(root_depth)
                .map(|p| p.as_ref().to_string())
                .collect();
            let Some((_file_name, dirs)) = segments.split_last() else {
                continue;
            };
            let mut values: Vec<(String, String)> = Vec::new();
            for segment in dirs {
                let Some((key, value)) = segment.split_once('=') else {
                    continue;
                };
                let key = key.to_lowercase();
                if values.iter().any(|(k, _)| *k == key) {
                    return Err(Error::SchemaMismatch(format!(
                        "partition key {key} appears twice under {}",
                        meta.location
                    )));
                }
                values.push((key, value.to_string()));
            }
            let dir_path = match dirs.is_empty() {
                true => self.root.to_string(),
                false => format!("{}/{}", self.root, dirs.join("/")),
            };
            let partition = partitions.entry(dir_path.clone()).or_insert_with(|| Partition {
                path: dir_path,
                values,
                files: Vec::new(),
            });
            let mut file = ParquetFile::new(meta.location.to_string());
            file.size_bytes = Some(meta.size);
            partition.files.push(file);
        }
        let mut result: Vec<Partition> = partitions.into_values().collect();
        for partition in &mut result {
            partition.files.sort_by(|a, b| a.path.cmp(&b.path));
        }
        debug!(
            "hive_discovery root={} partitions={}",
            self.root,
            result.len()
        );
        Ok(result)
    }
}
