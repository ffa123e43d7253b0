
use lakescan::error::Error;
use lakescan::expr::{col, lit, starts_with};
use lakescan::metadata::RowType;
use lakescan::reader::{ObjectStoreParquetReader, ParquetReader};
use lakescan::store::blob_cache::BlobCache;
use lakescan::table::{PartitionProjectionMode, Table, TableConfig};
use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::path::Path;
use std::sync::Arc;
use test_helpers::{
    CountingReader, CountingStore, Event, Reading, TinyReading, YearRegion, YearValue,
    event_batch, put_bytes, put_parquet, register_row_types, value_batch, value_batch_i32,
};

async fn instrumented_table<T: RowType>(
    store: Arc<dyn ObjectStore>,
    root: &str,
    config: TableConfig,
) -> (Table<T>, Arc<CountingReader>) {
    register_row_types();
    let blob_cache = Arc::new(BlobCache::new(
        Arc::clone(&store),
        config.blob_cache.clone(),
    ));
    let reader = Arc::new(CountingReader::new(Arc::new(ObjectStoreParquetReader::new(
        blob_cache,
    ))));
    let table = Table::open_with_config(store, Path::from(root), config)
        .await
        .expect("open table")
        .with_reader(reader.clone() as Arc<dyn ParquetReader>);
    (table, reader)
}

async fn hive_fixture() -> Arc<InMemory> {
    let store = Arc::new(InMemory::new());
    for (partition, offset) in [
        ("lake/year=2023/region=us-east", 0i64),
        ("lake/year=2023/region=eu-west", 1000),
        ("lake/year=2024/region=us-east", 2000),
    ] {
        let values: Vec<i64> = (offset..offset + 100).collect();
        put_parquet(
            store.as_ref(),
            &format!("{partition}/part-0.parquet"),
            &[value_batch(&values)],
        )
        .await
        .expect("fixture write");
    }
    store
}

#[tokio::test]
async fn test_partition_filter_scans_one_partition() {
    let store = hive_fixture().await;
    let (table, reader) =
        instrumented_table::<Reading>(store, "lake", TableConfig::default()).await;

    let rows = table
        .collect(Some(col("year").eq(lit(2024))))
        .await
        .expect("scan");
    assert_eq!(rows.len(), 100);
    assert!(rows.iter().all(|r| r.year == 2024 && r.region == "us-east"));
    assert_eq!(rows[0].value, 2000);

    // exactly the files of the matching partition were opened
    assert_eq!(
        reader.read_files(),
        vec!["lake/year=2024/region=us-east/part-0.parquet".to_string()]
    );
}

#[tokio::test]
async fn test_partition_only_projection_reads_no_rows() {
    let store = hive_fixture().await;
    let (table, reader) =
        instrumented_table::<YearRegion>(store, "lake", TableConfig::default()).await;

    let mut rows = table.collect(None).await.expect("scan");
    rows.sort();
    assert_eq!(
        rows,
        vec![
            YearRegion { year: 2023, region: "eu-west".to_string() },
            YearRegion { year: 2023, region: "us-east".to_string() },
            YearRegion { year: 2024, region: "us-east".to_string() },
        ]
    );
    assert!(reader.read_files().is_empty());
}

#[tokio::test]
async fn test_partition_projection_per_file_and_per_partition_modes() {
    let store = hive_fixture().await;
    // a second file in one partition
    put_parquet(
        store.as_ref(),
        "lake/year=2024/region=us-east/part-1.parquet",
        &[value_batch(&[1, 2, 3])],
    )
    .await
    .expect("extra file");

    let (table, _) = instrumented_table::<YearRegion>(
        store.clone() as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;
    // canonical mode: one row per data file
    assert_eq!(table.collect(None).await.expect("scan").len(), 4);

    let collapsed_config = TableConfig {
        partition_projection: PartitionProjectionMode::PerPartition,
        ..TableConfig::default()
    };
    let (table, _) = instrumented_table::<YearRegion>(
        store as Arc<dyn ObjectStore>,
        "lake",
        collapsed_config,
    )
    .await;
    assert_eq!(table.collect(None).await.expect("scan").len(), 3);
}

#[tokio::test]
async fn test_delta_scan_sees_only_live_files() {
    let store = Arc::new(InMemory::new());
    put_parquet(
        store.as_ref(),
        "lake/year=2024/a.parquet",
        &[value_batch(&[1, 2])],
    )
    .await
    .expect("write a");
    put_parquet(
        store.as_ref(),
        "lake/year=2024/b.parquet",
        &[value_batch(&[10, 20])],
    )
    .await
    .expect("write b");
    let commit0 = [
        r#"{"metaData":{"id":"t1","partitionColumns":["year"]}}"#,
        r#"{"add":{"path":"year=2024/a.parquet","partitionValues":{"year":"2024"}}}"#,
        r#"{"add":{"path":"year=2024/b.parquet","partitionValues":{"year":"2024"}}}"#,
    ]
    .join("\n");
    put_bytes(
        store.as_ref(),
        "lake/_delta_log/00000000000000000000.json",
        commit0.into_bytes(),
    )
    .await
    .expect("commit 0");
    put_bytes(
        store.as_ref(),
        "lake/_delta_log/00000000000000000001.json",
        br#"{"remove":{"path":"year=2024/a.parquet"}}"#.to_vec(),
    )
    .await
    .expect("commit 1");

    let (table, reader) = instrumented_table::<YearValue>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let mut rows = table
        .collect(Some(col("year").eq(lit(2024))))
        .await
        .expect("scan");
    rows.sort_by_key(|r| r.value);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value, 10);
    assert_eq!(rows[1].value, 20);
    assert_eq!(reader.read_files(), vec!["lake/year=2024/b.parquet".to_string()]);
}

#[tokio::test]
async fn test_range_filter_reads_only_overlapping_file() {
    let store = Arc::new(InMemory::new());
    for (name, range) in [("a", 0i64..41), ("b", 50..91), ("c", 100..201)] {
        let values: Vec<i64> = range.collect();
        put_parquet(
            store.as_ref(),
            &format!("lake/year=2024/{name}.parquet"),
            &[value_batch(&values)],
        )
        .await
        .expect("fixture write");
    }
    let (table, reader) = instrumented_table::<YearValue>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let filter = col("value").gt_eq(lit(50)).and(col("value").lt_eq(lit(60)));
    let rows = table.collect(Some(filter)).await.expect("scan");

    assert_eq!(
        reader.read_files(),
        vec!["lake/year=2024/b.parquet".to_string()]
    );
    // the row groups that survive pruning are still filtered exactly
    assert_eq!(rows.len(), 11);
    assert!(rows.iter().all(|r| (50..=60).contains(&r.value)));
}

#[tokio::test]
async fn test_indexed_prefix_reads_index_once_per_handle() {
    let store = Arc::new(InMemory::new());
    put_parquet(
        store.as_ref(),
        "lake/year=2024/events.parquet",
        &[
            event_batch(&["451", "452", "455"], &[1, 2, 3]),
            event_batch(&["461", "462", "471"], &[4, 5, 6]),
        ],
    )
    .await
    .expect("fixture write");
    let (table, reader) = instrumented_table::<Event>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let filter = || starts_with("client_id", "46");
    let rows = table.collect(Some(filter())).await.expect("first scan");
    assert_eq!(reader.column_reads(), 1);
    let ids: Vec<&str> = rows.iter().map(|r| r.client_id.as_str()).collect();
    assert_eq!(ids, vec!["461", "462"]);

    let again = table.collect(Some(filter())).await.expect("second scan");
    assert_eq!(reader.column_reads(), 1); // index came from the handle cache
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn test_narrowing_overflow_surfaces() {
    let store = Arc::new(InMemory::new());
    put_parquet(
        store.as_ref(),
        "lake/readings.parquet",
        &[value_batch_i32(&[5, 1000])],
    )
    .await
    .expect("fixture write");
    let (table, _) = instrumented_table::<TinyReading>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let result = table.collect(None).await;
    assert!(matches!(result, Err(Error::Overflow(_))));
}

#[tokio::test]
async fn test_enumeration_is_idempotent() {
    let store = hive_fixture().await;
    let (table, _) = instrumented_table::<Reading>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let filter = || col("year").eq(lit(2023)).and(col("value").lt(lit(1010)));
    let first = table.collect(Some(filter())).await.expect("first scan");
    let second = table.collect(Some(filter())).await.expect("second scan");
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[tokio::test]
async fn test_empty_root_yields_empty_stream() {
    let store = Arc::new(InMemory::new());
    let (table, reader) = instrumented_table::<Reading>(
        store as Arc<dyn ObjectStore>,
        "nowhere",
        TableConfig::default(),
    )
    .await;

    let rows = table.collect(None).await.expect("scan");
    assert!(rows.is_empty());
    assert!(reader.read_files().is_empty());
}

#[tokio::test]
async fn test_contradictory_filter_never_touches_storage() {
    let store = hive_fixture().await;
    let (table, reader) = instrumented_table::<Reading>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let filter = col("value").gt(lit(10)).and(col("value").lt(lit(5)));
    let rows = table.collect(Some(filter)).await.expect("scan");
    assert!(rows.is_empty());
    assert!(reader.read_files().is_empty());
}

#[tokio::test]
async fn test_scan_over_local_filesystem() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        object_store::local::LocalFileSystem::new_with_prefix(dir.path()).expect("local store"),
    );
    put_parquet(
        store.as_ref(),
        "lake/year=2024/part-0.parquet",
        &[value_batch(&[1, 2, 3])],
    )
    .await
    .expect("fixture write");
    put_parquet(
        store.as_ref(),
        "lake/year=2023/part-0.parquet",
        &[value_batch(&[4, 5])],
    )
    .await
    .expect("fixture write");

    let (table, _) = instrumented_table::<YearValue>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let rows = table
        .collect(Some(col("year").eq(lit(2024))))
        .await
        .expect("scan");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.year == 2024));
}

#[tokio::test]
async fn test_repeated_scans_are_served_from_the_blob_cache() {
    let inner = hive_fixture().await;
    let store = Arc::new(CountingStore::new(inner));
    let (table, _) = instrumented_table::<Reading>(
        store.clone() as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let filter = || col("year").eq(lit(2024));
    table.collect(Some(filter())).await.expect("first scan");
    let downloads_after_first = store.downloads();
    assert!(downloads_after_first >= 1);

    table.collect(Some(filter())).await.expect("second scan");
    assert_eq!(store.downloads(), downloads_after_first);
}

#[tokio::test]
async fn test_concurrent_scans_share_one_index_build() {
    let store = Arc::new(InMemory::new());
    put_parquet(
        store.as_ref(),
        "lake/year=2024/events.parquet",
        &[
            event_batch(&["451", "452", "455"], &[1, 2, 3]),
            event_batch(&["461", "462", "471"], &[4, 5, 6]),
        ],
    )
    .await
    .expect("fixture write");
    let (table, reader) = instrumented_table::<Event>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;
    let table = Arc::new(table);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .collect(Some(starts_with("client_id", "46")))
                    .await
                    .expect("scan")
            })
        })
        .collect();
    for handle in handles {
        let rows = handle.await.expect("join");
        assert_eq!(rows.len(), 2);
    }

    // the index build was single-flight across all concurrent scans
    assert_eq!(reader.column_reads(), 1);
}

#[tokio::test]
async fn test_dropping_a_stream_mid_iteration_is_clean() {
    use futures::StreamExt;

    let store = hive_fixture().await;
    let (table, _) = instrumented_table::<Reading>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let mut stream = table.scan(None).expect("scan");
    let first = stream.next().await.expect("one row").expect("row");
    assert_eq!(first.year, 2023);
    drop(stream);

    // the handle is still fully usable afterwards
    let rows = table
        .collect(Some(col("year").eq(lit(2024))))
        .await
        .expect("scan");
    assert_eq!(rows.len(), 100);
}

#[tokio::test]
async fn test_requesting_a_column_absent_from_the_file_fails() {
    use arrow::array::{ArrayRef, RecordBatch, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    let store = Arc::new(InMemory::new());
    // the file publishes no "value" column
    let schema = Arc::new(Schema::new(vec![Field::new("label", DataType::Utf8, false)]));
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef],
    )
    .expect("batch");
    put_parquet(store.as_ref(), "lake/year=2024/data.parquet", &[batch])
        .await
        .expect("fixture write");

    let (table, _) = instrumented_table::<YearValue>(
        store as Arc<dyn ObjectStore>,
        "lake",
        TableConfig::default(),
    )
    .await;

    let result = table.collect(None).await;
    assert!(
        matches!(result, Err(Error::MissingColumn { column, .. }) if column == "value")
    );
}
