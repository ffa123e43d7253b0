
use arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use lakescan::analysis::IndexedConstraint;
use lakescan::error::Error;
use lakescan::expr::Operator;
use lakescan::index::IndexedColumnEngine;
use lakescan::metadata::RowType;
use lakescan::partition::ParquetFile;
use lakescan::reader::{ObjectStoreParquetReader, ParquetReader};
use lakescan::scalar::Scalar;
use lakescan::store::blob_cache::{BlobCache, BlobCacheConfig};
use object_store::memory::InMemory;
use std::collections::BTreeSet;
use std::sync::Arc;
use test_helpers::{CountingReader, Event, event_batch, put_parquet, register_row_types};

async fn engine_over(
    batches: &[RecordBatch],
) -> (IndexedColumnEngine, Arc<CountingReader>, ParquetFile) {
    register_row_types();
    let store = Arc::new(InMemory::new());
    put_parquet(store.as_ref(), "lake/events.parquet", batches)
        .await
        .expect("fixture write");
    let blob_cache = Arc::new(BlobCache::new(store, BlobCacheConfig::default()));
    let reader = Arc::new(CountingReader::new(Arc::new(ObjectStoreParquetReader::new(
        blob_cache,
    ))));
    let engine = IndexedColumnEngine::new(reader.clone() as Arc<dyn ParquetReader>);
    (engine, reader, ParquetFile::new("lake/events.parquet"))
}

fn set(groups: &[usize]) -> Option<BTreeSet<usize>> {
    Some(groups.iter().copied().collect())
}

#[tokio::test]
async fn test_equality_narrows_to_containing_row_group() {
    let (engine, _reader, file) = engine_over(&[
        event_batch(&["451", "455", "46a"], &[1, 2, 3]),
        event_batch(&["470", "471"], &[4, 5]),
    ])
    .await;

    let constraint = IndexedConstraint::Eq {
        column: "client_id".to_string(),
        value: Scalar::Utf8("455".to_string()),
    };
    let allowed = engine
        .allowed_row_groups(&file, &[constraint], Event::metadata())
        .await
        .expect("allowed");
    assert_eq!(allowed, set(&[0]));
}

#[tokio::test]
async fn test_prefix_constraint_uses_sorted_bounds() {
    let (engine, _reader, file) = engine_over(&[
        event_batch(&["451", "455", "46a"], &[1, 2, 3]),
        event_batch(&["470", "471"], &[4, 5]),
    ])
    .await;

    let for_prefix = |prefix: &str| IndexedConstraint::StartsWith {
        column: "client_id".to_string(),
        prefix: prefix.to_string(),
    };

    let allowed = engine
        .allowed_row_groups(&file, &[for_prefix("46")], Event::metadata())
        .await
        .expect("allowed");
    assert_eq!(allowed, set(&[0]));

    let allowed = engine
        .allowed_row_groups(&file, &[for_prefix("47")], Event::metadata())
        .await
        .expect("allowed");
    assert_eq!(allowed, set(&[1]));

    // the empty prefix matches everything
    let allowed = engine
        .allowed_row_groups(&file, &[for_prefix("")], Event::metadata())
        .await
        .expect("allowed");
    assert_eq!(allowed, set(&[0, 1]));
}

#[tokio::test]
async fn test_comparison_constraint_against_group_bounds() {
    let (engine, _reader, file) = engine_over(&[
        event_batch(&["451", "455", "46a"], &[1, 2, 3]),
        event_batch(&["470", "471"], &[4, 5]),
    ])
    .await;

    let constraint = IndexedConstraint::Cmp {
        column: "client_id".to_string(),
        op: Operator::Gt,
        value: Scalar::Utf8("46z".to_string()),
    };
    let allowed = engine
        .allowed_row_groups(&file, &[constraint], Event::metadata())
        .await
        .expect("allowed");
    assert_eq!(allowed, set(&[1]));
}

#[tokio::test]
async fn test_not_equals_prunes_constant_groups() {
    let (engine, _reader, file) = engine_over(&[
        event_batch(&["455", "455", "455"], &[1, 2, 3]),
        event_batch(&["455", "470"], &[4, 5]),
    ])
    .await;

    let constraint = IndexedConstraint::NotEq {
        column: "client_id".to_string(),
        value: Scalar::Utf8("455".to_string()),
    };
    let allowed = engine
        .allowed_row_groups(&file, &[constraint], Event::metadata())
        .await
        .expect("allowed");
    assert_eq!(allowed, set(&[1]));
}

#[tokio::test]
async fn test_constraints_intersect() {
    let (engine, _reader, file) = engine_over(&[
        event_batch(&["451", "455", "46a"], &[1, 2, 3]),
        event_batch(&["470", "471"], &[4, 5]),
    ])
    .await;

    let constraints = vec![
        IndexedConstraint::StartsWith {
            column: "client_id".to_string(),
            prefix: "4".to_string(),
        },
        IndexedConstraint::Eq {
            column: "client_id".to_string(),
            value: Scalar::Utf8("470".to_string()),
        },
    ];
    let allowed = engine
        .allowed_row_groups(&file, &constraints, Event::metadata())
        .await
        .expect("allowed");
    assert_eq!(allowed, set(&[1]));
}

#[tokio::test]
async fn test_no_constraints_means_all_groups() {
    let (engine, reader, file) = engine_over(&[event_batch(&["451"], &[1])]).await;
    let allowed = engine
        .allowed_row_groups(&file, &[], Event::metadata())
        .await
        .expect("allowed");
    assert_eq!(allowed, None);
    assert_eq!(reader.column_reads(), 0);
}

#[tokio::test]
async fn test_index_is_built_once_per_file_and_column() {
    let (engine, reader, file) = engine_over(&[
        event_batch(&["451", "455", "46a"], &[1, 2, 3]),
        event_batch(&["470", "471"], &[4, 5]),
    ])
    .await;

    let constraint = || IndexedConstraint::StartsWith {
        column: "client_id".to_string(),
        prefix: "46".to_string(),
    };
    engine
        .allowed_row_groups(&file, &[constraint()], Event::metadata())
        .await
        .expect("first query");
    assert_eq!(reader.column_reads(), 1);

    engine
        .allowed_row_groups(&file, &[constraint()], Event::metadata())
        .await
        .expect("second query");
    assert_eq!(reader.column_reads(), 1);

    engine.clear_cache();
    engine
        .allowed_row_groups(&file, &[constraint()], Event::metadata())
        .await
        .expect("after clear");
    assert_eq!(reader.column_reads(), 2);
}

#[tokio::test]
async fn test_null_in_non_nullable_indexed_column_is_fatal() {
    register_row_types();
    let store = Arc::new(InMemory::new());
    let schema = Arc::new(Schema::new(vec![
        Field::new("client_id", DataType::Utf8, true),
        Field::new("value", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(vec![Some("451"), None])) as ArrayRef,
            Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
        ],
    )
    .expect("batch");
    put_parquet(store.as_ref(), "lake/events.parquet", &[batch])
        .await
        .expect("fixture write");
    let blob_cache = Arc::new(BlobCache::new(store, BlobCacheConfig::default()));
    let reader: Arc<dyn ParquetReader> = Arc::new(ObjectStoreParquetReader::new(blob_cache));
    let engine = IndexedColumnEngine::new(reader);

    let constraint = IndexedConstraint::Eq {
        column: "client_id".to_string(),
        value: Scalar::Utf8("451".to_string()),
    };
    let result = engine
        .allowed_row_groups(
            &ParquetFile::new("lake/events.parquet"),
            &[constraint],
            Event::metadata(),
        )
        .await;
    assert!(matches!(result, Err(Error::SchemaMismatch(_))));
}
