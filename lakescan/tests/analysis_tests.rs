
use lakescan::analysis::{IndexedConstraint, QueryAnalysis};
use lakescan::error::Error;
use lakescan::expr::{col, lit, starts_with};
use lakescan::metadata::RowType;
use lakescan::scalar::Scalar;
use test_helpers::{Event, Reading, YearRegion, register_row_types};

#[test]
fn test_partition_equality_is_extracted_and_not_residual() {
    register_row_types();
    let filter = col("year").eq(lit(2024));
    let analysis = QueryAnalysis::analyze(Reading::metadata(), Some(&filter)).expect("analyze");

    assert_eq!(analysis.partition_filters.get("year"), Some(&Scalar::Int64(2024)));
    assert!(analysis.residuals.is_empty());
    assert!(analysis.range_filters.is_empty());
}

#[test]
fn test_reversed_comparison_normalizes_operands() {
    register_row_types();
    let filter = lit(2024).eq(col("year")).and(lit(50).lt(col("value")));
    let analysis = QueryAnalysis::analyze(Reading::metadata(), Some(&filter)).expect("analyze");

    assert_eq!(analysis.partition_filters.get("year"), Some(&Scalar::Int64(2024)));
    let range = analysis.range_filters.get("value").expect("range filter");
    assert_eq!(range.min, Some(Scalar::Int64(50)));
    assert!(!range.min_inclusive);
}

#[test]
fn test_range_bounds_conjoin_to_tightest() {
    register_row_types();
    let filter = col("value")
        .gt_eq(lit(50))
        .and(col("value").lt_eq(lit(60)))
        .and(col("value").gt_eq(lit(40)));
    let analysis = QueryAnalysis::analyze(Reading::metadata(), Some(&filter)).expect("analyze");

    let range = analysis.range_filters.get("value").expect("range filter");
    assert_eq!(range.min, Some(Scalar::Int64(50)));
    assert!(range.min_inclusive);
    assert_eq!(range.max, Some(Scalar::Int64(60)));
    assert!(range.max_inclusive);
    // exactness still comes from the per-row evaluation
    assert_eq!(analysis.residuals.len(), 3);
}

#[test]
fn test_contradictory_bounds_short_circuit() {
    register_row_types();
    let filter = col("value").gt(lit(60)).and(col("value").lt(lit(50)));
    let analysis = QueryAnalysis::analyze(Reading::metadata(), Some(&filter)).expect("analyze");
    assert!(analysis.provably_empty);

    let filter = col("value").gt(lit(50)).and(col("value").lt(lit(50)));
    let analysis = QueryAnalysis::analyze(Reading::metadata(), Some(&filter)).expect("analyze");
    assert!(analysis.provably_empty);
}

#[test]
fn test_conflicting_partition_equalities_short_circuit() {
    register_row_types();
    let filter = col("year").eq(lit(2023)).and(col("year").eq(lit(2024)));
    let analysis = QueryAnalysis::analyze(Reading::metadata(), Some(&filter)).expect("analyze");
    assert!(analysis.provably_empty);
}

#[test]
fn test_indexed_constraints_are_emitted() {
    register_row_types();
    let filter = col("client_id")
        .eq(lit("46a"))
        .and(starts_with("client_id", "46"));
    let analysis = QueryAnalysis::analyze(Event::metadata(), Some(&filter)).expect("analyze");

    assert_eq!(analysis.indexed.len(), 2);
    assert!(matches!(
        &analysis.indexed[0],
        IndexedConstraint::Eq { column, value: Scalar::Utf8(v) }
            if column == "client_id" && v == "46a"
    ));
    assert!(matches!(
        &analysis.indexed[1],
        IndexedConstraint::StartsWith { column, prefix }
            if column == "client_id" && prefix == "46"
    ));
}

#[test]
fn test_disjunction_is_residual_only_but_warms_index() {
    register_row_types();
    let filter = col("client_id").eq(lit("a")).or(col("client_id").eq(lit("b")));
    let analysis = QueryAnalysis::analyze(Event::metadata(), Some(&filter)).expect("analyze");

    assert!(analysis.partition_filters.is_empty());
    assert!(analysis.range_filters.is_empty());
    assert_eq!(analysis.residuals.len(), 1);
    assert!(matches!(
        &analysis.indexed[..],
        [IndexedConstraint::AlwaysMatch { column }] if column == "client_id"
    ));
}

#[test]
fn test_starts_with_on_non_string_field_is_rejected() {
    register_row_types();
    let filter = starts_with("value", "4");
    let result = QueryAnalysis::analyze(Reading::metadata(), Some(&filter));
    assert!(matches!(result, Err(Error::SchemaMismatch(_))));
}

#[test]
fn test_unknown_field_is_missing_column() {
    register_row_types();
    let filter = col("nope").eq(lit(1));
    let result = QueryAnalysis::analyze(Reading::metadata(), Some(&filter));
    assert!(matches!(result, Err(Error::MissingColumn { column, .. }) if column == "nope"));
}

#[test]
fn test_partition_only_projection_detection() {
    register_row_types();
    let analysis = QueryAnalysis::analyze(YearRegion::metadata(), None).expect("analyze");
    assert!(analysis.partition_only_projection(YearRegion::metadata()));

    // a data field in the projection forces file reads
    let analysis = QueryAnalysis::analyze(Reading::metadata(), None).expect("analyze");
    assert!(!analysis.partition_only_projection(Reading::metadata()));

    // residuals over partition fields stay answerable from partition
    // metadata alone
    let filter = col("region").not_eq(lit("mars"));
    let analysis =
        QueryAnalysis::analyze(YearRegion::metadata(), Some(&filter)).expect("analyze");
    assert!(analysis.partition_only_projection(YearRegion::metadata()));
}

#[test]
fn test_columns_to_read_is_minimal() {
    register_row_types();
    let filter = col("year").eq(lit(2024)).and(col("value").gt_eq(lit(50)));
    let analysis = QueryAnalysis::analyze(Reading::metadata(), Some(&filter)).expect("analyze");

    let columns: Vec<String> = analysis.columns_to_read(Reading::metadata()).into_iter().collect();
    // partition fields never become physical reads
    assert_eq!(columns, vec!["value".to_string()]);

    let filter = starts_with("client_id", "46");
    let analysis = QueryAnalysis::analyze(Event::metadata(), Some(&filter)).expect("analyze");
    let columns = analysis.columns_to_read(Event::metadata());
    assert!(columns.contains("client_id"));
    assert!(columns.contains("value"));
    assert!(!columns.contains("year"));
}
