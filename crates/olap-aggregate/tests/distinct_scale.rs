use olap_aggregate::{
    AggSpec, AggregationOptions, CancellationToken, ColumnSchema, ColumnType, Fragment,
    GroupByQuery, QueryStats, TargetKind, Value,
};

const ROWS: i64 = 1_000_000;

fn count_distinct(column: ColumnSchema, expected_kind: fn(&TargetKind) -> bool) -> Value {
    let query = GroupByQuery::plan(
        vec![column],
        &[],
        &[AggSpec::count_distinct(0)],
        QueryStats::new(ROWS as u64),
        AggregationOptions::default(),
    )
    .unwrap();
    let kind = query.layout().targets()[0].kind;
    assert!(expected_kind(&kind), "unexpected strategy {kind:?}");

    let per_fragment = ROWS / 8;
    let fragments = (0..8)
        .map(|f| {
            let first = f * per_fragment;
            // Spread values so every fragment sees a different slice of the domain.
            let rows = (first..first + per_fragment)
                .map(|i| vec![Value::Int((i * 7_919) % ROWS)])
                .collect();
            Fragment::new(first as u64, rows)
        })
        .collect();
    let result = query
        .execute(fragments, &CancellationToken::new())
        .unwrap();
    assert_eq!(result.row_count(), 1);
    result.columns()[0][0].clone()
}

#[test]
fn one_million_unique_values_with_a_bitmap() {
    let column = ColumnSchema::new("v1", ColumnType::BigInt).with_range(0, ROWS - 1);
    let count = count_distinct(column, |k| matches!(k, TargetKind::DistinctBitmap { .. }));
    assert_eq!(count, Value::Int(ROWS));
}

#[test]
fn one_million_unique_values_without_statistics() {
    let column = ColumnSchema::new("v1", ColumnType::BigInt);
    let count = count_distinct(column, |k| matches!(k, TargetKind::DistinctSet));
    assert_eq!(count, Value::Int(ROWS));
}
