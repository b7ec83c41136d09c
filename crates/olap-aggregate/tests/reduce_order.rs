use olap_aggregate::{
    AggSpec, AggregationOptions, CancellationToken, ColumnSchema, ColumnType, GroupByResult,
    GroupKeyEncoder, MemoryBudget, PartitionedAggregationTable, QueryStats, ResultReducer,
    SealedPartition, SlotLayout, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

type Row = (i64, Option<i64>);

struct Plan {
    layout: Arc<SlotLayout>,
    encoder: Arc<GroupKeyEncoder>,
}

fn plan(key: ColumnSchema) -> Plan {
    let schema = vec![ColumnSchema::new("v", ColumnType::BigInt)];
    let options = AggregationOptions::default();
    let aggs = [
        AggSpec::count_rows(),
        AggSpec::sum(0),
        AggSpec::min(0),
        AggSpec::max(0),
        AggSpec::avg(0),
        AggSpec::count_distinct(0),
        AggSpec::sample(0),
        AggSpec::var_p(0),
    ];
    let layout = Arc::new(SlotLayout::try_new(&schema, &aggs, 1 << 20, &options).unwrap());
    let encoder = Arc::new(
        GroupKeyEncoder::choose(&[key], &layout, &QueryStats::new(1 << 20), &options).unwrap(),
    );
    Plan { layout, encoder }
}

fn partitions(plan: &Plan, chunks: &[Vec<Row>]) -> Vec<SealedPartition> {
    let budget = MemoryBudget::unbounded();
    let mut first_row = 0u64;
    chunks
        .iter()
        .map(|rows| {
            let mut table = PartitionedAggregationTable::try_new(
                Arc::clone(&plan.layout),
                Arc::clone(&plan.encoder),
                &budget,
                first_row,
            )
            .unwrap();
            for &(k, v) in rows {
                let v: Value = v.into();
                let inputs = [
                    Value::Null,
                    v.clone(),
                    v.clone(),
                    v.clone(),
                    v.clone(),
                    v.clone(),
                    v.clone(),
                    v,
                ];
                table.upsert(&[Value::Int(k)], &inputs).unwrap();
            }
            first_row += rows.len() as u64;
            table.seal()
        })
        .collect()
}

fn reduce(
    plan: &Plan,
    partitions: Vec<SealedPartition>,
    options: AggregationOptions,
) -> GroupByResult {
    ResultReducer::new(Arc::clone(&plan.layout), Arc::clone(&plan.encoder), options)
        .reduce(partitions, &CancellationToken::new())
        .unwrap()
        .project()
        .unwrap()
}

/// Rows keyed by group; the trailing population variance is returned separately for a
/// tolerance check.
fn by_key(result: &GroupByResult) -> (BTreeMap<i64, Vec<Value>>, BTreeMap<i64, Value>) {
    let mut exact = BTreeMap::new();
    let mut var = BTreeMap::new();
    for mut row in result.to_rows() {
        let Value::Int(k) = row[0] else {
            panic!("unexpected key {:?}", row[0]);
        };
        var.insert(k, row.pop().unwrap());
        exact.insert(k, row[1..].to_vec());
    }
    (exact, var)
}

fn assert_close(left: &BTreeMap<i64, Value>, right: &BTreeMap<i64, Value>) {
    assert_eq!(left.len(), right.len());
    for ((k, a), b) in left.iter().zip(right.values()) {
        match (a, b) {
            (Value::Float(a), Value::Float(b)) => {
                assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "group {k}: {a} vs {b}")
            }
            (a, b) => assert_eq!(a, b, "group {k}"),
        }
    }
}

fn chunk(rows: &[Row], parts: usize) -> Vec<Vec<Row>> {
    let size = rows.len().div_ceil(parts).max(1);
    rows.chunks(size).map(<[Row]>::to_vec).collect()
}

proptest! {
    #[test]
    fn reduction_is_independent_of_partition_order(
        rows in prop::collection::vec((0i64..25, prop::option::of(-1_000i64..1_000)), 1..300),
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
        dense in any::<bool>(),
    ) {
        let key = if dense {
            ColumnSchema::new("k", ColumnType::BigInt).with_range(0, 24)
        } else {
            ColumnSchema::new("k", ColumnType::BigInt)
        };
        let plan = plan(key);
        let mut chunks = chunk(&rows, 4);
        chunks.resize(4, Vec::new());

        let options = AggregationOptions::default();
        let baseline = by_key(&reduce(&plan, partitions(&plan, &chunks), options));

        // Row ids stay attached to their rows; only the order the reducer sees changes.
        let mut shuffled: Vec<Option<SealedPartition>> =
            partitions(&plan, &chunks).into_iter().map(Some).collect();
        let permuted: Vec<SealedPartition> =
            order.iter().filter_map(|&i| shuffled[i].take()).collect();
        let permuted = by_key(&reduce(&plan, permuted, options));

        prop_assert_eq!(&baseline.0, &permuted.0);
        assert_close(&baseline.1, &permuted.1);
    }
}

#[test]
fn sharded_reduction_matches_serial_reduction() {
    let plan = plan(ColumnSchema::new("k", ColumnType::BigInt));
    let rows: Vec<Row> = (0..20_000i64)
        .map(|i| ((i * 7_919) % 3_000, (i % 11 != 0).then_some(i % 1_000 - 500)))
        .collect();
    let chunks = chunk(&rows, 6);

    let serial = AggregationOptions {
        reduce_workers: 1,
        ..AggregationOptions::default()
    };
    let sharded = AggregationOptions {
        reduce_workers: 4,
        parallel_reduce_min_groups: 1,
        ..AggregationOptions::default()
    };

    let reducer = ResultReducer::new(Arc::clone(&plan.layout), Arc::clone(&plan.encoder), sharded);
    let table = reducer
        .reduce(partitions(&plan, &chunks), &CancellationToken::new())
        .unwrap();
    assert_eq!(table.shard_count(), 4);
    assert_eq!(table.len(), 3_000);

    let expected = by_key(&reduce(&plan, partitions(&plan, &chunks), serial));
    let actual = by_key(&table.project().unwrap());
    assert_eq!(actual.0, expected.0);
    assert_close(&actual.1, &expected.1);
}
