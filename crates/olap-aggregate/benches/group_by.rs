use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use olap_aggregate::{
    AggSpec, AggregationOptions, CancellationToken, ColumnSchema, ColumnType, Fragment,
    GroupByQuery, QueryStats, Value,
};
use std::time::Duration;

fn bench_rows() -> usize {
    std::env::var("OLAP_AGGREGATE_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (100_000..=10_000_000).contains(&v))
        .unwrap_or(1_000_000)
}

fn fragments(rows: usize, groups: i64, parts: usize) -> Vec<Fragment> {
    let per_part = rows.div_ceil(parts);
    (0..parts)
        .map(|p| {
            let first = p * per_part;
            let rows = (first..(first + per_part).min(rows))
                .map(|i| {
                    let i = i as i64;
                    vec![Value::Int((i * 7_919) % groups), Value::Int(i % 1_000)]
                })
                .collect();
            Fragment::new(first as u64, rows)
        })
        .collect()
}

fn bench_group_by(c: &mut Criterion) {
    let rows = bench_rows();
    let aggs = [
        AggSpec::count_rows(),
        AggSpec::sum(1),
        AggSpec::avg(1),
        AggSpec::max(1),
    ];

    let mut group = c.benchmark_group("group_by");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements(rows as u64));

    for (label, groups, ranged) in [
        ("dense_1k", 1_000i64, true),
        ("hashed_1k", 1_000, false),
        ("hashed_100k", 100_000, false),
    ] {
        let key = if ranged {
            ColumnSchema::new("k", ColumnType::BigInt).with_range(0, groups - 1)
        } else {
            ColumnSchema::new("k", ColumnType::BigInt)
        };
        let schema = vec![key, ColumnSchema::new("v", ColumnType::Int)];
        let query = GroupByQuery::plan(
            schema,
            &[0],
            &aggs,
            QueryStats::new(rows as u64).with_estimated_groups(groups as u64),
            AggregationOptions::default(),
        )
        .unwrap();
        let input = fragments(rows, groups, 8);

        group.bench_with_input(BenchmarkId::new(label, rows), &input, |b, input| {
            b.iter(|| {
                let result = query
                    .execute(input.clone(), &CancellationToken::new())
                    .unwrap();
                black_box(result);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_group_by);
criterion_main!(benches);
