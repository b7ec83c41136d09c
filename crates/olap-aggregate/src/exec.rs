#![forbid(unsafe_code)]

use crate::config::AggregationOptions;
use crate::error::{AggError, AggResult};
use crate::key::{GroupKeyEncoder, KeyStrategy, QueryStats};
use crate::layout::{AggSpec, SlotLayout};
use crate::memory::{MemoryBudget, MemoryReservation};
use crate::parallel;
use crate::project::{GroupByResult, OutputProjector};
use crate::reduce::{CancellationToken, ResultReducer};
use crate::table::{PartitionedAggregationTable, SealedPartition, CANCEL_CHECK_INTERVAL};
use crate::types::{ColumnSchema, Value};
use olap_sketch::NdvEstimator;
use smallvec::SmallVec;
use std::sync::Arc;

/// A horizontal slice of the input scanned by one execution unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fragment {
    /// Row id of the first row; ids pick sample values, so fragments must not overlap.
    pub first_row: u64,
    /// Evaluated rows, one value per schema column.
    pub rows: Vec<Vec<Value>>,
}

impl Fragment {
    pub fn new(first_row: u64, rows: Vec<Vec<Value>>) -> Self {
        Self { first_row, rows }
    }
}

/// A planned `SELECT keys, aggs FROM input GROUP BY keys`.
///
/// Planning fixes the slot layout and the key strategy; executing builds one partition per
/// fragment (concurrently when a thread pool is available), reduces them, and projects.
#[derive(Debug)]
pub struct GroupByQuery {
    schema: Vec<ColumnSchema>,
    key_columns: Vec<usize>,
    stats: QueryStats,
    layout: Arc<SlotLayout>,
    encoder: Arc<GroupKeyEncoder>,
    options: AggregationOptions,
    budget: Arc<MemoryBudget>,
}

impl GroupByQuery {
    pub fn plan(
        schema: Vec<ColumnSchema>,
        keys: &[usize],
        aggs: &[AggSpec],
        stats: QueryStats,
        options: AggregationOptions,
    ) -> AggResult<Self> {
        options.validate()?;
        let key_schemas = keys
            .iter()
            .map(|&index| {
                schema.get(index).cloned().ok_or(AggError::UnknownColumn {
                    index,
                    columns: schema.len(),
                })
            })
            .collect::<AggResult<Vec<_>>>()?;
        let layout = Arc::new(SlotLayout::try_new(&schema, aggs, stats.max_rows, &options)?);
        let encoder = Arc::new(GroupKeyEncoder::choose(
            &key_schemas,
            &layout,
            &stats,
            &options,
        )?);
        Ok(Self {
            schema,
            key_columns: keys.to_vec(),
            stats,
            layout,
            encoder,
            options,
            budget: MemoryBudget::new(options.memory_limit_bytes),
        })
    }

    /// Accounts this query's memory against `budget`, e.g. one shared by concurrent queries.
    pub fn with_budget(mut self, budget: Arc<MemoryBudget>) -> Self {
        self.budget = budget;
        self
    }

    pub fn layout(&self) -> &Arc<SlotLayout> {
        &self.layout
    }

    pub fn encoder(&self) -> &Arc<GroupKeyEncoder> {
        &self.encoder
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.encoder.strategy()
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    pub fn execute(
        &self,
        fragments: Vec<Fragment>,
        cancel: &CancellationToken,
    ) -> AggResult<GroupByResult> {
        let encoder = self.sized_encoder(&fragments, cancel)?;
        let partitions = parallel::map_collect(fragments, |fragment| {
            self.build_partition(&encoder, fragment, cancel)
        })
        .into_iter()
        .collect::<AggResult<Vec<_>>>()?;

        let reduced =
            ResultReducer::new(Arc::clone(&self.layout), Arc::clone(&encoder), self.options)
                .reduce(partitions, cancel)?;
        OutputProjector::new(Arc::clone(&self.layout), encoder).project(reduced)
    }

    /// Scans one fragment into a sealed partition.
    pub fn build_partition(
        &self,
        encoder: &Arc<GroupKeyEncoder>,
        fragment: Fragment,
        cancel: &CancellationToken,
    ) -> AggResult<SealedPartition> {
        let mut table = PartitionedAggregationTable::try_new(
            Arc::clone(&self.layout),
            Arc::clone(encoder),
            &self.budget,
            fragment.first_row,
        )?;
        let mut key: SmallVec<[Value; 4]> = SmallVec::new();
        let mut inputs: SmallVec<[Value; 8]> = SmallVec::new();
        for (i, row) in fragment.rows.iter().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(AggError::Cancelled);
            }
            self.check_arity(row)?;
            key.clear();
            key.extend(self.key_columns.iter().map(|&c| row[c].clone()));
            inputs.clear();
            inputs.extend(
                self.layout
                    .targets()
                    .iter()
                    .map(|t| t.column.map_or(Value::Null, |c| row[c].clone())),
            );
            table.upsert_row(fragment.first_row + i as u64, &key, &inputs)?;
        }
        Ok(table.seal())
    }

    fn check_arity(&self, row: &[Value]) -> AggResult<()> {
        if row.len() != self.schema.len() {
            return Err(AggError::ArityMismatch {
                what: "input row",
                expected: self.schema.len(),
                actual: row.len(),
            });
        }
        Ok(())
    }

    /// The encoder the scan will use.
    ///
    /// A dense plan is re-checked when more fragments arrive than the planner was told about,
    /// since every fragment allocates its own bucket array. A hashed plan without a group
    /// estimate is re-sized from linear-counting passes over each fragment's keys.
    fn sized_encoder(
        &self,
        fragments: &[Fragment],
        cancel: &CancellationToken,
    ) -> AggResult<Arc<GroupKeyEncoder>> {
        let mut encoder = Arc::clone(&self.encoder);
        if encoder.strategy() != KeyStrategy::Hashed && fragments.len() > self.stats.partitions {
            let stats = self.stats.with_partitions(fragments.len());
            encoder = Arc::new(GroupKeyEncoder::choose(
                self.encoder.columns(),
                &self.layout,
                &stats,
                &self.options,
            )?);
        }
        if encoder.strategy() != KeyStrategy::Hashed || self.stats.estimated_groups.is_some() {
            return Ok(encoder);
        }

        let rows: u64 = fragments.iter().map(|f| f.rows.len() as u64).sum();
        let bits = GroupKeyEncoder::estimator_bits(rows, &self.options);
        let passes = parallel::map_collect(
            fragments.iter().collect(),
            |fragment: &Fragment| -> AggResult<(NdvEstimator, MemoryReservation)> {
                cancel.check()?;
                let mut reservation = self.budget.reservation();
                reservation.try_grow("group count estimator", bits.max(64).div_ceil(8))?;
                let mut estimator = NdvEstimator::try_new(bits)?;
                for row in &fragment.rows {
                    self.check_arity(row)?;
                }
                encoder.observe_rows(
                    &mut estimator,
                    fragment.rows.iter().map(Vec::as_slice),
                    &self.key_columns,
                )?;
                Ok((estimator, reservation))
            },
        )
        .into_iter()
        .collect::<AggResult<Vec<_>>>()?;

        let (estimators, _reservations): (Vec<_>, Vec<_>) = passes.into_iter().unzip();
        let mut estimators = estimators.into_iter();
        let estimate = match estimators.next() {
            Some(mut merged) => {
                for estimator in estimators {
                    merged.merge(&estimator)?;
                }
                merged.estimate()
            }
            None => Some(1),
        };
        match estimate {
            Some(groups) => log::debug!("estimated {groups} groups with a {bits}-bit bitmap"),
            None => log::warn!("group count estimator saturated at {bits} bits"),
        }
        let groups = estimate.unwrap_or(rows);
        Ok(Arc::new(
            encoder
                .as_ref()
                .clone()
                .with_estimated_groups(groups, &self.options),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;
    use pretty_assertions::assert_eq;

    fn keyed_query(options: AggregationOptions) -> GroupByQuery {
        GroupByQuery::plan(
            vec![ColumnSchema::new("k", ColumnType::BigInt)],
            &[0],
            &[AggSpec::count_rows()],
            QueryStats::unknown(),
            options,
        )
        .unwrap()
    }

    fn distinct_keys(rows: i64, keys: i64, parts: i64) -> Vec<Fragment> {
        let per_part = rows / parts;
        (0..parts)
            .map(|p| {
                let first = p * per_part;
                let rows = (first..first + per_part)
                    .map(|i| vec![Value::Int(i % keys)])
                    .collect();
                Fragment::new(first as u64, rows)
            })
            .collect()
    }

    #[test]
    fn hashed_tables_are_sized_from_merged_fragment_estimates() {
        let query = keyed_query(AggregationOptions::default());
        assert_eq!(query.encoder().initial_capacity(), Some(1 << 20));

        let encoder = query
            .sized_encoder(&distinct_keys(4_000, 50, 4), &CancellationToken::new())
            .unwrap();
        assert_eq!(encoder.initial_capacity(), Some(128));
        assert_eq!(query.budget().used(), 0);
    }

    #[test]
    fn saturated_estimates_fall_back_to_the_row_count() {
        let options = AggregationOptions {
            ndv_estimator_bits: 64,
            ..AggregationOptions::default()
        };
        let query = keyed_query(options);
        let fragments = distinct_keys(5_000, 5_000, 2);

        let encoder = query
            .sized_encoder(&fragments, &CancellationToken::new())
            .unwrap();
        // 5,000 rows at load factor 0.5.
        assert_eq!(encoder.initial_capacity(), Some(16_384));

        let result = query.execute(fragments, &CancellationToken::new()).unwrap();
        assert_eq!(result.row_count(), 5_000);
    }

    #[test]
    fn estimation_honours_cancellation() {
        let query = keyed_query(AggregationOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = query
            .sized_encoder(&distinct_keys(100, 10, 2), &cancel)
            .unwrap_err();
        assert_eq!(err, AggError::Cancelled);
        assert_eq!(query.budget().used(), 0);
    }
}
