#![forbid(unsafe_code)]

use crate::config::AggregationOptions;
use crate::error::{AggError, AggResult};
use crate::key::{GroupKeyEncoder, KeyStrategy};
use crate::layout::SlotLayout;
use crate::parallel;
use crate::project::{GroupByResult, OutputProjector};
use crate::table::{GroupTable, SealedPartition};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a query's caller and its workers.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> AggResult<()> {
        if self.is_cancelled() {
            return Err(AggError::Cancelled);
        }
        Ok(())
    }
}

/// Merges sealed partition tables into one final table.
///
/// Every combine is associative and commutative, so neither the order of the partitions nor
/// the way hashed keys are sharded across workers changes the result.
#[derive(Debug)]
pub struct ResultReducer {
    layout: Arc<SlotLayout>,
    encoder: Arc<GroupKeyEncoder>,
    options: AggregationOptions,
}

impl ResultReducer {
    pub fn new(
        layout: Arc<SlotLayout>,
        encoder: Arc<GroupKeyEncoder>,
        options: AggregationOptions,
    ) -> Self {
        Self {
            layout,
            encoder,
            options,
        }
    }

    pub fn reduce(
        &self,
        partitions: Vec<SealedPartition>,
        cancel: &CancellationToken,
    ) -> AggResult<ReducedTable> {
        for partition in &partitions {
            let same_layout = Arc::ptr_eq(&partition.layout, &self.layout)
                || *partition.layout == *self.layout;
            let same_keys = Arc::ptr_eq(&partition.encoder, &self.encoder)
                || *partition.encoder == *self.encoder;
            if !(same_layout && same_keys) {
                return Err(AggError::LayoutMismatch);
            }
        }
        cancel.check()?;

        let inputs = partitions.len();
        let total_groups: usize = partitions.iter().map(SealedPartition::len).sum();
        let workers = match self.options.reduce_workers {
            0 => parallel::available_workers(),
            n => n,
        };
        let parallel = self.encoder.strategy() == KeyStrategy::Hashed
            && workers > 1
            && total_groups >= self.options.parallel_reduce_min_groups;

        let tables: Vec<GroupTable> = partitions.into_iter().map(|p| p.groups).collect();
        let shards = if parallel {
            self.reduce_sharded(tables, workers, cancel)?
        } else {
            self.fold(tables, cancel)?.into_iter().collect()
        };

        let reduced = ReducedTable {
            layout: Arc::clone(&self.layout),
            encoder: Arc::clone(&self.encoder),
            shards,
        };
        log::debug!(
            "reduced {inputs} partitions holding {total_groups} groups into {} groups ({} shards)",
            reduced.len(),
            reduced.shards.len()
        );
        Ok(reduced)
    }

    /// Folds `tables` into the largest of them.
    fn fold(
        &self,
        mut tables: Vec<GroupTable>,
        cancel: &CancellationToken,
    ) -> AggResult<Option<GroupTable>> {
        let seed = tables
            .iter()
            .enumerate()
            .max_by_key(|(_, t)| t.len())
            .map(|(i, _)| i);
        let Some(seed) = seed else {
            return Ok(None);
        };
        let mut out = tables.swap_remove(seed);
        for table in tables {
            cancel.check()?;
            out.absorb(&self.layout, table, cancel)?;
        }
        Ok(Some(out))
    }

    fn reduce_sharded(
        &self,
        tables: Vec<GroupTable>,
        shards: usize,
        cancel: &CancellationToken,
    ) -> AggResult<Vec<GroupTable>> {
        let split = parallel::map_collect(tables, |table| {
            cancel.check()?;
            table.split_by_hash(&self.layout, &self.encoder, shards, cancel)
        });

        let mut per_shard: Vec<Vec<GroupTable>> = (0..shards).map(|_| Vec::new()).collect();
        for pieces in split {
            for (shard, piece) in pieces?.into_iter().enumerate() {
                per_shard[shard].push(piece);
            }
        }

        parallel::map_collect(per_shard, |tables| self.fold(tables, cancel))
            .into_iter()
            .filter_map(Result::transpose)
            .collect()
    }
}

/// The consolidated result of a query, before finalization.
///
/// Sharded reductions keep one table per shard; their keys are disjoint, so the final table is
/// their union.
#[derive(Debug)]
pub struct ReducedTable {
    layout: Arc<SlotLayout>,
    encoder: Arc<GroupKeyEncoder>,
    pub(crate) shards: Vec<GroupTable>,
}

impl ReducedTable {
    pub fn len(&self) -> usize {
        self.shards.iter().map(GroupTable::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.encoder.strategy()
    }

    pub fn layout(&self) -> &Arc<SlotLayout> {
        &self.layout
    }

    pub fn encoder(&self) -> &Arc<GroupKeyEncoder> {
        &self.encoder
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.shards.iter().map(GroupTable::reserved_bytes).sum()
    }

    /// Finalizes every group into output values.
    pub fn project(self) -> AggResult<GroupByResult> {
        OutputProjector::new(Arc::clone(&self.layout), Arc::clone(&self.encoder)).project(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::QueryStats;
    use crate::layout::AggSpec;
    use crate::memory::MemoryBudget;
    use crate::table::PartitionedAggregationTable;
    use crate::types::{ColumnSchema, ColumnType, Value};

    fn setup(
        aggs: &[AggSpec],
        row_bound: u64,
    ) -> (Arc<SlotLayout>, Arc<GroupKeyEncoder>, AggregationOptions) {
        let schema = vec![ColumnSchema::new("v", ColumnType::TinyInt)];
        let options = AggregationOptions::default();
        let layout = Arc::new(SlotLayout::try_new(&schema, aggs, row_bound, &options).unwrap());
        let keys = vec![ColumnSchema::new("k", ColumnType::BigInt)];
        let encoder = Arc::new(
            GroupKeyEncoder::choose(&keys, &layout, &QueryStats::new(64), &options).unwrap(),
        );
        (layout, encoder, options)
    }

    #[test]
    fn combine_overflow_surfaces_from_reduce() {
        let (layout, encoder, options) = setup(&[AggSpec::sum(0)], 1);
        let budget = MemoryBudget::unbounded();
        let partitions = (0..2)
            .map(|i| {
                let mut table = PartitionedAggregationTable::try_new(
                    Arc::clone(&layout),
                    Arc::clone(&encoder),
                    &budget,
                    i * 10,
                )
                .unwrap();
                table.upsert(&[Value::Int(1)], &[Value::Int(100)]).unwrap();
                table.seal()
            })
            .collect();
        let err = ResultReducer::new(layout, encoder, options)
            .reduce(partitions, &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_overflow(), "unexpected {err:?}");
    }

    #[test]
    fn foreign_layouts_are_rejected() {
        let (layout, encoder, options) = setup(&[AggSpec::sum(0)], 100);
        let (other_layout, _, _) = setup(&[AggSpec::max(0)], 100);
        let budget = MemoryBudget::unbounded();
        let foreign =
            PartitionedAggregationTable::try_new(other_layout, Arc::clone(&encoder), &budget, 0)
                .unwrap()
                .seal();
        let err = ResultReducer::new(layout, encoder, options)
            .reduce(vec![foreign], &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err, AggError::LayoutMismatch);
    }

    #[test]
    fn cancellation_discards_partial_state() {
        let (layout, encoder, options) = setup(&[AggSpec::count_rows()], 100);
        let budget = MemoryBudget::unbounded();
        let mut table =
            PartitionedAggregationTable::try_new(Arc::clone(&layout), Arc::clone(&encoder), &budget, 0)
                .unwrap();
        table.upsert(&[Value::Int(1)], &[Value::Null]).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ResultReducer::new(layout, encoder, options)
            .reduce(vec![table.seal()], &cancel)
            .unwrap_err();
        assert_eq!(err, AggError::Cancelled);
        assert_eq!(budget.used(), 0);
    }
}
