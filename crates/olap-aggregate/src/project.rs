#![forbid(unsafe_code)]

use crate::error::{AggError, AggResult};
use crate::key::GroupKeyEncoder;
use crate::layout::SlotLayout;
use crate::record;
use crate::reduce::ReducedTable;
use crate::table::KeyRef;
use crate::types::Value;
use std::sync::Arc;

/// Column-major output of a group-by query: key columns first, then one column per aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupByResult {
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
}

impl GroupByResult {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> &[Vec<Value>] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        let index = self.names.iter().position(|n| n == name)?;
        Some(&self.columns[index])
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        (index < self.row_count()).then(|| self.columns.iter().map(|c| c[index].clone()).collect())
    }

    /// Row-major copy of the result.
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.row_count())
            .map(|i| self.columns.iter().map(|c| c[i].clone()).collect())
            .collect()
    }
}

/// Turns reduced records into output values.
#[derive(Debug)]
pub struct OutputProjector {
    layout: Arc<SlotLayout>,
    encoder: Arc<GroupKeyEncoder>,
}

impl OutputProjector {
    pub fn new(layout: Arc<SlotLayout>, encoder: Arc<GroupKeyEncoder>) -> Self {
        Self { layout, encoder }
    }

    pub fn names(&self) -> Vec<String> {
        self.encoder
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .chain(self.layout.targets().iter().map(|t| t.name.clone()))
            .collect()
    }

    pub fn project(&self, table: ReducedTable) -> AggResult<GroupByResult> {
        if **table.layout() != *self.layout || **table.encoder() != *self.encoder {
            return Err(AggError::LayoutMismatch);
        }
        let key_count = self.encoder.columns().len();
        let targets = self.layout.targets();
        let groups = table.len();
        let mut columns: Vec<Vec<Value>> = (0..key_count + targets.len())
            .map(|_| Vec::with_capacity(groups))
            .collect();

        for shard in &table.shards {
            let arena = shard.arena();
            shard.for_each_group(|key, rec| {
                let values = match key {
                    KeyRef::Dense(bucket) => self.encoder.decode_dense(bucket)?,
                    KeyRef::Packed(bytes) => self.encoder.unpack(bytes)?,
                };
                for (column, value) in columns.iter_mut().zip(values) {
                    column.push(value);
                }
                for (column, target) in columns[key_count..].iter_mut().zip(targets) {
                    column.push(record::finalize(&self.layout, target, rec, arena));
                }
                Ok(())
            })?;
        }

        Ok(GroupByResult {
            names: self.names(),
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationOptions;
    use crate::key::QueryStats;
    use crate::layout::AggSpec;
    use crate::memory::MemoryBudget;
    use crate::reduce::{CancellationToken, ResultReducer};
    use crate::table::PartitionedAggregationTable;
    use crate::types::{ColumnSchema, ColumnType};
    use pretty_assertions::assert_eq;

    #[test]
    fn projects_keys_then_targets() {
        let schema = vec![
            ColumnSchema::new("k", ColumnType::Boolean),
            ColumnSchema::new("v", ColumnType::Int),
        ];
        let options = AggregationOptions::default();
        let aggs = [
            AggSpec::count_rows(),
            AggSpec::sum(1).with_name("total"),
            AggSpec::avg(1),
            AggSpec::count_distinct(1),
        ];
        let layout = Arc::new(SlotLayout::try_new(&schema, &aggs, 10, &options).unwrap());
        let encoder = Arc::new(
            GroupKeyEncoder::choose(&schema[..1], &layout, &QueryStats::new(10), &options)
                .unwrap(),
        );
        let budget = MemoryBudget::unbounded();
        let mut table = PartitionedAggregationTable::try_new(
            Arc::clone(&layout),
            Arc::clone(&encoder),
            &budget,
            0,
        )
        .unwrap();
        let rows = [
            (Value::Boolean(true), Value::Int(4)),
            (Value::Boolean(false), Value::Null),
            (Value::Boolean(true), Value::Int(6)),
            (Value::Null, Value::Int(1)),
        ];
        for (k, v) in rows {
            table
                .upsert(&[k], &[Value::Null, v.clone(), v.clone(), v])
                .unwrap();
        }

        let reduced = ResultReducer::new(layout, encoder, options)
            .reduce(vec![table.seal()], &CancellationToken::new())
            .unwrap();
        let result = reduced.project().unwrap();
        assert_eq!(
            result.names(),
            ["k", "count(*)", "total", "avg(v)", "count distinct(v)"]
        );
        // Dense buckets: false, true, NULL.
        assert_eq!(
            result.to_rows(),
            vec![
                vec![
                    Value::Boolean(false),
                    Value::Int(1),
                    Value::Null,
                    Value::Null,
                    Value::Int(0)
                ],
                vec![
                    Value::Boolean(true),
                    Value::Int(2),
                    Value::Int(10),
                    Value::Float(5.0),
                    Value::Int(2)
                ],
                vec![
                    Value::Null,
                    Value::Int(1),
                    Value::Int(1),
                    Value::Float(1.0),
                    Value::Int(1)
                ],
            ]
        );
        assert_eq!(result.column("total").map(<[Value]>::len), Some(3));
    }
}
