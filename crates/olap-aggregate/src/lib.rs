//! Group-by hash aggregation and result reduction.
//!
//! A query is planned once ([`GroupByQuery::plan`]): the aggregate list becomes a fixed
//! [`SlotLayout`] and the key columns a [`GroupKeyEncoder`] with a dense or hashed strategy.
//! Each execution unit then fills its own [`PartitionedAggregationTable`]; the
//! [`ResultReducer`] folds the sealed partitions together (sharded by key hash when the result
//! is large) and the [`OutputProjector`] finalizes every group into output values.
//!
//! All memory held by group records and variable-size accumulators is charged to a
//! [`MemoryBudget`]; exceeding it fails the query with
//! [`AggError::InsufficientResources`] rather than aborting.

#![forbid(unsafe_code)]

mod config;
mod error;
mod exec;
mod key;
mod layout;
mod memory;
mod parallel;
mod project;
mod record;
mod reduce;
mod table;
mod types;

pub use crate::config::{AggregationOptions, QuantileOptions};
pub use crate::error::{AggError, AggResult};
pub use crate::exec::{Fragment, GroupByQuery};
pub use crate::key::{GroupKey, GroupKeyEncoder, KeyStrategy, PackedKey, QueryStats};
pub use crate::layout::{
    AggKind, AggSpec, SlotDesc, SlotInit, SlotLayout, SlotType, SlotWidth, Target, TargetKind,
};
pub use crate::memory::{MemoryBudget, MemoryReservation};
pub use crate::project::{GroupByResult, OutputProjector};
pub use crate::reduce::{CancellationToken, ReducedTable, ResultReducer};
pub use crate::table::{PartitionedAggregationTable, SealedPartition};
pub use crate::types::{ColumnSchema, ColumnType, Value, ValueRange};
