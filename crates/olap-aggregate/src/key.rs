#![forbid(unsafe_code)]

use crate::config::AggregationOptions;
use crate::error::{AggError, AggResult};
use crate::layout::SlotLayout;
use crate::types::{ColumnSchema, ColumnType, Value};
use olap_sketch::{hash_bytes, NdvEstimator};
use smallvec::SmallVec;
use std::sync::Arc;

/// Cardinality facts supplied by the statistics collaborator before the scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryStats {
    /// Upper bound on the number of input rows; `u64::MAX` when unknown.
    pub max_rows: u64,
    /// Estimated number of distinct group keys, if known.
    pub estimated_groups: Option<u64>,
    /// Execution units that each build their own partition table.
    pub partitions: usize,
}

impl QueryStats {
    pub fn new(max_rows: u64) -> Self {
        Self {
            max_rows,
            estimated_groups: None,
            partitions: 1,
        }
    }

    pub fn unknown() -> Self {
        Self::new(u64::MAX)
    }

    pub fn with_estimated_groups(mut self, groups: u64) -> Self {
        self.estimated_groups = Some(groups);
        self
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Array-indexed by a mixed-radix combination of column offsets.
    Dense,
    /// Dense without key storage or occupancy bitmap; occupancy is a non-zero `COUNT(*)`.
    KeylessDense,
    /// Linear-probing table over packed key bytes.
    Hashed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DenseColumn {
    min: i64,
    /// Values `min..min + radix - 1`; digit `radix - 1` is NULL.
    radix: u64,
    stride: u64,
}

#[derive(Clone, Debug, PartialEq)]
enum Encoding {
    Dense {
        columns: Vec<DenseColumn>,
        buckets: usize,
        keyless: bool,
    },
    Hashed {
        initial_capacity: usize,
        load_factor: f64,
    },
}

/// Packed group key of a hashed table: a tag byte per column followed by its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedKey {
    pub hash: u64,
    pub bytes: SmallVec<[u8; 32]>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupKey {
    Dense(usize),
    Hashed(PackedKey),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_TEXT: u8 = 4;

/// Maps evaluated GROUP BY values to table keys.
///
/// The strategy is fixed when the encoder is built, once per query and before any row is
/// scanned; every partition table and the reducer share the same encoder.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupKeyEncoder {
    columns: Vec<ColumnSchema>,
    encoding: Encoding,
}

impl GroupKeyEncoder {
    /// Chooses dense or hashed encoding for `key_columns`.
    ///
    /// Dense is used when every key column has a bounded range and the bucket array stays
    /// within `max(dense_min_buckets, max_rows * dense_buckets_per_row)` buckets, and when one
    /// bucket array per partition fits the memory limit; otherwise the keys are hashed.
    pub fn choose(
        key_columns: &[ColumnSchema],
        layout: &SlotLayout,
        stats: &QueryStats,
        options: &AggregationOptions,
    ) -> AggResult<Self> {
        options.validate()?;

        let encoding = match dense_columns(key_columns) {
            Some((columns, buckets)) => {
                let keyless = key_columns.len() == 1 && layout.is_count_rows_only();
                let allowed = dense_bucket_limit(stats.max_rows, options);
                let record_bytes = buckets.saturating_mul(layout.record_size());
                let bitmap_bytes = if keyless { 0 } else { buckets.div_ceil(8) };
                let bytes = record_bytes
                    .saturating_add(bitmap_bytes)
                    .saturating_mul(stats.partitions.max(1));
                if buckets > allowed {
                    log::warn!(
                        "dense group key needs {buckets} buckets (limit {allowed}); hashing keys instead"
                    );
                    hashed(stats, options)
                } else if bytes > options.memory_limit_bytes {
                    log::warn!(
                        "dense group key needs {bytes} bytes over {} partitions (limit {}); hashing keys instead",
                        stats.partitions,
                        options.memory_limit_bytes
                    );
                    hashed(stats, options)
                } else {
                    Encoding::Dense {
                        columns,
                        buckets,
                        keyless,
                    }
                }
            }
            None => hashed(stats, options),
        };

        let encoder = Self {
            columns: key_columns.to_vec(),
            encoding,
        };
        log::debug!(
            "group key strategy {:?} for {} key columns",
            encoder.strategy(),
            key_columns.len()
        );
        Ok(encoder)
    }

    pub fn strategy(&self) -> KeyStrategy {
        match &self.encoding {
            Encoding::Dense { keyless: true, .. } => KeyStrategy::KeylessDense,
            Encoding::Dense { .. } => KeyStrategy::Dense,
            Encoding::Hashed { .. } => KeyStrategy::Hashed,
        }
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Number of buckets of a dense encoding.
    pub fn dense_buckets(&self) -> Option<usize> {
        match &self.encoding {
            Encoding::Dense { buckets, .. } => Some(*buckets),
            Encoding::Hashed { .. } => None,
        }
    }

    pub fn initial_capacity(&self) -> Option<usize> {
        match &self.encoding {
            Encoding::Hashed {
                initial_capacity, ..
            } => Some(*initial_capacity),
            Encoding::Dense { .. } => None,
        }
    }

    /// Occupancy at which hashed tables double their capacity.
    pub fn load_factor(&self) -> f64 {
        match &self.encoding {
            Encoding::Hashed { load_factor, .. } => *load_factor,
            Encoding::Dense { .. } => 1.0,
        }
    }

    /// Re-sizes a hashed encoder's starting capacity from a fresh group estimate.
    pub fn with_estimated_groups(mut self, groups: u64, options: &AggregationOptions) -> Self {
        if let Encoding::Hashed {
            initial_capacity, ..
        } = &mut self.encoding
        {
            let stats = QueryStats::unknown().with_estimated_groups(groups);
            *initial_capacity = self::initial_capacity(&stats, options);
        }
        self
    }

    pub fn encode(&self, values: &[Value]) -> AggResult<GroupKey> {
        if values.len() != self.columns.len() {
            return Err(AggError::ArityMismatch {
                what: "group key",
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        match &self.encoding {
            Encoding::Dense { columns, .. } => {
                let mut index = 0u64;
                for ((schema, column), value) in self.columns.iter().zip(columns).zip(values) {
                    let digit = match dense_value(schema, value)? {
                        None => column.radix - 1,
                        Some(v) => {
                            let max = column.min + (column.radix as i64 - 2);
                            if v < column.min || v > max {
                                return Err(AggError::ValueOutOfRange {
                                    column: schema.name.clone(),
                                    value: v,
                                    min: column.min,
                                    max,
                                });
                            }
                            (v - column.min) as u64
                        }
                    };
                    index += digit * column.stride;
                }
                Ok(GroupKey::Dense(index as usize))
            }
            Encoding::Hashed { .. } => {
                let mut bytes = SmallVec::new();
                for (schema, value) in self.columns.iter().zip(values) {
                    pack_value(schema, value, &mut bytes)?;
                }
                Ok(GroupKey::Hashed(PackedKey {
                    hash: hash_bytes(&bytes),
                    bytes,
                }))
            }
        }
    }

    /// Key values of dense bucket `index`.
    pub fn decode_dense(&self, index: usize) -> AggResult<Vec<Value>> {
        let Encoding::Dense { columns, buckets, .. } = &self.encoding else {
            return Err(AggError::InvalidArgument(
                "dense decode on a hashed key encoding".to_owned(),
            ));
        };
        if index >= *buckets {
            return Err(AggError::InvalidArgument(format!(
                "dense bucket {index} out of range (0..{buckets})"
            )));
        }
        Ok(self
            .columns
            .iter()
            .zip(columns)
            .map(|(schema, column)| {
                let digit = (index as u64 / column.stride) % column.radix;
                if digit == column.radix - 1 {
                    Value::Null
                } else {
                    typed_int(schema.column_type, column.min + digit as i64)
                }
            })
            .collect())
    }

    /// Key values of packed key `bytes`.
    pub fn unpack(&self, bytes: &[u8]) -> AggResult<Vec<Value>> {
        let mut out = Vec::with_capacity(self.columns.len());
        let mut rest = bytes;
        for schema in &self.columns {
            let (&tag, tail) = rest.split_first().ok_or_else(truncated)?;
            rest = tail;
            let value = match tag {
                TAG_NULL => Value::Null,
                TAG_BOOL => {
                    let (&b, tail) = rest.split_first().ok_or_else(truncated)?;
                    rest = tail;
                    Value::Boolean(b != 0)
                }
                TAG_INT => {
                    let (v, tail) = take8(rest)?;
                    rest = tail;
                    typed_int(schema.column_type, i64::from_le_bytes(v))
                }
                TAG_FLOAT => {
                    let (v, tail) = take8(rest)?;
                    rest = tail;
                    Value::Float(f64::from_bits(u64::from_le_bytes(v)))
                }
                TAG_TEXT => {
                    let (len, tail) = take4(rest)?;
                    let len = u32::from_le_bytes(len) as usize;
                    if tail.len() < len {
                        return Err(truncated());
                    }
                    let (text, tail) = tail.split_at(len);
                    rest = tail;
                    let text = std::str::from_utf8(text).map_err(|_| {
                        AggError::InvalidArgument("packed key holds invalid UTF-8".to_owned())
                    })?;
                    Value::Text(Arc::from(text))
                }
                other => {
                    return Err(AggError::InvalidArgument(format!(
                        "unknown packed key tag {other}"
                    )))
                }
            };
            out.push(value);
        }
        Ok(out)
    }

    /// Bits of the linear-counting bitmap used to estimate the groups of `max_rows` rows.
    pub fn estimator_bits(max_rows: u64, options: &AggregationOptions) -> usize {
        if max_rows > options.large_ndv_threshold {
            options.large_ndv_estimator_bits
        } else {
            options.ndv_estimator_bits
        }
    }

    /// Hashes the group key of every row into `estimator`; `key_columns` index into each row.
    ///
    /// Keys are encoded in place from one reused buffer, so nothing per row outlives the call.
    pub fn observe_rows<'a, R>(
        &self,
        estimator: &mut NdvEstimator,
        rows: R,
        key_columns: &[usize],
    ) -> AggResult<()>
    where
        R: IntoIterator<Item = &'a [Value]>,
    {
        let mut key: SmallVec<[Value; 4]> = SmallVec::new();
        for row in rows {
            key.clear();
            for &c in key_columns {
                key.push(row.get(c).cloned().ok_or(AggError::UnknownColumn {
                    index: c,
                    columns: row.len(),
                })?);
            }
            let hash = match self.encode(&key)? {
                GroupKey::Dense(index) => olap_sketch::hash_i64(index as i64),
                GroupKey::Hashed(packed) => packed.hash,
            };
            estimator.insert_hash(hash);
        }
        Ok(())
    }
}

fn truncated() -> AggError {
    AggError::InvalidArgument("truncated packed key".to_owned())
}

fn take8(bytes: &[u8]) -> AggResult<([u8; 8], &[u8])> {
    if bytes.len() < 8 {
        return Err(truncated());
    }
    let (head, tail) = bytes.split_at(8);
    let mut out = [0u8; 8];
    out.copy_from_slice(head);
    Ok((out, tail))
}

fn take4(bytes: &[u8]) -> AggResult<([u8; 4], &[u8])> {
    if bytes.len() < 4 {
        return Err(truncated());
    }
    let (head, tail) = bytes.split_at(4);
    let mut out = [0u8; 4];
    out.copy_from_slice(head);
    Ok((out, tail))
}

fn typed_int(column_type: ColumnType, v: i64) -> Value {
    match column_type {
        ColumnType::Boolean => Value::Boolean(v != 0),
        _ => Value::Int(v),
    }
}

fn dense_columns(key_columns: &[ColumnSchema]) -> Option<(Vec<DenseColumn>, usize)> {
    let mut columns = Vec::with_capacity(key_columns.len());
    let mut buckets: u64 = 1;
    // The last column is the least significant digit.
    for schema in key_columns.iter().rev() {
        let range = schema.bounded_range()?;
        let radix = range.width().checked_add(1)?;
        columns.push(DenseColumn {
            min: range.min,
            radix,
            stride: buckets,
        });
        buckets = buckets.checked_mul(radix)?;
    }
    columns.reverse();
    Some((columns, usize::try_from(buckets).ok()?))
}

fn dense_bucket_limit(max_rows: u64, options: &AggregationOptions) -> usize {
    let per_rows = (max_rows as f64 * options.dense_buckets_per_row).min(usize::MAX as f64);
    options.dense_min_buckets.max(per_rows as usize)
}

fn hashed(stats: &QueryStats, options: &AggregationOptions) -> Encoding {
    Encoding::Hashed {
        initial_capacity: initial_capacity(stats, options),
        load_factor: options.hash_load_factor,
    }
}

fn initial_capacity(stats: &QueryStats, options: &AggregationOptions) -> usize {
    let max = options.max_initial_hash_capacity.max(16);
    let groups = stats.estimated_groups.unwrap_or(stats.max_rows);
    let wanted = (groups as f64 / options.hash_load_factor).ceil();
    if wanted >= max as f64 {
        return max.next_power_of_two();
    }
    (wanted as usize).max(16).next_power_of_two()
}

fn dense_value(schema: &ColumnSchema, value: &Value) -> AggResult<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(_) | Value::Int(_) => Ok(value.as_i64()),
        other => Err(AggError::InvalidArgument(format!(
            "{other} is not a valid key for {} column {}",
            schema.column_type, schema.name
        ))),
    }
}

fn pack_value(
    schema: &ColumnSchema,
    value: &Value,
    out: &mut SmallVec<[u8; 32]>,
) -> AggResult<()> {
    if value.is_null() {
        out.push(TAG_NULL);
        return Ok(());
    }
    let invalid = || {
        AggError::InvalidArgument(format!(
            "{value} is not a valid key for {} column {}",
            schema.column_type, schema.name
        ))
    };
    match schema.column_type {
        ColumnType::Boolean => {
            let v = value.as_i64().ok_or_else(invalid)?;
            out.push(TAG_BOOL);
            out.push((v != 0) as u8);
        }
        ColumnType::Float | ColumnType::Double => {
            let v = value.as_f64().ok_or_else(invalid)?;
            // -0.0 groups with 0.0 and every NaN with every other NaN.
            let v = if v == 0.0 {
                0.0
            } else if v.is_nan() {
                f64::NAN
            } else {
                v
            };
            out.push(TAG_FLOAT);
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        ColumnType::Text => {
            let Value::Text(text) = value else {
                return Err(invalid());
            };
            let len = u32::try_from(text.len()).map_err(|_| invalid())?;
            out.push(TAG_TEXT);
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(text.as_bytes());
        }
        ColumnType::TinyInt
        | ColumnType::SmallInt
        | ColumnType::Int
        | ColumnType::BigInt
        | ColumnType::Dictionary { .. } => {
            let v = value.as_i64().ok_or_else(invalid)?;
            out.push(TAG_INT);
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    Ok(())
}
