#![forbid(unsafe_code)]

//! Per-query accumulator layout.
//!
//! Every group owns one fixed-size record. A [`SlotLayout`] describes where each aggregate's
//! accumulator slots live in that record, how wide they are, and how they combine. It is
//! computed once per query, before any row is scanned, and shared read-only by every execution
//! unit and by the reducer.

use crate::config::{AggregationOptions, QuantileOptions};
use crate::error::{AggError, AggResult};
use crate::types::{ColumnSchema, ColumnType, ValueRange};
use olap_sketch::{DistinctBitmap, HyperLogLog};
use std::ops::Range;

/// The aggregate function requested by the planner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AggKind {
    /// `COUNT(*)`
    CountRows,
    /// `COUNT(x)`: counts non-null inputs.
    CountNonNull,
    Sum,
    Min,
    Max,
    Avg,
    /// Sample variance.
    Var,
    /// Population variance.
    VarP,
    StdDev,
    StdDevP,
    CountDistinct,
    /// `APPROX_COUNT_DISTINCT(x[, relative_error])`
    ApproxCountDistinct { relative_error: Option<f64> },
    /// Any one value of the group.
    Sample,
    /// `APPROX_QUANTILE(x, q)`
    ApproxQuantile { q: f64 },
}

impl AggKind {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggKind::CountRows | AggKind::CountNonNull => "COUNT",
            AggKind::Sum => "SUM",
            AggKind::Min => "MIN",
            AggKind::Max => "MAX",
            AggKind::Avg => "AVG",
            AggKind::Var => "VAR_SAMP",
            AggKind::VarP => "VAR_POP",
            AggKind::StdDev => "STDDEV_SAMP",
            AggKind::StdDevP => "STDDEV_POP",
            AggKind::CountDistinct => "COUNT DISTINCT",
            AggKind::ApproxCountDistinct { .. } => "APPROX_COUNT_DISTINCT",
            AggKind::Sample => "SAMPLE",
            AggKind::ApproxQuantile { .. } => "APPROX_QUANTILE",
        }
    }
}

/// One aggregate of the query's select list.
#[derive(Clone, Debug, PartialEq)]
pub struct AggSpec {
    pub kind: AggKind,
    /// Index of the input column; `None` only for `COUNT(*)`.
    pub column: Option<usize>,
    pub name: Option<String>,
}

impl AggSpec {
    fn on(kind: AggKind, column: usize) -> Self {
        Self {
            kind,
            column: Some(column),
            name: None,
        }
    }

    pub fn count_rows() -> Self {
        Self {
            kind: AggKind::CountRows,
            column: None,
            name: None,
        }
    }

    pub fn count_non_null(column: usize) -> Self {
        Self::on(AggKind::CountNonNull, column)
    }

    pub fn sum(column: usize) -> Self {
        Self::on(AggKind::Sum, column)
    }

    pub fn min(column: usize) -> Self {
        Self::on(AggKind::Min, column)
    }

    pub fn max(column: usize) -> Self {
        Self::on(AggKind::Max, column)
    }

    pub fn avg(column: usize) -> Self {
        Self::on(AggKind::Avg, column)
    }

    pub fn var(column: usize) -> Self {
        Self::on(AggKind::Var, column)
    }

    pub fn var_p(column: usize) -> Self {
        Self::on(AggKind::VarP, column)
    }

    pub fn std_dev(column: usize) -> Self {
        Self::on(AggKind::StdDev, column)
    }

    pub fn std_dev_p(column: usize) -> Self {
        Self::on(AggKind::StdDevP, column)
    }

    pub fn count_distinct(column: usize) -> Self {
        Self::on(AggKind::CountDistinct, column)
    }

    pub fn approx_count_distinct(column: usize) -> Self {
        Self::on(
            AggKind::ApproxCountDistinct {
                relative_error: None,
            },
            column,
        )
    }

    pub fn approx_count_distinct_with_error(column: usize, relative_error: f64) -> Self {
        Self::on(
            AggKind::ApproxCountDistinct {
                relative_error: Some(relative_error),
            },
            column,
        )
    }

    pub fn sample(column: usize) -> Self {
        Self::on(AggKind::Sample, column)
    }

    pub fn approx_quantile(column: usize, q: f64) -> Self {
        Self::on(AggKind::ApproxQuantile { q }, column)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Width of a fixed integer slot. The minimum value of each width is reserved as "no value".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotWidth {
    W1,
    W2,
    W4,
    W8,
}

impl SlotWidth {
    pub fn bytes(self) -> usize {
        match self {
            SlotWidth::W1 => 1,
            SlotWidth::W2 => 2,
            SlotWidth::W4 => 4,
            SlotWidth::W8 => 8,
        }
    }

    /// Largest storable value; the legitimate range is `-max..=max`.
    pub fn max_value(self) -> i64 {
        match self {
            SlotWidth::W1 => i8::MAX as i64,
            SlotWidth::W2 => i16::MAX as i64,
            SlotWidth::W4 => i32::MAX as i64,
            SlotWidth::W8 => i64::MAX,
        }
    }

    pub fn sentinel(self) -> i64 {
        match self {
            SlotWidth::W1 => i8::MIN as i64,
            SlotWidth::W2 => i16::MIN as i64,
            SlotWidth::W4 => i32::MIN as i64,
            SlotWidth::W8 => i64::MIN,
        }
    }

    pub fn fits(self, v: i64) -> bool {
        v != self.sentinel() && v.unsigned_abs() <= self.max_value() as u64
    }

    /// Narrowest width whose range holds every value of magnitude up to `magnitude`.
    pub fn for_magnitude(magnitude: u64) -> Option<SlotWidth> {
        [SlotWidth::W1, SlotWidth::W2, SlotWidth::W4, SlotWidth::W8]
            .into_iter()
            .find(|w| magnitude <= w.max_value() as u64)
    }

    fn of_type(column_type: ColumnType) -> SlotWidth {
        match column_type {
            ColumnType::Boolean | ColumnType::TinyInt => SlotWidth::W1,
            ColumnType::SmallInt => SlotWidth::W2,
            ColumnType::Int => SlotWidth::W4,
            ColumnType::Dictionary { size } => {
                SlotWidth::for_magnitude(size as u64).unwrap_or(SlotWidth::W8)
            }
            _ => SlotWidth::W8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotType {
    Int(SlotWidth),
    /// `f32`; a signalling-NaN payload marks "no value".
    F32,
    /// `f64`; a signalling-NaN payload marks "no value".
    F64,
    /// Index of a variable-size accumulator in the table's block arena.
    Handle,
}

impl SlotType {
    pub fn bytes(self) -> usize {
        match self {
            SlotType::Int(w) => w.bytes(),
            SlotType::F32 => 4,
            SlotType::F64 | SlotType::Handle => 8,
        }
    }
}

/// How a slot starts out in a fresh record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotInit {
    /// The type's "no value" pattern.
    Empty,
    Zero,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDesc {
    pub offset: usize,
    pub ty: SlotType,
    pub init: SlotInit,
}

/// Update/combine/finalize semantics of one target.
///
/// Slot usage, relative to the target's first slot:
/// - `Count`, `Sum`, `Min`, `Max`: one value slot.
/// - `Avg`: running sum, running count.
/// - `Variance`: count, mean, sum of squared deviations (M2).
/// - all others: one block handle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetKind {
    Count { count_nulls: bool },
    Sum,
    Min,
    Max,
    Avg,
    Variance { sample: bool, sqrt: bool },
    DistinctBitmap { min: i64, bits: usize },
    DistinctSet,
    ApproxDistinctHll { precision: u8 },
    Sample,
    ApproxQuantile { q: f64 },
}

impl TargetKind {
    fn slot_count(&self) -> usize {
        match self {
            TargetKind::Avg => 2,
            TargetKind::Variance { .. } => 3,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,
    pub column: Option<usize>,
    pub input_type: Option<ColumnType>,
    first_slot: usize,
}

impl Target {
    pub fn slots(&self) -> Range<usize> {
        self.first_slot..self.first_slot + self.kind.slot_count()
    }

    pub(crate) fn first_slot(&self) -> usize {
        self.first_slot
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SlotLayout {
    targets: Vec<Target>,
    slots: Vec<SlotDesc>,
    record_size: usize,
    init_record: Vec<u8>,
    sample_row_slot: Option<usize>,
    quantile: QuantileOptions,
}

impl SlotLayout {
    /// Builds the layout for `aggs` over `schema`, checking every type rule up front.
    ///
    /// `row_bound` is an upper bound on the number of rows the whole query can feed into a
    /// single group; it drives the width of integer sums and counts.
    pub fn try_new(
        schema: &[ColumnSchema],
        aggs: &[AggSpec],
        row_bound: u64,
        options: &AggregationOptions,
    ) -> AggResult<Self> {
        let mut builder = LayoutBuilder::default();
        let mut targets = Vec::with_capacity(aggs.len());

        for spec in aggs {
            let (kind, column) = resolve(schema, spec, options)?;
            let input_type = column.map(|c| c.column_type);
            let first_slot = builder.slots.len();
            match kind {
                TargetKind::Count { .. } => {
                    builder.push(SlotType::Int(count_width(row_bound)), SlotInit::Zero);
                }
                TargetKind::Sum => builder.push(sum_slot(column, row_bound), SlotInit::Empty),
                TargetKind::Min | TargetKind::Max => {
                    builder.push(value_slot(column), SlotInit::Empty);
                }
                TargetKind::Avg => {
                    builder.push(sum_slot(column, row_bound), SlotInit::Empty);
                    builder.push(SlotType::Int(count_width(row_bound)), SlotInit::Zero);
                }
                TargetKind::Variance { .. } => {
                    builder.push(SlotType::Int(SlotWidth::W8), SlotInit::Zero);
                    builder.push(SlotType::F64, SlotInit::Zero);
                    builder.push(SlotType::F64, SlotInit::Zero);
                }
                TargetKind::DistinctBitmap { .. }
                | TargetKind::DistinctSet
                | TargetKind::ApproxDistinctHll { .. }
                | TargetKind::Sample
                | TargetKind::ApproxQuantile { .. } => {
                    builder.push(SlotType::Handle, SlotInit::Empty);
                }
            }
            targets.push(Target {
                name: spec
                    .name
                    .clone()
                    .unwrap_or_else(|| default_name(spec, column)),
                kind,
                column: spec.column,
                input_type,
                first_slot,
            });
        }

        // Every sample target of a group is taken from the row with the smallest id seen so far.
        let sample_row_slot = targets
            .iter()
            .any(|t| t.kind == TargetKind::Sample)
            .then(|| {
                let slot = builder.slots.len();
                builder.push(SlotType::Int(SlotWidth::W8), SlotInit::Empty);
                slot
            });

        let init_record = builder.init_record();
        log::debug!(
            "aggregate layout: {} targets, {} slots, {} byte records",
            targets.len(),
            builder.slots.len(),
            builder.offset
        );
        Ok(Self {
            targets,
            slots: builder.slots,
            record_size: builder.offset,
            init_record,
            sample_row_slot,
            quantile: options.quantile,
        })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn slots(&self) -> &[SlotDesc] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> SlotDesc {
        self.slots[index]
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// A record with every slot at its initial value.
    pub fn init_record(&self) -> &[u8] {
        &self.init_record
    }

    pub fn sample_row_slot(&self) -> Option<usize> {
        self.sample_row_slot
    }

    pub fn quantile_options(&self) -> QuantileOptions {
        self.quantile
    }

    /// Whether the only aggregate is `COUNT(*)`; such queries can use keyless dense tables.
    pub fn is_count_rows_only(&self) -> bool {
        matches!(
            self.targets.as_slice(),
            [Target {
                kind: TargetKind::Count { count_nulls: true },
                ..
            }]
        )
    }
}

#[derive(Default)]
struct LayoutBuilder {
    slots: Vec<SlotDesc>,
    offset: usize,
}

impl LayoutBuilder {
    fn push(&mut self, ty: SlotType, init: SlotInit) {
        self.slots.push(SlotDesc {
            offset: self.offset,
            ty,
            init,
        });
        self.offset += ty.bytes();
    }

    fn init_record(&self) -> Vec<u8> {
        let mut record = vec![0u8; self.offset];
        for slot in &self.slots {
            crate::record::init_slot(&mut record, *slot);
        }
        record
    }
}

fn resolve<'a>(
    schema: &'a [ColumnSchema],
    spec: &AggSpec,
    options: &AggregationOptions,
) -> AggResult<(TargetKind, Option<&'a ColumnSchema>)> {
    let column = match (spec.kind, spec.column) {
        (AggKind::CountRows, _) => None,
        (_, None) => {
            return Err(AggError::InvalidArgument(format!(
                "{} requires an input column",
                spec.kind.sql_name()
            )))
        }
        (_, Some(index)) => Some(schema.get(index).ok_or(AggError::UnknownColumn {
            index,
            columns: schema.len(),
        })?),
    };
    let unsupported = |column: &ColumnSchema| AggError::UnsupportedType {
        aggregate: spec.kind.sql_name(),
        column: column.name.clone(),
        column_type: column.column_type,
    };
    let require_numeric = |column: Option<&ColumnSchema>| match column {
        Some(c) if c.column_type.is_numeric() => Ok(()),
        Some(c) => Err(unsupported(c)),
        None => Ok(()),
    };

    let kind = match spec.kind {
        AggKind::CountRows => TargetKind::Count { count_nulls: true },
        AggKind::CountNonNull => TargetKind::Count { count_nulls: false },
        AggKind::Sum => {
            require_numeric(column)?;
            TargetKind::Sum
        }
        AggKind::Avg => {
            require_numeric(column)?;
            TargetKind::Avg
        }
        AggKind::Min | AggKind::Max => {
            if let Some(c) = column {
                if !(c.column_type.is_numeric() || c.column_type == ColumnType::Boolean) {
                    return Err(unsupported(c));
                }
            }
            if spec.kind == AggKind::Min {
                TargetKind::Min
            } else {
                TargetKind::Max
            }
        }
        AggKind::Var | AggKind::VarP | AggKind::StdDev | AggKind::StdDevP => {
            require_numeric(column)?;
            TargetKind::Variance {
                sample: matches!(spec.kind, AggKind::Var | AggKind::StdDev),
                sqrt: matches!(spec.kind, AggKind::StdDev | AggKind::StdDevP),
            }
        }
        AggKind::CountDistinct => match column {
            Some(c) if c.column_type.is_integer_like() => distinct_strategy(c, options),
            Some(c) => return Err(unsupported(c)),
            None => TargetKind::DistinctSet,
        },
        AggKind::ApproxCountDistinct { relative_error } => {
            let precision = match relative_error {
                Some(err) if !(err > 0.0 && err < 1.0) => {
                    return Err(AggError::InvalidArgument(format!(
                        "APPROX_COUNT_DISTINCT error rate must lie in (0, 1), got {err}"
                    )))
                }
                Some(err) => HyperLogLog::precision_for_error(err),
                None => options.hll_precision,
            };
            TargetKind::ApproxDistinctHll { precision }
        }
        AggKind::Sample => TargetKind::Sample,
        AggKind::ApproxQuantile { q } => {
            require_numeric(column)?;
            if !(0.0..=1.0).contains(&q) {
                return Err(AggError::InvalidArgument(format!(
                    "APPROX_QUANTILE fraction must lie in [0, 1], got {q}"
                )));
            }
            TargetKind::ApproxQuantile { q }
        }
    };
    Ok((kind, column))
}

fn distinct_strategy(column: &ColumnSchema, options: &AggregationOptions) -> TargetKind {
    let Some(range) = column.bounded_range() else {
        log::debug!(
            "COUNT DISTINCT on {}: no range statistics, using an exact hash set",
            column.name
        );
        return TargetKind::DistinctSet;
    };
    let bits = DistinctBitmap::domain_bits(range.min, range.max);
    if bits > options.max_bitmap_bits {
        log::warn!(
            "COUNT DISTINCT on {}: range [{}, {}] needs {bits} bitmap bits (limit {}), using an exact hash set",
            column.name,
            range.min,
            range.max,
            options.max_bitmap_bits
        );
        return TargetKind::DistinctSet;
    }
    TargetKind::DistinctBitmap {
        min: range.min,
        bits,
    }
}

fn count_width(row_bound: u64) -> SlotWidth {
    SlotWidth::for_magnitude(row_bound).unwrap_or(SlotWidth::W8)
}

fn input_range(column: &ColumnSchema) -> Option<ValueRange> {
    column
        .range
        .map(|r| match column.column_type.domain() {
            Some(domain) => r.intersect(&domain),
            None => r,
        })
        .or_else(|| column.column_type.domain())
}

fn sum_slot(column: Option<&ColumnSchema>, row_bound: u64) -> SlotType {
    match column {
        Some(c) if c.column_type.is_float() => SlotType::F64,
        Some(c) => {
            let magnitude = input_range(c)
                .map(|r| r.max_abs())
                .unwrap_or(i64::MAX as u64);
            let width = magnitude
                .checked_mul(row_bound.max(1))
                .and_then(SlotWidth::for_magnitude)
                .unwrap_or(SlotWidth::W8);
            SlotType::Int(width)
        }
        None => SlotType::Int(SlotWidth::W8),
    }
}

fn value_slot(column: Option<&ColumnSchema>) -> SlotType {
    match column.map(|c| c.column_type) {
        Some(ColumnType::Float) => SlotType::F32,
        Some(ColumnType::Double) => SlotType::F64,
        Some(t) => SlotType::Int(SlotWidth::of_type(t)),
        None => SlotType::Int(SlotWidth::W8),
    }
}

fn default_name(spec: &AggSpec, column: Option<&ColumnSchema>) -> String {
    match (spec.kind, column) {
        (AggKind::CountRows, _) => "count(*)".to_owned(),
        (AggKind::ApproxQuantile { q }, Some(c)) => format!("approx_quantile({}, {q})", c.name),
        (kind, Some(c)) => format!("{}({})", kind.sql_name().to_lowercase(), c.name),
        (kind, None) => kind.sql_name().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn schema() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("tiny", ColumnType::TinyInt),
            ColumnSchema::new("big", ColumnType::BigInt).with_range(0, 1_000),
            ColumnSchema::new("d", ColumnType::Double),
            ColumnSchema::new("s", ColumnType::Text),
            ColumnSchema::new("f", ColumnType::Float),
        ]
    }

    fn widths(layout: &SlotLayout) -> Vec<SlotType> {
        layout.slots().iter().map(|s| s.ty).collect()
    }

    #[test]
    fn narrowest_width_for_magnitude() {
        assert_eq!(SlotWidth::for_magnitude(0), Some(SlotWidth::W1));
        assert_eq!(SlotWidth::for_magnitude(127), Some(SlotWidth::W1));
        assert_eq!(SlotWidth::for_magnitude(128), Some(SlotWidth::W2));
        assert_eq!(SlotWidth::for_magnitude(1 << 20), Some(SlotWidth::W4));
        assert_eq!(SlotWidth::for_magnitude(i64::MAX as u64), Some(SlotWidth::W8));
        assert_eq!(SlotWidth::for_magnitude(u64::MAX), None);
        assert!(SlotWidth::W2.fits(i16::MAX as i64));
        assert!(!SlotWidth::W2.fits(i16::MIN as i64));
    }

    #[test]
    fn sum_and_count_widths_follow_row_bound() {
        let options = AggregationOptions::default();
        let aggs = [AggSpec::sum(0), AggSpec::count_rows(), AggSpec::sum(1)];

        let small = SlotLayout::try_new(&schema(), &aggs, 1, &options).unwrap();
        assert_eq!(
            widths(&small),
            vec![
                SlotType::Int(SlotWidth::W1),
                SlotType::Int(SlotWidth::W1),
                SlotType::Int(SlotWidth::W2)
            ]
        );

        let large = SlotLayout::try_new(&schema(), &aggs, 1_000_000, &options).unwrap();
        assert_eq!(
            widths(&large),
            vec![
                SlotType::Int(SlotWidth::W4),
                SlotType::Int(SlotWidth::W4),
                SlotType::Int(SlotWidth::W4)
            ]
        );

        let unbounded = SlotLayout::try_new(&schema(), &aggs, u64::MAX, &options).unwrap();
        assert!(widths(&unbounded)
            .iter()
            .all(|t| *t == SlotType::Int(SlotWidth::W8)));
    }

    #[test]
    fn avg_and_variance_use_multiple_slots() {
        let layout = SlotLayout::try_new(
            &schema(),
            &[AggSpec::avg(2), AggSpec::std_dev(0), AggSpec::min(4)],
            100,
            &AggregationOptions::default(),
        )
        .unwrap();
        assert_eq!(layout.targets()[0].slots(), 0..2);
        assert_eq!(layout.targets()[1].slots(), 2..5);
        assert_eq!(layout.targets()[2].slots(), 5..6);
        assert_eq!(layout.slot(0).ty, SlotType::F64);
        assert_eq!(layout.slot(5).ty, SlotType::F32);
        assert_eq!(layout.record_size(), 8 + 1 + 8 + 8 + 8 + 4);
    }

    #[test]
    fn type_rules_are_checked_up_front() {
        let options = AggregationOptions::default();
        for spec in [
            AggSpec::sum(3),
            AggSpec::min(3),
            AggSpec::count_distinct(3),
            AggSpec::count_distinct(2),
            AggSpec::approx_quantile(3, 0.5),
        ] {
            let err = SlotLayout::try_new(&schema(), &[spec], 10, &options).unwrap_err();
            assert!(
                matches!(err, AggError::UnsupportedType { .. }),
                "unexpected {err:?}"
            );
            assert!(err.is_plan_error());
        }

        let err = SlotLayout::try_new(&schema(), &[AggSpec::sum(9)], 10, &options).unwrap_err();
        assert_eq!(
            err,
            AggError::UnknownColumn {
                index: 9,
                columns: 5
            }
        );

        let err = SlotLayout::try_new(&schema(), &[AggSpec::approx_quantile(2, 1.5)], 10, &options)
            .unwrap_err();
        assert!(matches!(err, AggError::InvalidArgument(_)));

        // Approximate distinct counting hashes any type.
        SlotLayout::try_new(&schema(), &[AggSpec::approx_count_distinct(3)], 10, &options)
            .unwrap();
    }

    #[test]
    fn count_distinct_strategy_depends_on_range() {
        let options = AggregationOptions {
            max_bitmap_bits: 1 << 10,
            ..AggregationOptions::default()
        };
        let layout = SlotLayout::try_new(
            &schema(),
            &[AggSpec::count_distinct(1), AggSpec::count_distinct(0)],
            10,
            &options,
        )
        .unwrap();
        assert_eq!(
            layout.targets()[0].kind,
            TargetKind::DistinctBitmap { min: 0, bits: 1001 }
        );
        // A TinyInt without statistics has no declared range.
        assert_eq!(layout.targets()[1].kind, TargetKind::DistinctSet);

        let wide = vec![ColumnSchema::new("w", ColumnType::Int).with_range(0, 1 << 20)];
        let layout =
            SlotLayout::try_new(&wide, &[AggSpec::count_distinct(0)], 10, &options).unwrap();
        assert_eq!(layout.targets()[0].kind, TargetKind::DistinctSet);
    }

    #[test]
    fn hll_precision_from_error_rate() {
        let layout = SlotLayout::try_new(
            &schema(),
            &[
                AggSpec::approx_count_distinct(0),
                AggSpec::approx_count_distinct_with_error(0, 0.023),
            ],
            10,
            &AggregationOptions::default(),
        )
        .unwrap();
        assert_eq!(
            layout.targets()[0].kind,
            TargetKind::ApproxDistinctHll { precision: 11 }
        );
        assert_eq!(
            layout.targets()[1].kind,
            TargetKind::ApproxDistinctHll { precision: 11 }
        );
    }

    #[test]
    fn names_and_sample_row_slot() {
        let layout = SlotLayout::try_new(
            &schema(),
            &[
                AggSpec::count_rows(),
                AggSpec::sample(3),
                AggSpec::sample(0).with_name("any_tiny"),
            ],
            10,
            &AggregationOptions::default(),
        )
        .unwrap();
        let names: Vec<_> = layout.targets().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["count(*)", "sample(s)", "any_tiny"]);
        assert_eq!(layout.sample_row_slot(), Some(3));
        assert!(!layout.is_count_rows_only());
    }
}
