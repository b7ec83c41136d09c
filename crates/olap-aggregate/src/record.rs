#![forbid(unsafe_code)]

//! Record interpreter: per-row update, partial-result combine and finalization of one group's
//! record, driven entirely by the [`SlotLayout`].

use crate::error::{AggError, AggResult};
use crate::layout::{SlotDesc, SlotInit, SlotLayout, SlotType, SlotWidth, Target, TargetKind};
use crate::memory::{try_reserve_vec, MemoryReservation};
use crate::types::{ColumnType, Value};
use ahash::AHashSet;
use olap_sketch::{hash_bytes, hash_f64, hash_i64, DistinctBitmap, HyperLogLog, QuantileDigest};

/// Signalling-NaN payloads that mark an empty float slot. Arithmetic never produces them.
pub(crate) const F32_EMPTY_BITS: u32 = 0x7f80_dead;
pub(crate) const F64_EMPTY_BITS: u64 = 0x7ff0_0000_dead_beef;

const EMPTY_HANDLE: i64 = i64::MIN;

pub(crate) fn init_slot(record: &mut [u8], slot: SlotDesc) {
    match (slot.ty, slot.init) {
        (_, SlotInit::Zero) => record[slot.offset..slot.offset + slot.ty.bytes()].fill(0),
        (SlotType::Int(width), SlotInit::Empty) => {
            write_int(record, slot.offset, width, width.sentinel())
        }
        (SlotType::Handle, SlotInit::Empty) => {
            write_int(record, slot.offset, SlotWidth::W8, EMPTY_HANDLE)
        }
        (SlotType::F32, SlotInit::Empty) => {
            record[slot.offset..slot.offset + 4].copy_from_slice(&F32_EMPTY_BITS.to_le_bytes())
        }
        (SlotType::F64, SlotInit::Empty) => {
            record[slot.offset..slot.offset + 8].copy_from_slice(&F64_EMPTY_BITS.to_le_bytes())
        }
    }
}

fn bytes8(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&b[..8]);
    out
}

fn bytes4(b: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&b[..4]);
    out
}

pub(crate) fn read_int(record: &[u8], offset: usize, width: SlotWidth) -> i64 {
    let b = &record[offset..offset + width.bytes()];
    match width {
        SlotWidth::W1 => b[0] as i8 as i64,
        SlotWidth::W2 => i16::from_le_bytes([b[0], b[1]]) as i64,
        SlotWidth::W4 => i32::from_le_bytes(bytes4(b)) as i64,
        SlotWidth::W8 => i64::from_le_bytes(bytes8(b)),
    }
}

pub(crate) fn write_int(record: &mut [u8], offset: usize, width: SlotWidth, v: i64) {
    let dst = &mut record[offset..offset + width.bytes()];
    match width {
        SlotWidth::W1 => dst.copy_from_slice(&(v as i8).to_le_bytes()),
        SlotWidth::W2 => dst.copy_from_slice(&(v as i16).to_le_bytes()),
        SlotWidth::W4 => dst.copy_from_slice(&(v as i32).to_le_bytes()),
        SlotWidth::W8 => dst.copy_from_slice(&v.to_le_bytes()),
    }
}

/// A slot's numeric content; `None` is the empty pattern.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

fn read_num(record: &[u8], slot: SlotDesc) -> Option<Num> {
    let b = &record[slot.offset..];
    match slot.ty {
        SlotType::Int(width) => {
            let v = read_int(record, slot.offset, width);
            (v != width.sentinel()).then_some(Num::Int(v))
        }
        SlotType::F32 => {
            let bits = u32::from_le_bytes(bytes4(b));
            (bits != F32_EMPTY_BITS).then(|| Num::Float(f32::from_bits(bits) as f64))
        }
        SlotType::F64 => {
            let bits = u64::from_le_bytes(bytes8(b));
            (bits != F64_EMPTY_BITS).then(|| Num::Float(f64::from_bits(bits)))
        }
        SlotType::Handle => None,
    }
}

fn write_num(record: &mut [u8], slot: SlotDesc, target: &Target, v: Num) -> AggResult<()> {
    match (slot.ty, v) {
        (SlotType::Int(width), Num::Int(v)) => {
            if !width.fits(v) {
                return Err(overflow(target, width));
            }
            write_int(record, slot.offset, width, v);
        }
        (SlotType::F32, Num::Float(v)) => {
            let v = if v.is_nan() { f32::NAN } else { v as f32 };
            record[slot.offset..slot.offset + 4].copy_from_slice(&v.to_bits().to_le_bytes());
        }
        (SlotType::F64, Num::Float(v)) => {
            let v = if v.is_nan() { f64::NAN } else { v };
            record[slot.offset..slot.offset + 8].copy_from_slice(&v.to_bits().to_le_bytes());
        }
        _ => return Err(AggError::LayoutMismatch),
    }
    Ok(())
}

fn read_f64(record: &[u8], slot: SlotDesc) -> f64 {
    f64::from_le_bytes(bytes8(&record[slot.offset..]))
}

fn write_f64(record: &mut [u8], slot: SlotDesc, v: f64) {
    record[slot.offset..slot.offset + 8].copy_from_slice(&v.to_le_bytes());
}

fn overflow(target: &Target, width: SlotWidth) -> AggError {
    AggError::Overflow {
        target: target.name.clone(),
        width_bytes: width.bytes(),
    }
}

fn add_count(record: &mut [u8], slot: SlotDesc, target: &Target, n: i64) -> AggResult<()> {
    let SlotType::Int(width) = slot.ty else {
        return Err(AggError::LayoutMismatch);
    };
    let next = read_int(record, slot.offset, width)
        .checked_add(n)
        .filter(|&v| width.fits(v))
        .ok_or_else(|| overflow(target, width))?;
    write_int(record, slot.offset, width, next);
    Ok(())
}

#[derive(Clone, Copy)]
enum Fold {
    Add,
    Min,
    Max,
}

fn fold_num(record: &mut [u8], slot: SlotDesc, target: &Target, fold: Fold, v: Num) -> AggResult<()> {
    let next = match (read_num(record, slot), v) {
        (None, v) => v,
        (Some(Num::Int(a)), Num::Int(b)) => Num::Int(match fold {
            Fold::Add => a.checked_add(b).ok_or_else(|| match slot.ty {
                SlotType::Int(width) => overflow(target, width),
                _ => AggError::LayoutMismatch,
            })?,
            Fold::Min => a.min(b),
            Fold::Max => a.max(b),
        }),
        (Some(Num::Float(a)), Num::Float(b)) => Num::Float(match fold {
            Fold::Add => a + b,
            Fold::Min => a.min(b),
            Fold::Max => a.max(b),
        }),
        _ => return Err(AggError::LayoutMismatch),
    };
    write_num(record, slot, target, next)
}

/// Converts an input into the representation of `slot`; `None` for NULL.
fn input_num(target: &Target, slot: SlotDesc, value: &Value) -> AggResult<Option<Num>> {
    if value.is_null() {
        return Ok(None);
    }
    let num = match slot.ty {
        SlotType::Int(_) => value.as_i64().map(Num::Int),
        SlotType::F32 | SlotType::F64 => value.as_f64().map(Num::Float),
        SlotType::Handle => None,
    };
    num.map(Some).ok_or_else(|| {
        AggError::InvalidArgument(format!("{value} is not a valid input for {}", target.name))
    })
}

fn input_f64(target: &Target, value: &Value) -> AggResult<Option<f64>> {
    if value.is_null() {
        return Ok(None);
    }
    value.as_f64().map(Some).ok_or_else(|| {
        AggError::InvalidArgument(format!("{value} is not a numeric input for {}", target.name))
    })
}

fn input_i64(target: &Target, value: &Value) -> AggResult<Option<i64>> {
    if value.is_null() {
        return Ok(None);
    }
    value.as_i64().map(Some).ok_or_else(|| {
        AggError::InvalidArgument(format!("{value} is not an integer input for {}", target.name))
    })
}

/// Variable-size accumulator owned by a table's arena.
#[derive(Debug)]
pub(crate) enum Block {
    Bitmap(DistinctBitmap),
    Set(AHashSet<i64>),
    Hll(HyperLogLog),
    Digest(QuantileDigest),
    Sample(Value),
}

impl Block {
    fn heap_bytes(&self) -> usize {
        match self {
            Block::Bitmap(b) => b.heap_bytes(),
            // Buckets plus one control byte each.
            Block::Set(s) => s.capacity() * (std::mem::size_of::<i64>() + 1),
            Block::Hll(h) => h.heap_bytes(),
            Block::Digest(d) => d.heap_bytes(),
            Block::Sample(Value::Text(s)) => s.len(),
            Block::Sample(_) => 0,
        }
    }

    fn merge_from(&mut self, other: Block) -> AggResult<()> {
        match (self, other) {
            (Block::Bitmap(a), Block::Bitmap(b)) => a.merge(&b)?,
            (Block::Set(a), Block::Set(mut b)) => {
                if b.len() > a.len() {
                    std::mem::swap(a, &mut b);
                }
                a.try_reserve(b.len())
                    .map_err(|_| AggError::InsufficientResources {
                        what: "distinct set",
                        requested: b.len() * std::mem::size_of::<i64>(),
                        available: 0,
                        limit: 0,
                    })?;
                a.extend(b);
            }
            (Block::Hll(a), Block::Hll(b)) => a.merge(&b)?,
            (Block::Digest(a), Block::Digest(b)) => a.merge(&b),
            _ => return Err(AggError::LayoutMismatch),
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BlockEntry {
    block: Block,
    /// Bytes currently held against the owning table's reservation.
    bytes: usize,
}

/// Per-table storage for variable-size accumulators, addressed by the handles in records.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    entries: Vec<Option<BlockEntry>>,
}

impl Arena {
    fn handle(record: &[u8], slot: SlotDesc) -> Option<usize> {
        let h = read_int(record, slot.offset, SlotWidth::W8);
        (h != EMPTY_HANDLE).then_some(h as usize)
    }

    fn set_handle(record: &mut [u8], slot: SlotDesc, handle: Option<usize>) {
        let h = handle.map_or(EMPTY_HANDLE, |h| h as i64);
        write_int(record, slot.offset, SlotWidth::W8, h);
    }

    fn push(&mut self, entry: BlockEntry, reservation: &mut MemoryReservation) -> AggResult<usize> {
        try_reserve_vec(&mut self.entries, 1, reservation, "accumulator arena")?;
        self.entries.push(Some(entry));
        Ok(self.entries.len() - 1)
    }

    fn get(&self, handle: usize) -> Option<&Block> {
        self.entries.get(handle)?.as_ref().map(|e| &e.block)
    }

    fn get_mut(&mut self, handle: usize) -> Option<&mut BlockEntry> {
        self.entries.get_mut(handle)?.as_mut()
    }

    fn take(&mut self, handle: usize) -> Option<BlockEntry> {
        self.entries.get_mut(handle)?.take()
    }

    #[cfg(test)]
    pub(crate) fn live_blocks(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

impl BlockEntry {
    /// Brings the reserved byte count in line with the block's current size.
    fn account(&mut self, reservation: &mut MemoryReservation) -> AggResult<()> {
        let now = self.block.heap_bytes();
        if now > self.bytes {
            reservation.try_grow("accumulator block", now - self.bytes)?;
        } else {
            reservation.shrink(self.bytes - now);
        }
        self.bytes = now;
        Ok(())
    }
}

fn new_block(layout: &SlotLayout, target: &Target) -> AggResult<Block> {
    Ok(match target.kind {
        TargetKind::DistinctBitmap { min, bits } => {
            let max = min.saturating_add(bits.saturating_sub(1) as i64);
            Block::Bitmap(DistinctBitmap::try_new(min, max)?)
        }
        TargetKind::DistinctSet => Block::Set(AHashSet::new()),
        TargetKind::ApproxDistinctHll { precision } => {
            Block::Hll(HyperLogLog::try_with_precision(precision)?)
        }
        TargetKind::ApproxQuantile { .. } => {
            let q = layout.quantile_options();
            Block::Digest(QuantileDigest::new(q.exact_threshold, q.max_centroids))
        }
        TargetKind::Sample => Block::Sample(Value::Null),
        _ => return Err(AggError::LayoutMismatch),
    })
}

/// The block behind `slot`, created on first use.
fn block_entry<'a>(
    layout: &SlotLayout,
    target: &Target,
    record: &mut [u8],
    slot: SlotDesc,
    arena: &'a mut Arena,
    reservation: &mut MemoryReservation,
) -> AggResult<&'a mut BlockEntry> {
    let handle = match Arena::handle(record, slot) {
        Some(h) => h,
        None => {
            // Reserve before allocating: bitmaps can be large.
            let reserved = match target.kind {
                TargetKind::DistinctBitmap { bits, .. } => bits.div_ceil(64) * 8,
                _ => 0,
            };
            reservation.try_grow("accumulator block", reserved)?;
            let block = match new_block(layout, target) {
                Ok(block) => block,
                Err(err) => {
                    reservation.shrink(reserved);
                    return Err(err);
                }
            };
            let mut entry = BlockEntry {
                block,
                bytes: reserved,
            };
            entry.account(reservation)?;
            let h = arena.push(entry, reservation)?;
            Arena::set_handle(record, slot, Some(h));
            h
        }
    };
    arena.get_mut(handle).ok_or(AggError::LayoutMismatch)
}

fn hash_input(target: &Target, value: &Value) -> Option<u64> {
    let float_input = target.input_type.is_some_and(ColumnType::is_float);
    match value {
        Value::Null => None,
        _ if float_input => value.as_f64().map(hash_f64),
        Value::Boolean(_) | Value::Int(_) => value.as_i64().map(hash_i64),
        Value::Float(v) => Some(hash_f64(*v)),
        Value::Text(s) => Some(hash_bytes(s.as_bytes())),
    }
}

/// Applies one input row to `record`.
///
/// `inputs` holds one evaluated argument per target (ignored for `COUNT(*)`), and `row_id` is
/// the row's position in the scanned table, used to pick sample values.
pub(crate) fn update(
    layout: &SlotLayout,
    record: &mut [u8],
    arena: &mut Arena,
    reservation: &mut MemoryReservation,
    row_id: u64,
    inputs: &[Value],
) -> AggResult<()> {
    let take_sample = match layout.sample_row_slot() {
        Some(slot) => {
            let desc = layout.slot(slot);
            let row = i64::try_from(row_id)
                .map_err(|_| AggError::InvalidArgument(format!("row id {row_id} out of range")))?;
            let current = read_int(record, desc.offset, SlotWidth::W8);
            let take = current == SlotWidth::W8.sentinel() || row < current;
            if take {
                write_int(record, desc.offset, SlotWidth::W8, row);
            }
            take
        }
        None => false,
    };

    for (target, value) in layout.targets().iter().zip(inputs) {
        let first = layout.slot(target.first_slot());
        match target.kind {
            TargetKind::Count { count_nulls } => {
                if count_nulls || !value.is_null() {
                    add_count(record, first, target, 1)?;
                }
            }
            TargetKind::Sum => {
                if let Some(v) = input_num(target, first, value)? {
                    fold_num(record, first, target, Fold::Add, v)?;
                }
            }
            TargetKind::Min | TargetKind::Max => {
                if let Some(v) = input_num(target, first, value)? {
                    if let (SlotType::Int(width), Num::Int(raw)) = (first.ty, v) {
                        if !width.fits(raw) {
                            return Err(AggError::ValueOutOfRange {
                                column: target.name.clone(),
                                value: raw,
                                min: -width.max_value(),
                                max: width.max_value(),
                            });
                        }
                    }
                    let fold = if target.kind == TargetKind::Min {
                        Fold::Min
                    } else {
                        Fold::Max
                    };
                    fold_num(record, first, target, fold, v)?;
                }
            }
            TargetKind::Avg => {
                if let Some(v) = input_num(target, first, value)? {
                    fold_num(record, first, target, Fold::Add, v)?;
                    add_count(record, layout.slot(target.first_slot() + 1), target, 1)?;
                }
            }
            TargetKind::Variance { .. } => {
                if let Some(x) = input_f64(target, value)? {
                    let mean_slot = layout.slot(target.first_slot() + 1);
                    let m2_slot = layout.slot(target.first_slot() + 2);
                    add_count(record, first, target, 1)?;
                    let n = read_int(record, first.offset, SlotWidth::W8) as f64;
                    let mean = read_f64(record, mean_slot);
                    let delta = x - mean;
                    let mean = mean + delta / n;
                    let m2 = read_f64(record, m2_slot) + delta * (x - mean);
                    write_f64(record, mean_slot, mean);
                    write_f64(record, m2_slot, m2);
                }
            }
            TargetKind::DistinctBitmap { min, bits } => {
                if let Some(v) = input_i64(target, value)? {
                    let entry = block_entry(layout, target, record, first, arena, reservation)?;
                    let Block::Bitmap(bitmap) = &mut entry.block else {
                        return Err(AggError::LayoutMismatch);
                    };
                    if bitmap.update(v).is_none() {
                        return Err(AggError::ValueOutOfRange {
                            column: target.name.clone(),
                            value: v,
                            min,
                            max: min.saturating_add(bits.saturating_sub(1) as i64),
                        });
                    }
                }
            }
            TargetKind::DistinctSet => {
                if let Some(v) = input_i64(target, value)? {
                    let entry = block_entry(layout, target, record, first, arena, reservation)?;
                    let Block::Set(set) = &mut entry.block else {
                        return Err(AggError::LayoutMismatch);
                    };
                    if set.len() == set.capacity() {
                        set.try_reserve(1)
                            .map_err(|_| AggError::InsufficientResources {
                                what: "distinct set",
                                requested: set.capacity() * std::mem::size_of::<i64>(),
                                available: reservation.budget().available(),
                                limit: reservation.budget().limit(),
                            })?;
                    }
                    if set.insert(v) {
                        entry.account(reservation)?;
                    }
                }
            }
            TargetKind::ApproxDistinctHll { .. } => {
                if let Some(hash) = hash_input(target, value) {
                    let entry = block_entry(layout, target, record, first, arena, reservation)?;
                    let Block::Hll(hll) = &mut entry.block else {
                        return Err(AggError::LayoutMismatch);
                    };
                    hll.insert_hash(hash);
                }
            }
            TargetKind::ApproxQuantile { .. } => {
                if let Some(x) = input_f64(target, value)? {
                    let entry = block_entry(layout, target, record, first, arena, reservation)?;
                    let Block::Digest(digest) = &mut entry.block else {
                        return Err(AggError::LayoutMismatch);
                    };
                    digest.update(x);
                    entry.account(reservation)?;
                }
            }
            TargetKind::Sample => {
                if take_sample {
                    let entry = block_entry(layout, target, record, first, arena, reservation)?;
                    entry.block = Block::Sample(value.clone());
                    entry.account(reservation)?;
                }
            }
        }
    }
    Ok(())
}

/// Moves or merges the block behind `slot` of `src` into `dst`.
#[allow(clippy::too_many_arguments)]
fn combine_block(
    slot: SlotDesc,
    dst: &mut [u8],
    dst_arena: &mut Arena,
    dst_res: &mut MemoryReservation,
    src: &[u8],
    src_arena: &mut Arena,
    src_res: &mut MemoryReservation,
    replace: bool,
) -> AggResult<()> {
    let Some(src_handle) = Arena::handle(src, slot) else {
        return Ok(());
    };
    let Some(mut incoming) = src_arena.take(src_handle) else {
        return Ok(());
    };

    match Arena::handle(dst, slot) {
        Some(dst_handle) if !replace => {
            src_res.shrink(incoming.bytes);
            incoming.bytes = 0;
            let entry = dst_arena
                .get_mut(dst_handle)
                .ok_or(AggError::LayoutMismatch)?;
            entry.block.merge_from(incoming.block)?;
            entry.account(dst_res)
        }
        existing => {
            if let Some(old) = existing.and_then(|h| dst_arena.take(h)) {
                dst_res.shrink(old.bytes);
            }
            dst_res.merge(src_res.split(incoming.bytes));
            let h = dst_arena.push(incoming, dst_res)?;
            Arena::set_handle(dst, slot, Some(h));
            Ok(())
        }
    }
}

/// Folds the partial result `src` into `dst`. Blocks are moved out of `src_arena` (and their
/// reserved bytes out of `src_res`), leaving the source record unusable.
pub(crate) fn combine(
    layout: &SlotLayout,
    dst: &mut [u8],
    dst_arena: &mut Arena,
    dst_res: &mut MemoryReservation,
    src: &[u8],
    src_arena: &mut Arena,
    src_res: &mut MemoryReservation,
) -> AggResult<()> {
    let take_sample = match layout.sample_row_slot() {
        Some(slot) => {
            let desc = layout.slot(slot);
            let empty = SlotWidth::W8.sentinel();
            let ours = read_int(dst, desc.offset, SlotWidth::W8);
            let theirs = read_int(src, desc.offset, SlotWidth::W8);
            let take = theirs != empty && (ours == empty || theirs < ours);
            if take {
                write_int(dst, desc.offset, SlotWidth::W8, theirs);
            }
            take
        }
        None => false,
    };

    for target in layout.targets() {
        let first = layout.slot(target.first_slot());
        match target.kind {
            TargetKind::Count { .. } => {
                let SlotType::Int(width) = first.ty else {
                    return Err(AggError::LayoutMismatch);
                };
                add_count(dst, first, target, read_int(src, first.offset, width))?;
            }
            TargetKind::Sum | TargetKind::Min | TargetKind::Max => {
                if let Some(v) = read_num(src, first) {
                    let fold = match target.kind {
                        TargetKind::Min => Fold::Min,
                        TargetKind::Max => Fold::Max,
                        _ => Fold::Add,
                    };
                    fold_num(dst, first, target, fold, v)?;
                }
            }
            TargetKind::Avg => {
                let count_slot = layout.slot(target.first_slot() + 1);
                if let Some(v) = read_num(src, first) {
                    fold_num(dst, first, target, Fold::Add, v)?;
                }
                let SlotType::Int(width) = count_slot.ty else {
                    return Err(AggError::LayoutMismatch);
                };
                add_count(dst, count_slot, target, read_int(src, count_slot.offset, width))?;
            }
            TargetKind::Variance { .. } => {
                let mean_slot = layout.slot(target.first_slot() + 1);
                let m2_slot = layout.slot(target.first_slot() + 2);
                let nb = read_int(src, first.offset, SlotWidth::W8);
                if nb == 0 {
                    continue;
                }
                let na = read_int(dst, first.offset, SlotWidth::W8);
                let (mean_a, m2_a) = (read_f64(dst, mean_slot), read_f64(dst, m2_slot));
                let (mean_b, m2_b) = (read_f64(src, mean_slot), read_f64(src, m2_slot));
                add_count(dst, first, target, nb)?;
                let n = (na + nb) as f64;
                let (na, nb) = (na as f64, nb as f64);
                let delta = mean_b - mean_a;
                write_f64(dst, mean_slot, mean_a + delta * nb / n);
                write_f64(dst, m2_slot, m2_a + m2_b + delta * delta * na * nb / n);
            }
            TargetKind::DistinctBitmap { .. }
            | TargetKind::DistinctSet
            | TargetKind::ApproxDistinctHll { .. }
            | TargetKind::ApproxQuantile { .. } => {
                combine_block(first, dst, dst_arena, dst_res, src, src_arena, src_res, false)?;
            }
            TargetKind::Sample => {
                if take_sample {
                    combine_block(first, dst, dst_arena, dst_res, src, src_arena, src_res, true)?;
                }
            }
        }
    }
    Ok(())
}

/// Reads the count of a `COUNT(*)` slot; used for keyless occupancy.
pub(crate) fn count_of(record: &[u8], slot: SlotDesc) -> i64 {
    match slot.ty {
        SlotType::Int(width) => read_int(record, slot.offset, width),
        _ => 0,
    }
}

/// Output value of `target` for one reduced group.
pub(crate) fn finalize(layout: &SlotLayout, target: &Target, record: &[u8], arena: &Arena) -> Value {
    let first = layout.slot(target.first_slot());
    let block = || Arena::handle(record, first).and_then(|h| arena.get(h));
    let num_value = |num: Option<Num>| match num {
        None => Value::Null,
        Some(Num::Int(v)) if target.input_type == Some(ColumnType::Boolean) => {
            Value::Boolean(v != 0)
        }
        Some(Num::Int(v)) => Value::Int(v),
        Some(Num::Float(v)) => Value::Float(v),
    };

    match target.kind {
        TargetKind::Count { .. } => Value::Int(count_of(record, first)),
        TargetKind::Sum | TargetKind::Min | TargetKind::Max => num_value(read_num(record, first)),
        TargetKind::Avg => {
            let count = count_of(record, layout.slot(target.first_slot() + 1));
            match read_num(record, first) {
                Some(_) if count == 0 => Value::Null,
                Some(Num::Int(sum)) => Value::Float(sum as f64 / count as f64),
                Some(Num::Float(sum)) => Value::Float(sum / count as f64),
                None => Value::Null,
            }
        }
        TargetKind::Variance { sample, sqrt } => {
            let n = read_int(record, first.offset, SlotWidth::W8);
            let m2 = read_f64(record, layout.slot(target.first_slot() + 2));
            let denominator = if sample { n - 1 } else { n };
            if denominator < 1 {
                return Value::Null;
            }
            let var = (m2 / denominator as f64).max(0.0);
            Value::Float(if sqrt { var.sqrt() } else { var })
        }
        TargetKind::DistinctBitmap { .. } => match block() {
            Some(Block::Bitmap(b)) => Value::Int(b.count() as i64),
            _ => Value::Int(0),
        },
        TargetKind::DistinctSet => match block() {
            Some(Block::Set(s)) => Value::Int(s.len() as i64),
            _ => Value::Int(0),
        },
        TargetKind::ApproxDistinctHll { .. } => match block() {
            Some(Block::Hll(h)) => Value::Int(h.estimate() as i64),
            _ => Value::Int(0),
        },
        TargetKind::ApproxQuantile { q } => match block() {
            Some(Block::Digest(d)) => d.quantile(q).map_or(Value::Null, Value::Float),
            _ => Value::Null,
        },
        TargetKind::Sample => match block() {
            Some(Block::Sample(v)) => v.clone(),
            _ => Value::Null,
        },
    }
}
