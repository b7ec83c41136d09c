#![forbid(unsafe_code)]

use crate::error::{AggError, AggResult};
use crate::key::{GroupKey, GroupKeyEncoder, KeyStrategy};
use crate::layout::{SlotDesc, SlotLayout};
use crate::memory::{try_alloc_filled, try_reserve_vec, MemoryBudget, MemoryReservation};
use crate::record::{self, Arena};
use crate::reduce::CancellationToken;
use crate::types::Value;
use olap_sketch::BitVec;
use std::sync::Arc;

const EMPTY: u32 = u32::MAX;
const MIN_CAPACITY: usize = 16;
/// Groups visited between cancellation checks.
pub(crate) const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Shard owning `hash` among `shards`; uses the high bits, the probe uses the low ones.
pub(crate) fn shard_of(hash: u64, shards: usize) -> usize {
    (((hash >> 32) * shards as u64) >> 32) as usize
}

pub(crate) enum KeyRef<'a> {
    Dense(usize),
    Packed(&'a [u8]),
}

#[derive(Debug)]
struct DenseGroups {
    records: Vec<u8>,
    occupied: Option<BitVec>,
    /// `COUNT(*)` slot deciding occupancy of keyless tables.
    count_slot: Option<SlotDesc>,
    buckets: usize,
}

impl DenseGroups {
    fn try_new(
        layout: &SlotLayout,
        buckets: usize,
        keyless: bool,
        reservation: &mut MemoryReservation,
    ) -> AggResult<Self> {
        let record_size = layout.record_size();
        let len = buckets
            .checked_mul(record_size)
            .ok_or(AggError::InsufficientResources {
                what: "dense group records",
                requested: usize::MAX,
                available: reservation.budget().available(),
                limit: reservation.budget().limit(),
            })?;
        let mut records = try_alloc_filled(reservation, "dense group records", len, 0u8)?;
        if record_size > 0 {
            for chunk in records.chunks_exact_mut(record_size) {
                chunk.copy_from_slice(layout.init_record());
            }
        }
        let occupied = if keyless {
            None
        } else {
            reservation.try_grow("dense occupancy bitmap", buckets.div_ceil(64) * 8)?;
            Some(BitVec::try_zeroed(buckets)?)
        };
        Ok(Self {
            records,
            occupied,
            count_slot: keyless.then(|| layout.slot(0)),
            buckets,
        })
    }

    fn is_occupied(&self, bucket: usize, record_size: usize) -> bool {
        match (&self.occupied, self.count_slot) {
            (Some(bits), _) => bits.get(bucket),
            (None, Some(slot)) => {
                let start = bucket * record_size;
                record::count_of(&self.records[start..start + record_size], slot) != 0
            }
            (None, None) => false,
        }
    }

    fn locate(&mut self, bucket: usize) -> AggResult<usize> {
        if bucket >= self.buckets {
            return Err(AggError::LayoutMismatch);
        }
        if let Some(bits) = &mut self.occupied {
            bits.set(bucket);
        }
        Ok(bucket)
    }

    fn len(&self, record_size: usize) -> usize {
        match &self.occupied {
            Some(bits) => bits.count_ones(),
            None => (0..self.buckets)
                .filter(|&b| self.is_occupied(b, record_size))
                .count(),
        }
    }
}

/// Open-addressing table with linear probing.
///
/// The directory maps probe positions to group indices; hashes, key bytes and records are
/// stored densely in insertion order, so growing only rebuilds the directory and records never
/// move relative to their group.
#[derive(Debug)]
struct HashedGroups {
    directory: Vec<u32>,
    hashes: Vec<u64>,
    key_offsets: Vec<usize>,
    key_bytes: Vec<u8>,
    records: Vec<u8>,
    load_factor: f64,
}

impl HashedGroups {
    fn try_new(
        capacity: usize,
        load_factor: f64,
        reservation: &mut MemoryReservation,
    ) -> AggResult<Self> {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let directory = try_alloc_filled(reservation, "hash directory", capacity, EMPTY)?;
        let mut key_offsets = Vec::new();
        try_reserve_vec(&mut key_offsets, 1, reservation, "group keys")?;
        key_offsets.push(0);
        Ok(Self {
            directory,
            hashes: Vec::new(),
            key_offsets,
            key_bytes: Vec::new(),
            records: Vec::new(),
            load_factor,
        })
    }

    fn len(&self) -> usize {
        self.hashes.len()
    }

    fn key(&self, group: usize) -> &[u8] {
        &self.key_bytes[self.key_offsets[group]..self.key_offsets[group + 1]]
    }

    fn probe(&self, hash: u64, key: &[u8]) -> Result<usize, usize> {
        let mask = self.directory.len() - 1;
        let mut pos = hash as usize & mask;
        loop {
            let group = self.directory[pos];
            if group == EMPTY {
                return Err(pos);
            }
            let group = group as usize;
            if self.hashes[group] == hash && self.key(group) == key {
                return Ok(group);
            }
            pos = (pos + 1) & mask;
        }
    }

    fn find_or_insert(
        &mut self,
        hash: u64,
        key: &[u8],
        init: &[u8],
        reservation: &mut MemoryReservation,
    ) -> AggResult<usize> {
        let mut pos = match self.probe(hash, key) {
            Ok(group) => return Ok(group),
            Err(pos) => pos,
        };

        let group = self.len();
        if group >= EMPTY as usize - 1 {
            return Err(AggError::InsufficientResources {
                what: "hash table groups",
                requested: group + 1,
                available: 0,
                limit: EMPTY as usize - 1,
            });
        }
        if (group + 1) as f64 > self.directory.len() as f64 * self.load_factor {
            self.grow(group + 1, reservation)?;
            pos = match self.probe(hash, key) {
                Ok(existing) => return Ok(existing),
                Err(pos) => pos,
            };
        }

        try_reserve_vec(&mut self.hashes, 1, reservation, "group hashes")?;
        try_reserve_vec(&mut self.key_offsets, 1, reservation, "group keys")?;
        try_reserve_vec(&mut self.key_bytes, key.len(), reservation, "group keys")?;
        try_reserve_vec(&mut self.records, init.len(), reservation, "group records")?;
        self.hashes.push(hash);
        self.key_bytes.extend_from_slice(key);
        self.key_offsets.push(self.key_bytes.len());
        self.records.extend_from_slice(init);
        self.directory[pos] = group as u32;
        Ok(group)
    }

    /// Doubles the directory until `groups` fit under the load factor, then re-inserts every
    /// group by its stored hash.
    fn grow(&mut self, groups: usize, reservation: &mut MemoryReservation) -> AggResult<()> {
        let old = self.directory.len();
        let mut new_len = old;
        while groups as f64 > new_len as f64 * self.load_factor {
            new_len = new_len
                .checked_mul(2)
                .ok_or(AggError::InsufficientResources {
                    what: "hash directory",
                    requested: usize::MAX,
                    available: reservation.budget().available(),
                    limit: reservation.budget().limit(),
                })?;
        }
        let mut directory = try_alloc_filled(reservation, "hash directory", new_len, EMPTY)?;
        let mask = new_len - 1;
        for (group, &hash) in self.hashes.iter().enumerate() {
            let mut pos = hash as usize & mask;
            while directory[pos] != EMPTY {
                pos = (pos + 1) & mask;
            }
            directory[pos] = group as u32;
        }
        let old_directory = std::mem::replace(&mut self.directory, directory);
        reservation.shrink(old_directory.len() * std::mem::size_of::<u32>());
        log::trace!(
            "hash table grew from {old} to {new_len} slots holding {} groups",
            self.len()
        );
        Ok(())
    }
}

#[derive(Debug)]
enum Storage {
    Dense(DenseGroups),
    Hashed(HashedGroups),
}

impl Storage {
    fn records_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Dense(d) => &mut d.records,
            Storage::Hashed(h) => &mut h.records,
        }
    }
}

/// Groups, their records and accumulator blocks, plus the memory held for them.
#[derive(Debug)]
pub(crate) struct GroupTable {
    storage: Storage,
    arena: Arena,
    reservation: MemoryReservation,
    record_size: usize,
}

impl GroupTable {
    pub(crate) fn try_new(
        layout: &SlotLayout,
        encoder: &GroupKeyEncoder,
        budget: &Arc<MemoryBudget>,
        capacity: Option<usize>,
    ) -> AggResult<Self> {
        let mut reservation = budget.reservation();
        let storage = match (encoder.strategy(), encoder.dense_buckets()) {
            (KeyStrategy::Dense, Some(buckets)) => Storage::Dense(DenseGroups::try_new(
                layout,
                buckets,
                false,
                &mut reservation,
            )?),
            (KeyStrategy::KeylessDense, Some(buckets)) => Storage::Dense(DenseGroups::try_new(
                layout,
                buckets,
                true,
                &mut reservation,
            )?),
            _ => {
                let capacity = capacity
                    .or(encoder.initial_capacity())
                    .unwrap_or(MIN_CAPACITY);
                Storage::Hashed(HashedGroups::try_new(
                    capacity,
                    encoder.load_factor(),
                    &mut reservation,
                )?)
            }
        };
        Ok(Self {
            storage,
            arena: Arena::default(),
            reservation,
            record_size: layout.record_size(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        match &self.storage {
            Storage::Dense(d) => d.len(self.record_size),
            Storage::Hashed(h) => h.len(),
        }
    }

    pub(crate) fn reserved_bytes(&self) -> usize {
        self.reservation.size()
    }

    pub(crate) fn budget(&self) -> &Arc<MemoryBudget> {
        self.reservation.budget()
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    fn locate(&mut self, key: &GroupKey, init: &[u8]) -> AggResult<usize> {
        match (&mut self.storage, key) {
            (Storage::Dense(d), GroupKey::Dense(bucket)) => d.locate(*bucket),
            (Storage::Hashed(h), GroupKey::Hashed(packed)) => {
                h.find_or_insert(packed.hash, &packed.bytes, init, &mut self.reservation)
            }
            _ => Err(AggError::LayoutMismatch),
        }
    }

    fn locate_packed(&mut self, hash: u64, key: &[u8], init: &[u8]) -> AggResult<usize> {
        match &mut self.storage {
            Storage::Hashed(h) => h.find_or_insert(hash, key, init, &mut self.reservation),
            Storage::Dense(_) => Err(AggError::LayoutMismatch),
        }
    }

    fn locate_dense(&mut self, bucket: usize) -> AggResult<usize> {
        match &mut self.storage {
            Storage::Dense(d) => d.locate(bucket),
            Storage::Hashed(_) => Err(AggError::LayoutMismatch),
        }
    }

    fn update(
        &mut self,
        layout: &SlotLayout,
        index: usize,
        row_id: u64,
        inputs: &[Value],
    ) -> AggResult<()> {
        let rs = self.record_size;
        let GroupTable {
            storage,
            arena,
            reservation,
            ..
        } = self;
        let records = storage.records_mut();
        record::update(
            layout,
            &mut records[index * rs..(index + 1) * rs],
            arena,
            reservation,
            row_id,
            inputs,
        )
    }

    fn combine_into(
        &mut self,
        layout: &SlotLayout,
        index: usize,
        src: &[u8],
        src_arena: &mut Arena,
        src_reservation: &mut MemoryReservation,
    ) -> AggResult<()> {
        let rs = self.record_size;
        let GroupTable {
            storage,
            arena,
            reservation,
            ..
        } = self;
        let records = storage.records_mut();
        record::combine(
            layout,
            &mut records[index * rs..(index + 1) * rs],
            arena,
            reservation,
            src,
            src_arena,
            src_reservation,
        )
    }

    /// Folds every group of `src` into this table, moving accumulator blocks over.
    pub(crate) fn absorb(
        &mut self,
        layout: &SlotLayout,
        mut src: GroupTable,
        cancel: &CancellationToken,
    ) -> AggResult<()> {
        let rs = self.record_size;
        let init = layout.init_record();
        let GroupTable {
            storage,
            arena: src_arena,
            reservation: src_reservation,
            ..
        } = &mut src;
        match storage {
            Storage::Dense(d) => {
                for bucket in 0..d.buckets {
                    if bucket % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                        return Err(AggError::Cancelled);
                    }
                    if !d.is_occupied(bucket, rs) {
                        continue;
                    }
                    let index = self.locate_dense(bucket)?;
                    let record = &d.records[bucket * rs..(bucket + 1) * rs];
                    self.combine_into(layout, index, record, src_arena, src_reservation)?;
                }
            }
            Storage::Hashed(h) => {
                for group in 0..h.len() {
                    if group % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                        return Err(AggError::Cancelled);
                    }
                    let index = self.locate_packed(h.hashes[group], h.key(group), init)?;
                    let record = &h.records[group * rs..(group + 1) * rs];
                    self.combine_into(layout, index, record, src_arena, src_reservation)?;
                }
            }
        }
        Ok(())
    }

    /// Splits a hashed table into `shards` tables with disjoint keys.
    pub(crate) fn split_by_hash(
        mut self,
        layout: &SlotLayout,
        encoder: &GroupKeyEncoder,
        shards: usize,
        cancel: &CancellationToken,
    ) -> AggResult<Vec<GroupTable>> {
        let shards = shards.max(1);
        let groups = match &self.storage {
            Storage::Hashed(h) => h.len(),
            Storage::Dense(_) => {
                return Err(AggError::InvalidArgument(
                    "only hashed tables can be split by key hash".to_owned(),
                ))
            }
        };
        let budget = Arc::clone(self.budget());
        let load = encoder.load_factor();
        let per_shard = ((groups / shards + 1) as f64 / load).ceil() as usize;
        let mut out = (0..shards)
            .map(|_| GroupTable::try_new(layout, encoder, &budget, Some(per_shard)))
            .collect::<AggResult<Vec<_>>>()?;

        let rs = self.record_size;
        let init = layout.init_record();
        let GroupTable {
            storage,
            arena,
            reservation,
            ..
        } = &mut self;
        let Storage::Hashed(h) = storage else {
            return Err(AggError::LayoutMismatch);
        };
        for group in 0..h.len() {
            if group % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(AggError::Cancelled);
            }
            let hash = h.hashes[group];
            let dst = &mut out[shard_of(hash, shards)];
            let index = dst.locate_packed(hash, h.key(group), init)?;
            let record = &h.records[group * rs..(group + 1) * rs];
            dst.combine_into(layout, index, record, arena, reservation)?;
        }
        Ok(out)
    }

    /// Calls `f` with every group's key and record, dense tables in bucket order and hashed
    /// tables in insertion order.
    pub(crate) fn for_each_group<F>(&self, mut f: F) -> AggResult<()>
    where
        F: FnMut(KeyRef<'_>, &[u8]) -> AggResult<()>,
    {
        let rs = self.record_size;
        match &self.storage {
            Storage::Dense(d) => {
                for bucket in 0..d.buckets {
                    if d.is_occupied(bucket, rs) {
                        f(
                            KeyRef::Dense(bucket),
                            &d.records[bucket * rs..(bucket + 1) * rs],
                        )?;
                    }
                }
            }
            Storage::Hashed(h) => {
                for group in 0..h.len() {
                    f(
                        KeyRef::Packed(h.key(group)),
                        &h.records[group * rs..(group + 1) * rs],
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Group-by state owned by exactly one execution unit while it scans its fragment.
///
/// No internal synchronization: the owning unit is the only writer. Once the scan ends the
/// table is [sealed](Self::seal) and handed to the reducer.
#[derive(Debug)]
pub struct PartitionedAggregationTable {
    layout: Arc<SlotLayout>,
    encoder: Arc<GroupKeyEncoder>,
    groups: GroupTable,
    next_row: u64,
}

impl PartitionedAggregationTable {
    /// Creates an empty table whose implicit row ids start at `first_row`.
    ///
    /// Dense tables allocate their whole bucket array here; hashed tables start at the
    /// encoder's initial capacity.
    pub fn try_new(
        layout: Arc<SlotLayout>,
        encoder: Arc<GroupKeyEncoder>,
        budget: &Arc<MemoryBudget>,
        first_row: u64,
    ) -> AggResult<Self> {
        let groups = GroupTable::try_new(&layout, &encoder, budget, None)?;
        Ok(Self {
            layout,
            encoder,
            groups,
            next_row: first_row,
        })
    }

    /// Adds one row, numbering it after the previous one.
    pub fn upsert(&mut self, key: &[Value], inputs: &[Value]) -> AggResult<()> {
        self.upsert_row(self.next_row, key, inputs)
    }

    /// Adds one row with an explicit source row id.
    pub fn upsert_row(&mut self, row_id: u64, key: &[Value], inputs: &[Value]) -> AggResult<()> {
        let key = self.encoder.encode(key)?;
        self.upsert_key(row_id, &key, inputs)
    }

    /// Adds one row whose key was already encoded with this table's encoder.
    pub fn upsert_key(&mut self, row_id: u64, key: &GroupKey, inputs: &[Value]) -> AggResult<()> {
        let expected = self.layout.targets().len();
        if inputs.len() != expected {
            return Err(AggError::ArityMismatch {
                what: "aggregate inputs",
                expected,
                actual: inputs.len(),
            });
        }
        let index = self.groups.locate(key, self.layout.init_record())?;
        self.groups.update(&self.layout, index, row_id, inputs)?;
        self.next_row = self.next_row.max(row_id.saturating_add(1));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
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

    /// Bytes currently held against the memory budget.
    pub fn reserved_bytes(&self) -> usize {
        self.groups.reserved_bytes()
    }

    /// Ends the scan. The returned partition can only be read or reduced.
    pub fn seal(self) -> SealedPartition {
        log::debug!(
            "sealed {:?} partition with {} groups, {} bytes reserved",
            self.encoder.strategy(),
            self.groups.len(),
            self.groups.reserved_bytes()
        );
        SealedPartition {
            layout: self.layout,
            encoder: self.encoder,
            groups: self.groups,
        }
    }
}

/// An immutable, finished partition table awaiting reduction.
#[derive(Debug)]
pub struct SealedPartition {
    pub(crate) layout: Arc<SlotLayout>,
    pub(crate) encoder: Arc<GroupKeyEncoder>,
    pub(crate) groups: GroupTable,
}

impl SealedPartition {
    pub fn len(&self) -> usize {
        self.groups.len()
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

    pub fn reserved_bytes(&self) -> usize {
        self.groups.reserved_bytes()
    }

    /// Splits a hashed partition into `shards` partitions holding disjoint keys; a key always
    /// lands in the same shard whichever partition it comes from.
    pub fn split_by_hash(
        self,
        shards: usize,
        cancel: &CancellationToken,
    ) -> AggResult<Vec<SealedPartition>> {
        let SealedPartition {
            layout,
            encoder,
            groups,
        } = self;
        let pieces = groups.split_by_hash(&layout, &encoder, shards, cancel)?;
        Ok(pieces
            .into_iter()
            .map(|groups| SealedPartition {
                layout: Arc::clone(&layout),
                encoder: Arc::clone(&encoder),
                groups,
            })
            .collect())
    }
}
