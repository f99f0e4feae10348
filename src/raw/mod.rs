//! Probing and tombstone engine.
//!
//! Translates hashed operations into bucket probes over the sparse array.
//! The engine is generic over the entry type `T` and the growth policy `P`;
//! key hashing and equality live with the caller and are threaded in as
//! closures, so rehashing can recompute hashes without the engine knowing
//! anything about keys.

use crate::config::TableConfig;
use crate::error::Result;
use crate::hint::{likely, unlikely};
use crate::policy::GrowthPolicy;
use crate::sparse::{BucketState, RawIter, SparseArray};

#[cfg(feature = "snapshot")]
use crate::error::SparseTableError;
#[cfg(feature = "snapshot")]
use crate::policy::PersistPolicy;
#[cfg(feature = "snapshot")]
use crate::snapshot::{self, Persist};
#[cfg(feature = "snapshot")]
use bytes::{Buf, BufMut};

/// Buckets a table starts out with when no capacity is requested.
pub(crate) const INITIAL_BUCKETS: usize = 16;

#[cfg(feature = "snapshot")]
const SNAPSHOT_VERSION: u8 = 1;

/// Probe sequence: triangular-number offsets followed by a linear sweep.
///
/// Triangular probing visits every bucket of a power-of-two table exactly
/// once, but covers only part of a prime or arbitrary modulus. After
/// `bucket_count` triangular steps the sequence degrades to a linear sweep
/// over every bucket in order, so the sequence as a whole always covers the
/// table: an insert below the load threshold finds a free bucket whatever
/// the policy and configured load factor, and a lookup that walks the whole
/// sequence without a match has proven the key absent. The tail is only
/// ever reached with an incomplete-coverage policy pushed near its load
/// limit.
///
/// The incremental triangular form adds `k` on the `k`-th step, so no
/// multiplication or division happens while probing; the wrap is a single
/// conditional subtraction because both operands stay below `bucket_count`.
struct ProbeSeq {
    bucket_count: usize,
    pos: usize,
    stride: usize,
}

impl ProbeSeq {
    #[inline]
    fn new(pos: usize, bucket_count: usize) -> Self {
        debug_assert!(pos < bucket_count);
        Self {
            bucket_count,
            pos,
            stride: 0,
        }
    }
}

impl Iterator for ProbeSeq {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.stride < self.bucket_count {
            let result = self.pos;
            self.stride += 1;
            self.pos += self.stride;
            if self.pos >= self.bucket_count {
                self.pos -= self.bucket_count;
            }
            Some(result)
        } else if self.stride < 2 * self.bucket_count {
            // Linear sweep tail covering the buckets the triangular phase
            // may have missed.
            let result = self.stride - self.bucket_count;
            self.stride += 1;
            Some(result)
        } else {
            None
        }
    }
}

/// Where an insert probe ended up.
pub(crate) enum InsertSlot {
    /// The key is already present; nothing to insert.
    Found,
    /// The entry belongs at this bucket: the first tombstone of the chain
    /// if one was crossed, otherwise the empty bucket that ended the probe.
    Vacant(usize),
}

pub(crate) struct RawSparseTable<T, P: GrowthPolicy> {
    array: SparseArray<T>,
    policy: P,
    config: TableConfig,
    size: usize,
    tombstones: usize,
    // Recomputed on every capacity or config change.
    load_threshold: usize,
    tombstone_threshold: usize,
}

impl<T, P: GrowthPolicy> RawSparseTable<T, P> {
    pub(crate) fn with_capacity(capacity: usize, config: TableConfig) -> Result<Self> {
        let min_buckets = config.buckets_for(capacity).max(INITIAL_BUCKETS);
        Self::with_policy(P::initialize(min_buckets)?, config)
    }

    fn with_policy(policy: P, config: TableConfig) -> Result<Self> {
        let bucket_count = policy.bucket_count();
        let array = SparseArray::with_bucket_count(bucket_count)?;
        debug_assert_eq!(array.bucket_count(), bucket_count);
        Ok(Self {
            array,
            load_threshold: config.load_threshold(bucket_count),
            tombstone_threshold: config.tombstone_threshold(bucket_count),
            policy,
            config,
            size: 0,
            tombstones: 0,
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn tombstones(&self) -> usize {
        self.tombstones
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.policy.bucket_count()
    }

    #[inline]
    pub(crate) fn config(&self) -> &TableConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn load_factor(&self) -> f32 {
        self.size as f32 / self.bucket_count() as f32
    }

    pub(crate) fn set_max_load_factor(&mut self, max_load_factor: f32) -> Result<()> {
        self.config = TableConfig::new(max_load_factor, self.config.tombstone_factor())?;
        self.recompute_thresholds();
        Ok(())
    }

    #[inline]
    fn recompute_thresholds(&mut self) {
        let bucket_count = self.policy.bucket_count();
        self.load_threshold = self.config.load_threshold(bucket_count);
        self.tombstone_threshold = self.config.tombstone_threshold(bucket_count);
    }

    #[inline]
    fn probe(&self, hash: u64) -> ProbeSeq {
        ProbeSeq::new(self.policy.bucket_for_hash(hash), self.policy.bucket_count())
    }

    #[inline]
    pub(crate) fn entry(&self, bucket: usize) -> &T {
        self.array.entry(bucket)
    }

    #[inline]
    pub(crate) fn entry_mut(&mut self, bucket: usize) -> &mut T {
        self.array.entry_mut(bucket)
    }

    /// Searches for an entry, returning its bucket.
    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<usize> {
        for bucket in self.probe(hash) {
            match self.array.state(bucket) {
                BucketState::Empty => return None,
                BucketState::Occupied => {
                    if likely(eq(self.array.entry(bucket))) {
                        return Some(bucket);
                    }
                }
                BucketState::Deleted => {}
            }
        }
        // The linear tail visits every bucket, so walking the sequence to
        // exhaustion without a match or an empty bucket proves the key
        // absent.
        None
    }

    /// Walks the probe sequence once, remembering the first tombstone so an
    /// insert can reclaim it.
    pub(crate) fn find_insert_bucket(
        &self,
        hash: u64,
        mut eq: impl FnMut(&T) -> bool,
    ) -> InsertSlot {
        let mut first_tombstone = None;
        for bucket in self.probe(hash) {
            match self.array.state(bucket) {
                BucketState::Empty => {
                    return InsertSlot::Vacant(first_tombstone.unwrap_or(bucket));
                }
                BucketState::Occupied => {
                    if likely(eq(self.array.entry(bucket))) {
                        return InsertSlot::Found;
                    }
                }
                BucketState::Deleted => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(bucket);
                    }
                }
            }
        }
        // The sequence visits every bucket, so getting here without an
        // empty bucket or a tombstone means the load invariant is broken.
        match first_tombstone {
            Some(bucket) => InsertSlot::Vacant(bucket),
            None => panic!("probe sequence exhausted: load invariant violated"),
        }
    }

    /// Constructs `entry` into a bucket reported vacant by
    /// [`find_insert_bucket`], then applies the load and tombstone
    /// thresholds, rehashing through `hasher` when one is exceeded.
    pub(crate) fn occupy<F: Fn(&T) -> u64>(
        &mut self,
        bucket: usize,
        entry: T,
        hasher: F,
    ) -> Result<()> {
        let reclaimed = self.array.state(bucket) == BucketState::Deleted;
        self.array.set(bucket, entry)?;
        if reclaimed {
            self.tombstones -= 1;
        }
        self.size += 1;

        if unlikely(self.size + self.tombstones > self.load_threshold) {
            let next = self.policy.next_bucket_count()?;
            self.rehash_to(P::initialize(next)?, &hasher)
        } else if unlikely(self.tombstones > self.tombstone_threshold) {
            self.sweep_tombstones(&hasher)
        } else {
            Ok(())
        }
    }

    /// Tombstones an occupied bucket and hands back its entry, sweeping the
    /// table in place once tombstones alone cross their threshold.
    pub(crate) fn remove_bucket<F: Fn(&T) -> u64>(
        &mut self,
        bucket: usize,
        hasher: F,
    ) -> Result<T> {
        debug_assert_eq!(self.array.state(bucket), BucketState::Occupied);
        let entry = self.array.take(bucket);
        self.size -= 1;
        self.tombstones += 1;
        if unlikely(self.tombstones > self.tombstone_threshold) {
            self.sweep_tombstones(&hasher)?;
        }
        Ok(entry)
    }

    /// Like [`remove_bucket`](Self::remove_bucket) but drops the entry in
    /// place instead of handing it back.
    pub(crate) fn erase_bucket<F: Fn(&T) -> u64>(
        &mut self,
        bucket: usize,
        hasher: F,
    ) -> Result<()> {
        debug_assert_eq!(self.array.state(bucket), BucketState::Occupied);
        self.array.unset(bucket);
        self.size -= 1;
        self.tombstones += 1;
        if unlikely(self.tombstones > self.tombstone_threshold) {
            self.sweep_tombstones(&hasher)?;
        }
        Ok(())
    }

    /// Same-size rehash that discards every tombstone. All bundled policies
    /// reproduce their current capacity from `initialize`, so this does not
    /// grow the table; a custom policy that cannot will grow instead, which
    /// is acceptable.
    fn sweep_tombstones<F: Fn(&T) -> u64>(&mut self, hasher: &F) -> Result<()> {
        self.rehash_to(P::initialize(self.policy.bucket_count())?, hasher)
    }

    /// Ensures room for `capacity` entries without another rehash.
    pub(crate) fn reserve<F: Fn(&T) -> u64>(&mut self, capacity: usize, hasher: F) -> Result<()> {
        let min_buckets = self.config.buckets_for(capacity);
        if min_buckets > self.policy.bucket_count() {
            self.rehash_to(P::initialize(min_buckets)?, &hasher)?;
        }
        Ok(())
    }

    /// Rehashes to at least `bucket_count` buckets, clamped so the current
    /// entries still fit under the load threshold.
    pub(crate) fn rehash_at_least<F: Fn(&T) -> u64>(
        &mut self,
        bucket_count: usize,
        hasher: F,
    ) -> Result<()> {
        let min = bucket_count.max(self.config.buckets_for(self.size));
        self.rehash_to(P::initialize(min)?, &hasher)
    }

    /// Relocates every entry into a fresh sparse array shaped by `policy`.
    ///
    /// Entries are moved out of the old array one by one (`take` flips the
    /// occupied bit at the moment of the move), so an allocation failure
    /// mid-way cannot double-drop or leak: the table adopts the partially
    /// rebuilt array with accurate counters and surfaces the error.
    fn rehash_to<F: Fn(&T) -> u64>(&mut self, policy: P, hasher: &F) -> Result<()> {
        let mut new_array = SparseArray::with_bucket_count(policy.bucket_count())?;
        let mut moved = 0usize;
        let mut failure = None;

        let mut drain = unsafe { self.array.raw_iter() };
        while let Some((bucket, _)) = drain.next() {
            let entry = self.array.take(bucket);
            let hash = hasher(&entry);
            if let Err(err) = Self::insert_unique(&mut new_array, &policy, hash, entry) {
                failure = Some(err);
                break;
            }
            moved += 1;
        }

        self.array = new_array;
        self.policy = policy;
        self.size = moved;
        self.tombstones = 0;
        self.recompute_thresholds();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Insert fast path for rehashing: a fresh array holds no tombstones,
    /// so the first empty bucket of the probe sequence is the target.
    fn insert_unique(
        array: &mut SparseArray<T>,
        policy: &P,
        hash: u64,
        entry: T,
    ) -> Result<()> {
        for bucket in ProbeSeq::new(policy.bucket_for_hash(hash), policy.bucket_count()) {
            if let BucketState::Empty = array.state(bucket) {
                return array.set(bucket, entry);
            }
        }
        panic!("probe sequence exhausted: load invariant violated");
    }

    /// Drops every entry in place; capacity and policy are retained.
    pub(crate) fn clear(&mut self) {
        self.array.clear();
        self.size = 0;
        self.tombstones = 0;
    }

    /// Iterator over occupied buckets. The caller must ensure the table
    /// outlives it and is not mutated while it is live.
    #[inline]
    pub(crate) unsafe fn raw_iter(&self) -> RawIter<T> {
        self.array.raw_iter()
    }

    /// Moves out the entry behind a bucket yielded by [`raw_iter`]; used by
    /// the draining by-value iterators.
    #[inline]
    pub(crate) fn take_bucket(&mut self, bucket: usize) -> T {
        self.size -= 1;
        self.tombstones += 1;
        self.array.take(bucket)
    }
}

#[cfg(feature = "snapshot")]
impl<T: Persist, P: PersistPolicy> RawSparseTable<T, P> {
    /// Writes the table in the fixed snapshot order: version, bucket count,
    /// size, tombstone count, max load factor, policy state, then every
    /// occupied `(bucket_index, entry)` pair in ascending bucket order.
    pub(crate) fn snapshot<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(SNAPSHOT_VERSION);
        buf.put_u64_le(self.bucket_count() as u64);
        buf.put_u64_le(self.size as u64);
        buf.put_u64_le(self.tombstones as u64);
        buf.put_u32_le(self.config.max_load_factor().to_bits());
        self.policy.persist(buf);
        unsafe {
            for (bucket, entry) in self.raw_iter() {
                buf.put_u64_le(bucket as u64);
                (*entry).persist(buf);
            }
        }
    }

    /// Rebuilds a table from a snapshot.
    ///
    /// Tombstones are not carried across a snapshot, so the recorded bucket
    /// of an entry that was displaced past one would sit beyond an empty
    /// bucket after a verbatim replay and become unreachable. Entries are
    /// therefore re-probed into a fresh chain through `hasher`; the recorded
    /// bucket indices, written in ascending order, serve as an integrity
    /// check on the stream.
    pub(crate) fn restore<B: Buf, F: Fn(&T) -> u64>(buf: &mut B, hasher: F) -> Result<Self> {
        let version = snapshot::read_u8(buf)?;
        if version != SNAPSHOT_VERSION {
            return Err(SparseTableError::DeserializationMismatch(format!(
                "unsupported snapshot version {}",
                version
            )));
        }
        let bucket_count = snapshot::read_u64(buf)? as usize;
        let size = snapshot::read_u64(buf)? as usize;
        let _tombstones = snapshot::read_u64(buf)?;
        let max_load_factor = snapshot::read_f32(buf)?;
        let config =
            TableConfig::new(max_load_factor, crate::config::DEFAULT_TOMBSTONE_FACTOR)
                .map_err(|err| {
                    SparseTableError::DeserializationMismatch(format!(
                        "snapshot load factor rejected: {}",
                        err
                    ))
                })?;

        let policy = P::restore(buf)?;
        if policy.bucket_count() != bucket_count {
            return Err(SparseTableError::DeserializationMismatch(format!(
                "policy addresses {} buckets, snapshot recorded {}",
                policy.bucket_count(),
                bucket_count
            )));
        }
        if size > bucket_count {
            return Err(SparseTableError::DeserializationMismatch(format!(
                "snapshot size {} exceeds bucket count {}",
                size, bucket_count
            )));
        }

        let mut table = Self::with_policy(policy, config)?;
        let mut last_bucket = None;
        for _ in 0..size {
            let bucket = snapshot::read_u64(buf)? as usize;
            if bucket >= bucket_count {
                return Err(SparseTableError::DeserializationMismatch(format!(
                    "bucket index {} out of range", bucket
                )));
            }
            if last_bucket.map_or(false, |last| bucket <= last) {
                return Err(SparseTableError::DeserializationMismatch(format!(
                    "bucket index {} out of order", bucket
                )));
            }
            last_bucket = Some(bucket);
            let entry = T::restore(buf)?;
            let hash = hasher(&entry);
            Self::insert_unique(&mut table.array, &table.policy, hash, entry)?;
        }
        table.size = size;
        Ok(table)
    }
}
