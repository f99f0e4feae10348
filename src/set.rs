use core::fmt;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};

use crate::config::TableConfig;
use crate::error::Result;
use crate::map::make_hash;
use crate::policy::{GrowthPolicy, PowerOfTwoPolicy};
use crate::raw::{InsertSlot, RawSparseTable};
use crate::sparse::RawIter;
use crate::DefaultHashBuilder;

#[cfg(feature = "snapshot")]
use crate::policy::PersistPolicy;
#[cfg(feature = "snapshot")]
use crate::snapshot::Persist;
#[cfg(feature = "snapshot")]
use bytes::{Buf, BufMut};

/// A memory-efficient hash set: the key-only variant of
/// [`SparseMap`](crate::SparseMap), sharing its engine and storage.
pub struct SparseSet<K, S = DefaultHashBuilder, P: GrowthPolicy = PowerOfTwoPolicy> {
    hash_builder: S,
    table: RawSparseTable<K, P>,
}

impl<K, P> SparseSet<K, DefaultHashBuilder, P>
where
    K: Eq + Hash,
    P: GrowthPolicy,
{
    /// Creates an empty set.
    ///
    /// Panics if the growth policy cannot provide the initial capacity.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a set with room for `capacity` keys before any rehash.
    ///
    /// Panics if the growth policy cannot provide the requested capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, S, P> SparseSet<K, S, P>
where
    K: Eq + Hash,
    S: BuildHasher,
    P: GrowthPolicy,
{
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::with_config(capacity, TableConfig::default(), hash_builder)
    }

    pub fn with_config(capacity: usize, config: TableConfig, hash_builder: S) -> Self {
        let table = RawSparseTable::with_capacity(capacity, config)
            .unwrap_or_else(|err| panic!("sparse set construction failed: {}", err));
        Self {
            hash_builder,
            table,
        }
    }

    /// Inserts `key`, returning `true` if it was not present before.
    pub fn insert(&mut self, key: K) -> Result<bool> {
        let hash = make_hash(&self.hash_builder, &key);
        match self.table.find_insert_bucket(hash, |stored| key.eq(stored)) {
            InsertSlot::Found => Ok(false),
            InsertSlot::Vacant(bucket) => {
                let hash_builder = &self.hash_builder;
                self.table
                    .occupy(bucket, key, |stored| make_hash(hash_builder, stored))?;
                Ok(true)
            }
        }
    }

    #[inline]
    pub fn contains<Q: ?Sized>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.get(key).is_some()
    }

    #[inline]
    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<&K>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        self.table
            .find(hash, |stored| key.eq(stored.borrow()))
            .map(|bucket| self.table.entry(bucket))
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove<Q: ?Sized>(&mut self, key: &Q) -> Result<bool>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        let bucket = match self.table.find(hash, |stored| key.eq(stored.borrow())) {
            Some(bucket) => bucket,
            None => return Ok(false),
        };
        let hash_builder = &self.hash_builder;
        self.table
            .erase_bucket(bucket, |stored| make_hash(hash_builder, stored))?;
        Ok(true)
    }

    /// Ensures room for `capacity` keys in total without another rehash.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        let hash_builder = &self.hash_builder;
        self.table
            .reserve(capacity, |stored| make_hash(hash_builder, stored))
    }

    /// Rehashes to at least `bucket_count` buckets, discarding tombstones.
    pub fn rehash(&mut self, bucket_count: usize) -> Result<()> {
        let hash_builder = &self.hash_builder;
        self.table
            .rehash_at_least(bucket_count, |stored| make_hash(hash_builder, stored))
    }

    /// Fails with `InvalidArgument` unless `0.0 < factor < 1.0`.
    pub fn set_max_load_factor(&mut self, factor: f32) -> Result<()> {
        self.table.set_max_load_factor(factor)
    }
}

impl<K, S, P: GrowthPolicy> SparseSet<K, S, P> {
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Buckets currently tombstoned; drops to zero on every rehash.
    #[inline]
    pub fn tombstone_count(&self) -> usize {
        self.table.tombstones()
    }

    #[inline]
    pub fn load_factor(&self) -> f32 {
        self.table.load_factor()
    }

    #[inline]
    pub fn max_load_factor(&self) -> f32 {
        self.table.config().max_load_factor()
    }

    /// Drops every key; capacity is retained.
    #[inline]
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Iterator over `&key` in bucket order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            inner: unsafe { self.table.raw_iter() },
            remaining: self.table.len(),
            marker: PhantomData,
        }
    }
}

#[cfg(feature = "snapshot")]
impl<K, S, P> SparseSet<K, S, P>
where
    K: Eq + Hash + Persist,
    S: BuildHasher,
    P: PersistPolicy,
{
    pub fn snapshot<B: BufMut>(&self, buf: &mut B) {
        self.table.snapshot(buf);
    }

    pub fn restore<B: Buf>(buf: &mut B) -> Result<Self>
    where
        S: Default,
    {
        let hash_builder = S::default();
        let table =
            RawSparseTable::restore(buf, |stored: &K| make_hash(&hash_builder, stored))?;
        Ok(Self {
            hash_builder,
            table,
        })
    }
}

impl<K, P> Default for SparseSet<K, DefaultHashBuilder, P>
where
    K: Eq + Hash,
    P: GrowthPolicy,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S, P> fmt::Debug for SparseSet<K, S, P>
where
    K: fmt::Debug,
    P: GrowthPolicy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<K, S, P> Extend<K> for SparseSet<K, S, P>
where
    K: Eq + Hash,
    S: BuildHasher,
    P: GrowthPolicy,
{
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        self.reserve(self.len() + lower)
            .unwrap_or_else(|err| panic!("sparse set reserve failed: {}", err));
        for key in iter {
            self.insert(key)
                .unwrap_or_else(|err| panic!("sparse set insert failed: {}", err));
        }
    }
}

impl<K, S, P> std::iter::FromIterator<K> for SparseSet<K, S, P>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
    P: GrowthPolicy,
{
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut set = Self::with_capacity_and_hasher(0, S::default());
        set.extend(iter);
        set
    }
}

/// Iterator over the keys of a [`SparseSet`].
pub struct Iter<'a, K> {
    inner: RawIter<K>,
    remaining: usize,
    marker: PhantomData<&'a K>,
}

impl<'a, K> Iterator for Iter<'a, K> {
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<&'a K> {
        let (_, key) = self.inner.next()?;
        self.remaining -= 1;
        Some(unsafe { &*key })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K> ExactSizeIterator for Iter<'a, K> {}
impl<'a, K> FusedIterator for Iter<'a, K> {}

/// Draining by-value iterator for [`SparseSet`].
pub struct IntoIter<K, P: GrowthPolicy> {
    table: RawSparseTable<K, P>,
    inner: RawIter<K>,
    remaining: usize,
}

impl<K, P: GrowthPolicy> Iterator for IntoIter<K, P> {
    type Item = K;

    #[inline]
    fn next(&mut self) -> Option<K> {
        let (bucket, _) = self.inner.next()?;
        self.remaining -= 1;
        Some(self.table.take_bucket(bucket))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, P: GrowthPolicy> ExactSizeIterator for IntoIter<K, P> {}
impl<K, P: GrowthPolicy> FusedIterator for IntoIter<K, P> {}

impl<'a, K, S, P: GrowthPolicy> IntoIterator for &'a SparseSet<K, S, P> {
    type Item = &'a K;
    type IntoIter = Iter<'a, K>;

    #[inline]
    fn into_iter(self) -> Iter<'a, K> {
        self.iter()
    }
}

impl<K, S, P: GrowthPolicy> IntoIterator for SparseSet<K, S, P> {
    type Item = K;
    type IntoIter = IntoIter<K, P>;

    #[inline]
    fn into_iter(self) -> IntoIter<K, P> {
        let remaining = self.table.len();
        let inner = unsafe { self.table.raw_iter() };
        IntoIter {
            table: self.table,
            inner,
            remaining,
        }
    }
}
