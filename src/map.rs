use core::fmt;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash, Hasher};

use crate::config::TableConfig;
use crate::error::Result;
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

#[inline]
pub(crate) fn make_hash<K: Hash + ?Sized>(hash_builder: &impl BuildHasher, val: &K) -> u64 {
    let mut state = hash_builder.build_hasher();
    val.hash(&mut state);
    state.finish()
}

/// A memory-efficient hash map.
///
/// Entries live in a bitmap-compressed sparse bucket array probed with
/// triangular offsets; the per-entry overhead is a couple of bits plus the
/// slack of one partially filled slot block per 64 buckets. Mutating
/// operations that may allocate or rehash return a `Result`.
///
/// Any mutation invalidates references and iterators into the map.
pub struct SparseMap<K, V, S = DefaultHashBuilder, P: GrowthPolicy = PowerOfTwoPolicy> {
    pub(crate) hash_builder: S,
    pub(crate) table: RawSparseTable<(K, V), P>,
}

impl<K, V, P> SparseMap<K, V, DefaultHashBuilder, P>
where
    K: Eq + Hash,
    P: GrowthPolicy,
{
    /// Creates an empty map.
    ///
    /// Panics if the growth policy cannot provide the initial capacity.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a map with room for `capacity` entries before any rehash.
    ///
    /// Panics if the growth policy cannot provide the requested capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S, P> SparseMap<K, V, S, P>
where
    K: Eq + Hash,
    S: BuildHasher,
    P: GrowthPolicy,
{
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::with_config(capacity, TableConfig::default(), hash_builder)
    }

    /// Creates a map with explicit load management knobs.
    ///
    /// Panics if the growth policy cannot provide the requested capacity;
    /// invalid factors are rejected earlier by [`TableConfig::new`].
    pub fn with_config(capacity: usize, config: TableConfig, hash_builder: S) -> Self {
        let table = RawSparseTable::with_capacity(capacity, config)
            .unwrap_or_else(|err| panic!("sparse map construction failed: {}", err));
        Self {
            hash_builder,
            table,
        }
    }

    /// Inserts a key-value pair; an already present key is left untouched.
    ///
    /// Returns `true` if the entry was inserted, `false` if the key was
    /// already present. Updates go through [`get_mut`](Self::get_mut),
    /// [`rmw`](Self::rmw) or [`iter_mut`](Self::iter_mut).
    pub fn insert(&mut self, key: K, value: V) -> Result<bool> {
        let hash = make_hash(&self.hash_builder, &key);
        match self.table.find_insert_bucket(hash, |entry| key.eq(&entry.0)) {
            InsertSlot::Found => Ok(false),
            InsertSlot::Vacant(bucket) => {
                let hash_builder = &self.hash_builder;
                self.table.occupy(bucket, (key, value), |entry| {
                    make_hash(hash_builder, &entry.0)
                })?;
                Ok(true)
            }
        }
    }

    #[inline]
    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.get_key_value(key).map(|(_, v)| v)
    }

    #[inline]
    pub fn get_key_value<Q: ?Sized>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        self.table
            .find(hash, |entry| key.eq(entry.0.borrow()))
            .map(|bucket| {
                let &(ref key, ref value) = self.table.entry(bucket);
                (key, value)
            })
    }

    /// Mutable access to the value behind `key`; the key itself stays
    /// immutable.
    #[inline]
    pub fn get_mut<Q: ?Sized>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        match self.table.find(hash, |entry| key.eq(entry.0.borrow())) {
            Some(bucket) => Some(&mut self.table.entry_mut(bucket).1),
            None => None,
        }
    }

    #[inline]
    pub fn contains_key<Q: ?Sized>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        self.table
            .find(hash, |entry| key.eq(entry.0.borrow()))
            .is_some()
    }

    /// Read-Modify-Write operation on the value behind `key`.
    #[inline]
    pub fn rmw<Q: ?Sized, F>(&mut self, key: &Q, mut f: F) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
        F: FnMut(&mut V),
    {
        match self.get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Removes `key`, returning its value. The bucket is tombstoned; once
    /// tombstones cross their threshold the table sweeps itself in place.
    pub fn remove<Q: ?Sized>(&mut self, key: &Q) -> Result<Option<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, key);
        let bucket = match self.table.find(hash, |entry| key.eq(entry.0.borrow())) {
            Some(bucket) => bucket,
            None => return Ok(None),
        };
        let hash_builder = &self.hash_builder;
        let (_, value) = self
            .table
            .remove_bucket(bucket, |entry| make_hash(hash_builder, &entry.0))?;
        Ok(Some(value))
    }

    /// Ensures room for `capacity` entries in total without another rehash.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        let hash_builder = &self.hash_builder;
        self.table
            .reserve(capacity, |entry| make_hash(hash_builder, &entry.0))
    }

    /// Rehashes to at least `bucket_count` buckets, discarding tombstones.
    pub fn rehash(&mut self, bucket_count: usize) -> Result<()> {
        let hash_builder = &self.hash_builder;
        self.table
            .rehash_at_least(bucket_count, |entry| make_hash(hash_builder, &entry.0))
    }

    /// Fails with `InvalidArgument` unless `0.0 < factor < 1.0`.
    pub fn set_max_load_factor(&mut self, factor: f32) -> Result<()> {
        self.table.set_max_load_factor(factor)
    }
}

impl<K, V, S, P: GrowthPolicy> SparseMap<K, V, S, P> {
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

    /// Drops every entry; capacity is retained.
    #[inline]
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Iterator over `(&key, &value)` in bucket order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: unsafe { self.table.raw_iter() },
            remaining: self.table.len(),
            marker: PhantomData,
        }
    }

    /// Iterator over `(&key, &mut value)` in bucket order; keys stay
    /// immutable.
    #[inline]
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: unsafe { self.table.raw_iter() },
            remaining: self.table.len(),
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    #[inline]
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    #[inline]
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.iter_mut().map(|(_, v)| v)
    }
}

#[cfg(feature = "snapshot")]
impl<K, V, S, P> SparseMap<K, V, S, P>
where
    K: Eq + Hash + Persist,
    V: Persist,
    S: BuildHasher,
    P: PersistPolicy,
{
    /// Writes the whole map into `buf`; see the snapshot module for the
    /// layout.
    pub fn snapshot<B: BufMut>(&self, buf: &mut B) {
        self.table.snapshot(buf);
    }

    /// Rebuilds a map persisted by [`snapshot`](Self::snapshot). Entries
    /// are re-probed with a fresh `S::default()` hasher, which must hash
    /// like the one the snapshot was taken with.
    pub fn restore<B: Buf>(buf: &mut B) -> Result<Self>
    where
        S: Default,
    {
        let hash_builder = S::default();
        let table = RawSparseTable::restore(buf, |entry: &(K, V)| {
            make_hash(&hash_builder, &entry.0)
        })?;
        Ok(Self {
            hash_builder,
            table,
        })
    }
}

impl<K, V, P> Default for SparseMap<K, V, DefaultHashBuilder, P>
where
    K: Eq + Hash,
    P: GrowthPolicy,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, P> fmt::Debug for SparseMap<K, V, S, P>
where
    K: fmt::Debug,
    V: fmt::Debug,
    P: GrowthPolicy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, P> Extend<(K, V)> for SparseMap<K, V, S, P>
where
    K: Eq + Hash,
    S: BuildHasher,
    P: GrowthPolicy,
{
    /// Inserts every pair; keys already present keep their value. Panics on
    /// allocation failure, like the infallible std collections.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        self.reserve(self.len() + lower)
            .unwrap_or_else(|err| panic!("sparse map reserve failed: {}", err));
        for (key, value) in iter {
            self.insert(key, value)
                .unwrap_or_else(|err| panic!("sparse map insert failed: {}", err));
        }
    }
}

impl<K, V, S, P> std::iter::FromIterator<(K, V)> for SparseMap<K, V, S, P>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
    P: GrowthPolicy,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_capacity_and_hasher(0, S::default());
        map.extend(iter);
        map
    }
}

/// Iterator over the entries of a [`SparseMap`].
pub struct Iter<'a, K, V> {
    inner: RawIter<(K, V)>,
    remaining: usize,
    marker: PhantomData<&'a (K, V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<(&'a K, &'a V)> {
        let (_, entry) = self.inner.next()?;
        self.remaining -= 1;
        unsafe {
            let &(ref key, ref value) = &*entry;
            Some((key, value))
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> ExactSizeIterator for Iter<'a, K, V> {}
impl<'a, K, V> FusedIterator for Iter<'a, K, V> {}

/// Iterator over the entries of a [`SparseMap`] with mutable values.
pub struct IterMut<'a, K, V> {
    inner: RawIter<(K, V)>,
    remaining: usize,
    marker: PhantomData<&'a mut (K, V)>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<(&'a K, &'a mut V)> {
        let (_, entry) = self.inner.next()?;
        self.remaining -= 1;
        unsafe {
            let &mut (ref key, ref mut value) = &mut *entry;
            Some((key, value))
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> ExactSizeIterator for IterMut<'a, K, V> {}
impl<'a, K, V> FusedIterator for IterMut<'a, K, V> {}

/// Draining by-value iterator for [`SparseMap`].
pub struct IntoIter<K, V, P: GrowthPolicy> {
    table: RawSparseTable<(K, V), P>,
    inner: RawIter<(K, V)>,
    remaining: usize,
}

impl<K, V, P: GrowthPolicy> Iterator for IntoIter<K, V, P> {
    type Item = (K, V);

    #[inline]
    fn next(&mut self) -> Option<(K, V)> {
        let (bucket, _) = self.inner.next()?;
        self.remaining -= 1;
        Some(self.table.take_bucket(bucket))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, P: GrowthPolicy> ExactSizeIterator for IntoIter<K, V, P> {}
impl<K, V, P: GrowthPolicy> FusedIterator for IntoIter<K, V, P> {}

impl<'a, K, V, S, P: GrowthPolicy> IntoIterator for &'a SparseMap<K, V, S, P> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    #[inline]
    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<'a, K, V, S, P: GrowthPolicy> IntoIterator for &'a mut SparseMap<K, V, S, P> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    #[inline]
    fn into_iter(self) -> IterMut<'a, K, V> {
        self.iter_mut()
    }
}

impl<K, V, S, P: GrowthPolicy> IntoIterator for SparseMap<K, V, S, P> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, P>;

    #[inline]
    fn into_iter(self) -> IntoIter<K, V, P> {
        let remaining = self.table.len();
        // The iterator's raw pointers stay valid across the move: the group
        // array lives on the heap and draining never reallocates slots.
        let inner = unsafe { self.table.raw_iter() };
        IntoIter {
            table: self.table,
            inner,
            remaining,
        }
    }
}
