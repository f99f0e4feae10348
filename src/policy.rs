//! Hash-to-bucket mapping and capacity sequencing.
//!
//! A [`GrowthPolicy`] is a small value object fixed at table instantiation
//! time. The engine is monomorphized over it, so `bucket_for_hash` compiles
//! down to a mask or a division by a literal constant.

use crate::error::{Result, SparseTableError};

#[cfg(feature = "snapshot")]
use bytes::{Buf, BufMut};

pub trait GrowthPolicy: Sized {
    /// Chooses the actual initial capacity, at least `min_bucket_count`.
    fn initialize(min_bucket_count: usize) -> Result<Self>;

    /// Buckets currently addressed by the policy.
    fn bucket_count(&self) -> usize;

    /// Maps a hash onto `[0, bucket_count)`. Must be pure and fast.
    fn bucket_for_hash(&self, hash: u64) -> usize;

    /// Next larger capacity the policy supports. Strictly exceeds the
    /// current capacity.
    fn next_bucket_count(&self) -> Result<usize>;

    /// Largest capacity the policy can ever address.
    fn max_bucket_count(&self) -> usize;
}

/// Snapshot hooks for a growth policy.
///
/// The persisted state carries a one-byte tag so that restoring a snapshot
/// with a different policy type fails with `DeserializationMismatch` instead
/// of silently misplacing every entry.
#[cfg(feature = "snapshot")]
pub trait PersistPolicy: GrowthPolicy {
    fn persist<B: BufMut>(&self, buf: &mut B);
    fn restore<B: Buf>(buf: &mut B) -> Result<Self>;
}

#[cfg(feature = "snapshot")]
mod tag {
    pub const POWER_OF_TWO: u8 = 1;
    pub const PRIME: u8 = 2;
    pub const FACTOR: u8 = 3;
}

/// Capacity is a power of two and `bucket_for_hash` is a mask.
///
/// Fast, but sensitive to hashes with correlated low bits; the default
/// fxhash build hasher mixes well enough for typical keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerOfTwoPolicy {
    // One less than the number of buckets, as in any masked table.
    bucket_mask: usize,
}

impl GrowthPolicy for PowerOfTwoPolicy {
    fn initialize(min_bucket_count: usize) -> Result<Self> {
        let buckets = min_bucket_count
            .max(1)
            .checked_next_power_of_two()
            .ok_or(SparseTableError::MaxCapacityExceeded(min_bucket_count))?;
        Ok(Self {
            bucket_mask: buckets - 1,
        })
    }

    #[inline]
    fn bucket_count(&self) -> usize {
        self.bucket_mask + 1
    }

    #[inline]
    fn bucket_for_hash(&self, hash: u64) -> usize {
        // On 32-bit platforms we simply ignore the higher hash bits.
        hash as usize & self.bucket_mask
    }

    fn next_bucket_count(&self) -> Result<usize> {
        self.bucket_count()
            .checked_mul(2)
            .ok_or(SparseTableError::MaxCapacityExceeded(self.bucket_count()))
    }

    #[inline]
    fn max_bucket_count(&self) -> usize {
        (usize::max_value() >> 1) + 1
    }
}

#[cfg(feature = "snapshot")]
impl PersistPolicy for PowerOfTwoPolicy {
    fn persist<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(tag::POWER_OF_TWO);
        buf.put_u64_le(self.bucket_count() as u64);
    }

    fn restore<B: Buf>(buf: &mut B) -> Result<Self> {
        crate::snapshot::expect_tag(buf, tag::POWER_OF_TWO, "power-of-two policy")?;
        let buckets = crate::snapshot::read_u64(buf)? as usize;
        if !buckets.is_power_of_two() {
            return Err(SparseTableError::DeserializationMismatch(format!(
                "{} is not a power-of-two bucket count",
                buckets
            )));
        }
        Ok(Self {
            bucket_mask: buckets - 1,
        })
    }
}

macro_rules! prime_mod_table {
    ($($index:tt => $prime:expr,)+) => {
        /// Monotone capacity ladder of primes, roughly doubling per step.
        const PRIMES: &[u64] = &[$($prime,)+];

        /// Modulo dispatched over the ladder index so every arm divides by a
        /// literal and the compiler emits magic-number division.
        #[inline]
        fn mod_prime(index: usize, hash: u64) -> u64 {
            match index {
                $($index => hash % $prime,)+
                _ => unreachable!("prime ladder index out of range"),
            }
        }
    };
}

prime_mod_table! {
    0 => 5,
    1 => 17,
    2 => 29,
    3 => 53,
    4 => 97,
    5 => 193,
    6 => 389,
    7 => 769,
    8 => 1543,
    9 => 3079,
    10 => 6151,
    11 => 12_289,
    12 => 24_593,
    13 => 49_157,
    14 => 98_317,
    15 => 196_613,
    16 => 393_241,
    17 => 786_433,
    18 => 1_572_869,
    19 => 3_145_739,
    20 => 6_291_469,
    21 => 12_582_917,
    22 => 25_165_843,
    23 => 50_331_653,
    24 => 100_663_319,
    25 => 201_326_611,
    26 => 402_653_189,
    27 => 805_306_457,
    28 => 1_610_612_741,
    29 => 3_221_225_473,
    30 => 4_294_967_291,
}

/// Capacity walks a fixed table of primes and `bucket_for_hash` is a modulo.
///
/// Resilient to hashes with correlated low bits at the price of a division,
/// kept cheap by dispatching to a per-prime constant modulo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimeGrowthPolicy {
    index: usize,
}

impl GrowthPolicy for PrimeGrowthPolicy {
    fn initialize(min_bucket_count: usize) -> Result<Self> {
        let min = min_bucket_count as u64;
        let index = PRIMES
            .iter()
            .position(|&p| p >= min)
            .ok_or_else(|| SparseTableError::MaxCapacityExceeded(Self::top()))?;
        Ok(Self { index })
    }

    #[inline]
    fn bucket_count(&self) -> usize {
        PRIMES[self.index] as usize
    }

    #[inline]
    fn bucket_for_hash(&self, hash: u64) -> usize {
        mod_prime(self.index, hash) as usize
    }

    fn next_bucket_count(&self) -> Result<usize> {
        PRIMES
            .get(self.index + 1)
            .map(|&p| p as usize)
            .ok_or_else(|| SparseTableError::MaxCapacityExceeded(Self::top()))
    }

    #[inline]
    fn max_bucket_count(&self) -> usize {
        Self::top()
    }
}

impl PrimeGrowthPolicy {
    #[inline]
    fn top() -> usize {
        PRIMES[PRIMES.len() - 1] as usize
    }
}

#[cfg(feature = "snapshot")]
impl PersistPolicy for PrimeGrowthPolicy {
    fn persist<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(tag::PRIME);
        buf.put_u64_le(self.index as u64);
    }

    fn restore<B: Buf>(buf: &mut B) -> Result<Self> {
        crate::snapshot::expect_tag(buf, tag::PRIME, "prime policy")?;
        let index = crate::snapshot::read_u64(buf)? as usize;
        if index >= PRIMES.len() {
            return Err(SparseTableError::DeserializationMismatch(format!(
                "prime ladder index {} out of range",
                index
            )));
        }
        Ok(Self { index })
    }
}

/// Capacity grows by the compile-time ratio `NUM / DEN` and
/// `bucket_for_hash` is a generic runtime modulo.
///
/// The slowest of the bundled policies but the only one with a tunable
/// growth factor, e.g. `FactorGrowthPolicy<3, 2>` for 1.5x growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactorGrowthPolicy<const NUM: u32, const DEN: u32> {
    bucket_count: usize,
}

impl<const NUM: u32, const DEN: u32> GrowthPolicy for FactorGrowthPolicy<NUM, DEN> {
    fn initialize(min_bucket_count: usize) -> Result<Self> {
        if DEN == 0 || NUM <= DEN {
            return Err(SparseTableError::InvalidArgument(format!(
                "growth factor {}/{} must exceed 1",
                NUM, DEN
            )));
        }
        Ok(Self {
            bucket_count: min_bucket_count.max(1),
        })
    }

    #[inline]
    fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    #[inline]
    fn bucket_for_hash(&self, hash: u64) -> usize {
        (hash % self.bucket_count as u64) as usize
    }

    fn next_bucket_count(&self) -> Result<usize> {
        let grown = self
            .bucket_count
            .checked_mul(NUM as usize)
            .map(|n| n / DEN as usize)
            .ok_or(SparseTableError::MaxCapacityExceeded(self.bucket_count))?;
        // A small count times a ratio close to 1 may round back down.
        Ok(grown.max(self.bucket_count + 1))
    }

    #[inline]
    fn max_bucket_count(&self) -> usize {
        usize::max_value()
    }
}

#[cfg(feature = "snapshot")]
impl<const NUM: u32, const DEN: u32> PersistPolicy for FactorGrowthPolicy<NUM, DEN> {
    fn persist<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(tag::FACTOR);
        buf.put_u32_le(NUM);
        buf.put_u32_le(DEN);
        buf.put_u64_le(self.bucket_count as u64);
    }

    fn restore<B: Buf>(buf: &mut B) -> Result<Self> {
        crate::snapshot::expect_tag(buf, tag::FACTOR, "factor policy")?;
        let num = crate::snapshot::read_u32(buf)?;
        let den = crate::snapshot::read_u32(buf)?;
        if num != NUM || den != DEN {
            return Err(SparseTableError::DeserializationMismatch(format!(
                "snapshot growth factor {}/{} does not match {}/{}",
                num, den, NUM, DEN
            )));
        }
        let bucket_count = crate::snapshot::read_u64(buf)? as usize;
        if bucket_count == 0 {
            return Err(SparseTableError::DeserializationMismatch(
                "factor policy bucket count is zero".into(),
            ));
        }
        Ok(Self { bucket_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_rounds_up() {
        let policy = PowerOfTwoPolicy::initialize(9).unwrap();
        assert_eq!(policy.bucket_count(), 16);
        assert_eq!(policy.next_bucket_count().unwrap(), 32);
        assert_eq!(policy.bucket_for_hash(0x1234_5678), 0x1234_5678 & 15);
    }

    #[test]
    fn power_of_two_overflow() {
        let policy = PowerOfTwoPolicy::initialize(usize::max_value() >> 1).unwrap();
        assert!(policy.next_bucket_count().is_err());
    }

    #[test]
    fn prime_ladder_is_monotone() {
        for window in PRIMES.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn prime_selection() {
        let policy = PrimeGrowthPolicy::initialize(16).unwrap();
        assert_eq!(policy.bucket_count(), 17);
        assert_eq!(policy.next_bucket_count().unwrap(), 29);
        for hash in &[0u64, 16, 17, u64::max_value()] {
            assert!(policy.bucket_for_hash(*hash) < 17);
            assert_eq!(policy.bucket_for_hash(*hash) as u64, hash % 17);
        }
    }

    #[test]
    fn prime_exhaustion() {
        assert!(PrimeGrowthPolicy::initialize(usize::max_value()).is_err());
        let last = PrimeGrowthPolicy::initialize(4_294_967_291).unwrap();
        assert!(last.next_bucket_count().is_err());
    }

    #[test]
    fn factor_growth() {
        let policy = FactorGrowthPolicy::<3, 2>::initialize(100).unwrap();
        assert_eq!(policy.bucket_count(), 100);
        assert_eq!(policy.next_bucket_count().unwrap(), 150);

        // Ratios close to 1 still grow by at least one bucket.
        let tiny = FactorGrowthPolicy::<17, 16>::initialize(4).unwrap();
        assert_eq!(tiny.next_bucket_count().unwrap(), 5);
    }

    #[test]
    fn factor_rejects_shrinking_ratio() {
        assert!(FactorGrowthPolicy::<1, 2>::initialize(16).is_err());
        assert!(FactorGrowthPolicy::<2, 2>::initialize(16).is_err());
        assert!(FactorGrowthPolicy::<2, 0>::initialize(16).is_err());
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn persist_restore_round_trip() {
        let policy = PrimeGrowthPolicy::initialize(100).unwrap();
        let mut buf = Vec::new();
        policy.persist(&mut buf);
        let restored = PrimeGrowthPolicy::restore(&mut buf.as_slice()).unwrap();
        assert_eq!(policy, restored);
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn restore_rejects_wrong_policy() {
        let policy = PowerOfTwoPolicy::initialize(16).unwrap();
        let mut buf = Vec::new();
        policy.persist(&mut buf);
        assert!(PrimeGrowthPolicy::restore(&mut buf.as_slice()).is_err());
    }
}
