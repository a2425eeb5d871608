//! Entry and bucket-table primitives shared by both halves of the map.

use slotmap::DefaultKey;

use crate::error::MapError;

/// Minimum bucket-table capacity; capacities are always powers of two.
pub(crate) const MIN_CAPACITY: usize = 4;

/// Role tag selecting one of the map's two bucket tables.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Half {
    Primary,
    Secondary,
}

/// One key/value association plus its chain link.
///
/// Collision chains are singly linked through the entry arena: `next` is an
/// arena key, never a pointer, so unsplicing and migration are index
/// rewrites.
#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    /// Hash cached at insert; bucket indexing never re-enters user hash
    /// code after that.
    pub(crate) hash: u32,
    pub(crate) next: Option<DefaultKey>,
}

/// A fixed-size array of bucket-chain heads.
///
/// An empty `buckets` vector means the table was never allocated; otherwise
/// the capacity is a power of two and `mask` is capacity − 1.
#[derive(Debug, Default)]
pub(crate) struct BucketTable {
    pub(crate) buckets: Vec<Option<DefaultKey>>,
    pub(crate) mask: usize,
    pub(crate) used: usize,
}

impl BucketTable {
    /// Allocate a table of exactly `capacity` buckets. Fails without side
    /// effects if the bucket array cannot be allocated.
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self, MapError> {
        debug_assert!(capacity.is_power_of_two() && capacity >= MIN_CAPACITY);
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(capacity)
            .map_err(|_| MapError::AllocationFailed)?;
        buckets.resize_with(capacity, || None);
        Ok(Self {
            buckets,
            mask: capacity - 1,
            used: 0,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn is_unallocated(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Bucket index for a hash under this table's mask.
    #[inline]
    pub(crate) fn bucket(&self, hash: u32) -> usize {
        hash as usize & self.mask
    }

    /// Base address of the bucket array; a structural fingerprint input.
    pub(crate) fn base_addr(&self) -> usize {
        self.buckets.as_ptr() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: a default table is unallocated with zeroed bookkeeping.
    #[test]
    fn default_is_unallocated() {
        let t = BucketTable::default();
        assert!(t.is_unallocated());
        assert_eq!(t.capacity(), 0);
        assert_eq!(t.mask, 0);
        assert_eq!(t.used, 0);
    }

    /// Invariant: an allocated table has power-of-two capacity, all-empty
    /// buckets, and mask = capacity − 1.
    #[test]
    fn allocated_shape() {
        for capacity in [4usize, 8, 64, 1024] {
            let t = BucketTable::with_capacity(capacity).unwrap();
            assert!(!t.is_unallocated());
            assert_eq!(t.capacity(), capacity);
            assert_eq!(t.mask, capacity - 1);
            assert_eq!(t.used, 0);
            assert!(t.buckets.iter().all(Option::is_none));
        }
    }

    /// Invariant: bucket indices stay within capacity for any hash.
    #[test]
    fn bucket_indices_masked() {
        let t = BucketTable::with_capacity(8).unwrap();
        for hash in [0u32, 1, 7, 8, 9, u32::MAX] {
            assert!(t.bucket(hash) < t.capacity());
        }
        assert_eq!(t.bucket(8), 0);
        assert_eq!(t.bucket(9), 1);
    }
}
