//! The table pair: two bucket tables over one entry arena, with a cursor
//! that migrates chains from primary to secondary one bucket at a time.

use core::mem;
use std::time::{Duration, Instant};

use slotmap::{DefaultKey, SlotMap};
use tracing::debug;

use crate::behavior::MapBehavior;
use crate::error::MapError;
use crate::hashing;
use crate::iter::{Iter, SafeIter};
use crate::table::{BucketTable, Entry, Half, MIN_CAPACITY};

/// Per-map tuning knobs, replacing any notion of process-wide flags: two
/// maps in one process can be configured independently.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gate for automatic growth and explicit shrinking. Hosts clear this
    /// while a snapshot of the process is being forked, so bucket arrays
    /// stay put and copy-on-write pages stay shared.
    pub resize_enabled: bool,
    /// Occupancy-to-capacity ratio past which growth proceeds even with
    /// `resize_enabled` off.
    pub force_resize_ratio: usize,
    /// Buckets migrated per batch by [`RehashMap::rehash_for`]; the clock
    /// is checked between batches, so one batch is the overshoot
    /// granularity.
    pub rehash_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resize_enabled: true,
            force_resize_ratio: 5,
            rehash_batch: 100,
        }
    }
}

/// Outcome of [`RehashMap::replace`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Upsert {
    /// The key was absent; a new entry was created.
    Created,
    /// The key was present; its value was replaced.
    Replaced,
}

/// Stable reference to one entry.
///
/// Handles are generational: once the entry is deleted the handle resolves
/// to `None` forever, even if its storage slot is later reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EntryHandle(DefaultKey);

impl EntryHandle {
    pub(crate) fn new(slot: DefaultKey) -> Self {
        EntryHandle(slot)
    }

    pub fn key<'a, B: MapBehavior>(&self, map: &'a RehashMap<B>) -> Option<&'a B::Key> {
        map.entries.get(self.0).map(|e| &e.key)
    }

    pub fn value<'a, B: MapBehavior>(&self, map: &'a RehashMap<B>) -> Option<&'a B::Value> {
        map.entries.get(self.0).map(|e| &e.value)
    }

    pub fn value_mut<'a, B: MapBehavior>(
        &self,
        map: &'a mut RehashMap<B>,
    ) -> Option<&'a mut B::Value> {
        map.entries.get_mut(self.0).map(|e| &mut e.value)
    }
}

/// A chained hash map that resizes through incremental rehashing.
///
/// While idle all entries live in the primary table. While migrating, new
/// entries go to the secondary table, lookups probe primary then secondary,
/// and every mutating or probing call moves at most one primary bucket's
/// chain over to the secondary table before doing its own work.
pub struct RehashMap<B: MapBehavior> {
    behavior: B,
    config: Config,
    /// Entry storage shared by both halves; migration relinks arena keys,
    /// the entries themselves never move.
    pub(crate) entries: SlotMap<DefaultKey, Entry<B::Key, B::Value>>,
    pub(crate) primary: BucketTable,
    pub(crate) secondary: BucketTable,
    /// Next primary bucket to migrate; `None` while idle. The secondary
    /// table is allocated exactly while this is `Some`.
    pub(crate) rehash_index: Option<usize>,
}

/// Why an insertion did not create an entry.
enum Rejection<V> {
    Alloc,
    Exists { existing: DefaultKey, value: V },
}

impl<B: MapBehavior> RehashMap<B> {
    /// Create an empty map. Nothing is allocated until the first insert.
    pub fn new(behavior: B) -> Self {
        Self::with_config(behavior, Config::default())
    }

    pub fn with_config(behavior: B, config: Config) -> Self {
        Self {
            behavior,
            config,
            entries: SlotMap::with_key(),
            primary: BucketTable::default(),
            secondary: BucketTable::default(),
            rehash_index: None,
        }
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Total bucket count across both tables.
    pub fn slots(&self) -> usize {
        self.primary.capacity() + self.secondary.capacity()
    }

    /// Live entry count across both tables.
    pub fn len(&self) -> usize {
        self.primary.used + self.secondary.used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_index.is_some()
    }

    pub fn enable_resize(&mut self) {
        self.config.resize_enabled = true;
    }

    pub fn disable_resize(&mut self) {
        self.config.resize_enabled = false;
    }

    /// Insert a new key/value pair.
    ///
    /// Fails with [`MapError::KeyExists`] if the key is already present,
    /// leaving the map unchanged (the rejected pair is dropped).
    pub fn add(&mut self, key: B::Key, value: B::Value) -> Result<EntryHandle, MapError> {
        match self.add_inner(key, value, true) {
            Ok(handle) => Ok(handle),
            Err(Rejection::Alloc) => Err(MapError::AllocationFailed),
            Err(Rejection::Exists { .. }) => Err(MapError::KeyExists),
        }
    }

    /// Insert, or overwrite the value of an existing entry.
    ///
    /// The new value is committed before the old one is handed to the
    /// behavior's teardown hook.
    pub fn replace(&mut self, key: B::Key, value: B::Value) -> Result<Upsert, MapError> {
        match self.add_inner(key, value, true) {
            Ok(_) => Ok(Upsert::Created),
            Err(Rejection::Alloc) => Err(MapError::AllocationFailed),
            Err(Rejection::Exists { existing, value }) => {
                let value = self.behavior.dup_value(value);
                let old = mem::replace(&mut self.entries[existing].value, value);
                self.behavior.drop_value(old);
                Ok(Upsert::Replaced)
            }
        }
    }

    /// Look up a key, returning a handle to its entry.
    pub fn find(&mut self, key: &B::Key) -> Option<EntryHandle> {
        self.rehash_step();
        self.locate(key).map(EntryHandle::new)
    }

    /// Look up a key, returning its value.
    pub fn fetch_value(&mut self, key: &B::Key) -> Option<&B::Value> {
        self.rehash_step();
        let slot = self.locate(key)?;
        Some(&self.entries[slot].value)
    }

    /// Remove an entry, tearing down its key and value through the
    /// behavior's hooks.
    pub fn delete(&mut self, key: &B::Key) -> Result<(), MapError> {
        self.rehash_step();
        match self.unlink_key(key) {
            Some(entry) => {
                self.drop_entry(entry);
                Ok(())
            }
            None => Err(MapError::KeyNotFound),
        }
    }

    /// Remove an entry and hand its key and value back to the caller,
    /// bypassing the teardown hooks.
    pub fn take(&mut self, key: &B::Key) -> Option<(B::Key, B::Value)> {
        self.rehash_step();
        self.unlink_key(key).map(|e| (e.key, e.value))
    }

    /// Pre-size the table, e.g. ahead of a bulk load. While idle this
    /// starts a migration to the next power of two ≥ `target` (installed
    /// directly if nothing is allocated yet).
    pub fn expand(&mut self, target: usize) -> Result<(), MapError> {
        if self.is_rehashing() {
            return Err(MapError::RehashInProgress);
        }
        if target < self.primary.used {
            return Err(MapError::CapacityBelowUsed);
        }
        let capacity = target
            .max(MIN_CAPACITY)
            .checked_next_power_of_two()
            .ok_or(MapError::AllocationFailed)?;
        let table = BucketTable::with_capacity(capacity)?;
        if self.primary.is_unallocated() {
            // Nothing to migrate; the new table simply becomes primary.
            self.primary = table;
        } else {
            debug!(
                from = self.primary.capacity(),
                to = capacity,
                "incremental rehash started"
            );
            self.secondary = table;
            self.rehash_index = Some(0);
        }
        Ok(())
    }

    /// Shrink to the smallest capacity that still holds the live entries,
    /// after a mass deletion.
    pub fn resize_to_fit(&mut self) -> Result<(), MapError> {
        if !self.config.resize_enabled {
            return Err(MapError::ResizeDisabled);
        }
        if self.is_rehashing() {
            return Err(MapError::RehashInProgress);
        }
        self.expand(self.primary.used.max(MIN_CAPACITY))
    }

    /// Advance the migration by up to `steps` buckets. Returns whether a
    /// migration is still in progress afterwards.
    ///
    /// Each step moves one whole bucket chain, so the cost of a call is
    /// bounded by `steps` chains plus the empty buckets skipped over.
    pub fn rehash(&mut self, steps: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        for _ in 0..steps {
            if self.primary.used == 0 {
                break;
            }
            self.migrate_one_bucket();
        }
        if self.primary.used == 0 {
            self.finish_rehash();
            return false;
        }
        true
    }

    /// Advance the migration in batches until the time budget is spent or
    /// the migration completes. Intended for a periodic maintenance call
    /// outside the hot path.
    ///
    /// The clock is checked between batches of `Config::rehash_batch`
    /// steps, and the return value counts steps in completed batches, so
    /// `0` can mean the migration finished inside the first batch.
    pub fn rehash_for(&mut self, budget: Duration) -> usize {
        let batch = self.config.rehash_batch.max(1);
        let start = Instant::now();
        let mut steps = 0;
        while self.rehash(batch) {
            steps += batch;
            if start.elapsed() >= budget {
                break;
            }
        }
        steps
    }

    /// Read-only iterator over every entry of both tables. Any mutation of
    /// the map while it exists is a caller bug; a structural fingerprint is
    /// re-checked when the iterator is dropped.
    pub fn iter(&self) -> Iter<'_, B> {
        Iter::new(self)
    }

    /// Mutation-tolerant cursor. Holding it keeps the map exclusively
    /// borrowed, so no migration step can run underneath it; additions and
    /// removals during the scan go through the cursor itself.
    pub fn iter_safe(&mut self) -> SafeIter<'_, B> {
        SafeIter::new(self)
    }

    // ---- internals ----

    pub(crate) fn table(&self, half: Half) -> &BucketTable {
        match half {
            Half::Primary => &self.primary,
            Half::Secondary => &self.secondary,
        }
    }

    fn table_mut(&mut self, half: Half) -> &mut BucketTable {
        match half {
            Half::Primary => &mut self.primary,
            Half::Secondary => &mut self.secondary,
        }
    }

    /// The halves a scan must visit: secondary only while migrating.
    fn scan_halves(&self) -> &'static [Half] {
        if self.is_rehashing() {
            &[Half::Primary, Half::Secondary]
        } else {
            &[Half::Primary]
        }
    }

    /// One opportunistic migration step, run at the top of every mutating
    /// or probing call while a migration is in progress.
    fn rehash_step(&mut self) {
        if self.is_rehashing() {
            self.rehash(1);
        }
    }

    fn migrate_one_bucket(&mut self) {
        let Some(mut index) = self.rehash_index else {
            return;
        };
        loop {
            assert!(
                index < self.primary.capacity(),
                "rehash cursor ran past the primary table with {} entries remaining",
                self.primary.used
            );
            if self.primary.buckets[index].is_some() {
                break;
            }
            index += 1;
        }
        // Move the whole chain, re-indexing each entry under the secondary
        // mask. Entries are relinked, never reallocated.
        let mut cursor = self.primary.buckets[index].take();
        while let Some(slot) = cursor {
            let hash = self.entries[slot].hash;
            let bucket = self.secondary.bucket(hash);
            let head = self.secondary.buckets[bucket].replace(slot);
            let entry = &mut self.entries[slot];
            cursor = mem::replace(&mut entry.next, head);
            self.primary.used -= 1;
            self.secondary.used += 1;
        }
        self.rehash_index = Some(index + 1);
    }

    fn finish_rehash(&mut self) {
        debug_assert!(self.primary.buckets.iter().all(Option::is_none));
        self.primary = mem::take(&mut self.secondary);
        self.rehash_index = None;
        debug!(
            capacity = self.primary.capacity(),
            used = self.primary.used,
            "incremental rehash complete"
        );
    }

    /// Allocate or grow ahead of an insert. No-op while migrating.
    fn expand_if_needed(&mut self) -> Result<(), MapError> {
        if self.is_rehashing() {
            return Ok(());
        }
        if self.primary.is_unallocated() {
            return self.expand(MIN_CAPACITY);
        }
        let used = self.primary.used;
        let capacity = self.primary.capacity();
        if used >= capacity
            && (self.config.resize_enabled || used / capacity > self.config.force_resize_ratio)
        {
            // Double the occupancy counting the entry about to be inserted.
            return self.expand(used.saturating_add(1).saturating_mul(2));
        }
        Ok(())
    }

    pub(crate) fn locate(&self, key: &B::Key) -> Option<DefaultKey> {
        if self.primary.is_unallocated() {
            return None;
        }
        self.locate_hashed(self.behavior.hash(key), key)
    }

    fn locate_hashed(&self, hash: u32, key: &B::Key) -> Option<DefaultKey> {
        for &half in self.scan_halves() {
            let table = self.table(half);
            let mut cursor = table.buckets[table.bucket(hash)];
            while let Some(slot) = cursor {
                let entry = &self.entries[slot];
                if entry.hash == hash && self.behavior.keys_equal(&entry.key, key) {
                    return Some(slot);
                }
                cursor = entry.next;
            }
        }
        None
    }

    /// Bucket index in the half that receives new entries, or the existing
    /// entry when the key is already present.
    fn insertion_bucket(&self, hash: u32, key: &B::Key) -> Result<usize, DefaultKey> {
        if let Some(existing) = self.locate_hashed(hash, key) {
            return Err(existing);
        }
        let target = if self.is_rehashing() {
            &self.secondary
        } else {
            &self.primary
        };
        Ok(target.bucket(hash))
    }

    fn add_inner(
        &mut self,
        key: B::Key,
        value: B::Value,
        micro_step: bool,
    ) -> Result<EntryHandle, Rejection<B::Value>> {
        if micro_step {
            self.rehash_step();
        }
        if self.expand_if_needed().is_err() {
            return Err(Rejection::Alloc);
        }
        let hash = self.behavior.hash(&key);
        let bucket = match self.insertion_bucket(hash, &key) {
            Ok(bucket) => bucket,
            Err(existing) => return Err(Rejection::Exists { existing, value }),
        };
        let key = self.behavior.dup_key(key);
        let value = self.behavior.dup_value(value);
        let slot = self.entries.insert(Entry {
            key,
            value,
            hash,
            next: None,
        });
        let half = if self.is_rehashing() {
            Half::Secondary
        } else {
            Half::Primary
        };
        let table = self.table_mut(half);
        let head = table.buckets[bucket].replace(slot);
        table.used += 1;
        self.entries[slot].next = head;
        Ok(EntryHandle::new(slot))
    }

    /// Insert without the opportunistic migration step; used by the safe
    /// iterator so migration stays suppressed for its whole lifetime.
    pub(crate) fn add_no_step(
        &mut self,
        key: B::Key,
        value: B::Value,
    ) -> Result<EntryHandle, MapError> {
        match self.add_inner(key, value, false) {
            Ok(handle) => Ok(handle),
            Err(Rejection::Alloc) => Err(MapError::AllocationFailed),
            Err(Rejection::Exists { .. }) => Err(MapError::KeyExists),
        }
    }

    fn unlink_key(&mut self, key: &B::Key) -> Option<Entry<B::Key, B::Value>> {
        let slot = self.locate(key)?;
        self.unlink_slot(slot)
    }

    /// Unsplice one entry from whichever chain holds it and remove it from
    /// the arena, fixing up the predecessor's link or the bucket head.
    pub(crate) fn unlink_slot(&mut self, target: DefaultKey) -> Option<Entry<B::Key, B::Value>> {
        let hash = self.entries.get(target)?.hash;
        for &half in self.scan_halves() {
            if self.table(half).is_unallocated() {
                continue;
            }
            let bucket = self.table(half).bucket(hash);
            let mut prev: Option<DefaultKey> = None;
            let mut cursor = self.table(half).buckets[bucket];
            while let Some(slot) = cursor {
                if slot == target {
                    let next = self.entries[slot].next;
                    match prev {
                        None => self.table_mut(half).buckets[bucket] = next,
                        Some(p) => self.entries[p].next = next,
                    }
                    self.table_mut(half).used -= 1;
                    return self.entries.remove(slot);
                }
                prev = cursor;
                cursor = self.entries[slot].next;
            }
        }
        None
    }

    pub(crate) fn drop_entry(&self, entry: Entry<B::Key, B::Value>) {
        self.behavior.drop_key(entry.key);
        self.behavior.drop_value(entry.value);
    }

    /// Order-sensitive fold of both halves' structural properties.
    /// Read-only iterators capture this at creation and verify it at
    /// release.
    pub(crate) fn fingerprint(&self) -> u64 {
        let inputs = [
            self.primary.base_addr() as u64,
            self.primary.capacity() as u64,
            self.primary.used as u64,
            self.secondary.base_addr() as u64,
            self.secondary.capacity() as u64,
            self.secondary.used as u64,
        ];
        let mut acc = 0u64;
        for v in inputs {
            acc = hashing::mix64(acc.wrapping_add(v));
        }
        acc
    }
}

impl<B: MapBehavior + Default> Default for RehashMap<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: MapBehavior> Drop for RehashMap<B> {
    fn drop(&mut self) {
        let behavior = &self.behavior;
        let entries = &mut self.entries;
        for (_, entry) in entries.drain() {
            behavior.drop_key(entry.key);
            behavior.drop_value(entry.value);
        }
    }
}
