//! Iterators over the table pair: a read-only scan verified by structural
//! fingerprint, and a mutation-tolerant cursor that pre-fetches its
//! successor.
//!
//! Both walk primary buckets 0..capacity, then the secondary table if a
//! migration is in progress; within a bucket, entries come back in chain
//! order (most recently inserted first).

use slotmap::DefaultKey;

use crate::behavior::MapBehavior;
use crate::error::MapError;
use crate::map::{EntryHandle, RehashMap};
use crate::table::Half;

/// Read-only iterator.
///
/// Holds a shared borrow of the map, so the structure cannot change
/// underneath it in safe code. A structural fingerprint is captured at
/// creation and re-checked when the iterator is dropped; a mismatch means
/// the no-mutation rule was broken and panics rather than letting a
/// corrupted scan pass silently.
pub struct Iter<'a, B: MapBehavior> {
    map: &'a RehashMap<B>,
    half: Half,
    bucket: usize,
    cursor: Option<DefaultKey>,
    fingerprint: u64,
}

impl<'a, B: MapBehavior> Iter<'a, B> {
    pub(crate) fn new(map: &'a RehashMap<B>) -> Self {
        Self {
            map,
            half: Half::Primary,
            bucket: 0,
            cursor: None,
            fingerprint: map.fingerprint(),
        }
    }
}

impl<'a, B: MapBehavior> Iterator for Iter<'a, B> {
    type Item = (&'a B::Key, &'a B::Value);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(slot) = self.cursor {
                let entry = &self.map.entries[slot];
                self.cursor = entry.next;
                return Some((&entry.key, &entry.value));
            }
            let table = self.map.table(self.half);
            if self.bucket >= table.capacity() {
                if self.half == Half::Primary && self.map.is_rehashing() {
                    self.half = Half::Secondary;
                    self.bucket = 0;
                    continue;
                }
                return None;
            }
            self.cursor = table.buckets[self.bucket];
            self.bucket += 1;
        }
    }
}

impl<'a, B: MapBehavior> Drop for Iter<'a, B> {
    fn drop(&mut self) {
        assert_eq!(
            self.map.fingerprint(),
            self.fingerprint,
            "bucket tables changed during a read-only scan"
        );
    }
}

/// Mutation-tolerant cursor.
///
/// Holds the map's `&mut` for its lifetime, so no opportunistic migration
/// step can run underneath it and entries never move between tables
/// mid-scan. The successor of the current entry is pre-fetched before the
/// current one is yielded, so removing the current entry does not
/// invalidate the walk. Additions and removals during the scan go through
/// the cursor's own methods, which skip the migration step.
pub struct SafeIter<'a, B: MapBehavior> {
    map: &'a mut RehashMap<B>,
    half: Half,
    bucket: usize,
    current: Option<DefaultKey>,
    next_entry: Option<DefaultKey>,
}

impl<'a, B: MapBehavior> SafeIter<'a, B> {
    pub(crate) fn new(map: &'a mut RehashMap<B>) -> Self {
        Self {
            map,
            half: Half::Primary,
            bucket: 0,
            current: None,
            next_entry: None,
        }
    }

    /// Yield the next entry, or `None` at the end of both tables.
    #[allow(clippy::should_implement_trait)] // lending: items borrow the cursor
    pub fn next(&mut self) -> Option<(&B::Key, &B::Value)> {
        let slot = self.advance()?;
        let entry = &self.map.entries[slot];
        Some((&entry.key, &entry.value))
    }

    fn advance(&mut self) -> Option<DefaultKey> {
        loop {
            if let Some(slot) = self.next_entry {
                self.next_entry = self.map.entries[slot].next;
                self.current = Some(slot);
                return Some(slot);
            }
            let table = self.map.table(self.half);
            if self.bucket >= table.capacity() {
                if self.half == Half::Primary && self.map.is_rehashing() {
                    self.half = Half::Secondary;
                    self.bucket = 0;
                    continue;
                }
                self.current = None;
                return None;
            }
            self.next_entry = table.buckets[self.bucket];
            self.bucket += 1;
        }
    }

    /// Handle of the most recently yielded entry.
    pub fn handle(&self) -> Option<EntryHandle> {
        self.current.map(EntryHandle::new)
    }

    /// Read access to the underlying map between steps.
    pub fn map(&self) -> &RehashMap<B> {
        &*self.map
    }

    /// Insert during iteration. Whether the new entry is visited depends on
    /// where its bucket falls relative to the cursor.
    pub fn add(&mut self, key: B::Key, value: B::Value) -> Result<EntryHandle, MapError> {
        self.map.add_no_step(key, value)
    }

    /// Remove by key during iteration. The pre-fetched cursor is fixed up
    /// first, so removing the current or the up-next entry is fine.
    pub fn remove(&mut self, key: &B::Key) -> Result<(), MapError> {
        match self.map.locate(key) {
            Some(slot) => {
                self.discard(slot);
                Ok(())
            }
            None => Err(MapError::KeyNotFound),
        }
    }

    /// Remove the most recently yielded entry. Returns `false` when there
    /// is no current entry (before the first `next` or after it was already
    /// removed).
    pub fn remove_current(&mut self) -> bool {
        match self.current {
            Some(slot) => {
                self.discard(slot);
                true
            }
            None => false,
        }
    }

    fn discard(&mut self, slot: DefaultKey) {
        if self.next_entry == Some(slot) {
            self.next_entry = self.map.entries[slot].next;
        }
        if self.current == Some(slot) {
            self.current = None;
        }
        if let Some(entry) = self.map.unlink_slot(slot) {
            self.map.drop_entry(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BytesBehavior;
    use crate::map::RehashMap;
    use std::collections::BTreeMap;

    fn filled(n: u32) -> RehashMap<BytesBehavior<String, u32>> {
        let mut m = RehashMap::new(BytesBehavior::new());
        for i in 0..n {
            m.add(format!("k{i}"), i).unwrap();
        }
        m
    }

    /// Invariant: a full read-only scan visits every entry exactly once,
    /// whether or not a migration is in progress.
    #[test]
    fn iter_visits_each_entry_once() {
        let mut m = filled(10);
        let collect = |m: &RehashMap<BytesBehavior<String, u32>>| -> BTreeMap<String, u32> {
            m.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };

        let idle_view;
        {
            while m.rehash(128) {}
            idle_view = collect(&m);
            assert_eq!(idle_view.len(), 10);
        }

        m.expand(128).unwrap();
        assert!(m.is_rehashing());
        m.rehash(1);
        let migrating_view = collect(&m);
        assert_eq!(migrating_view, idle_view);
    }

    /// Invariant: iterating an empty map yields nothing and passes the
    /// fingerprint check.
    #[test]
    fn iter_empty() {
        let m: RehashMap<BytesBehavior<String, u32>> = RehashMap::new(BytesBehavior::new());
        assert_eq!(m.iter().count(), 0);
    }

    /// Invariant: while a safe cursor is alive, the migration cursor does
    /// not advance, even across lookups, additions, and removals made
    /// through the cursor; releasing it re-enables the opportunistic step.
    #[test]
    fn safe_cursor_suppresses_migration() {
        let mut m = filled(8);
        while m.rehash(128) {}
        m.expand(64).unwrap();
        let index_before = m.rehash_index;
        let primary_used_before = m.primary.used;
        assert!(index_before.is_some());

        {
            let mut it = m.iter_safe();
            let mut seen = 0;
            while it.next().is_some() {
                seen += 1;
            }
            assert_eq!(seen, 8);

            it.add("added".to_string(), 99).unwrap();
            it.remove(&"added".to_string()).unwrap();
            assert_eq!(it.map().rehash_index, index_before);
            assert_eq!(it.map().primary.used, primary_used_before);
        }

        // An ordinary lookup after release advances the migration again.
        let _ = m.find(&"k0".to_string());
        assert!(m.rehash_index != index_before || !m.is_rehashing());
    }

    /// Invariant: removing the current entry mid-scan does not skip or
    /// repeat the remaining entries.
    #[test]
    fn remove_current_keeps_walk_intact() {
        let mut m = filled(10);
        {
            let mut it = m.iter_safe();
            while let Some((_k, v)) = it.next() {
                let odd = *v % 2 == 1;
                if odd {
                    assert!(it.remove_current());
                }
            }
            assert!(!it.remove_current());
        }
        assert_eq!(m.len(), 5);
        for i in 0..10u32 {
            assert_eq!(m.fetch_value(&format!("k{i}")).is_some(), i % 2 == 0);
        }
    }

    /// Invariant: removing the pre-fetched (up-next) entry by key re-aims
    /// the cursor instead of derailing it.
    #[test]
    fn remove_upnext_fixes_cursor() {
        let mut m = filled(6);
        let mut visited = Vec::new();
        {
            let mut it = m.iter_safe();
            // Remove entries other than the current one while scanning:
            // every survivor must still be visited exactly once.
            while let Some((k, _v)) = it.next() {
                let k = k.clone();
                visited.push(k.clone());
                if k == "k2" {
                    for victim in ["k0", "k1", "k3", "k4", "k5"] {
                        let victim = victim.to_string();
                        if it.map().len() > 3 && !visited.contains(&victim) {
                            it.remove(&victim).unwrap();
                            break;
                        }
                    }
                }
            }
        }
        let mut sorted = visited.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), visited.len(), "no entry visited twice");
    }

    /// Invariant: entries added through the cursor into already-visited
    /// buckets are simply not revisited; the scan still terminates.
    #[test]
    fn additions_during_scan_terminate() {
        let mut m = filled(4);
        let mut steps = 0;
        {
            let mut it = m.iter_safe();
            while it.next().is_some() {
                steps += 1;
                if steps <= 4 {
                    it.add(format!("extra{steps}"), 1000 + steps).unwrap();
                }
                assert!(steps < 64, "scan failed to terminate");
            }
        }
        assert_eq!(m.len(), 8);
    }

    /// Invariant: the handle of the current entry resolves while it is
    /// live and goes stale once removed.
    #[test]
    fn current_handle_tracks_removal() {
        let mut m = filled(3);
        let mut it = m.iter_safe();
        assert!(it.handle().is_none());
        it.next().unwrap();
        let h = it.handle().unwrap();
        assert!(h.value(it.map()).is_some());
        assert!(it.remove_current());
        assert!(it.handle().is_none());
        assert!(h.value(it.map()).is_none());
    }
}
