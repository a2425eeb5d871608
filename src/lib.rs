//! rehash-map: a single-threaded chained hash map that grows and shrinks
//! through incremental, non-blocking rehashing.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep every resize O(1)-amortized per operation by migrating
//!   entries between two bucket tables one bucket at a time, instead of
//!   pausing to rehash the whole table at once.
//! - Layers:
//!   - hashing: seedable 32-bit byte-sequence hashes (case-sensitive and
//!     case-insensitive) plus the integer mix behind the structural
//!     fingerprint.
//!   - MapBehavior: the compile-time contract (hash, equality, optional
//!     duplicate/teardown hooks) that parameterizes the map over arbitrary
//!     key and value types.
//!   - Entry / BucketTable: bucket arrays of chain heads over an
//!     arena-allocated entry slab; chain links are generational arena keys,
//!     never raw pointers.
//!   - RehashMap: the table pair (primary + secondary), the migration
//!     cursor, capacity management, and the core operations.
//!   - Iter / SafeIter: a read-only scan verified by structural
//!     fingerprint, and a mutation-tolerant cursor that pre-fetches its
//!     successor so the current entry can be removed mid-scan.
//!
//! Constraints
//! - Single-threaded: no locks, no atomics; exclusivity comes from `&mut`.
//! - No operation blocks: a migration advances by one bucket inside
//!   ordinary calls, or in batches under a caller-supplied time budget.
//! - A migration, once started, runs to completion; starting another while
//!   one is active is rejected.
//!
//! Rehashing invariants
//! - The secondary table is allocated exactly while a migration is in
//!   progress; new entries are inserted into it, and lookups probe primary
//!   then secondary.
//! - Each entry caches its 32-bit hash at insert; migration and lookups
//!   never re-enter user hash code after that.
//! - While a `SafeIter` is alive it holds the map's `&mut`, so no
//!   migration step can run underneath it. `Iter` holds a shared borrow,
//!   so the structure cannot change underneath it in safe code, and a
//!   fingerprint assertion at release backstops that rule.
//!
//! Why this split?
//! - Localize invariants: the bucket tables know nothing about migration,
//!   the map knows nothing about key representations, and the behavior
//!   knows nothing about table structure.
//! - The arena makes chain surgery safe: unsplicing and migration rewrite
//!   indices, and a handle to a deleted entry goes stale instead of
//!   dangling.

mod behavior;
mod error;
pub mod hashing;
mod iter;
mod map;
mod map_proptest;
mod table;

// Public surface
pub use behavior::{BytesBehavior, CaseInsensitiveBehavior, MapBehavior};
pub use error::MapError;
pub use iter::{Iter, SafeIter};
pub use map::{Config, EntryHandle, RehashMap, Upsert};
