//! Pending-fetch ownership.
//!
//! A pending entry belongs to the fetch operation that inserted it. When a
//! fetch settles it may only remove its own entry: if the key was cleared
//! and re-claimed by a newer fetch in the meantime, the newer entry stays.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::keys::{ChunkKey, FetchKey};
use crate::settle::{Resolver, Settled, settle_pair};

/// Identity of one fetch operation. Never reused within a ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchOperationId(pub u64);

impl fmt::Display for FetchOperationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "op{}", self.0)
  }
}

/// Values stored in an ownership map.
pub trait OwnedOperation {
  fn operation_id(&self) -> FetchOperationId;
}

impl OwnedOperation for FetchOperationId {
  fn operation_id(&self) -> FetchOperationId {
    *self
  }
}

/// Removes `key` only if its entry still belongs to `own`.
///
/// Returns whether an entry was removed. Calling it again for the same key
/// returns `false`.
pub fn finalize_ownership<K, V>(map: &mut HashMap<K, V>, key: &K, own: FetchOperationId) -> bool
where
  K: Hash + Eq,
  V: OwnedOperation,
{
  match map.get(key) {
    Some(entry) if entry.operation_id() == own => {
      map.remove(key);
      true
    }
    _ => false,
  }
}

/// An in-flight fetch. Other callers join it through `settled`.
struct PendingFetch {
  id: FetchOperationId,
  settled: Settled<bool>,
}

impl OwnedOperation for PendingFetch {
  fn operation_id(&self) -> FetchOperationId {
    self.id
  }
}

/// Ledger of in-flight fetches keyed by [`FetchKey`].
#[derive(Default)]
pub struct PendingFetches {
  entries: HashMap<FetchKey, PendingFetch>,
  next_id: u64,
}

impl PendingFetches {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a new fetch for `key`, replacing any existing entry.
  ///
  /// The returned resolver must be resolved with the fetch result so joined
  /// callers wake up.
  pub fn claim(&mut self, key: FetchKey) -> (FetchOperationId, Resolver<bool>) {
    self.next_id += 1;
    let id = FetchOperationId(self.next_id);
    let (resolver, settled) = settle_pair();
    self.entries.insert(key, PendingFetch { id, settled });
    (id, resolver)
  }

  /// Returns the owner of the pending entry for `key`.
  pub fn get(&self, key: &FetchKey) -> Option<FetchOperationId> {
    self.entries.get(key).map(|entry| entry.id)
  }

  /// Returns a waiter for the in-flight fetch of `key`.
  pub fn in_flight(&self, key: &FetchKey) -> Option<Settled<bool>> {
    self.entries.get(key).map(|entry| entry.settled.clone())
  }

  /// Compare-and-delete, see [`finalize_ownership`].
  pub fn finalize(&mut self, key: &FetchKey, own: FetchOperationId) -> bool {
    finalize_ownership(&mut self.entries, key, own)
  }

  pub fn contains(&self, key: &FetchKey) -> bool {
    self.entries.contains_key(key)
  }

  /// Returns true if any fetch for `chunk` is pending, whatever its purpose.
  pub fn contains_chunk(&self, chunk: ChunkKey) -> bool {
    self.entries.keys().any(|key| key.chunk == chunk)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Forgets every pending entry. In-flight fetches keep running but can
  /// no longer finalize.
  pub fn clear(&mut self) {
    self.entries.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::keys::FetchPurpose;

  fn render_key(row: i32, col: i32) -> FetchKey {
    FetchKey::new(ChunkKey::new(row, col), FetchPurpose::Render)
  }

  #[test]
  fn finalize_is_idempotent() {
    let mut map = HashMap::new();
    map.insert("16,16", FetchOperationId(1));
    assert!(finalize_ownership(&mut map, &"16,16", FetchOperationId(1)));
    assert!(!finalize_ownership(&mut map, &"16,16", FetchOperationId(1)));
    assert!(map.is_empty());
  }

  #[test]
  fn stale_owner_leaves_newer_entry() {
    let mut pending = PendingFetches::new();
    let key = render_key(16, 16);

    let (stale, _stale_resolver) = pending.claim(key);
    pending.clear();
    let (fresh, _fresh_resolver) = pending.claim(key);
    assert_ne!(stale, fresh);

    assert!(!pending.finalize(&key, stale));
    assert_eq!(pending.get(&key), Some(fresh));
    assert!(pending.finalize(&key, fresh));
    assert!(pending.is_empty());
  }

  #[test]
  fn purposes_are_tracked_separately() {
    let mut pending = PendingFetches::new();
    let chunk = ChunkKey::new(0, 24);
    let (_, _render) = pending.claim(FetchKey::new(chunk, FetchPurpose::Render));
    let (_, _prefetch) = pending.claim(FetchKey::new(chunk, FetchPurpose::Prefetch));
    assert_eq!(pending.len(), 2);
    assert!(pending.contains_chunk(chunk));
    assert!(!pending.contains_chunk(ChunkKey::new(0, 0)));
  }

  #[test]
  fn joined_waiters_see_the_result() {
    let mut pending = PendingFetches::new();
    let key = render_key(0, 0);
    let (_, resolver) = pending.claim(key);
    let waiter = pending.in_flight(&key).expect("pending");
    resolver.resolve(true);
    assert_eq!(futures_lite::future::block_on(waiter.wait()), Some(true));
  }
}
