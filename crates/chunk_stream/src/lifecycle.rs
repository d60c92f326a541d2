//! Transient streaming state and the switch-off reset.
//!
//! Everything here is rebuilt from scratch after switching streaming off
//! and on again. Nothing is persisted.

use std::collections::{HashMap, HashSet, VecDeque};

// WASM compat: std::time::Instant panics on wasm32
use web_time::Instant;

use crate::keys::{AreaKey, AuthoritativeChunk, ChunkKey};
use crate::ownership::PendingFetches;
use crate::transition::{SwitchHandle, TransitionAuthority, TransitionToken};

/// Opaque id of a rendered entity (army, structure, ...).
pub type EntityId = u64;

/// Bookkeeping that lives only while streaming is on.
#[derive(Default)]
pub struct TransientCollections {
  /// Entities to remove once their deadline passes.
  pub pending_removals: HashMap<EntityId, Instant>,
  /// Entities currently animating a move.
  pub moving_entities: HashSet<EntityId>,
  /// Due removals held back until the entity stops moving.
  pub deferred_removals: HashSet<EntityId>,
  pub fetched_chunks: HashSet<ChunkKey>,
  pub fetched_areas: HashSet<AreaKey>,
  pub pending_fetches: PendingFetches,
  /// Keys kept resident around the authoritative chunk.
  pub pinned_chunks: HashSet<ChunkKey>,
  /// Chunks with a valid cached render.
  pub cached_chunks: HashSet<ChunkKey>,
  /// Fetched or cached chunks, least recently used first.
  access_order: VecDeque<ChunkKey>,
}

impl TransientCollections {
  pub fn is_empty(&self) -> bool {
    self.pending_removals.is_empty()
      && self.moving_entities.is_empty()
      && self.deferred_removals.is_empty()
      && self.fetched_chunks.is_empty()
      && self.fetched_areas.is_empty()
      && self.pending_fetches.is_empty()
      && self.pinned_chunks.is_empty()
      && self.cached_chunks.is_empty()
      && self.access_order.is_empty()
  }

  /// Schedules `entity` for removal at `deadline`, replacing an earlier
  /// schedule.
  pub fn schedule_removal(&mut self, entity: EntityId, deadline: Instant) {
    self.deferred_removals.remove(&entity);
    self.pending_removals.insert(entity, deadline);
  }

  /// Cancels a scheduled or deferred removal. Returns whether one existed.
  pub fn cancel_removal(&mut self, entity: EntityId) -> bool {
    let pending = self.pending_removals.remove(&entity).is_some();
    let deferred = self.deferred_removals.remove(&entity);
    pending || deferred
  }

  /// Removes and returns the entities whose deadline passed. Moving entities
  /// are deferred instead and released by [`finish_moving`](Self::finish_moving).
  pub fn take_due_removals(&mut self, now: Instant) -> Vec<EntityId> {
    let mut due: Vec<EntityId> = self
      .pending_removals
      .iter()
      .filter(|&(_, deadline)| *deadline <= now)
      .map(|(&entity, _)| entity)
      .collect();
    due.sort_unstable();

    let mut ready = Vec::with_capacity(due.len());
    for entity in due {
      self.pending_removals.remove(&entity);
      if self.moving_entities.contains(&entity) {
        self.deferred_removals.insert(entity);
      } else {
        ready.push(entity);
      }
    }
    ready
  }

  pub fn start_moving(&mut self, entity: EntityId) {
    self.moving_entities.insert(entity);
  }

  /// Ends a move. Returns true if a deferred removal is now due.
  pub fn finish_moving(&mut self, entity: EntityId) -> bool {
    self.moving_entities.remove(&entity);
    self.deferred_removals.remove(&entity)
  }

  /// Marks `chunk` as most recently used.
  pub fn touch_chunk(&mut self, chunk: ChunkKey) {
    if let Some(index) = self.access_order.iter().position(|&key| key == chunk) {
      self.access_order.remove(index);
    }
    self.access_order.push_back(chunk);
  }

  pub fn note_fetched(&mut self, chunk: ChunkKey) {
    self.fetched_chunks.insert(chunk);
    self.touch_chunk(chunk);
  }

  pub fn note_cached(&mut self, chunk: ChunkKey) {
    self.cached_chunks.insert(chunk);
    self.touch_chunk(chunk);
  }

  /// Number of distinct chunks that are fetched or cached.
  pub fn resident_chunk_count(&self) -> usize {
    self.fetched_chunks.union(&self.cached_chunks).count()
  }

  /// Forgets least recently used chunks until at most `max` stay resident.
  ///
  /// Pinned chunks, `active` and chunks with a fetch in flight are never
  /// evicted, so the limit is exceeded when they alone are over it. A
  /// fetched area is forgotten once none of its chunks is fetched anymore.
  pub fn evict_lru(
    &mut self,
    max: usize,
    active: Option<ChunkKey>,
    area_of: impl Fn(ChunkKey) -> AreaKey,
  ) -> Vec<ChunkKey> {
    let (fetched, cached) = (&self.fetched_chunks, &self.cached_chunks);
    self.access_order.retain(|key| fetched.contains(key) || cached.contains(key));

    let mut evicted = Vec::new();
    let mut index = 0;
    while self.resident_chunk_count() > max && index < self.access_order.len() {
      let chunk = self.access_order[index];
      if active == Some(chunk)
        || self.pinned_chunks.contains(&chunk)
        || self.pending_fetches.contains_chunk(chunk)
      {
        index += 1;
        continue;
      }
      self.access_order.remove(index);
      self.fetched_chunks.remove(&chunk);
      self.cached_chunks.remove(&chunk);
      evicted.push(chunk);
    }

    if !evicted.is_empty() {
      let live: HashSet<AreaKey> =
        self.fetched_chunks.iter().map(|&chunk| area_of(chunk)).collect();
      self.fetched_areas.retain(|area| live.contains(area));
    }
    evicted
  }

  /// Forgets every fetched and cached chunk, so the next switch refetches.
  pub fn clear_tile_cache(&mut self) {
    self.fetched_chunks.clear();
    self.fetched_areas.clear();
    self.pending_fetches.clear();
    self.cached_chunks.clear();
    self.access_order.clear();
  }

  fn clear(&mut self) {
    self.pending_removals.clear();
    self.moving_entities.clear();
    self.deferred_removals.clear();
    self.pinned_chunks.clear();
    self.clear_tile_cache();
  }
}

/// Primitive state values after a switch-off.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwitchOffState {
  pub is_switched_off: bool,
  pub loading_counter: u32,
  pub current_chunk: AuthoritativeChunk,
  pub last_camera_distance: Option<f32>,
}

/// Clears every transient collection and returns the reset primitives.
pub fn apply_switch_off_state(collections: &mut TransientCollections) -> SwitchOffState {
  collections.clear();
  SwitchOffState {
    is_switched_off: true,
    loading_counter: 0,
    current_chunk: AuthoritativeChunk::Uncommitted,
    last_camera_distance: None,
  }
}

/// Transition flags cached by the orchestrator.
#[derive(Debug, Default)]
pub struct TransitionState {
  pub is_transitioning: bool,
  pub current_switch: Option<SwitchHandle>,
}

/// Invalidates every in-flight switch by issuing a new token, and drops the
/// cached switch handle.
pub fn invalidate_switch_off_transition_state(
  authority: &mut TransitionAuthority,
  state: &mut TransitionState,
) -> TransitionToken {
  let token = authority.advance();
  state.is_transitioning = false;
  state.current_switch = None;
  token
}
