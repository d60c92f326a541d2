//! Async orchestration shell.
//!
//! [`StreamingSession`] owns all mutable streaming state behind one mutex and
//! drives the collaborators. The lock is never held across an `.await`:
//! every side effect is preceded by a fresh compare-then-act check against
//! the transition token, so a switch that went stale while awaiting simply
//! stops.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
// WASM compat: std::time::Instant panics on wasm32
use web_time::Instant;

use crate::backend::{ChunkManager, FetchRequest, ManagerCommit, StreamingBackend};
use crate::config::StreamingConfig;
use crate::geometry::{RenderBounds, chunk_render_bounds, is_within_bounds};
use crate::keys::{AreaKey, AuthoritativeChunk, ChunkKey, FetchKey, FetchPurpose};
use crate::lifecycle::{
  EntityId, TransientCollections, TransitionState, apply_switch_off_state,
  invalidate_switch_off_transition_state,
};
use crate::overlap::{chunks_rendering_hex, neighbor_chunk_keys, overlap_chunk_keys};
use crate::ownership::FetchOperationId;
use crate::reconcile::{DuplicateTileAction, DuplicateTileUpdate, resolve_duplicate_tile_action};
use crate::refresh::{RefreshScheduler, RefreshTicket};
use crate::settle::{Resolver, Settled};
use crate::transition::{
  ChunkSwitchActions, ChunkSwitchAttempt, ManagerUpdateCheck, SwitchError, SwitchHandle,
  SwitchOutcome, SwitchResult, SwitchStage, TransitionAuthority, TransitionToken,
  resolve_chunk_switch_actions, should_run_manager_update, wait_for_transition_to_settle,
};

/// Fetch and switch counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
  /// Fetches actually sent to the backend.
  pub total_fetches: u64,
  /// Requests that joined an in-flight fetch for the same key.
  pub deduplicated_fetches: u64,
  pub failed_fetches: u64,
  pub committed_switches: u64,
  pub rolled_back_switches: u64,
  /// Switches disqualified by a newer token.
  pub stale_switches: u64,
  pub superseded_refreshes: u64,
  /// Chunks forgotten to stay under the resident limit.
  pub evicted_chunks: u64,
}

/// Incoming tile write as seen by the data layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileUpdate {
  pub remove_explored: bool,
  pub tile_already_known: bool,
  pub has_biome_delta: bool,
}

/// Result of [`StreamingSession::reconcile_tile_update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileReconciliation {
  pub action: DuplicateTileAction,
  /// Chunks whose cached render was dropped.
  pub invalidated: Vec<ChunkKey>,
  /// Refresh token if a refresh was requested.
  pub refresh_token: Option<u64>,
}

struct SessionState {
  authority: TransitionAuthority,
  transition: TransitionState,
  current_chunk: AuthoritativeChunk,
  collections: TransientCollections,
  refresh: RefreshScheduler,
  loading_counter: u32,
  is_switched_off: bool,
  last_camera_distance: Option<f32>,
  stats: StreamingStats,
}

/// Owner of the streaming state for one map view.
pub struct StreamingSession {
  config: StreamingConfig,
  backend: Arc<dyn StreamingBackend>,
  managers: Vec<Arc<dyn ChunkManager>>,
  state: Mutex<SessionState>,
}

#[derive(Clone, Copy)]
enum FetchTarget {
  Chunk(ChunkKey, FetchPurpose),
  Area(AreaKey),
}

impl FetchTarget {
  fn key(self) -> FetchKey {
    match self {
      FetchTarget::Chunk(chunk, purpose) => FetchKey::new(chunk, purpose),
      FetchTarget::Area(area) => FetchKey::new(area.origin_chunk(), FetchPurpose::Area),
    }
  }
}

enum FetchPlan {
  AlreadyFetched,
  Join(Settled<bool>),
  Fetch(FetchOperationId, Resolver<bool>),
  SwitchedOff,
}

impl StreamingSession {
  pub fn new(config: StreamingConfig, backend: Arc<dyn StreamingBackend>) -> Self {
    let refresh = RefreshScheduler::new(config.refresh_debounce());
    Self {
      config,
      backend,
      managers: Vec::new(),
      state: Mutex::new(SessionState {
        authority: TransitionAuthority::new(),
        transition: TransitionState::default(),
        current_chunk: AuthoritativeChunk::Uncommitted,
        collections: TransientCollections::default(),
        refresh,
        loading_counter: 0,
        is_switched_off: false,
        last_camera_distance: None,
        stats: StreamingStats::default(),
      }),
    }
  }

  /// Registers a manager. Managers are committed in registration order.
  pub fn add_manager(&mut self, manager: Arc<dyn ChunkManager>) {
    self.managers.push(manager);
  }

  pub fn with_manager(mut self, manager: Arc<dyn ChunkManager>) -> Self {
    self.add_manager(manager);
    self
  }

  pub fn config(&self) -> &StreamingConfig {
    &self.config
  }

  fn lock(&self) -> MutexGuard<'_, SessionState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn is_current(&self, token: TransitionToken) -> bool {
    self.lock().authority.is_current(token)
  }

  fn bounds_of(&self, chunk: ChunkKey) -> RenderBounds {
    chunk_render_bounds(chunk, self.config.render_size, self.config.chunk_stride)
  }

  // --- Chunk switching ---

  /// Makes `target` the authoritative chunk.
  ///
  /// Does nothing while switched off, or when `target` is already
  /// authoritative, no other switch is in flight and `force` is false.
  pub async fn switch_to(&self, target: ChunkKey, force: bool) -> SwitchResult {
    let (token, previous, resolver) = {
      let mut state = self.lock();
      if state.is_switched_off {
        return Ok(SwitchOutcome::SwitchedOff);
      }
      if !force && state.current_chunk.is(target) && !state.transition.is_transitioning {
        return Ok(SwitchOutcome::AlreadyActive);
      }

      let token = state.authority.advance();
      let (handle, resolver) = SwitchHandle::new(token, target);
      state.transition.is_transitioning = true;
      state.transition.current_switch = Some(handle);
      (token, state.current_chunk, resolver)
    };

    debug!("Switching to chunk {target} ({token}), previous {previous}");
    let guard = SwitchGuard {
      session: self,
      token,
      resolver: Some(resolver),
    };
    let result = self.run_switch(target, token, previous, force).await;
    guard.settle(result.clone());
    result
  }

  async fn run_switch(
    &self,
    target: ChunkKey,
    token: TransitionToken,
    previous: AuthoritativeChunk,
    force: bool,
  ) -> SwitchResult {
    self
      .backend
      .switch_bounds(target, Some(token))
      .await
      .map_err(|e| SwitchError::backend(SwitchStage::Bounds, e))?;

    let fetch_succeeded = self.fetch(FetchTarget::Chunk(target, FetchPurpose::Render)).await;

    let actions = self.decide(target, token, previous, fetch_succeeded, force);

    if actions.should_rollback {
      warn!("Tile fetch for chunk {target} failed, keeping {previous}");
      if actions.should_restore_previous_state {
        self.restore_previous(previous, token).await?;
      }
      return Ok(SwitchOutcome::RolledBack);
    }
    if !actions.should_commit_managers {
      debug!("Dropping stale switch to {target} ({token})");
      return Ok(SwitchOutcome::Superseded);
    }

    if !self.is_current(token) {
      return Ok(self.note_stale());
    }
    self
      .backend
      .update_grid(target.row, target.col)
      .await
      .map_err(|e| SwitchError::backend(SwitchStage::Grid, e))?;

    {
      let mut state = self.lock();
      if state.current_chunk.is(target) {
        state.collections.note_cached(target);
      }
    }

    if !self.commit_managers(target, Some(token), force).await? {
      return Ok(self.note_stale());
    }

    if actions.should_unregister_previous_chunk
      && let Some(previous) = previous.key()
      && self.is_current(token)
    {
      debug!("Unregistering previous chunk {previous}");
      self.backend.unregister_chunk(previous);
    }

    let mut state = self.lock();
    state.stats.committed_switches += 1;
    self.evict_resident_chunks(&mut state);
    Ok(SwitchOutcome::Committed)
  }

  /// Runs the decision engine and applies the authoritative write in the
  /// same critical section as the token check.
  fn decide(
    &self,
    target: ChunkKey,
    token: TransitionToken,
    previous: AuthoritativeChunk,
    fetch_succeeded: bool,
    force: bool,
  ) -> ChunkSwitchActions {
    let mut state = self.lock();
    let attempt = ChunkSwitchAttempt {
      target_chunk: target,
      fetch_succeeded,
      is_current_transition: state.authority.is_current(token),
      previous_chunk: previous,
    };
    let actions = resolve_chunk_switch_actions(&attempt);

    if actions.is_noop() {
      state.stats.stale_switches += 1;
    } else if actions.should_rollback {
      state.stats.rolled_back_switches += 1;
    } else if actions.should_commit_managers {
      state.current_chunk = AuthoritativeChunk::Active(target);
      if force {
        state.collections.cached_chunks.remove(&target);
      }
      state.collections.pinned_chunks =
        overlap_chunk_keys(target, self.config.render_size, self.config.chunk_stride)
          .into_iter()
          .collect();
    }
    actions
  }

  /// Evicts least recently used chunks beyond `max_cached_chunks`. The
  /// authoritative chunk and its pinned overlap stay resident.
  fn evict_resident_chunks(&self, state: &mut SessionState) {
    let active = state.current_chunk.key();
    let evicted = state
      .collections
      .evict_lru(self.config.max_cached_chunks, active, |chunk| self.area_for(chunk));
    if !evicted.is_empty() {
      debug!("Evicted {} least recently used chunk(s)", evicted.len());
      state.stats.evicted_chunks += evicted.len() as u64;
    }
  }

  fn note_stale(&self) -> SwitchOutcome {
    self.lock().stats.stale_switches += 1;
    SwitchOutcome::Superseded
  }

  async fn restore_previous(
    &self,
    previous: AuthoritativeChunk,
    token: TransitionToken,
  ) -> Result<(), SwitchError> {
    let Some(previous) = previous.key() else {
      return Ok(());
    };
    if !self.is_current(token) {
      return Ok(());
    }
    self
      .backend
      .switch_bounds(previous, Some(token))
      .await
      .map_err(|e| SwitchError::backend(SwitchStage::Restore, e))?;
    if !self.is_current(token) {
      return Ok(());
    }
    self
      .backend
      .update_grid(previous.row, previous.col)
      .await
      .map_err(|e| SwitchError::backend(SwitchStage::Restore, e))
  }

  /// Commits every manager in order. Each commit is re-checked right before
  /// it runs; returns false as soon as one check fails.
  async fn commit_managers(
    &self,
    chunk: ChunkKey,
    token: Option<TransitionToken>,
    force: bool,
  ) -> Result<bool, SwitchError> {
    for manager in &self.managers {
      let check = {
        let state = self.lock();
        ManagerUpdateCheck {
          transition_token: token,
          expected_transition_token: state.authority.latest(),
          current_chunk: state.current_chunk,
          target_chunk: chunk,
        }
      };
      if !should_run_manager_update(&check) {
        debug!(
          "Skipping {} commit for {chunk}: authoritative chunk is {}",
          manager.name(),
          check.current_chunk
        );
        return Ok(false);
      }

      manager
        .update_chunk(
          chunk,
          ManagerCommit {
            force,
            transition_token: token,
          },
        )
        .await
        .map_err(|e| SwitchError::backend(SwitchStage::Manager(manager.name().to_string()), e))?;
    }
    Ok(true)
  }

  /// The most recent switch handle, settled or not.
  pub fn current_switch(&self) -> Option<SwitchHandle> {
    self.lock().transition.current_switch.clone()
  }

  /// Waits until the latest switch settled, following replacements.
  pub async fn wait_for_settle(&self, on_error: impl FnMut(&SwitchError)) {
    wait_for_transition_to_settle(|| self.current_switch(), on_error).await;
  }

  // --- Fetching ---

  /// Fetches tiles for a chunk, deduplicated by chunk and purpose.
  pub async fn fetch_tiles(&self, chunk: ChunkKey, purpose: FetchPurpose) -> bool {
    self.fetch(FetchTarget::Chunk(chunk, purpose)).await
  }

  /// Fetches a whole super-area once.
  pub async fn fetch_area(&self, area: AreaKey) -> bool {
    self.fetch(FetchTarget::Area(area)).await
  }

  /// Super-area containing `chunk`.
  pub fn area_for(&self, chunk: ChunkKey) -> AreaKey {
    AreaKey::for_chunk(
      chunk,
      self.config.chunk_stride,
      self.config.super_area_strides,
    )
  }

  fn fetch_bounds(&self, target: FetchTarget) -> RenderBounds {
    match target {
      FetchTarget::Chunk(chunk, _) => self.bounds_of(chunk),
      FetchTarget::Area(area) => area
        .chunk_keys(self.config.chunk_stride, self.config.super_area_strides)
        .into_iter()
        .map(|chunk| self.bounds_of(chunk))
        .reduce(|acc, bounds| acc.union(&bounds))
        .unwrap_or_else(|| self.bounds_of(area.origin_chunk())),
    }
  }

  fn is_fetched(&self, collections: &TransientCollections, target: FetchTarget) -> bool {
    match target {
      FetchTarget::Chunk(chunk, _) => collections.fetched_chunks.contains(&chunk),
      FetchTarget::Area(area) => collections.fetched_areas.contains(&area),
    }
  }

  fn mark_fetched(&self, collections: &mut TransientCollections, target: FetchTarget) {
    match target {
      FetchTarget::Chunk(chunk, _) => collections.note_fetched(chunk),
      FetchTarget::Area(area) => {
        collections.fetched_areas.insert(area);
        for chunk in area.chunk_keys(self.config.chunk_stride, self.config.super_area_strides) {
          collections.note_fetched(chunk);
        }
      }
    }
  }

  async fn fetch(&self, target: FetchTarget) -> bool {
    let key = target.key();
    let plan = {
      let mut state = self.lock();
      if state.is_switched_off {
        FetchPlan::SwitchedOff
      } else if self.is_fetched(&state.collections, target) {
        FetchPlan::AlreadyFetched
      } else if let Some(in_flight) = state.collections.pending_fetches.in_flight(&key) {
        state.stats.deduplicated_fetches += 1;
        FetchPlan::Join(in_flight)
      } else {
        state.stats.total_fetches += 1;
        state.loading_counter += 1;
        let (id, resolver) = state.collections.pending_fetches.claim(key);
        FetchPlan::Fetch(id, resolver)
      }
    };

    match plan {
      FetchPlan::SwitchedOff => false,
      FetchPlan::AlreadyFetched => true,
      FetchPlan::Join(in_flight) => {
        debug!("Joining in-flight fetch {key}");
        in_flight.wait().await.unwrap_or(false)
      }
      FetchPlan::Fetch(id, resolver) => {
        let guard = FetchGuard {
          session: self,
          target,
          id,
          resolver: Some(resolver),
        };
        debug!("Fetching {key} ({id})");
        let request = FetchRequest {
          key,
          bounds: self.fetch_bounds(target),
        };
        let succeeded = self.backend.fetch_tiles(request).await;
        guard.finish(succeeded);
        succeeded
      }
    }
  }

  /// Neighbor keys of `center` that are neither fetched nor pending.
  pub fn prefetch_keys(&self, center: ChunkKey) -> Vec<ChunkKey> {
    let state = self.lock();
    neighbor_chunk_keys(center, self.config.render_size, self.config.chunk_stride)
      .into_iter()
      .filter(|key| {
        !state.collections.fetched_chunks.contains(key)
          && !state.collections.pending_fetches.contains_chunk(*key)
      })
      .collect()
  }

  /// Loads the super-area around `center`, then any neighbor outside it.
  /// Returns the number of successful fetches.
  pub async fn prefetch_around(&self, center: ChunkKey) -> usize {
    let mut fetched = 0;
    if self.fetch_area(self.area_for(center)).await {
      fetched += 1;
    }
    for key in self.prefetch_keys(center) {
      if self.fetch_tiles(key, FetchPurpose::Prefetch).await {
        fetched += 1;
      }
    }
    fetched
  }

  /// Forgets fetched, pending and cached chunks. In-flight fetches lose
  /// ownership and their results are not recorded.
  pub fn clear_tile_cache(&self) {
    let mut state = self.lock();
    state.collections.clear_tile_cache();
    state.loading_counter = 0;
    debug!("Cleared tile cache");
  }

  // --- Tile updates and refresh ---

  /// Classifies a tile write at `(col, row)` and applies the invalidation.
  pub fn reconcile_tile_update(
    &self,
    col: i32,
    row: i32,
    update: TileUpdate,
    now: Instant,
  ) -> TileReconciliation {
    let size = self.config.render_size;
    let stride = self.config.chunk_stride;
    let mut state = self.lock();

    let is_visible_in_current_chunk = state
      .current_chunk
      .key()
      .is_some_and(|chunk| is_within_bounds(col, row, chunk.row, chunk.col, size, stride));
    let action = resolve_duplicate_tile_action(&DuplicateTileUpdate {
      remove_explored: update.remove_explored,
      tile_already_known: update.tile_already_known,
      has_biome_delta: update.has_biome_delta,
      current_chunk: state.current_chunk,
      is_chunk_transitioning: state.transition.is_transitioning,
      is_visible_in_current_chunk,
    });

    let mut invalidated = Vec::new();
    if action.invalidates() {
      for chunk in chunks_rendering_hex(col, row, size, stride) {
        if state.collections.cached_chunks.remove(&chunk) {
          invalidated.push(chunk);
        }
      }
    }

    let refresh_token =
      (action.refreshes() && !state.is_switched_off).then(|| state.refresh.request(now));

    TileReconciliation {
      action,
      invalidated,
      refresh_token,
    }
  }

  /// Requests a debounced refresh of the authoritative chunk.
  pub fn request_refresh(&self, now: Instant) -> Option<u64> {
    let mut state = self.lock();
    if state.is_switched_off {
      return None;
    }
    Some(state.refresh.request(now))
  }

  /// Returns a ticket when a refresh is due.
  pub fn poll_refresh(&self, now: Instant) -> Option<RefreshTicket> {
    let mut state = self.lock();
    if state.is_switched_off {
      return None;
    }
    state.refresh.poll(now)
  }

  /// Re-renders the authoritative chunk with forced, untokened manager
  /// commits, then completes the ticket at `now`.
  ///
  /// While a switch is in flight the ticket is deferred instead: the switch
  /// may still roll back, and the refresh fires again after the debounce.
  pub async fn run_refresh(
    &self,
    ticket: RefreshTicket,
    now: Instant,
  ) -> Result<(), SwitchError> {
    let chunk = {
      let mut state = self.lock();
      if state.transition.is_transitioning {
        debug!("Deferring refresh #{} until the chunk switch settles", ticket.token);
        state.refresh.defer(ticket, now);
        return Ok(());
      }
      state.current_chunk.key()
    };

    let result = match chunk {
      Some(chunk) => self.refresh_chunk(chunk).await,
      None => Ok(()),
    };

    let mut state = self.lock();
    state.refresh.complete(ticket, now);
    state.stats.superseded_refreshes = state.refresh.superseded_count();
    result
  }

  async fn refresh_chunk(&self, chunk: ChunkKey) -> Result<(), SwitchError> {
    debug!("Refreshing chunk {chunk}");
    self
      .backend
      .update_grid(chunk.row, chunk.col)
      .await
      .map_err(|e| SwitchError::backend(SwitchStage::Grid, e))?;
    {
      let mut state = self.lock();
      if state.current_chunk.is(chunk) {
        state.collections.note_cached(chunk);
      }
    }
    self.commit_managers(chunk, None, true).await?;
    Ok(())
  }

  /// Records the camera distance and requests a refresh when it changed.
  pub fn note_camera_distance(&self, distance: f32, now: Instant) -> Option<u64> {
    let mut state = self.lock();
    if state.is_switched_off {
      return None;
    }
    let changed = state
      .last_camera_distance
      .is_none_or(|last| (last - distance).abs() > f32::EPSILON);
    state.last_camera_distance = Some(distance);
    (changed && state.current_chunk.is_active()).then(|| state.refresh.request(now))
  }

  // --- Lifecycle ---

  /// Stops streaming: invalidates in-flight switches and clears every
  /// transient collection.
  pub fn switch_off(&self) {
    let released = {
      let mut state = self.lock();
      let state = &mut *state;
      let token =
        invalidate_switch_off_transition_state(&mut state.authority, &mut state.transition);
      let released = state.current_chunk.key();

      let reset = apply_switch_off_state(&mut state.collections);
      state.is_switched_off = reset.is_switched_off;
      state.loading_counter = reset.loading_counter;
      state.current_chunk = reset.current_chunk;
      state.last_camera_distance = reset.last_camera_distance;
      state.refresh.reset();
      info!("Chunk streaming switched off ({token})");
      released
    };

    if let Some(chunk) = released {
      self.backend.unregister_chunk(chunk);
    }
  }

  /// Resumes streaming. The next switch starts from an uncommitted chunk.
  pub fn switch_on(&self) -> bool {
    let mut state = self.lock();
    let was_off = state.is_switched_off;
    state.is_switched_off = false;
    if was_off {
      info!("Chunk streaming switched on");
    }
    was_off
  }

  pub fn is_switched_off(&self) -> bool {
    self.lock().is_switched_off
  }

  // --- Entity removal bookkeeping ---

  pub fn schedule_removal(&self, entity: EntityId, deadline: Instant) {
    self.lock().collections.schedule_removal(entity, deadline);
  }

  pub fn cancel_removal(&self, entity: EntityId) -> bool {
    self.lock().collections.cancel_removal(entity)
  }

  pub fn take_due_removals(&self, now: Instant) -> Vec<EntityId> {
    self.lock().collections.take_due_removals(now)
  }

  pub fn start_moving(&self, entity: EntityId) {
    self.lock().collections.start_moving(entity);
  }

  pub fn finish_moving(&self, entity: EntityId) -> bool {
    self.lock().collections.finish_moving(entity)
  }

  // --- Accessors ---

  pub fn current_chunk(&self) -> AuthoritativeChunk {
    self.lock().current_chunk
  }

  pub fn latest_token(&self) -> TransitionToken {
    self.lock().authority.latest()
  }

  pub fn is_transitioning(&self) -> bool {
    self.lock().transition.is_transitioning
  }

  pub fn loading_counter(&self) -> u32 {
    self.lock().loading_counter
  }

  pub fn pending_fetch_count(&self) -> usize {
    self.lock().collections.pending_fetches.len()
  }

  pub fn is_chunk_fetched(&self, chunk: ChunkKey) -> bool {
    self.lock().collections.fetched_chunks.contains(&chunk)
  }

  pub fn is_chunk_cached(&self, chunk: ChunkKey) -> bool {
    self.lock().collections.cached_chunks.contains(&chunk)
  }

  pub fn is_chunk_pinned(&self, chunk: ChunkKey) -> bool {
    self.lock().collections.pinned_chunks.contains(&chunk)
  }

  /// Number of distinct chunks that are fetched or cached.
  pub fn resident_chunk_count(&self) -> usize {
    self.lock().collections.resident_chunk_count()
  }

  pub fn stats(&self) -> StreamingStats {
    self.lock().stats
  }
}

/// Settles the switch handle. If the switch future is dropped first,
/// waiters see [`SwitchError::Abandoned`].
struct SwitchGuard<'a> {
  session: &'a StreamingSession,
  token: TransitionToken,
  resolver: Option<Resolver<SwitchResult>>,
}

impl SwitchGuard<'_> {
  fn settle(mut self, result: SwitchResult) {
    if let Err(e) = &result {
      warn!("Chunk switch {} failed: {e}", self.token);
    }
    self.clear_transitioning();
    if let Some(resolver) = self.resolver.take() {
      resolver.resolve(result);
    }
  }

  fn clear_transitioning(&self) {
    let mut state = self.session.lock();
    if state.authority.is_current(self.token) {
      state.transition.is_transitioning = false;
    }
  }
}

impl Drop for SwitchGuard<'_> {
  fn drop(&mut self) {
    if self.resolver.take().is_some() {
      debug!("Chunk switch {} abandoned", self.token);
      self.clear_transitioning();
    }
  }
}

/// Finalizes fetch ownership. Runs on completion and on drop, so an
/// abandoned fetch never leaves its pending entry behind.
struct FetchGuard<'a> {
  session: &'a StreamingSession,
  target: FetchTarget,
  id: FetchOperationId,
  resolver: Option<Resolver<bool>>,
}

impl FetchGuard<'_> {
  fn finish(mut self, succeeded: bool) {
    self.settle(Some(succeeded));
  }

  fn settle(&mut self, succeeded: Option<bool>) {
    let Some(resolver) = self.resolver.take() else {
      return;
    };
    let key = self.target.key();
    {
      let mut state = self.session.lock();
      let owned = state.collections.pending_fetches.finalize(&key, self.id);
      if owned {
        state.loading_counter = state.loading_counter.saturating_sub(1);
      }
      match succeeded {
        Some(true) if owned => self.session.mark_fetched(&mut state.collections, self.target),
        Some(true) => debug!("Dropping result of {key} ({}): ownership lost", self.id),
        Some(false) | None => state.stats.failed_fetches += 1,
      }
    }
    if let Some(succeeded) = succeeded {
      resolver.resolve(succeeded);
    }
  }
}

impl Drop for FetchGuard<'_> {
  fn drop(&mut self) {
    self.settle(None);
  }
}
