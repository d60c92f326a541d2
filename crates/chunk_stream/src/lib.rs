//! Chunk Stream - token-versioned chunk transition orchestration.
//!
//! This crate decides, for an endless stream of overlapping chunk-switch
//! requests, which one becomes authoritative and whether its side effects
//! may apply. Rendering and data access live behind the
//! [`StreamingBackend`] and [`ChunkManager`] traits.
//!
//! The pure decision pieces ([`geometry`], [`overlap`], [`transition`],
//! [`reconcile`], [`refresh`], [`ownership`], [`lifecycle`]) are synchronous
//! and side-effect free. [`StreamingSession`] is the async shell that owns
//! all mutable state and routes every mutation through them.

pub mod backend;
pub mod coalesce;
pub mod config;
pub mod geometry;
pub mod keys;
pub mod lifecycle;
pub mod overlap;
pub mod ownership;
pub mod reconcile;
pub mod refresh;
pub mod session;
pub mod settle;
pub mod transition;

pub use backend::{
  BackendError, BoxFuture, ChunkManager, FetchRequest, ManagerCommit, StreamingBackend,
};
pub use coalesce::CoalescedRunner;
pub use config::{ConfigError, StreamingConfig};
pub use geometry::{
  ChunkCenter, RenderBounds, RenderSize, chunk_center, is_within_bounds, render_bounds,
  world_to_chunk_key,
};
pub use keys::{AreaKey, AuthoritativeChunk, ChunkKey, ChunkKeyError, FetchKey, FetchPurpose};
pub use lifecycle::{
  EntityId, SwitchOffState, TransientCollections, TransitionState, apply_switch_off_state,
  invalidate_switch_off_transition_state,
};
pub use overlap::{
  chunk_keys_containing_hex, chunks_rendering_hex, nearest_chunk_key, neighbor_chunk_keys,
  overlap_chunk_keys, overlap_stride_radius,
};
pub use ownership::{FetchOperationId, PendingFetches, finalize_ownership};
pub use reconcile::{DuplicateTileAction, DuplicateTileUpdate, resolve_duplicate_tile_action};
pub use refresh::{RefreshCompletionActions, RefreshScheduler, RefreshTicket};
pub use session::{StreamingSession, StreamingStats, TileReconciliation, TileUpdate};
pub use transition::{
  ChunkSwitchActions, ChunkSwitchAttempt, ManagerUpdateCheck, SwitchError, SwitchHandle,
  SwitchOutcome, SwitchResult, SwitchStage, TransitionAuthority, TransitionToken, accept_at_least,
  accept_exact, resolve_chunk_switch_actions, should_run_manager_update,
  wait_for_transition_to_settle,
};
