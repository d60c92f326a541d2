//! Duplicate-tile reconciliation.
//!
//! A tile update for a key that is already known can still change what is on
//! screen (a biome change at a chunk boundary, a paused entity resuming).
//! [`resolve_duplicate_tile_action`] classifies such writes.

use crate::keys::AuthoritativeChunk;

/// Facts about an incoming tile update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DuplicateTileUpdate {
  pub remove_explored: bool,
  pub tile_already_known: bool,
  pub has_biome_delta: bool,
  pub current_chunk: AuthoritativeChunk,
  pub is_chunk_transitioning: bool,
  pub is_visible_in_current_chunk: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateTileAction {
  /// Not a duplicate; the regular add path handles it.
  None,
  /// Invalidate caches so a later activation sees fresh data.
  InvalidateOnly,
  /// Invalidate caches and re-render the active chunk now.
  InvalidateAndRefresh,
}

impl DuplicateTileAction {
  pub fn invalidates(self) -> bool {
    !matches!(self, DuplicateTileAction::None)
  }

  pub fn refreshes(self) -> bool {
    matches!(self, DuplicateTileAction::InvalidateAndRefresh)
  }
}

pub fn resolve_duplicate_tile_action(update: &DuplicateTileUpdate) -> DuplicateTileAction {
  if update.remove_explored || !update.tile_already_known {
    return DuplicateTileAction::None;
  }

  if update.has_biome_delta {
    return DuplicateTileAction::InvalidateAndRefresh;
  }

  let visible_in_settled_chunk = update.current_chunk.is_active()
    && !update.is_chunk_transitioning
    && update.is_visible_in_current_chunk;

  if visible_in_settled_chunk {
    DuplicateTileAction::InvalidateAndRefresh
  } else {
    DuplicateTileAction::InvalidateOnly
  }
}
