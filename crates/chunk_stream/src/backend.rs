//! Collaborator contracts.
//!
//! The session never touches rendering or data access directly. It calls a
//! [`StreamingBackend`] for tiles, bounds and grid rebuilds, and a list of
//! [`ChunkManager`]s for the per-chunk commits they own.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::geometry::RenderBounds;
use crate::keys::{ChunkKey, FetchKey};
use crate::transition::TransitionToken;

/// Boxed future returned by collaborator methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Collaborator failure.
#[derive(Debug)]
pub enum BackendError {
  /// Failure described by the collaborator.
  Failed(String),
  /// Wrapped lower-level error.
  Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for BackendError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BackendError::Failed(msg) => write!(f, "{msg}"),
      BackendError::Other(e) => write!(f, "{e}"),
    }
  }
}

impl std::error::Error for BackendError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      BackendError::Other(e) => Some(e.as_ref()),
      BackendError::Failed(_) => None,
    }
  }
}

impl From<std::io::Error> for BackendError {
  fn from(e: std::io::Error) -> Self {
    BackendError::Other(Box::new(e))
  }
}

/// A tile fetch for the cells of one chunk (or super-area).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchRequest {
  pub key: FetchKey,
  pub bounds: RenderBounds,
}

/// Options passed to a manager commit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManagerCommit {
  /// Re-render even if the manager already shows this chunk.
  pub force: bool,
  /// Token of the switch the commit belongs to. `None` for refreshes.
  pub transition_token: Option<TransitionToken>,
}

/// Data and rendering side of chunk streaming.
pub trait StreamingBackend: Send + Sync {
  /// Fetches and applies tile data for the request.
  ///
  /// Failures and timeouts are both reported as `false`.
  fn fetch_tiles(&self, request: FetchRequest) -> BoxFuture<'_, bool>;

  /// Updates renderer bookkeeping keyed by the chunk's bounds.
  fn switch_bounds(
    &self,
    chunk: ChunkKey,
    token: Option<TransitionToken>,
  ) -> BoxFuture<'_, Result<(), BackendError>>;

  /// Rebuilds the visible grid for the chunk starting at the given origin.
  fn update_grid(&self, start_row: i32, start_col: i32) -> BoxFuture<'_, Result<(), BackendError>>;

  /// Releases renderer resources held for a chunk that is no longer active.
  fn unregister_chunk(&self, _chunk: ChunkKey) {}
}

/// A per-chunk consumer (structures, armies, ...) committed after a switch.
pub trait ChunkManager: Send + Sync {
  /// Name used in logs and errors.
  fn name(&self) -> &str;

  /// Renders the manager's content for `chunk`.
  fn update_chunk(
    &self,
    chunk: ChunkKey,
    commit: ManagerCommit,
  ) -> BoxFuture<'_, Result<(), BackendError>>;
}
