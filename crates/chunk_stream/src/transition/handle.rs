//! In-flight switch handles and settlement waiting.

use std::fmt;
use std::sync::Arc;

use crate::backend::BackendError;
use crate::keys::ChunkKey;
use crate::settle::{Resolver, Settled, settle_pair};

use super::token::TransitionToken;

/// How a chunk switch ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchOutcome {
  /// The target became authoritative and managers were committed.
  Committed,
  /// The fetch failed; the previous chunk stays authoritative.
  RolledBack,
  /// A newer switch was issued before this one settled.
  Superseded,
  /// The target was already authoritative and the switch was not forced.
  AlreadyActive,
  /// Streaming is switched off.
  SwitchedOff,
}

/// Collaborator call a switch failed in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwitchStage {
  Bounds,
  Grid,
  Restore,
  Manager(String),
}

impl fmt::Display for SwitchStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SwitchStage::Bounds => write!(f, "bounds switch"),
      SwitchStage::Grid => write!(f, "grid update"),
      SwitchStage::Restore => write!(f, "previous state restore"),
      SwitchStage::Manager(name) => write!(f, "manager commit ({name})"),
    }
  }
}

/// Error settling a switch handle.
#[derive(Clone, Debug)]
pub enum SwitchError {
  /// A collaborator call failed.
  Backend {
    stage: SwitchStage,
    source: Arc<BackendError>,
  },
  /// The future driving the switch was dropped before it settled.
  Abandoned,
}

impl SwitchError {
  pub(crate) fn backend(stage: SwitchStage, source: BackendError) -> Self {
    SwitchError::Backend {
      stage,
      source: Arc::new(source),
    }
  }
}

impl fmt::Display for SwitchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SwitchError::Backend { stage, source } => {
        write!(f, "chunk switch failed during {stage}: {source}")
      }
      SwitchError::Abandoned => write!(f, "chunk switch was abandoned before it settled"),
    }
  }
}

impl std::error::Error for SwitchError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      SwitchError::Backend { source, .. } => Some(source.as_ref()),
      SwitchError::Abandoned => None,
    }
  }
}

pub type SwitchResult = Result<SwitchOutcome, SwitchError>;

/// Shared view of an in-flight (or settled) chunk switch.
#[derive(Clone)]
pub struct SwitchHandle {
  token: TransitionToken,
  target: ChunkKey,
  settled: Settled<SwitchResult>,
}

impl SwitchHandle {
  pub(crate) fn new(token: TransitionToken, target: ChunkKey) -> (Self, Resolver<SwitchResult>) {
    let (resolver, settled) = settle_pair();
    (
      Self {
        token,
        target,
        settled,
      },
      resolver,
    )
  }

  pub fn token(&self) -> TransitionToken {
    self.token
  }

  pub fn target(&self) -> ChunkKey {
    self.target
  }

  pub fn is_settled(&self) -> bool {
    self.settled.is_settled()
  }

  /// Waits for the switch to settle.
  pub async fn wait(&self) -> SwitchResult {
    self.settled.wait().await.unwrap_or(Err(SwitchError::Abandoned))
  }
}

impl fmt::Debug for SwitchHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SwitchHandle")
      .field("token", &self.token)
      .field("target", &self.target)
      .field("settled", &self.is_settled())
      .finish()
  }
}

/// Waits until no newer switch replaced the one just awaited.
///
/// `current` is re-read after every await, since a new switch may have been
/// issued meanwhile. Failures go to `on_error` and waiting continues with the
/// newer switch, so one failed switch never blocks overall settlement.
pub async fn wait_for_transition_to_settle<C, E>(mut current: C, mut on_error: E)
where
  C: FnMut() -> Option<SwitchHandle>,
  E: FnMut(&SwitchError),
{
  let mut awaited = None;
  loop {
    let Some(handle) = current() else {
      return;
    };
    if awaited == Some(handle.token()) {
      return;
    }
    if let Err(err) = handle.wait().await {
      on_error(&err);
    }
    awaited = Some(handle.token());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures_lite::future;
  use std::cell::RefCell;

  #[test]
  fn dropped_resolver_reports_abandoned() {
    let (handle, resolver) = SwitchHandle::new(TransitionToken(1), ChunkKey::new(0, 0));
    drop(resolver);
    assert!(matches!(
      future::block_on(handle.wait()),
      Err(SwitchError::Abandoned)
    ));
  }

  #[test]
  fn settle_wait_follows_replacement_and_reports_errors() {
    let (first, first_resolver) = SwitchHandle::new(TransitionToken(1), ChunkKey::new(0, 0));
    let (second, second_resolver) = SwitchHandle::new(TransitionToken(2), ChunkKey::new(0, 24));

    let current = RefCell::new(Some(first));
    let errors = RefCell::new(Vec::new());

    first_resolver.resolve(Err(SwitchError::backend(
      SwitchStage::Bounds,
      BackendError::Failed("offline".into()),
    )));
    drop(second_resolver);

    let mut reads = 0;
    future::block_on(wait_for_transition_to_settle(
      || {
        reads += 1;
        // A newer switch shows up after the first one settles.
        if reads == 2 {
          *current.borrow_mut() = Some(second.clone());
        }
        current.borrow().clone()
      },
      |err| errors.borrow_mut().push(err.to_string()),
    ));

    // First switch failed, second was dropped before settling.
    let errors = errors.into_inner();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("bounds switch"));
    assert!(errors[1].contains("abandoned"));
  }

  #[test]
  fn settle_wait_returns_without_switch() {
    let mut called = false;
    future::block_on(wait_for_transition_to_settle(|| None, |_| called = true));
    assert!(!called);
  }
}
