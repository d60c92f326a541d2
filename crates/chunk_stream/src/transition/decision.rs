//! Chunk switch decision engine.
//!
//! Pure functions deciding what a settling switch is allowed to do. The
//! session calls these right before every side effect, after the awaited
//! collaborator calls have returned.

use super::token::{TransitionToken, accept_exact};
use crate::keys::{AuthoritativeChunk, ChunkKey};

/// Facts about a switch whose tile fetch just settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSwitchAttempt {
  pub target_chunk: ChunkKey,
  pub fetch_succeeded: bool,
  /// False once a newer switch has been issued.
  pub is_current_transition: bool,
  /// Authoritative chunk before this switch.
  pub previous_chunk: AuthoritativeChunk,
}

/// Side effects a settled switch may perform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkSwitchActions {
  pub should_rollback: bool,
  pub should_commit_managers: bool,
  pub should_unregister_previous_chunk: bool,
  pub should_restore_previous_state: bool,
}

impl ChunkSwitchActions {
  /// True when every flag is false, i.e. the result is dropped.
  pub fn is_noop(&self) -> bool {
    *self == Self::default()
  }
}

/// Resolves the actions for a settled switch.
///
/// A stale switch does nothing at all. A failed fetch rolls back and keeps the
/// previous chunk. A successful current switch commits, and unregisters the
/// previous chunk only when there is one and it differs from the target.
pub fn resolve_chunk_switch_actions(attempt: &ChunkSwitchAttempt) -> ChunkSwitchActions {
  if !attempt.is_current_transition {
    return ChunkSwitchActions::default();
  }

  if !attempt.fetch_succeeded {
    return ChunkSwitchActions {
      should_rollback: true,
      should_restore_previous_state: true,
      ..Default::default()
    };
  }

  ChunkSwitchActions {
    should_commit_managers: true,
    should_unregister_previous_chunk: match attempt.previous_chunk {
      AuthoritativeChunk::Active(previous) => previous != attempt.target_chunk,
      AuthoritativeChunk::Uncommitted => false,
    },
    ..Default::default()
  }
}

/// Snapshot taken right before a manager commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManagerUpdateCheck {
  /// Token the commit was issued under, if any.
  pub transition_token: Option<TransitionToken>,
  /// Latest token at check time.
  pub expected_transition_token: TransitionToken,
  pub current_chunk: AuthoritativeChunk,
  pub target_chunk: ChunkKey,
}

/// A manager commit runs only under an exact token match and while the
/// target is still the authoritative chunk.
///
/// Both conditions are required: the authoritative chunk can be rewritten
/// between token capture and the commit without a token bump.
pub fn should_run_manager_update(check: &ManagerUpdateCheck) -> bool {
  accept_exact(check.transition_token, check.expected_transition_token)
    && check.current_chunk.is(check.target_chunk)
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  const TARGET: ChunkKey = ChunkKey::new(24, 24);
  const OTHER: ChunkKey = ChunkKey::new(0, 0);

  fn previous_relations() -> [AuthoritativeChunk; 3] {
    [
      AuthoritativeChunk::Uncommitted,
      AuthoritativeChunk::Active(TARGET),
      AuthoritativeChunk::Active(OTHER),
    ]
  }

  fn expected(current: bool, succeeded: bool, previous: AuthoritativeChunk) -> ChunkSwitchActions {
    match (current, succeeded) {
      (false, _) => ChunkSwitchActions::default(),
      (true, false) => ChunkSwitchActions {
        should_rollback: true,
        should_commit_managers: false,
        should_unregister_previous_chunk: false,
        should_restore_previous_state: true,
      },
      (true, true) => ChunkSwitchActions {
        should_rollback: false,
        should_commit_managers: true,
        should_unregister_previous_chunk: previous == AuthoritativeChunk::Active(OTHER),
        should_restore_previous_state: false,
      },
    }
  }

  #[test]
  fn full_decision_table() {
    let mut cases = 0;
    for current in [false, true] {
      for succeeded in [false, true] {
        for previous in previous_relations() {
          let attempt = ChunkSwitchAttempt {
            target_chunk: TARGET,
            fetch_succeeded: succeeded,
            is_current_transition: current,
            previous_chunk: previous,
          };
          assert_eq!(
            resolve_chunk_switch_actions(&attempt),
            expected(current, succeeded, previous),
            "current={current} succeeded={succeeded} previous={previous}"
          );
          cases += 1;
        }
      }
    }
    assert_eq!(cases, 12);
  }

  #[test]
  fn stale_results_are_dropped() {
    for previous in previous_relations() {
      let actions = resolve_chunk_switch_actions(&ChunkSwitchAttempt {
        target_chunk: TARGET,
        fetch_succeeded: true,
        is_current_transition: false,
        previous_chunk: previous,
      });
      assert!(actions.is_noop());
    }
  }

  #[test]
  fn switch_to_active_chunk_keeps_it_registered() {
    let actions = resolve_chunk_switch_actions(&ChunkSwitchAttempt {
      target_chunk: TARGET,
      fetch_succeeded: true,
      is_current_transition: true,
      previous_chunk: AuthoritativeChunk::Active(TARGET),
    });
    assert!(actions.should_commit_managers);
    assert!(!actions.should_unregister_previous_chunk);
  }

  #[test]
  fn decisions_are_pure_under_random_inputs() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
      let current = rng.gen_bool(0.5);
      let succeeded = rng.gen_bool(0.5);
      let previous = previous_relations()[rng.gen_range(0..3)];
      let attempt = ChunkSwitchAttempt {
        target_chunk: TARGET,
        fetch_succeeded: succeeded,
        is_current_transition: current,
        previous_chunk: previous,
      };
      let first = resolve_chunk_switch_actions(&attempt);
      assert_eq!(first, resolve_chunk_switch_actions(&attempt));
      assert_eq!(first, expected(current, succeeded, previous));
    }
  }

  #[test]
  fn manager_update_needs_token_and_chunk() {
    let latest = TransitionToken(3);
    let ok = ManagerUpdateCheck {
      transition_token: Some(latest),
      expected_transition_token: latest,
      current_chunk: AuthoritativeChunk::Active(TARGET),
      target_chunk: TARGET,
    };
    assert!(should_run_manager_update(&ok));

    // Token mismatch with matching chunk.
    assert!(!should_run_manager_update(&ManagerUpdateCheck {
      transition_token: Some(TransitionToken(2)),
      ..ok
    }));
    // Chunk mismatch with exact token.
    assert!(!should_run_manager_update(&ManagerUpdateCheck {
      current_chunk: AuthoritativeChunk::Active(OTHER),
      ..ok
    }));
    assert!(!should_run_manager_update(&ManagerUpdateCheck {
      current_chunk: AuthoritativeChunk::Uncommitted,
      ..ok
    }));
  }

  #[test]
  fn untokened_manager_update_still_checks_chunk() {
    let check = ManagerUpdateCheck {
      transition_token: None,
      expected_transition_token: TransitionToken(9),
      current_chunk: AuthoritativeChunk::Active(TARGET),
      target_chunk: TARGET,
    };
    assert!(should_run_manager_update(&check));
    assert!(!should_run_manager_update(&ManagerUpdateCheck {
      current_chunk: AuthoritativeChunk::Active(OTHER),
      ..check
    }));
  }
}
