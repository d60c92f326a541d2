//! Transition tokens and the authority that issues them.

use std::fmt;

/// Monotonic version of a chunk-switch attempt.
///
/// A newer switch always carries a strictly larger token; async results
/// tagged with an older token are disqualified instead of cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransitionToken(pub u64);

impl TransitionToken {
  /// Returns the following token.
  pub const fn next(self) -> Self {
    Self(self.0.saturating_add(1))
  }
}

impl fmt::Display for TransitionToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Exact acceptance: gates committing actions (authoritative chunk writes,
/// manager commits). An untokened request is always accepted.
pub fn accept_exact(token: Option<TransitionToken>, latest: TransitionToken) -> bool {
  token.is_none_or(|token| token == latest)
}

/// Lenient acceptance for non-committing checks. An untokened request is
/// always accepted.
pub fn accept_at_least(token: Option<TransitionToken>, latest: TransitionToken) -> bool {
  token.is_none_or(|token| token >= latest)
}

/// Owner of the latest issued token. Never decreases.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransitionAuthority {
  latest: TransitionToken,
}

impl TransitionAuthority {
  pub fn new() -> Self {
    Self::default()
  }

  /// Most recently issued token.
  pub fn latest(&self) -> TransitionToken {
    self.latest
  }

  /// Issues a new token, invalidating every older one.
  pub fn advance(&mut self) -> TransitionToken {
    self.latest = self.latest.next();
    self.latest
  }

  pub fn is_current(&self, token: TransitionToken) -> bool {
    token == self.latest
  }
}
