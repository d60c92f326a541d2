//! Latest-wins refresh scheduling.
//!
//! Refresh requests arrive in bursts (camera movement, tile updates). Each
//! request gets a new refresh token; at most one refresh executes at a time,
//! and the pipeline always ends with an execution at the latest token.
//!
//! The decision functions are pure; [`RefreshScheduler`] is the frame-polled
//! state machine that applies them.

use std::time::Duration;

// WASM compat: std::time::Instant panics on wasm32
use web_time::Instant;

/// Refresh should apply only when the scheduled token is still the latest.
pub fn should_apply_refresh_token(scheduled: u64, latest: u64) -> bool {
  scheduled == latest
}

/// A newer request exists.
pub fn should_reschedule_refresh_token(scheduled: u64, latest: u64) -> bool {
  scheduled < latest
}

/// Stale scheduled work executes at the latest token instead of starving.
pub fn resolve_refresh_execution_token(scheduled: u64, latest: u64) -> u64 {
  if scheduled < latest { latest } else { scheduled }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshExecutionPlan {
  pub should_apply_scheduled: bool,
  pub should_record_superseded: bool,
  pub execution_token: u64,
}

pub fn resolve_refresh_execution_plan(scheduled: u64, latest: u64) -> RefreshExecutionPlan {
  RefreshExecutionPlan {
    should_apply_scheduled: should_apply_refresh_token(scheduled, latest),
    should_record_superseded: should_reschedule_refresh_token(scheduled, latest),
    execution_token: resolve_refresh_execution_token(scheduled, latest),
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshRunningActions {
  pub should_mark_rerun_requested: bool,
  pub should_reschedule_timer: bool,
}

/// A request that arrives while a refresh executes is always recorded as a
/// rerun; the timer only needs re-arming when the scheduled token is behind.
pub fn resolve_refresh_running_actions(scheduled: u64, latest: u64) -> RefreshRunningActions {
  RefreshRunningActions {
    should_mark_rerun_requested: true,
    should_reschedule_timer: scheduled < latest,
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshCompletionActions {
  pub has_newer_request: bool,
  pub should_schedule_rerun: bool,
  pub should_clear_rerun_requested: bool,
}

pub fn resolve_refresh_completion_actions(
  applied: u64,
  latest: u64,
  rerun_requested: bool,
) -> RefreshCompletionActions {
  let has_newer_request = applied != latest;
  let should_schedule_rerun = has_newer_request || rerun_requested;
  RefreshCompletionActions {
    has_newer_request,
    should_schedule_rerun,
    should_clear_rerun_requested: should_schedule_rerun,
  }
}

/// Most recently requested token and whether a rerun was requested while a
/// refresh was executing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshSchedule {
  pub scheduled_token: u64,
  pub rerun_requested: bool,
}

/// Permission to execute one refresh. Hand it back to
/// [`RefreshScheduler::complete`] when done.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshTicket {
  pub token: u64,
  /// The armed token was behind the latest one when this fired.
  pub superseded: bool,
}

/// Debounced latest-wins refresh state machine.
///
/// The debounce window starts when the timer is armed and is not extended by
/// later requests, so a continuous burst cannot postpone the refresh forever.
#[derive(Debug)]
pub struct RefreshScheduler {
  debounce: Duration,
  latest: u64,
  schedule: RefreshSchedule,
  armed_at: Option<Instant>,
  running: Option<u64>,
  superseded: u64,
  last_applied: Option<u64>,
}

impl RefreshScheduler {
  pub fn new(debounce: Duration) -> Self {
    Self {
      debounce,
      latest: 0,
      schedule: RefreshSchedule::default(),
      armed_at: None,
      running: None,
      superseded: 0,
      last_applied: None,
    }
  }

  /// Records a refresh request and returns its token.
  pub fn request(&mut self, now: Instant) -> u64 {
    self.latest += 1;

    if self.running.is_some() {
      let actions = resolve_refresh_running_actions(self.schedule.scheduled_token, self.latest);
      self.schedule.rerun_requested |= actions.should_mark_rerun_requested;
      if actions.should_reschedule_timer && self.armed_at.is_none() {
        self.armed_at = Some(now);
      }
    } else if self.armed_at.is_none() {
      self.schedule.scheduled_token = self.latest;
      self.armed_at = Some(now);
    }

    self.latest
  }

  /// Returns a ticket once the debounce window elapsed and nothing runs.
  pub fn poll(&mut self, now: Instant) -> Option<RefreshTicket> {
    if self.running.is_some() {
      return None;
    }
    let armed_at = self.armed_at?;
    if now.saturating_duration_since(armed_at) < self.debounce {
      return None;
    }
    self.armed_at = None;

    let plan = resolve_refresh_execution_plan(self.schedule.scheduled_token, self.latest);
    if plan.should_record_superseded {
      self.superseded += 1;
    }
    if self.last_applied == Some(plan.execution_token) {
      return None;
    }

    self.schedule.scheduled_token = plan.execution_token;
    self.running = Some(plan.execution_token);
    Some(RefreshTicket {
      token: plan.execution_token,
      superseded: !plan.should_apply_scheduled,
    })
  }

  /// Marks the ticket's refresh as finished, re-arming if newer requests
  /// arrived meanwhile. Tickets from before a [`reset`](Self::reset) are
  /// ignored.
  pub fn complete(&mut self, ticket: RefreshTicket, now: Instant) -> RefreshCompletionActions {
    if self.running != Some(ticket.token) {
      return RefreshCompletionActions::default();
    }
    self.running = None;
    self.last_applied = Some(ticket.token);

    let actions =
      resolve_refresh_completion_actions(ticket.token, self.latest, self.schedule.rerun_requested);
    if actions.should_clear_rerun_requested {
      self.schedule.rerun_requested = false;
    }
    if actions.should_schedule_rerun {
      self.schedule.scheduled_token = self.latest;
      self.armed_at = Some(self.armed_at.unwrap_or(now));
    }
    actions
  }

  /// Hands back a ticket that could not run yet. Nothing is recorded as
  /// applied; the scheduler re-arms at the latest token.
  pub fn defer(&mut self, ticket: RefreshTicket, now: Instant) {
    if self.running != Some(ticket.token) {
      return;
    }
    self.running = None;
    self.schedule = RefreshSchedule {
      scheduled_token: self.latest,
      rerun_requested: false,
    };
    self.armed_at = Some(self.armed_at.unwrap_or(now));
  }

  pub fn schedule(&self) -> RefreshSchedule {
    self.schedule
  }

  pub fn latest_token(&self) -> u64 {
    self.latest
  }

  pub fn is_running(&self) -> bool {
    self.running.is_some()
  }

  pub fn is_armed(&self) -> bool {
    self.armed_at.is_some()
  }

  pub fn last_applied(&self) -> Option<u64> {
    self.last_applied
  }

  /// Number of armed refreshes that fired behind the latest request.
  pub fn superseded_count(&self) -> u64 {
    self.superseded
  }

  /// Drops any armed or running refresh. Tokens keep increasing.
  pub fn reset(&mut self) {
    self.schedule = RefreshSchedule {
      scheduled_token: self.latest,
      rerun_requested: false,
    };
    self.armed_at = None;
    self.running = None;
  }
}
