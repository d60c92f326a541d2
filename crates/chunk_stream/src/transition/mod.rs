//! Transition token authority and chunk switch decisions.
//!
//! Every chunk switch is tagged with a [`TransitionToken`]. Issuing a newer
//! token is the only form of cancellation: in-flight calls are allowed to
//! finish, and their results are disqualified by [`resolve_chunk_switch_actions`]
//! and [`should_run_manager_update`] when they settle.

mod decision;
mod handle;
mod token;

pub use decision::{
  ChunkSwitchActions, ChunkSwitchAttempt, ManagerUpdateCheck, resolve_chunk_switch_actions,
  should_run_manager_update,
};
pub use handle::{
  SwitchError, SwitchHandle, SwitchOutcome, SwitchResult, SwitchStage,
  wait_for_transition_to_settle,
};
pub use token::{TransitionAuthority, TransitionToken, accept_at_least, accept_exact};
