//! Coalesced async update runner.
//!
//! Collapses concurrent update requests into the minimum number of task runs.
//! Each [`CoalescedRunner::trigger`] bumps a requested version. One caller
//! drives the task in a loop until the processed version catches up; every
//! other caller waits on that same execution. Triggers that arrive during a
//! run cause exactly one more run after it, however many there were.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::settle::{Resolver, Settled, settle_pair};

struct RunnerState {
  requested: u64,
  /// Version the latest started run covers.
  processed: u64,
  /// Version the latest finished run covers.
  completed: u64,
  in_flight: Option<Settled<()>>,
}

/// Runs `task` on demand, never concurrently with itself.
pub struct CoalescedRunner<F> {
  task: Arc<F>,
  state: Arc<Mutex<RunnerState>>,
}

impl<F> Clone for CoalescedRunner<F> {
  fn clone(&self) -> Self {
    Self {
      task: Arc::clone(&self.task),
      state: Arc::clone(&self.state),
    }
  }
}

fn lock(state: &Mutex<RunnerState>) -> MutexGuard<'_, RunnerState> {
  state.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Role {
  Done,
  Wait(Settled<()>),
  Drive(Resolver<()>),
}

impl<F, Fut> CoalescedRunner<F>
where
  F: Fn() -> Fut,
  Fut: Future<Output = ()>,
{
  pub fn new(task: F) -> Self {
    Self {
      task: Arc::new(task),
      state: Arc::new(Mutex::new(RunnerState {
        requested: 0,
        processed: 0,
        completed: 0,
        in_flight: None,
      })),
    }
  }

  /// Requests a run and resolves once a run covering this request finished.
  pub async fn trigger(&self) {
    let version = {
      let mut state = lock(&self.state);
      state.requested += 1;
      state.requested
    };

    loop {
      let role = {
        let mut state = lock(&self.state);
        if state.completed >= version {
          Role::Done
        } else if let Some(in_flight) = &state.in_flight {
          Role::Wait(in_flight.clone())
        } else {
          let (resolver, settled) = settle_pair();
          state.in_flight = Some(settled);
          Role::Drive(resolver)
        }
      };

      match role {
        Role::Done => return,
        // Re-check afterwards: the driver may have been dropped mid-run.
        Role::Wait(in_flight) => {
          in_flight.wait().await;
        }
        Role::Drive(resolver) => self.drive(resolver).await,
      }
    }
  }

  async fn drive(&self, resolver: Resolver<()>) {
    let mut guard = DriveGuard {
      state: &self.state,
      _resolver: resolver,
      finished: false,
    };

    loop {
      let version = {
        let mut state = lock(&self.state);
        if state.processed >= state.requested {
          state.in_flight = None;
          break;
        }
        state.processed = state.requested;
        state.processed
      };

      (self.task)().await;

      lock(&self.state).completed = version;
    }

    guard.finished = true;
  }

  /// Number of requests seen so far.
  pub fn requested_version(&self) -> u64 {
    lock(&self.state).requested
  }

  /// Version covered by the last finished run.
  pub fn completed_version(&self) -> u64 {
    lock(&self.state).completed
  }
}

/// Releases the driver role. If the driving future is dropped mid-run, the
/// unfinished version is handed back so a waiter can take over.
struct DriveGuard<'a> {
  state: &'a Mutex<RunnerState>,
  _resolver: Resolver<()>,
  finished: bool,
}

impl Drop for DriveGuard<'_> {
  fn drop(&mut self) {
    if !self.finished {
      let mut state = lock(self.state);
      state.processed = state.completed;
      state.in_flight = None;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures_lite::future;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn counting_runner() -> (
    CoalescedRunner<impl Fn() -> future::Boxed<()>>,
    Arc<AtomicUsize>,
  ) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let runner = CoalescedRunner::new(move || -> future::Boxed<()> {
      let counter = Arc::clone(&counter);
      Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        future::yield_now().await;
      })
    });
    (runner, runs)
  }

  #[test]
  fn single_trigger_runs_once() {
    let (runner, runs) = counting_runner();
    future::block_on(runner.trigger());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(runner.completed_version(), 1);
  }

  #[test]
  fn two_concurrent_triggers_run_twice() {
    let (runner, runs) = counting_runner();
    future::block_on(future::zip(runner.trigger(), runner.trigger()));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn triggers_during_a_run_collapse_into_one_rerun() {
    let (runner, runs) = counting_runner();
    future::block_on(future::zip(
      runner.trigger(),
      future::zip(runner.trigger(), future::zip(runner.trigger(), runner.trigger())),
    ));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(runner.completed_version(), runner.requested_version());
  }

  #[test]
  fn sequential_triggers_each_run() {
    let (runner, runs) = counting_runner();
    for _ in 0..3 {
      future::block_on(runner.trigger());
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn waiter_takes_over_from_dropped_driver() {
    let (runner, runs) = counting_runner();

    let mut driver = Box::pin(runner.trigger());
    assert!(future::block_on(future::poll_once(driver.as_mut())).is_none());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let mut waiter = Box::pin(runner.trigger());
    assert!(future::block_on(future::poll_once(waiter.as_mut())).is_none());
    drop(driver);

    future::block_on(waiter);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(runner.completed_version(), 2);
  }
}
