//! One-shot completion signal shared between a producer and many waiters.
//!
//! The producer holds a [`Resolver`]; any number of [`Settled`] clones can
//! await it. Closing the underlying channel wakes every waiter at once, and a
//! resolver dropped without a value settles as `None`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Creates a linked resolver/settled pair.
pub fn settle_pair<T>() -> (Resolver<T>, Settled<T>) {
  let (done_tx, done_rx) = async_channel::bounded(1);
  let slot = Arc::new(Mutex::new(None));
  (
    Resolver {
      slot: Arc::clone(&slot),
      done: done_tx,
    },
    Settled {
      slot,
      done: done_rx,
    },
  )
}

fn lock<T>(slot: &Mutex<Option<T>>) -> MutexGuard<'_, Option<T>> {
  slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer half. Consumed by [`Resolver::resolve`]; dropping it settles
/// waiters with `None`.
pub struct Resolver<T> {
  slot: Arc<Mutex<Option<T>>>,
  done: async_channel::Sender<()>,
}

impl<T> Resolver<T> {
  /// Stores the value and wakes every waiter.
  pub fn resolve(self, value: T) {
    *lock(&self.slot) = Some(value);
    self.done.close();
  }
}

/// Waiter half. Cheap to clone.
pub struct Settled<T> {
  slot: Arc<Mutex<Option<T>>>,
  done: async_channel::Receiver<()>,
}

impl<T> Clone for Settled<T> {
  fn clone(&self) -> Self {
    Self {
      slot: Arc::clone(&self.slot),
      done: self.done.clone(),
    }
  }
}

impl<T> Settled<T> {
  /// Returns true once the resolver has resolved or been dropped.
  pub fn is_settled(&self) -> bool {
    self.done.is_closed()
  }
}

impl<T: Clone> Settled<T> {
  /// Waits until settled and returns the value, or `None` if the resolver
  /// was dropped first.
  pub async fn wait(&self) -> Option<T> {
    // Nothing is ever sent: recv only returns once the channel closes.
    let _ = self.done.recv().await;
    self.peek()
  }

  /// Returns the value if already resolved.
  pub fn peek(&self) -> Option<T> {
    lock(&self.slot).clone()
  }
}
