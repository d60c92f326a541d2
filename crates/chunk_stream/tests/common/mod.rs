//! Shared fakes for the streaming integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chunk_stream::{
  BackendError, BoxFuture, ChunkKey, ChunkManager, FetchKey, FetchRequest, ManagerCommit,
  StreamingBackend, StreamingConfig, StreamingSession, TransitionToken,
};
use futures_lite::future;

/// A collaborator call, in the order the session made it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
  Bounds(ChunkKey, Option<TransitionToken>),
  Fetch(FetchKey),
  Grid(ChunkKey),
  Unregister(ChunkKey),
}

/// Releases one gated fetch.
pub struct Gate(async_channel::Sender<bool>);

impl Gate {
  pub fn open(&self, succeeded: bool) {
    self.0.try_send(succeeded).unwrap();
  }
}

/// Backend whose fetches succeed after one yield unless gated or failing.
#[derive(Default)]
pub struct FakeBackend {
  gates: Mutex<HashMap<ChunkKey, VecDeque<async_channel::Receiver<bool>>>>,
  failing_fetches: Mutex<HashSet<ChunkKey>>,
  failing_bounds: Mutex<HashSet<ChunkKey>>,
  calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// The next fetch of `chunk` blocks until the returned gate opens.
  pub fn gate(&self, chunk: ChunkKey) -> Gate {
    let (tx, rx) = async_channel::bounded(1);
    self
      .gates
      .lock()
      .unwrap()
      .entry(chunk)
      .or_default()
      .push_back(rx);
    Gate(tx)
  }

  pub fn fail_fetch(&self, chunk: ChunkKey) {
    self.failing_fetches.lock().unwrap().insert(chunk);
  }

  pub fn fail_bounds(&self, chunk: ChunkKey) {
    self.failing_bounds.lock().unwrap().insert(chunk);
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn clear_calls(&self) {
    self.calls.lock().unwrap().clear();
  }

  pub fn fetch_count(&self, chunk: ChunkKey) -> usize {
    self
      .calls()
      .iter()
      .filter(|call| matches!(call, Call::Fetch(key) if key.chunk == chunk))
      .count()
  }

  fn record(&self, call: Call) {
    self.calls.lock().unwrap().push(call);
  }
}

impl StreamingBackend for FakeBackend {
  fn fetch_tiles(&self, request: FetchRequest) -> BoxFuture<'_, bool> {
    self.record(Call::Fetch(request.key));
    let chunk = request.key.chunk;
    let gate = self
      .gates
      .lock()
      .unwrap()
      .get_mut(&chunk)
      .and_then(|queue| queue.pop_front());
    let failing = self.failing_fetches.lock().unwrap().contains(&chunk);

    Box::pin(async move {
      match gate {
        Some(gate) => gate.recv().await.unwrap_or(false),
        None => {
          future::yield_now().await;
          !failing
        }
      }
    })
  }

  fn switch_bounds(
    &self,
    chunk: ChunkKey,
    token: Option<TransitionToken>,
  ) -> BoxFuture<'_, Result<(), BackendError>> {
    self.record(Call::Bounds(chunk, token));
    let failing = self.failing_bounds.lock().unwrap().contains(&chunk);
    Box::pin(async move {
      if failing {
        Err(BackendError::Failed(format!("bounds for {chunk} unavailable")))
      } else {
        Ok(())
      }
    })
  }

  fn update_grid(&self, start_row: i32, start_col: i32) -> BoxFuture<'_, Result<(), BackendError>> {
    self.record(Call::Grid(ChunkKey::new(start_row, start_col)));
    Box::pin(async { Ok(()) })
  }

  fn unregister_chunk(&self, chunk: ChunkKey) {
    self.record(Call::Unregister(chunk));
  }
}

/// Manager that records every commit.
pub struct RecordingManager {
  name: String,
  commits: Mutex<Vec<(ChunkKey, ManagerCommit)>>,
}

impl RecordingManager {
  pub fn new(name: &str) -> Arc<Self> {
    Arc::new(Self {
      name: name.to_string(),
      commits: Mutex::new(Vec::new()),
    })
  }

  pub fn commits(&self) -> Vec<(ChunkKey, ManagerCommit)> {
    self.commits.lock().unwrap().clone()
  }

  pub fn committed_chunks(&self) -> Vec<ChunkKey> {
    self.commits().into_iter().map(|(chunk, _)| chunk).collect()
  }
}

impl ChunkManager for RecordingManager {
  fn name(&self) -> &str {
    &self.name
  }

  fn update_chunk(
    &self,
    chunk: ChunkKey,
    commit: ManagerCommit,
  ) -> BoxFuture<'_, Result<(), BackendError>> {
    self.commits.lock().unwrap().push((chunk, commit));
    Box::pin(async { Ok(()) })
  }
}

pub struct Harness {
  pub backend: Arc<FakeBackend>,
  pub structures: Arc<RecordingManager>,
  pub armies: Arc<RecordingManager>,
  pub session: StreamingSession,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_config(StreamingConfig::default())
  }

  pub fn with_config(config: StreamingConfig) -> Self {
    let backend = FakeBackend::new();
    let structures = RecordingManager::new("structures");
    let armies = RecordingManager::new("armies");
    let session = StreamingSession::new(config, backend.clone())
      .with_manager(structures.clone())
      .with_manager(armies.clone());
    Self {
      backend,
      structures,
      armies,
      session,
    }
  }
}

pub const ORIGIN: ChunkKey = ChunkKey::new(0, 0);
pub const EAST: ChunkKey = ChunkKey::new(0, 24);
pub const FAR_EAST: ChunkKey = ChunkKey::new(0, 96);
