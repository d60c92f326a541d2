//! Plugin, resources and messages.

use std::sync::{Arc, Mutex, PoisonError};

use bevy::prelude::*;
use bevy::tasks::Task;
use chunk_stream::{
  BoxFuture, ChunkKey, ChunkManager, CoalescedRunner, StreamingBackend, StreamingConfig,
  StreamingSession, SwitchError, SwitchResult, TileUpdate,
};

use crate::systems::{
  apply_tile_updates, drive_refresh, handle_streaming_control, poll_streaming_tasks,
  track_streaming_camera,
};

/// Marker component for the camera whose position selects the chunk.
#[derive(Component)]
pub struct StreamingCamera;

/// Stops streaming and clears all transient state.
#[derive(Message, Clone, Debug, Default)]
pub struct SwitchOffStreaming;

/// Resumes streaming after [`SwitchOffStreaming`].
#[derive(Message, Clone, Debug, Default)]
pub struct SwitchOnStreaming;

/// Emitted when a chunk switch committed.
#[derive(Message, Clone, Debug, PartialEq, Eq)]
pub struct ChunkCommitted {
  pub chunk: ChunkKey,
}

/// A tile write reported by the data layer.
#[derive(Message, Clone, Debug)]
pub struct TileUpdated {
  pub col: i32,
  pub row: i32,
  pub update: TileUpdate,
}

/// Shared streaming session.
#[derive(Resource, Clone)]
pub struct ChunkStreaming {
  pub session: Arc<StreamingSession>,
}

type PrefetchTask = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Coalesced neighbor prefetch around the latest committed chunk.
///
/// Commits that land while a prefetch runs collapse into a single rerun
/// around whichever center was set last.
#[derive(Resource, Clone)]
pub(crate) struct PrefetchQueue {
  center: Arc<Mutex<Option<ChunkKey>>>,
  pub(crate) runner: CoalescedRunner<PrefetchTask>,
}

impl PrefetchQueue {
  pub(crate) fn new(session: Arc<StreamingSession>) -> Self {
    let center: Arc<Mutex<Option<ChunkKey>>> = Arc::default();
    let latest = Arc::clone(&center);
    let task: PrefetchTask = Box::new(move || {
      let session = Arc::clone(&session);
      let center = *latest.lock().unwrap_or_else(PoisonError::into_inner);
      Box::pin(async move {
        if let Some(center) = center {
          let fetched = session.prefetch_around(center).await;
          debug!("Prefetched {fetched} fetches around {center}");
        }
      })
    });
    Self {
      center,
      runner: CoalescedRunner::new(task),
    }
  }

  pub(crate) fn set_center(&self, chunk: ChunkKey) {
    *self.center.lock().unwrap_or_else(PoisonError::into_inner) = Some(chunk);
  }
}

/// Chunk the camera last asked for.
#[derive(Resource, Default)]
pub(crate) struct CameraTracking {
  pub(crate) last_requested: Option<ChunkKey>,
}

pub(crate) struct SwitchTask {
  pub(crate) target: ChunkKey,
  pub(crate) task: Task<SwitchResult>,
}

/// In-flight streaming tasks, polled every frame.
#[derive(Resource, Default)]
pub(crate) struct StreamingTasks {
  pub(crate) switches: Vec<SwitchTask>,
  pub(crate) refresh: Option<Task<Result<(), SwitchError>>>,
  pub(crate) prefetches: Vec<Task<()>>,
}

/// Streams chunks around the [`StreamingCamera`].
///
/// ```ignore
/// app.add_plugins(
///   ChunkStreamingPlugin::new(StreamingConfig::default(), backend)
///     .with_manager(structures)
///     .with_manager(armies),
/// );
/// ```
pub struct ChunkStreamingPlugin {
  config: StreamingConfig,
  backend: Arc<dyn StreamingBackend>,
  managers: Vec<Arc<dyn ChunkManager>>,
}

impl ChunkStreamingPlugin {
  pub fn new(config: StreamingConfig, backend: Arc<dyn StreamingBackend>) -> Self {
    Self {
      config,
      backend,
      managers: Vec::new(),
    }
  }

  /// Adds a manager committed after the grid on every switch, in order.
  pub fn with_manager(mut self, manager: Arc<dyn ChunkManager>) -> Self {
    self.managers.push(manager);
    self
  }
}

impl Plugin for ChunkStreamingPlugin {
  fn build(&self, app: &mut App) {
    let config = match self.config.validate() {
      Ok(()) => self.config.clone(),
      Err(e) => {
        error!("Invalid streaming config, falling back to defaults: {e}");
        StreamingConfig::default()
      }
    };

    let session = self
      .managers
      .iter()
      .cloned()
      .fold(StreamingSession::new(config, Arc::clone(&self.backend)), |session, manager| {
        session.with_manager(manager)
      });
    let session = Arc::new(session);

    app
      .insert_resource(PrefetchQueue::new(Arc::clone(&session)))
      .insert_resource(ChunkStreaming { session })
      .init_resource::<CameraTracking>()
      .init_resource::<StreamingTasks>()
      .add_message::<SwitchOffStreaming>()
      .add_message::<SwitchOnStreaming>()
      .add_message::<ChunkCommitted>()
      .add_message::<TileUpdated>()
      .add_systems(
        Update,
        (
          handle_streaming_control,
          apply_tile_updates,
          track_streaming_camera,
          drive_refresh,
          poll_streaming_tasks,
        )
          .chain(),
      );
  }
}
