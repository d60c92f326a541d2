//! Streaming systems, chained in `Update`.

use std::sync::Arc;

use bevy::prelude::*;
use bevy::tasks::{AsyncComputeTaskPool, IoTaskPool, block_on};
use chunk_stream::{SwitchOutcome, world_to_chunk_key};
// WASM compat: std::time::Instant panics on wasm32
use web_time::Instant;

use crate::plugin::{
  CameraTracking, ChunkCommitted, ChunkStreaming, PrefetchQueue, StreamingCamera, StreamingTasks,
  SwitchOffStreaming, SwitchOnStreaming, SwitchTask, TileUpdated,
};

/// System: Applies switch-off/on requests.
///
/// Forgets the last requested chunk either way so the camera re-requests
/// its chunk once streaming is back on.
pub(crate) fn handle_streaming_control(
  mut off: MessageReader<SwitchOffStreaming>,
  mut on: MessageReader<SwitchOnStreaming>,
  streaming: Res<ChunkStreaming>,
  mut tracking: ResMut<CameraTracking>,
) {
  if off.read().count() > 0 {
    streaming.session.switch_off();
    tracking.last_requested = None;
  }
  if on.read().count() > 0 && streaming.session.switch_on() {
    tracking.last_requested = None;
  }
}

/// System: Reconciles tile writes against the rendered chunks.
pub(crate) fn apply_tile_updates(
  mut updates: MessageReader<TileUpdated>,
  streaming: Res<ChunkStreaming>,
) {
  let now = Instant::now();
  for TileUpdated { col, row, update } in updates.read() {
    let outcome = streaming.session.reconcile_tile_update(*col, *row, *update, now);
    if !outcome.invalidated.is_empty() {
      debug!(
        "Tile ({col}, {row}) invalidated {} chunk(s), action {:?}",
        outcome.invalidated.len(),
        outcome.action
      );
    }
  }
}

/// System: Starts a chunk switch whenever the camera enters a new chunk.
pub(crate) fn track_streaming_camera(
  camera: Query<&GlobalTransform, With<StreamingCamera>>,
  streaming: Res<ChunkStreaming>,
  mut tracking: ResMut<CameraTracking>,
  mut tasks: ResMut<StreamingTasks>,
) {
  let Ok(transform) = camera.single() else {
    return;
  };
  let session = &streaming.session;
  if session.is_switched_off() {
    return;
  }

  let translation = transform.translation();
  let config = session.config();
  session.note_camera_distance(translation.y, Instant::now());

  let target = world_to_chunk_key(
    translation.x,
    translation.z,
    config.chunk_stride,
    config.hex_size,
  );
  if tracking.last_requested == Some(target) {
    return;
  }
  tracking.last_requested = Some(target);

  let session = Arc::clone(session);
  let task = AsyncComputeTaskPool::get()
    .spawn(async move { session.switch_to(target, false).await });
  tasks.switches.push(SwitchTask { target, task });
}

/// System: Starts the pending refresh once its debounce window elapsed.
pub(crate) fn drive_refresh(streaming: Res<ChunkStreaming>, mut tasks: ResMut<StreamingTasks>) {
  if tasks.refresh.is_some() {
    return;
  }
  let now = Instant::now();
  let Some(ticket) = streaming.session.poll_refresh(now) else {
    return;
  };

  let session = Arc::clone(&streaming.session);
  let task = AsyncComputeTaskPool::get()
    .spawn(async move { session.run_refresh(ticket, now).await });
  tasks.refresh = Some(task);
}

/// System: Polls finished switch, refresh and prefetch tasks.
pub(crate) fn poll_streaming_tasks(
  mut tasks: ResMut<StreamingTasks>,
  streaming: Res<ChunkStreaming>,
  prefetch: Res<PrefetchQueue>,
  mut committed: MessageWriter<ChunkCommitted>,
) {
  let tasks = &mut *tasks;
  let mut newest_commit = None;

  tasks.switches.retain_mut(|switch| {
    if !switch.task.is_finished() {
      return true;
    }

    match block_on(&mut switch.task) {
      Ok(SwitchOutcome::Committed) => {
        committed.write(ChunkCommitted {
          chunk: switch.target,
        });
        newest_commit = Some(switch.target);
      }
      Ok(outcome) => debug!("Switch to {} finished: {outcome:?}", switch.target),
      Err(e) => warn!("Switch to {} failed: {e}", switch.target),
    }
    false
  });

  if let Some(center) = newest_commit
    && streaming.session.config().prefetch_neighbors
  {
    prefetch.set_center(center);
    let runner = prefetch.runner.clone();
    tasks
      .prefetches
      .push(IoTaskPool::get().spawn(async move { runner.trigger().await }));
  }

  if let Some(task) = tasks.refresh.take_if(|task| task.is_finished())
    && let Err(e) = block_on(task)
  {
    warn!("Chunk refresh failed: {e}");
  }

  tasks.prefetches.retain_mut(|task| {
    if !task.is_finished() {
      return true;
    }
    block_on(task);
    false
  });
}
