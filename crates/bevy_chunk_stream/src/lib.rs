//! Bevy Chunk Stream - camera-driven chunk streaming for Bevy.
//!
//! Wraps a [`chunk_stream::StreamingSession`] in ECS resources. The camera
//! tagged with [`StreamingCamera`] picks the target chunk every frame; chunk
//! switches, refreshes and prefetches run on Bevy's task pools and are
//! polled back into the world.

pub mod plugin;
mod systems;

pub use chunk_stream;
pub use plugin::{
  ChunkCommitted, ChunkStreaming, ChunkStreamingPlugin, StreamingCamera, SwitchOffStreaming,
  SwitchOnStreaming, TileUpdated,
};
