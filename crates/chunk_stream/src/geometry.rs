//! Chunk render-window geometry.
//!
//! Every caller that needs the cells a chunk renders (structure bounds
//! checks, neighbor overlap, the bounds fetch of a chunk switch) goes through
//! [`render_bounds`]. There is exactly one rounding rule: the window is
//! centered on the rounded chunk center and offset by a floored half-window.

use serde::{Deserialize, Serialize};

use crate::keys::ChunkKey;

/// Size of the render window in cells.
///
/// Fractional sizes are floored and negative (or NaN) sizes clamp to zero
/// when bounds are derived.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderSize {
  pub width: f64,
  pub height: f64,
}

impl RenderSize {
  /// Creates a new render size.
  pub const fn new(width: f64, height: f64) -> Self {
    Self { width, height }
  }

  /// Returns the window width in whole cells.
  pub fn width_cells(&self) -> i32 {
    whole_cells(self.width)
  }

  /// Returns the window height in whole cells.
  pub fn height_cells(&self) -> i32 {
    whole_cells(self.height)
  }
}

impl Default for RenderSize {
  fn default() -> Self {
    Self::new(48.0, 48.0)
  }
}

fn whole_cells(dimension: f64) -> i32 {
  if dimension.is_nan() {
    return 0;
  }
  dimension.floor().clamp(0.0, i32::MAX as f64) as i32
}

/// Rounded center cell of a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkCenter {
  pub row: i32,
  pub col: i32,
}

/// Closed cell rectangle rendered for a chunk. Both ends are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderBounds {
  pub min_col: i32,
  pub max_col: i32,
  pub min_row: i32,
  pub max_row: i32,
}

impl RenderBounds {
  /// Returns true if the cell lies inside the bounds (inclusive).
  pub fn contains(&self, col: i32, row: i32) -> bool {
    col >= self.min_col && col <= self.max_col && row >= self.min_row && row <= self.max_row
  }

  /// Number of columns covered.
  pub fn width(&self) -> i64 {
    self.max_col as i64 - self.min_col as i64 + 1
  }

  /// Number of rows covered.
  pub fn height(&self) -> i64 {
    self.max_row as i64 - self.min_row as i64 + 1
  }

  /// Returns true if the rectangle covers no cells.
  pub fn is_empty(&self) -> bool {
    self.width() <= 0 || self.height() <= 0
  }

  /// Returns the smallest rectangle covering both.
  pub fn union(&self, other: &RenderBounds) -> RenderBounds {
    RenderBounds {
      min_col: self.min_col.min(other.min_col),
      max_col: self.max_col.max(other.max_col),
      min_row: self.min_row.min(other.min_row),
      max_row: self.max_row.max(other.max_row),
    }
  }
}

/// Rounds half toward positive infinity, matching the coordinate rounding
/// the hex grid was authored with (`-0.5` rounds to `0`, `0.5` to `1`).
fn round_half_up(value: f64) -> i32 {
  (value + 0.5).floor() as i32
}

/// Returns the rounded center cell of the chunk starting at the given origin.
pub fn chunk_center(start_row: i32, start_col: i32, stride: i32) -> ChunkCenter {
  let half = stride as f64 / 2.0;
  ChunkCenter {
    row: round_half_up(start_row as f64 + half),
    col: round_half_up(start_col as f64 + half),
  }
}

/// Returns the render window of the chunk starting at the given origin.
///
/// Covers exactly `floor(width) x floor(height)` cells regardless of parity:
/// `min = center - floor(size / 2)`, `max = min + size - 1`.
pub fn render_bounds(
  start_row: i32,
  start_col: i32,
  size: RenderSize,
  stride: i32,
) -> RenderBounds {
  let center = chunk_center(start_row, start_col, stride);
  let width = size.width_cells();
  let height = size.height_cells();

  let min_col = center.col.saturating_sub(width / 2);
  let min_row = center.row.saturating_sub(height / 2);

  RenderBounds {
    min_col,
    max_col: min_col.saturating_add(width).saturating_sub(1),
    min_row,
    max_row: min_row.saturating_add(height).saturating_sub(1),
  }
}

/// Render window of a chunk key.
pub fn chunk_render_bounds(key: ChunkKey, size: RenderSize, stride: i32) -> RenderBounds {
  render_bounds(key.row, key.col, size, stride)
}

/// Returns true if the cell is inside the render window of the given chunk.
pub fn is_within_bounds(
  col: i32,
  row: i32,
  start_row: i32,
  start_col: i32,
  size: RenderSize,
  stride: i32,
) -> bool {
  render_bounds(start_row, start_col, size, stride).contains(col, row)
}

/// Maps a camera focus point on the ground plane to the chunk that should be
/// active.
///
/// Columns advance by `sqrt(3) * hex_size` and rows by `1.5 * hex_size`
/// world units. The focus is pushed forward by half a chunk column and a
/// third of a chunk row so the next chunk loads before the camera reaches it.
pub fn world_to_chunk_key(x: f32, z: f32, stride: i32, hex_size: f32) -> ChunkKey {
  let stride_f = stride as f64;
  let hex = hex_size as f64;
  let col_pitch = stride_f * hex * 3f64.sqrt();
  let row_pitch = stride_f * hex * 1.5;
  if col_pitch <= 0.0 || row_pitch <= 0.0 {
    return ChunkKey::new(0, 0);
  }

  let adjusted_x = x as f64 + col_pitch / 2.0;
  let adjusted_z = z as f64 + row_pitch / 3.0;
  let chunk_x = (adjusted_x / col_pitch).floor() as i32;
  let chunk_z = (adjusted_z / row_pitch).floor() as i32;

  ChunkKey::new(
    chunk_z.saturating_mul(stride),
    chunk_x.saturating_mul(stride),
  )
}
