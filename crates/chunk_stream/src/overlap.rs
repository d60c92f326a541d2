//! Neighbor and overlap resolution for cache invalidation fan-out.
//!
//! Render windows are larger than the chunk stride, so a single cell is
//! rendered by several chunks. When a tile changes, every chunk whose window
//! contains it must be invalidated, not only the stride-nearest one.

use crate::geometry::{RenderSize, is_within_bounds};
use crate::keys::ChunkKey;

/// Number of stride steps from a center chunk at which windows of
/// `dimension` cells can still overlap it.
///
/// `floor((dimension - 1) / stride)`, zero for non-positive inputs.
pub fn overlap_stride_radius(dimension: i32, stride: i32) -> i32 {
  if dimension <= 0 || stride <= 0 {
    return 0;
  }
  (dimension - 1) / stride
}

/// Returns every stride-aligned key whose window can overlap the window of
/// `center`, including `center` itself. Row-major order.
pub fn overlap_chunk_keys(center: ChunkKey, size: RenderSize, stride: i32) -> Vec<ChunkKey> {
  square_keys(center, size, stride, true)
}

/// Same as [`overlap_chunk_keys`] without the center key.
pub fn neighbor_chunk_keys(center: ChunkKey, size: RenderSize, stride: i32) -> Vec<ChunkKey> {
  square_keys(center, size, stride, false)
}

fn square_keys(
  center: ChunkKey,
  size: RenderSize,
  stride: i32,
  include_center: bool,
) -> Vec<ChunkKey> {
  let row_radius = overlap_stride_radius(size.height_cells(), stride);
  let col_radius = overlap_stride_radius(size.width_cells(), stride);

  let mut keys =
    Vec::with_capacity(((2 * row_radius + 1) * (2 * col_radius + 1)).max(0) as usize);
  for dr in -row_radius..=row_radius {
    for dc in -col_radius..=col_radius {
      if !include_center && dr == 0 && dc == 0 {
        continue;
      }
      keys.push(center.offset(dr, dc, stride));
    }
  }
  keys
}

/// Filters `keys` to those whose render window contains the cell.
pub fn chunk_keys_containing_hex(
  keys: &[ChunkKey],
  col: i32,
  row: i32,
  size: RenderSize,
  stride: i32,
) -> Vec<ChunkKey> {
  keys
    .iter()
    .copied()
    .filter(|key| is_within_bounds(col, row, key.row, key.col, size, stride))
    .collect()
}

/// Returns the stride-aligned key whose origin cell range contains the cell.
///
/// Uses floor division, so cell `-1` belongs to chunk `-stride`.
pub fn nearest_chunk_key(col: i32, row: i32, stride: i32) -> ChunkKey {
  let stride = stride.max(1);
  ChunkKey::new(
    row.div_euclid(stride) * stride,
    col.div_euclid(stride) * stride,
  )
}

/// Every chunk whose window contains the cell.
///
/// Candidates come from the overlap square around the stride-nearest chunk.
pub fn chunks_rendering_hex(col: i32, row: i32, size: RenderSize, stride: i32) -> Vec<ChunkKey> {
  let nearest = nearest_chunk_key(col, row, stride);
  let candidates = overlap_chunk_keys(nearest, size, stride);
  chunk_keys_containing_hex(&candidates, col, row, size, stride)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::chunk_render_bounds;

  const SIZE_48: RenderSize = RenderSize::new(48.0, 48.0);

  #[test]
  fn stride_radius() {
    assert_eq!(overlap_stride_radius(48, 24), 1);
    assert_eq!(overlap_stride_radius(49, 24), 2);
    assert_eq!(overlap_stride_radius(24, 24), 0);
    assert_eq!(overlap_stride_radius(25, 24), 1);
    assert_eq!(overlap_stride_radius(0, 24), 0);
    assert_eq!(overlap_stride_radius(-10, 24), 0);
  }

  #[test]
  fn overlap_square_includes_center() {
    let center = ChunkKey::new(24, 48);
    let keys = overlap_chunk_keys(center, SIZE_48, 24);
    assert_eq!(keys.len(), 9);
    assert!(keys.contains(&center));
    assert_eq!(keys[0], ChunkKey::new(0, 24));
    assert_eq!(keys[8], ChunkKey::new(48, 72));

    let neighbors = neighbor_chunk_keys(center, SIZE_48, 24);
    assert_eq!(neighbors.len(), 8);
    assert!(!neighbors.contains(&center));
  }

  #[test]
  fn asymmetric_window_uses_separate_radii() {
    // 60 wide -> col radius 2, 44 high -> row radius 1
    let keys = overlap_chunk_keys(ChunkKey::new(0, 0), RenderSize::new(60.0, 44.0), 24);
    assert_eq!(keys.len(), 3 * 5);
  }

  #[test]
  fn hex_filter_keeps_only_rendering_chunks() {
    // Cell (35, 0) is the last column of chunk (0,0)'s window.
    let affected = chunks_rendering_hex(35, 0, SIZE_48, 24);
    assert!(affected.contains(&ChunkKey::new(0, 0)));
    assert!(affected.contains(&ChunkKey::new(0, 24)));
    assert!(!affected.contains(&ChunkKey::new(0, -24)));
    for key in &affected {
      assert!(chunk_render_bounds(*key, SIZE_48, 24).contains(35, 0));
    }
  }

  #[test]
  fn no_overlapping_chunk_is_missed() {
    // Brute force over a wide area: every chunk whose window contains the
    // cell must be reported.
    let stride = 24;
    for (col, row) in [(0, 0), (-1, -1), (35, 36), (-13, 100), (47, -48)] {
      let affected = chunks_rendering_hex(col, row, SIZE_48, stride);
      for r in -10..10 {
        for c in -10..10 {
          let key = ChunkKey::new(r * stride, c * stride);
          let contains = chunk_render_bounds(key, SIZE_48, stride).contains(col, row);
          assert_eq!(affected.contains(&key), contains, "cell ({col},{row}) key {key}");
        }
      }
    }
  }

  #[test]
  fn nearest_key_floors_negative_cells() {
    assert_eq!(nearest_chunk_key(-1, -1, 24), ChunkKey::new(-24, -24));
    assert_eq!(nearest_chunk_key(23, 24, 24), ChunkKey::new(24, 0));
  }
}
