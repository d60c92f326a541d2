//! Chunk, area and fetch keys.
//!
//! Defines the identifiers the orchestrator works with:
//! - [`ChunkKey`]: Stride-aligned chunk origin, wire format `"<row>,<col>"`
//! - [`AreaKey`]: Super-area origin batching several chunks into one fetch
//! - [`FetchKey`]: Chunk key plus purpose tag, e.g. `"16,16:render"`
//! - [`AuthoritativeChunk`]: The active chunk slot, or `Uncommitted`
//!
//! Parsing is strict. Anything other than two base-10 integers separated by
//! a single comma is rejected with a [`ChunkKeyError`].

use std::fmt;
use std::str::FromStr;

/// Origin of a chunk in cell coordinates.
///
/// Both components are multiples of the configured chunk stride when the key
/// was produced by [`ChunkKey::parse_aligned`] or by the geometry helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
  pub row: i32,
  pub col: i32,
}

impl ChunkKey {
  /// Creates a new chunk key.
  pub const fn new(row: i32, col: i32) -> Self {
    Self { row, col }
  }

  /// Parses a key and checks that both components sit on the stride grid.
  pub fn parse_aligned(text: &str, stride: i32) -> Result<Self, ChunkKeyError> {
    if stride <= 0 {
      return Err(ChunkKeyError::InvalidStride(stride));
    }
    let key: ChunkKey = text.parse()?;
    if !key.is_aligned(stride) {
      return Err(ChunkKeyError::NotAligned {
        key: text.to_string(),
        stride,
      });
    }
    Ok(key)
  }

  /// Returns true if both components are multiples of `stride`.
  pub fn is_aligned(self, stride: i32) -> bool {
    stride > 0 && self.row.rem_euclid(stride) == 0 && self.col.rem_euclid(stride) == 0
  }

  /// Returns the key `row_steps` / `col_steps` strides away from this one.
  pub fn offset(self, row_steps: i32, col_steps: i32, stride: i32) -> Self {
    Self {
      row: self.row.saturating_add(row_steps.saturating_mul(stride)),
      col: self.col.saturating_add(col_steps.saturating_mul(stride)),
    }
  }
}

impl fmt::Display for ChunkKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{},{}", self.row, self.col)
  }
}

impl FromStr for ChunkKey {
  type Err = ChunkKeyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (row, col) = parse_pair(s)?;
    Ok(Self::new(row, col))
  }
}

/// Origin of a super-area: a square of `super_area_strides` x
/// `super_area_strides` chunks fetched as one unit.
///
/// Expressed in the same cell units as [`ChunkKey`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaKey {
  pub row: i32,
  pub col: i32,
}

impl AreaKey {
  /// Creates a new area key.
  pub const fn new(row: i32, col: i32) -> Self {
    Self { row, col }
  }

  /// Returns the area containing `chunk`.
  ///
  /// Each stride index is floored to the nearest multiple of
  /// `super_area_strides`, so negative chunks land in the area below them.
  pub fn for_chunk(chunk: ChunkKey, stride: i32, super_area_strides: i32) -> Self {
    let stride = stride.max(1);
    let span = super_area_strides.max(1);
    let floor_axis = |value: i32| {
      let index = value.div_euclid(stride);
      index.div_euclid(span) * span * stride
    };
    Self::new(floor_axis(chunk.row), floor_axis(chunk.col))
  }

  /// Returns every chunk key inside this area, row-major.
  pub fn chunk_keys(self, stride: i32, super_area_strides: i32) -> Vec<ChunkKey> {
    let stride = stride.max(1);
    let span = super_area_strides.max(1);
    let origin = ChunkKey::new(self.row, self.col);
    (0..span)
      .flat_map(|r| (0..span).map(move |c| origin.offset(r, c, stride)))
      .collect()
  }

  /// Returns the chunk key sharing this area's origin.
  pub fn origin_chunk(self) -> ChunkKey {
    ChunkKey::new(self.row, self.col)
  }
}

impl fmt::Display for AreaKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{},{}", self.row, self.col)
  }
}

impl FromStr for AreaKey {
  type Err = ChunkKeyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (row, col) = parse_pair(s)?;
    Ok(Self::new(row, col))
  }
}

/// What a pending fetch is for. Part of the ownership key, so a render fetch
/// and a prefetch of the same chunk are tracked separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FetchPurpose {
  /// Fetch backing an active chunk switch.
  Render,
  /// Speculative fetch of a neighboring chunk.
  Prefetch,
  /// Fetch of a whole super-area.
  Area,
}

impl FetchPurpose {
  /// Returns the tag used in the fetch key text form.
  pub const fn tag(self) -> &'static str {
    match self {
      FetchPurpose::Render => "render",
      FetchPurpose::Prefetch => "prefetch",
      FetchPurpose::Area => "area",
    }
  }
}

/// Key of the shared pending-fetch map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FetchKey {
  pub chunk: ChunkKey,
  pub purpose: FetchPurpose,
}

impl FetchKey {
  /// Creates a new fetch key.
  pub const fn new(chunk: ChunkKey, purpose: FetchPurpose) -> Self {
    Self { chunk, purpose }
  }
}

impl fmt::Display for FetchKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.chunk, self.purpose.tag())
  }
}

/// The single chunk the orchestrator considers active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AuthoritativeChunk {
  /// No chunk has been committed (startup, or after switch-off).
  #[default]
  Uncommitted,
  /// A committed chunk.
  Active(ChunkKey),
}

impl AuthoritativeChunk {
  /// Returns the active key, if any.
  pub fn key(self) -> Option<ChunkKey> {
    match self {
      AuthoritativeChunk::Uncommitted => None,
      AuthoritativeChunk::Active(key) => Some(key),
    }
  }

  /// Returns true if a chunk is committed.
  pub fn is_active(self) -> bool {
    matches!(self, AuthoritativeChunk::Active(_))
  }

  /// Returns true if `key` is the committed chunk.
  pub fn is(self, key: ChunkKey) -> bool {
    self == AuthoritativeChunk::Active(key)
  }
}

impl From<ChunkKey> for AuthoritativeChunk {
  fn from(key: ChunkKey) -> Self {
    AuthoritativeChunk::Active(key)
  }
}

impl fmt::Display for AuthoritativeChunk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AuthoritativeChunk::Uncommitted => write!(f, "uncommitted"),
      AuthoritativeChunk::Active(key) => write!(f, "{key}"),
    }
  }
}

/// Chunk key parsing errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkKeyError {
  Empty,
  SegmentCount { key: String, found: usize },
  EmptyComponent { key: String },
  InvalidNumber { key: String, component: String },
  NotAligned { key: String, stride: i32 },
  InvalidStride(i32),
}

impl fmt::Display for ChunkKeyError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Empty => write!(f, "invalid chunk key: empty string"),
      Self::SegmentCount { key, found } => write!(
        f,
        "invalid chunk key {key:?}: expected 2 comma-separated components, found {found}"
      ),
      Self::EmptyComponent { key } => write!(f, "invalid chunk key {key:?}: empty component"),
      Self::InvalidNumber { key, component } => write!(
        f,
        "invalid chunk key {key:?}: {component:?} is not a finite integer"
      ),
      Self::NotAligned { key, stride } => {
        write!(f, "invalid chunk key {key:?}: not aligned to stride {stride}")
      }
      Self::InvalidStride(stride) => {
        write!(f, "cannot validate chunk key against stride {stride}")
      }
    }
  }
}

impl std::error::Error for ChunkKeyError {}

fn parse_pair(text: &str) -> Result<(i32, i32), ChunkKeyError> {
  if text.is_empty() {
    return Err(ChunkKeyError::Empty);
  }

  let segments: Vec<&str> = text.split(',').collect();
  if segments.len() != 2 {
    return Err(ChunkKeyError::SegmentCount {
      key: text.to_string(),
      found: segments.len(),
    });
  }

  let row = parse_component(text, segments[0])?;
  let col = parse_component(text, segments[1])?;
  Ok((row, col))
}

fn parse_component(key: &str, component: &str) -> Result<i32, ChunkKeyError> {
  if component.is_empty() {
    return Err(ChunkKeyError::EmptyComponent {
      key: key.to_string(),
    });
  }

  let invalid = || ChunkKeyError::InvalidNumber {
    key: key.to_string(),
    component: component.to_string(),
  };

  // i32::from_str also accepts a leading '+'; the wire format does not.
  let digits = component.strip_prefix('-').unwrap_or(component);
  if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
    return Err(invalid());
  }
  component.parse::<i32>().map_err(|_| invalid())
}
