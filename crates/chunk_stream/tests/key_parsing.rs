//! Malformed keys must be rejected by every parsing entry point.

use chunk_stream::{AreaKey, ChunkKey, ChunkKeyError};

const MALFORMED: &[&str] = &[
  "",
  "bad-key",
  "0",
  "0,",
  ",0",
  "1,2,3",
  "Infinity,0",
  "NaN,0",
  "-Infinity,0",
  "1.5,0",
  "1e3,0",
];

fn assert_rejected(
  entry_point: &str,
  input: &str,
  result: Result<impl std::fmt::Debug, ChunkKeyError>,
) {
  match result {
    Ok(parsed) => panic!("{entry_point} accepted {input:?} as {parsed:?}"),
    Err(err) => {
      let message = err.to_string().to_lowercase();
      assert!(
        message.contains("chunk key"),
        "{entry_point} error for {input:?} does not mention the key: {message}"
      );
    }
  }
}

#[test]
fn chunk_key_from_str_rejects_malformed() {
  for input in MALFORMED {
    assert_rejected("ChunkKey::from_str", input, input.parse::<ChunkKey>());
  }
}

#[test]
fn parse_aligned_rejects_malformed() {
  for input in MALFORMED {
    assert_rejected("ChunkKey::parse_aligned", input, ChunkKey::parse_aligned(input, 24));
  }
}

#[test]
fn area_key_from_str_rejects_malformed() {
  for input in MALFORMED {
    assert_rejected("AreaKey::from_str", input, input.parse::<AreaKey>());
  }
}

#[test]
fn canonical_keys_parse_everywhere() {
  assert_eq!("24,-48".parse::<ChunkKey>().unwrap(), ChunkKey::new(24, -48));
  assert_eq!(ChunkKey::parse_aligned("24,-48", 24).unwrap(), ChunkKey::new(24, -48));
  assert_eq!("96,0".parse::<AreaKey>().unwrap(), AreaKey::new(96, 0));
  assert_eq!(ChunkKey::new(-24, 0).to_string().parse::<ChunkKey>().unwrap(), ChunkKey::new(-24, 0));
}

#[test]
fn errors_describe_the_failure() {
  assert_eq!("".parse::<ChunkKey>().unwrap_err(), ChunkKeyError::Empty);
  assert!(matches!(
    "1,2,3".parse::<ChunkKey>().unwrap_err(),
    ChunkKeyError::SegmentCount { found: 3, .. }
  ));
  assert!(matches!(
    "0,".parse::<ChunkKey>().unwrap_err(),
    ChunkKeyError::EmptyComponent { .. }
  ));
  assert!(matches!(
    "NaN,0".parse::<ChunkKey>().unwrap_err(),
    ChunkKeyError::InvalidNumber { .. }
  ));
}
