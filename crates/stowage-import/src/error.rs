use std::io;

use uuid::Uuid;

/// Errors surfaced by the streaming readers. All of them abort the current
/// file only; the orchestrator keeps the batch going.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("malformed document: {0}")]
  Json(#[from] serde_json::Error),

  #[error("expected {expected}, found {found}")]
  Format {
    expected: &'static str,
    found: String,
  },
}

impl ReaderError {
  pub(crate) fn format(expected: &'static str, found: Option<u8>) -> Self {
    let found = match found {
      Some(byte) => (byte as char).to_string(),
      None => "end of input".to_string(),
    };
    ReaderError::Format { expected, found }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error(transparent)]
  Reader(#[from] ReaderError),

  /// A record was reported written but cannot be found on audit. This is the
  /// only error that aborts the whole batch.
  #[error("integrity fault: {kind} {id} was written but cannot be found")]
  Integrity { id: Uuid, kind: String },
}
