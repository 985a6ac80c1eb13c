use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::ReaderError;
use stowage_store::Record;

/// Buffer between the blocking parser and the async consumer.
const STREAM_BUFFER: usize = 256;

/// Byte source with one byte of pushback, so a value handed to serde_json
/// starts at exactly the right offset.
struct PeekRead<R> {
  inner: R,
  peeked: Option<u8>,
}

impl<R: Read> PeekRead<R> {
  fn new(inner: R) -> Self {
    Self {
      inner,
      peeked: None,
    }
  }

  fn next_byte(&mut self) -> io::Result<Option<u8>> {
    if let Some(byte) = self.peeked.take() {
      return Ok(Some(byte));
    }
    let mut buf = [0u8; 1];
    loop {
      match self.inner.read(&mut buf) {
        Ok(0) => return Ok(None),
        Ok(_) => return Ok(Some(buf[0])),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
  }

  /// Next byte that is not JSON whitespace.
  fn next_token_byte(&mut self) -> io::Result<Option<u8>> {
    loop {
      match self.next_byte()? {
        Some(b' ' | b'\t' | b'\n' | b'\r') => continue,
        other => return Ok(other),
      }
    }
  }

  fn unread(&mut self, byte: u8) {
    self.peeked = Some(byte);
  }

  /// Consume one complete JSON value without materializing it.
  fn skip_value(&mut self) -> Result<(), ReaderError> {
    match self.next_token_byte()? {
      Some(b'"') => self.skip_string(),
      Some(b'{' | b'[') => self.skip_container(),
      Some(_) => self.skip_scalar(),
      None => Err(ReaderError::format("value", None)),
    }
  }

  fn skip_string(&mut self) -> Result<(), ReaderError> {
    loop {
      match self.next_byte()? {
        Some(b'\\') => {
          self.next_byte()?;
        }
        Some(b'"') => return Ok(()),
        Some(_) => {}
        None => return Err(ReaderError::format("closing quote", None)),
      }
    }
  }

  fn skip_container(&mut self) -> Result<(), ReaderError> {
    let mut depth = 1usize;
    loop {
      match self.next_byte()? {
        Some(b'"') => self.skip_string()?,
        Some(b'{' | b'[') => depth += 1,
        Some(b'}' | b']') => {
          depth -= 1;
          if depth == 0 {
            return Ok(());
          }
        }
        Some(_) => {}
        None => return Err(ReaderError::format("end of value", None)),
      }
    }
  }

  fn skip_scalar(&mut self) -> Result<(), ReaderError> {
    loop {
      match self.next_byte()? {
        Some(byte @ (b',' | b'}' | b']')) => {
          self.unread(byte);
          return Ok(());
        }
        Some(b' ' | b'\t' | b'\n' | b'\r') | None => return Ok(()),
        Some(_) => {}
      }
    }
  }
}

impl<R: Read> Read for PeekRead<R> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }
    if let Some(byte) = self.peeked.take() {
      buf[0] = byte;
      return Ok(1);
    }
    self.inner.read(buf)
  }
}

fn read_json<R: Read, T: DeserializeOwned>(src: &mut PeekRead<R>) -> Result<T, ReaderError> {
  let mut de = serde_json::Deserializer::from_reader(&mut *src);
  Ok(T::deserialize(&mut de)?)
}

/// Lazy, forward-only reader over a top-level JSON array of flat records.
/// Never holds more than one record in memory.
pub struct RecordReader<R: Read> {
  src: PeekRead<R>,
  started: bool,
  first: bool,
  done: bool,
}

impl<R: Read> RecordReader<R> {
  pub fn new(input: R) -> Self {
    Self {
      src: PeekRead::new(input),
      started: false,
      first: true,
      done: false,
    }
  }

  fn advance(&mut self) -> Result<Option<Record>, ReaderError> {
    if !self.started {
      match self.src.next_token_byte()? {
        Some(b'[') => self.started = true,
        other => return Err(ReaderError::format("start of array", other)),
      }
    }

    let mut token = self.src.next_token_byte()?;
    if !self.first {
      match token {
        Some(b',') => token = self.src.next_token_byte()?,
        Some(b']') => return Ok(None),
        other => return Err(ReaderError::format("',' or ']'", other)),
      }
    }

    match token {
      Some(b']') => Ok(None),
      Some(byte) => {
        self.src.unread(byte);
        let record = read_json(&mut self.src)?;
        self.first = false;
        Ok(Some(record))
      }
      None => Err(ReaderError::format("record or ']'", None)),
    }
  }
}

impl<R: Read> Iterator for RecordReader<R> {
  type Item = Result<Record, ReaderError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }
    match self.advance() {
      Ok(Some(record)) => Some(Ok(record)),
      Ok(None) => {
        self.done = true;
        None
      }
      Err(e) => {
        self.done = true;
        Some(Err(e))
      }
    }
  }
}

/// One top-level field of a metadata document: the entity id the field is
/// named after, and its relationship payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
  pub entity_key: String,
  pub payload: Map<String, Value>,
}

/// Lazy reader over a metadata document: a single top-level object whose
/// direct child fields map entity ids to relationship payloads. Only field
/// names observed at depth 2 with map values are emitted; payloads are
/// materialized per entry, never the whole document.
pub struct MetadataReader<R: Read> {
  src: PeekRead<R>,
  depth: usize,
  first: bool,
  done: bool,
}

impl<R: Read> MetadataReader<R> {
  pub fn new(input: R) -> Self {
    Self {
      src: PeekRead::new(input),
      depth: 0,
      first: true,
      done: false,
    }
  }

  fn advance(&mut self) -> Result<Option<MetadataEntry>, ReaderError> {
    if self.depth == 0 {
      match self.src.next_token_byte()? {
        // An exhausted stream before the opening brace is expected termination.
        None => return Ok(None),
        Some(b'{') => self.depth = 1,
        other => return Err(ReaderError::format("start of object", other)),
      }
    }

    loop {
      let mut token = self.src.next_token_byte()?;
      if !self.first {
        match token {
          Some(b',') => token = self.src.next_token_byte()?,
          Some(b'}') | None => {}
          Some(other) => return Err(ReaderError::format("',' or '}'", Some(other))),
        }
      }

      match token {
        None => {
          debug!("metadata stream exhausted before closing brace");
          return Ok(None);
        }
        Some(b'}') => {
          self.depth -= 1;
          return Ok(None);
        }
        Some(b'"') => {
          self.src.unread(b'"');
          let key: String = read_json(&mut self.src)?;
          match self.src.next_token_byte()? {
            Some(b':') => {}
            other => return Err(ReaderError::format("':'", other)),
          }
          self.first = false;

          match self.src.next_token_byte()? {
            Some(b'{') => {
              self.src.unread(b'{');
              let payload: Map<String, Value> = read_json(&mut self.src)?;
              return Ok(Some(MetadataEntry {
                entity_key: key,
                payload,
              }));
            }
            Some(other) => {
              self.src.unread(other);
              self.src.skip_value()?;
              warn!(field = %key, "metadata value is not a map, skipping");
            }
            None => return Err(ReaderError::format("value", None)),
          }
        }
        Some(other) => return Err(ReaderError::format("field name", Some(other))),
      }
    }
  }
}

impl<R: Read> Iterator for MetadataReader<R> {
  type Item = Result<MetadataEntry, ReaderError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }
    match self.advance() {
      Ok(Some(entry)) => Some(Ok(entry)),
      Ok(None) => {
        self.done = true;
        None
      }
      Err(e) => {
        self.done = true;
        Some(Err(e))
      }
    }
  }
}

/// Stream records from a flat-array export file. Parsing runs on a blocking
/// thread; the returned stream ends after the first error.
pub fn record_stream(path: impl AsRef<Path>) -> ReceiverStream<Result<Record, ReaderError>> {
  let path = path.as_ref().to_path_buf();
  let (tx, rx) = tokio::sync::mpsc::channel(STREAM_BUFFER);
  tokio::task::spawn_blocking(move || {
    let file = match File::open(&path) {
      Ok(file) => file,
      Err(e) => {
        let _ = tx.blocking_send(Err(ReaderError::Io(e)));
        return;
      }
    };
    for item in RecordReader::new(BufReader::new(file)) {
      let failed = item.is_err();
      if tx.blocking_send(item).is_err() {
        debug!("record stream receiver dropped");
        return;
      }
      if failed {
        return;
      }
    }
  });
  ReceiverStream::new(rx)
}

/// Stream top-level entries from a metadata file, same shape as
/// [`record_stream`].
pub fn metadata_stream(
  path: impl AsRef<Path>,
) -> ReceiverStream<Result<MetadataEntry, ReaderError>> {
  let path = path.as_ref().to_path_buf();
  let (tx, rx) = tokio::sync::mpsc::channel(STREAM_BUFFER);
  tokio::task::spawn_blocking(move || {
    let file = match File::open(&path) {
      Ok(file) => file,
      Err(e) => {
        let _ = tx.blocking_send(Err(ReaderError::Io(e)));
        return;
      }
    };
    for item in MetadataReader::new(BufReader::new(file)) {
      let failed = item.is_err();
      if tx.blocking_send(item).is_err() {
        debug!("metadata stream receiver dropped");
        return;
      }
      if failed {
        return;
      }
    }
  });
  ReceiverStream::new(rx)
}
