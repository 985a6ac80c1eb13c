use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::counters::ImportCounters;
use crate::queue::BatchQueue;
use stowage_store::Record;

/// Mirrors audited records to stdout as JSON lines.
///
/// Producers hand records off through a bounded buffer with a lossy,
/// caller-visible `offer`; one flusher task drains opportunistic batches so
/// output I/O is amortized instead of paid per record.
pub(crate) struct RecordMirror {
  queue: BatchQueue<Record>,
  flusher: JoinHandle<()>,
  handle: MirrorHandle,
}

#[derive(Clone)]
pub(crate) struct MirrorHandle {
  queue: BatchQueue<Record>,
  dropped: Arc<AtomicUsize>,
}

impl MirrorHandle {
  /// Queue a record for echoing. Overflow drops the record and counts it;
  /// the mirror never applies backpressure to auditors.
  pub(crate) fn offer(&self, record: Record) {
    if !self.queue.offer(record) {
      self.dropped.fetch_add(1, Ordering::Relaxed);
      debug!("echo buffer full, dropping record");
    }
  }
}

impl RecordMirror {
  pub(crate) fn spawn(
    capacity: usize,
    batch_size: usize,
    flush_interval: Duration,
    counters: &ImportCounters,
  ) -> Self {
    let queue = BatchQueue::new(capacity);
    let flusher = tokio::spawn(flush_task(queue.clone(), batch_size, flush_interval));
    let handle = MirrorHandle {
      queue: queue.clone(),
      dropped: counters.echo_dropped.clone(),
    };
    Self {
      queue,
      flusher,
      handle,
    }
  }

  pub(crate) fn handle(&self) -> MirrorHandle {
    self.handle.clone()
  }

  /// Close the buffer and wait for the final flush.
  pub(crate) async fn shutdown(self) {
    self.queue.close();
    let _ = self.flusher.await;
  }
}

async fn flush_task(queue: BatchQueue<Record>, batch_size: usize, flush_interval: Duration) {
  loop {
    let batch = queue.take_batch(batch_size, flush_interval).await;
    if !batch.is_empty() {
      write_batch(&batch);
      continue;
    }
    if queue.is_closed() {
      // One last sweep for records that arrived around the close.
      let rest = queue.drain();
      if !rest.is_empty() {
        write_batch(&rest);
      }
      break;
    }
  }
  debug!("record mirror flushed and stopped");
}

fn write_batch(batch: &[Record]) {
  let rendered = render_batch(batch);
  if let Err(e) = std::io::stdout().write_all(rendered.as_bytes()) {
    warn!(error = %e, "failed to echo records");
  }
}

fn render_batch(batch: &[Record]) -> String {
  let mut out = String::with_capacity(batch.len() * 128);
  for record in batch {
    match serde_json::to_string(record) {
      Ok(line) => {
        out.push_str(&line);
        out.push('\n');
      }
      Err(e) => warn!(error = %e, "failed to serialize record for echo"),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(name: &str) -> Record {
    match json!({ "uuid": "2d93d3e8-0000-4c5a-8f3e-000000000001", "type": "user", "username": name })
    {
      serde_json::Value::Object(map) => Record::new(map),
      _ => unreachable!(),
    }
  }

  #[test]
  fn renders_one_line_per_record() {
    let batch = vec![record("alice"), record("bob")];

    let rendered = render_batch(&batch);

    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("alice"));
    assert!(lines[1].contains("bob"));
  }

  #[tokio::test]
  async fn overflow_is_counted_not_blocking() {
    let counters = ImportCounters::new();
    // A flush interval this long means the flusher drains at most one batch
    // while we overfill the buffer.
    let mirror = RecordMirror::spawn(1, 1, Duration::from_secs(60), &counters);
    let handle = mirror.handle();

    for _ in 0..50 {
      handle.offer(record("alice"));
    }

    mirror.shutdown().await;
    let snapshot = counters.snapshot();
    assert!(snapshot.echo_dropped > 0);
  }
}
