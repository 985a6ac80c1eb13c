use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Telemetry shared across the pipeline's pools. Constructed by the
/// orchestrator and injected into every worker; there is no ambient global
/// state.
#[derive(Clone, Default)]
pub struct ImportCounters {
  pub records_read: Arc<AtomicUsize>,
  pub written: Arc<AtomicUsize>,
  pub duplicates: Arc<AtomicUsize>,
  pub write_failures: Arc<AtomicUsize>,
  pub audited: Arc<AtomicUsize>,
  pub tasks_enqueued: Arc<AtomicUsize>,
  pub tasks_dropped: Arc<AtomicUsize>,
  pub metadata_applied: Arc<AtomicUsize>,
  pub metadata_failures: Arc<AtomicUsize>,
  pub echo_dropped: Arc<AtomicUsize>,
}

impl ImportCounters {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn snapshot(&self) -> ImportSummary {
    ImportSummary {
      records_read: self.records_read.load(Ordering::Relaxed),
      written: self.written.load(Ordering::Relaxed),
      duplicates: self.duplicates.load(Ordering::Relaxed),
      write_failures: self.write_failures.load(Ordering::Relaxed),
      audited: self.audited.load(Ordering::Relaxed),
      tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
      tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
      metadata_applied: self.metadata_applied.load(Ordering::Relaxed),
      metadata_failures: self.metadata_failures.load(Ordering::Relaxed),
      echo_dropped: self.echo_dropped.load(Ordering::Relaxed),
    }
  }
}

/// Point-in-time view of [`ImportCounters`], returned when a run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
  pub records_read: usize,
  pub written: usize,
  pub duplicates: usize,
  pub write_failures: usize,
  pub audited: usize,
  pub tasks_enqueued: usize,
  pub tasks_dropped: usize,
  pub metadata_applied: usize,
  pub metadata_failures: usize,
  pub echo_dropped: usize,
}
