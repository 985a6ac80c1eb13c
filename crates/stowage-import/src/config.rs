use std::path::PathBuf;
use std::time::Duration;

/// Operational knobs for one import run. Worker counts and the input
/// directory come from the caller; the timing defaults match the production
/// tool (30s worker poll, 10s monitor tick).
#[derive(Debug, Clone)]
pub struct ImportConfig {
  /// Directory scanned for `entities.*` and `metadata.*` files.
  pub input_dir: PathBuf,

  pub write_workers: usize,
  pub audit_workers: usize,
  pub metadata_workers: usize,

  /// Capacity of every hand-off queue.
  pub queue_capacity: usize,

  /// How long a worker blocks waiting for one item.
  pub poll_timeout: Duration,

  /// Sleep after an empty poll before trying again.
  pub idle_backoff: Duration,

  /// Progress monitor sampling interval.
  pub monitor_interval: Duration,

  /// Echo every audited record to stdout.
  pub echo_records: bool,
  pub echo_capacity: usize,
  pub echo_batch_size: usize,
  pub echo_flush_interval: Duration,
}

impl Default for ImportConfig {
  fn default() -> Self {
    Self {
      input_dir: PathBuf::from("export"),
      write_workers: 1,
      audit_workers: 1,
      metadata_workers: 1,
      queue_capacity: 10_000,
      poll_timeout: Duration::from_secs(30),
      idle_backoff: Duration::from_secs(1),
      monitor_interval: Duration::from_secs(10),
      echo_records: false,
      echo_capacity: 1024,
      echo_batch_size: 50,
      echo_flush_interval: Duration::from_secs(1),
    }
  }
}
