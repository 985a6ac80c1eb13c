use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::pool::{FatalSignal, WorkerPool};
use crate::queue::BatchQueue;

/// Watches a queue/pool pair until the pool has drained it, then stops the
/// pool.
///
/// Completion is heuristic: no end-of-stream marker flows through the queue.
/// The pool is considered done once its shared idle counter reaches the pool
/// size, i.e. every worker has seen the queue empty past its poll timeout
/// since the last successful dequeue. A worker that is merely slow does not
/// trip this, and a lull shorter than the poll timeout cannot either, because
/// any single dequeue resets the counter.
///
/// Each tick keeps only the previous depth sample and a running rate sum, so
/// monitor memory stays bounded however long the run takes.
pub struct ProgressMonitor {
  interval: Duration,
  fatal: FatalSignal,
}

impl ProgressMonitor {
  pub fn new(interval: Duration, fatal: FatalSignal) -> Self {
    Self { interval, fatal }
  }

  pub async fn drain_and_stop<T>(&self, queue: &BatchQueue<T>, pool: &WorkerPool, label: &str) {
    let mut rate_sum = 0.0f64;
    let mut ticks = 0u32;

    // The depth check guards the narrow window where items land after every
    // worker has already counted an empty poll: the workers are still
    // polling, so a non-empty queue always makes progress.
    while pool.idle_count() < pool.size() || !queue.is_empty() {
      if self.fatal.is_raised() {
        break;
      }
      ticks += 1;

      let size_before = queue.len();
      let started = Instant::now();
      info!(queue = label, remaining = size_before, "queue is not empty, waiting");

      tokio::select! {
        _ = self.fatal.raised() => break,
        _ = tokio::time::sleep(self.interval) => {}
      }

      let elapsed = started.elapsed().as_secs_f64();
      let size_now = queue.len();
      let processed = size_before as i64 - size_now as i64;
      let rate_last = if elapsed > 0.0 {
        processed as f64 / elapsed
      } else {
        0.0
      };
      rate_sum += rate_last;
      let rate_avg = rate_sum / ticks as f64;

      match eta(size_before, rate_avg) {
        Some(remaining) => info!(
          queue = label,
          size_before,
          size_now,
          processed,
          rate_last = format!("{rate_last:.1}/s"),
          rate_avg = format!("{rate_avg:.1}/s"),
          time_remaining = %humantime::format_duration(remaining),
          "progress"
        ),
        None => info!(
          queue = label,
          size_before,
          size_now,
          processed,
          rate_last = format!("{rate_last:.1}/s"),
          "progress, no throughput estimate yet"
        ),
      }
    }

    pool.stop_all();
    debug!(queue = label, "drain complete, stopping workers");
  }
}

/// Remaining-time estimate from the running average rate. Negative or
/// non-finite rates yield no estimate instead of a crash.
fn eta(size_before: usize, rate_avg: f64) -> Option<Duration> {
  if !rate_avg.is_finite() || rate_avg <= 0.0 {
    return None;
  }
  let secs = size_before as f64 / rate_avg;
  if !secs.is_finite() || secs < 0.0 {
    return None;
  }
  Some(Duration::from_secs(secs as u64))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn eta_tolerates_degenerate_rates() {
    assert_eq!(eta(100, 0.0), None);
    assert_eq!(eta(100, -5.0), None);
    assert_eq!(eta(100, f64::NAN), None);
    assert_eq!(eta(100, f64::INFINITY), None);
    assert_eq!(eta(0, 10.0), Some(Duration::from_secs(0)));
    assert_eq!(eta(100, 10.0), Some(Duration::from_secs(10)));
  }

  #[tokio::test]
  async fn monitor_stops_an_idle_pool() {
    use std::sync::atomic::Ordering;

    let queue: BatchQueue<u32> = BatchQueue::new(8);
    let pool = WorkerPool::spawn("idle-test", 2, |_, handle, idle| {
      let queue = queue.clone();
      async move {
        while !handle.is_stopped() {
          match queue.take(Duration::from_millis(10)).await {
            Some(_) => idle.store(0, Ordering::Relaxed),
            None => {
              idle.fetch_add(1, Ordering::Relaxed);
              tokio::time::sleep(Duration::from_millis(2)).await;
            }
          }
        }
      }
    });

    let monitor = ProgressMonitor::new(Duration::from_millis(20), FatalSignal::new());
    monitor.drain_and_stop(&queue, &pool, "idle-test").await;
    pool.join().await;
  }
}
