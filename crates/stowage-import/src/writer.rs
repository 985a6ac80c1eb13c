use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::counters::ImportCounters;
use crate::pool::{FatalSignal, WorkerGuard, WorkerHandle};
use crate::queue::BatchQueue;
use stowage_store::{EntityStore, Record, StoreError};

/// Everything one writer worker needs; cloned per worker at spawn.
#[derive(Clone)]
pub(crate) struct WriterContext {
  pub store: Arc<dyn EntityStore>,
  pub work: BatchQueue<Record>,
  pub audit: BatchQueue<Record>,
  pub counters: ImportCounters,
  pub fatal: FatalSignal,
  pub poll_timeout: Duration,
  pub idle_backoff: Duration,
}

/// Writer loop: pull one record, upsert it, forward successes to the audit
/// queue with blocking backpressure. Duplicates and write failures are
/// logged and counted, never retried here. Terminates only when its done
/// flag is set or its queues close underneath it.
pub(crate) async fn write_worker(
  ctx: WriterContext,
  index: usize,
  handle: WorkerHandle,
  idle: Arc<AtomicUsize>,
) {
  let _guard = WorkerGuard::new("entity-writer", index);
  let mut written = 0usize;
  let mut duration_sum = Duration::ZERO;

  while !handle.is_stopped() {
    let Some(record) = ctx.work.take(ctx.poll_timeout).await else {
      if ctx.work.is_closed() {
        break;
      }
      debug!(worker = index, "entity work queue empty");
      idle.fetch_add(1, Ordering::Relaxed);
      tokio::time::sleep(ctx.idle_backoff).await;
      continue;
    };
    idle.store(0, Ordering::Relaxed);

    let (Some(id), Some(kind)) = (record.uuid(), record.kind().map(str::to_owned)) else {
      error!(worker = index, "record is missing uuid or type, dropping");
      ctx.counters.write_failures.fetch_add(1, Ordering::Relaxed);
      continue;
    };

    let started = Instant::now();
    match ctx.store.upsert(id, &kind, record.clone()).await {
      Ok(()) => {
        debug!(%id, kind, "imported entity");
        ctx.counters.written.fetch_add(1, Ordering::Relaxed);

        let forwarded = tokio::select! {
          _ = ctx.fatal.raised() => false,
          pushed = ctx.audit.push(record) => pushed,
        };
        if !forwarded {
          break;
        }

        duration_sum += started.elapsed();
        written += 1;
        if written % 30 == 0 {
          info!(
            worker = index,
            written,
            total = ctx.counters.written.load(Ordering::Relaxed),
            avg_ms = duration_sum.as_millis() as u64 / written as u64,
            "entity write progress"
          );
        }
      }
      Err(StoreError::Duplicate { property, .. }) => {
        warn!(%id, kind, property, "duplicate entity, skipping");
        ctx.counters.duplicates.fetch_add(1, Ordering::Relaxed);
      }
      Err(e) => {
        error!(%id, kind, error = %e, "failed to write entity, dropping");
        ctx.counters.write_failures.fetch_add(1, Ordering::Relaxed);
      }
    }
  }
}
