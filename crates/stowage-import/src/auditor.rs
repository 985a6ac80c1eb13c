use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::counters::ImportCounters;
use crate::mirror::MirrorHandle;
use crate::pool::{FatalSignal, WorkerGuard, WorkerHandle};
use crate::queue::BatchQueue;
use stowage_store::{EntityStore, Record};

#[derive(Clone)]
pub(crate) struct AuditorContext {
  pub store: Arc<dyn EntityStore>,
  pub audit: BatchQueue<Record>,
  pub mirror: Option<MirrorHandle>,
  pub counters: ImportCounters,
  pub fatal: FatalSignal,
  pub poll_timeout: Duration,
  pub idle_backoff: Duration,
}

/// Auditor loop: verify each written record is now visible in the store. A
/// missing record is an integrity fault that halts the whole import; a
/// transient lookup error is logged and skipped.
pub(crate) async fn audit_worker(
  ctx: AuditorContext,
  index: usize,
  handle: WorkerHandle,
  idle: Arc<AtomicUsize>,
) {
  let _guard = WorkerGuard::new("entity-auditor", index);
  let mut audited = 0usize;
  let mut duration_sum = Duration::ZERO;

  while !handle.is_stopped() && !ctx.fatal.is_raised() {
    let Some(record) = ctx.audit.take(ctx.poll_timeout).await else {
      if ctx.audit.is_closed() {
        break;
      }
      debug!(worker = index, "audit queue empty");
      idle.fetch_add(1, Ordering::Relaxed);
      tokio::time::sleep(ctx.idle_backoff).await;
      continue;
    };
    idle.store(0, Ordering::Relaxed);

    // Only records that carried a valid id reach this queue.
    let Some(id) = record.uuid() else {
      continue;
    };
    let kind = record.kind().unwrap_or_default().to_string();

    let started = Instant::now();
    match ctx.store.get(id).await {
      Ok(Some(_)) => {
        if let Some(mirror) = &ctx.mirror {
          mirror.offer(record);
        }
        ctx.counters.audited.fetch_add(1, Ordering::Relaxed);
        duration_sum += started.elapsed();
        audited += 1;
        if audited % 100 == 0 {
          info!(
            worker = index,
            audited,
            avg_ms = duration_sum.as_millis() as u64 / audited as u64,
            "audit progress"
          );
        }
      }
      Ok(None) => {
        error!(%id, kind, "wrote entity but it cannot be found, halting import");
        ctx.fatal.raise(id, kind);
        break;
      }
      Err(e) => {
        error!(%id, error = %e, "audit lookup failed, skipping");
      }
    }
  }
}
