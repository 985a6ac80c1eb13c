use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Handle to one running worker. The done token is the only cross-task
/// signal the monitor uses to request a stop; workers check it between poll
/// iterations, so in-flight store calls always run to completion.
#[derive(Clone)]
pub struct WorkerHandle {
  done: CancellationToken,
}

impl WorkerHandle {
  fn new() -> Self {
    Self {
      done: CancellationToken::new(),
    }
  }

  pub fn stop(&self) {
    self.done.cancel();
  }

  pub fn is_stopped(&self) -> bool {
    self.done.is_cancelled()
  }
}

/// A fixed pool of queue-consumption workers sharing one idle counter.
///
/// The idle counter holds the number of consecutive empty polls across the
/// whole pool; any successful dequeue resets it to zero. Once it reaches the
/// pool size, every worker has seen the queue empty past its poll timeout.
pub struct WorkerPool {
  label: &'static str,
  workers: Vec<(WorkerHandle, JoinHandle<()>)>,
  idle: Arc<AtomicUsize>,
}

impl WorkerPool {
  /// Spawn `count` workers, handing each its handle and the shared idle
  /// counter.
  pub fn spawn<F, Fut>(label: &'static str, count: usize, mut worker: F) -> Self
  where
    F: FnMut(usize, WorkerHandle, Arc<AtomicUsize>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let idle = Arc::new(AtomicUsize::new(0));
    let mut workers = Vec::with_capacity(count);
    for index in 0..count {
      let handle = WorkerHandle::new();
      let task = tokio::spawn(worker(index, handle.clone(), idle.clone()));
      workers.push((handle, task));
    }
    info!(pool = label, count, "started workers");
    Self {
      label,
      workers,
      idle,
    }
  }

  pub fn size(&self) -> usize {
    self.workers.len()
  }

  pub fn idle_count(&self) -> usize {
    self.idle.load(Ordering::Relaxed)
  }

  /// Flip every worker's done flag.
  pub fn stop_all(&self) {
    for (handle, _) in &self.workers {
      handle.stop();
    }
  }

  /// Wait for every worker to finish. Call after [`WorkerPool::stop_all`].
  pub async fn join(self) {
    for (_, task) in self.workers {
      if let Err(e) = task.await {
        error!(pool = self.label, "worker panicked: {e}");
      }
    }
    debug!(pool = self.label, "all workers joined");
  }
}

/// Raised once by an auditor that finds a written entity missing. Observed by
/// every pool, the monitor, and the orchestrator; the first fault wins.
#[derive(Clone, Default)]
pub struct FatalSignal {
  token: CancellationToken,
  fault: Arc<OnceLock<(Uuid, String)>>,
}

impl FatalSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn raise(&self, id: Uuid, kind: String) {
    let _ = self.fault.set((id, kind));
    self.token.cancel();
  }

  pub fn is_raised(&self) -> bool {
    self.token.is_cancelled()
  }

  pub async fn raised(&self) {
    self.token.cancelled().await;
  }

  pub fn fault(&self) -> Option<(Uuid, String)> {
    self.fault.get().cloned()
  }
}

/// Logs a worker's lifetime at debug, whatever path it exits through.
pub(crate) struct WorkerGuard {
  label: &'static str,
  index: usize,
}

impl WorkerGuard {
  pub(crate) fn new(label: &'static str, index: usize) -> Self {
    debug!(worker = format!("{label}-{index}"), "worker started");
    Self { label, index }
  }
}

impl Drop for WorkerGuard {
  fn drop(&mut self) {
    debug!(
      worker = format!("{}-{}", self.label, self.index),
      "worker finished"
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn stop_all_terminates_every_worker() {
    let pool = WorkerPool::spawn("test", 3, |_, handle, idle| async move {
      while !handle.is_stopped() {
        idle.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(pool.idle_count() >= pool.size());

    pool.stop_all();
    pool.join().await;
  }

  #[tokio::test]
  async fn fatal_signal_keeps_the_first_fault() {
    let fatal = FatalSignal::new();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    fatal.raise(first, "user".to_string());
    fatal.raise(second, "group".to_string());

    assert!(fatal.is_raised());
    let (id, kind) = fatal.fault().unwrap();
    assert_eq!(id, first);
    assert_eq!(kind, "user");
  }
}
