use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Fixed-capacity FIFO hand-off between a producer and a pool of consumers.
///
/// Overflow is explicit and caller-visible: `offer` never blocks and reports
/// failure, while `push` is the backpressure path that stalls the producer
/// until space frees up. Consumers either poll single items with a timeout or
/// drain opportunistic batches; a blocked take always returns once the queue
/// is closed.
pub struct BatchQueue<T> {
  tx: flume::Sender<T>,
  rx: flume::Receiver<T>,
  closed: CancellationToken,
}

impl<T> Clone for BatchQueue<T> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      rx: self.rx.clone(),
      closed: self.closed.clone(),
    }
  }
}

impl<T> BatchQueue<T> {
  pub fn new(capacity: usize) -> Self {
    let (tx, rx) = flume::bounded(capacity);
    Self {
      tx,
      rx,
      closed: CancellationToken::new(),
    }
  }

  /// Insert without blocking. Returns `false` when the queue is full or
  /// closed; the caller owns the overflow policy.
  pub fn offer(&self, item: T) -> bool {
    if self.closed.is_cancelled() {
      return false;
    }
    self.tx.try_send(item).is_ok()
  }

  /// Blocking insert. Stalls until space frees up; returns `false` only when
  /// the queue closes while waiting.
  pub async fn push(&self, item: T) -> bool {
    tokio::select! {
      _ = self.closed.cancelled() => false,
      sent = self.tx.send_async(item) => sent.is_ok(),
    }
  }

  /// Block up to `timeout` for a single item. Returns `None` on timeout or
  /// close.
  pub async fn take(&self, timeout: Duration) -> Option<T> {
    tokio::select! {
      _ = self.closed.cancelled() => None,
      received = tokio::time::timeout(timeout, self.rx.recv_async()) => match received {
        Ok(Ok(item)) => Some(item),
        _ => None,
      },
    }
  }

  /// Block up to `timeout` for the first item, then drain up to
  /// `max_size - 1` more that are already present without waiting further.
  /// Returns an empty batch on timeout or close. Each drained item is
  /// delivered to exactly one caller.
  pub async fn take_batch(&self, max_size: usize, timeout: Duration) -> Vec<T> {
    if max_size == 0 {
      return Vec::new();
    }
    let Some(first) = self.take(timeout).await else {
      return Vec::new();
    };
    let mut batch = Vec::with_capacity(max_size.min(64));
    batch.push(first);
    while batch.len() < max_size {
      match self.rx.try_recv() {
        Ok(item) => batch.push(item),
        Err(_) => break,
      }
    }
    batch
  }

  /// Remove everything currently queued without blocking.
  pub fn drain(&self) -> Vec<T> {
    self.rx.try_iter().collect()
  }

  /// Current depth, sampled for progress reporting.
  pub fn len(&self) -> usize {
    self.rx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rx.is_empty()
  }

  /// Wake every blocked producer and consumer; subsequent offers fail.
  pub fn close(&self) {
    self.closed.cancel();
  }

  pub fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Instant;

  #[tokio::test]
  async fn offer_reports_overflow() {
    let queue = BatchQueue::new(2);

    assert!(queue.offer(1));
    assert!(queue.offer(2));
    assert!(!queue.offer(3));
    assert_eq!(queue.len(), 2);
  }

  #[tokio::test]
  async fn take_returns_queued_items_in_order() {
    let queue = BatchQueue::new(4);
    queue.offer(1);
    queue.offer(2);

    assert_eq!(queue.take(Duration::from_millis(50)).await, Some(1));
    assert_eq!(queue.take(Duration::from_millis(50)).await, Some(2));
    assert_eq!(queue.take(Duration::from_millis(10)).await, None);
  }

  #[tokio::test]
  async fn take_times_out_on_empty_queue() {
    let queue: BatchQueue<u32> = BatchQueue::new(4);
    let started = Instant::now();

    let batch = queue.take_batch(8, Duration::from_millis(50)).await;

    assert!(batch.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[tokio::test]
  async fn take_batch_returns_drained_items() {
    // The batch must come back to the caller, not be built and discarded.
    let queue = BatchQueue::new(16);
    for n in 0..5 {
      queue.offer(n);
    }

    let batch = queue.take_batch(16, Duration::from_millis(50)).await;

    assert_eq!(batch, vec![0, 1, 2, 3, 4]);
    assert!(queue.is_empty());
  }

  #[tokio::test]
  async fn take_batch_never_exceeds_max_size() {
    let queue = BatchQueue::new(16);
    for n in 0..10 {
      queue.offer(n);
    }

    let batch = queue.take_batch(4, Duration::from_millis(50)).await;

    assert_eq!(batch, vec![0, 1, 2, 3]);
    assert_eq!(queue.len(), 6);
  }

  #[tokio::test]
  async fn close_unblocks_a_waiting_take() {
    let queue: BatchQueue<u32> = BatchQueue::new(4);
    let waiter = {
      let queue = queue.clone();
      tokio::spawn(async move { queue.take(Duration::from_secs(60)).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    let taken = waiter.await.unwrap();
    assert_eq!(taken, None);
    assert!(!queue.offer(1));
  }

  #[tokio::test]
  async fn concurrent_consumers_never_share_an_item() {
    let queue = BatchQueue::new(256);
    for n in 0..200u32 {
      queue.offer(n);
    }

    let mut consumers = Vec::new();
    for _ in 0..4 {
      let queue = queue.clone();
      consumers.push(tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
          let batch = queue.take_batch(16, Duration::from_millis(20)).await;
          if batch.is_empty() {
            break;
          }
          seen.extend(batch);
        }
        seen
      }));
    }

    let mut all = Vec::new();
    for consumer in consumers {
      all.extend(consumer.await.unwrap());
    }
    all.sort_unstable();

    assert_eq!(all, (0..200u32).collect::<Vec<_>>());
  }

  #[tokio::test]
  async fn push_applies_backpressure_until_space_frees() {
    let queue = BatchQueue::new(1);
    assert!(queue.push(1).await);

    let producer = {
      let queue = queue.clone();
      tokio::spawn(async move { queue.push(2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!producer.is_finished());

    assert_eq!(queue.take(Duration::from_millis(50)).await, Some(1));
    assert!(producer.await.unwrap());
    assert_eq!(queue.take(Duration::from_millis(50)).await, Some(2));
  }
}
