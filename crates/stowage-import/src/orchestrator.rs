use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures_util::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auditor::{AuditorContext, audit_worker};
use crate::config::ImportConfig;
use crate::counters::{ImportCounters, ImportSummary};
use crate::error::{ImportError, ReaderError};
use crate::metadata::{MetadataContext, MetadataTask, metadata_worker};
use crate::mirror::RecordMirror;
use crate::monitor::ProgressMonitor;
use crate::pool::{FatalSignal, WorkerPool};
use crate::queue::BatchQueue;
use crate::reader::{metadata_stream, record_stream};
use crate::writer::{WriterContext, write_worker};
use stowage_store::{EntityStore, Record};

/// Entity export files are named `entities.<source>.<timestamp>.json`.
pub const ENTITY_FILE_PREFIX: &str = "entities.";
/// Metadata files are named `metadata.<source>.<timestamp>.json`.
pub const METADATA_FILE_PREFIX: &str = "metadata.";

/// Wires readers to queues to worker pools per input file, and sequences the
/// entity phase strictly before the metadata phase — relationships reference
/// entities that must already exist.
///
/// A failure in one file is isolated: it is logged and the batch continues.
/// The single exception is an audit integrity fault, which aborts the run.
pub struct Importer {
  store: Arc<dyn EntityStore>,
  config: ImportConfig,
  counters: ImportCounters,
  fatal: FatalSignal,
}

impl Importer {
  pub fn new(store: Arc<dyn EntityStore>, mut config: ImportConfig) -> Self {
    config.write_workers = config.write_workers.max(1);
    config.audit_workers = config.audit_workers.max(1);
    config.metadata_workers = config.metadata_workers.max(1);
    Self {
      store,
      config,
      counters: ImportCounters::new(),
      fatal: FatalSignal::new(),
    }
  }

  /// Run the full import: every entity file, then every metadata file.
  pub async fn run(&self) -> Result<ImportSummary, ImportError> {
    let entity_files = self.discover(ENTITY_FILE_PREFIX)?;
    info!(files = entity_files.len(), "entity files to read");
    for path in &entity_files {
      if let Err(error) = self.import_entity_file(path).await {
        warn!(file = %path.display(), %error, "unable to import entity file");
      }
      self.check_fatal()?;
    }

    let metadata_files = self.discover(METADATA_FILE_PREFIX)?;
    info!(files = metadata_files.len(), "metadata files to read");
    for path in &metadata_files {
      if let Err(error) = self.import_metadata_file(path).await {
        warn!(file = %path.display(), %error, "unable to import metadata file");
      }
      self.check_fatal()?;
    }

    self.check_fatal()?;
    Ok(self.counters.snapshot())
  }

  fn check_fatal(&self) -> Result<(), ImportError> {
    match self.fatal.fault() {
      Some((id, kind)) => Err(ImportError::Integrity { id, kind }),
      None => Ok(()),
    }
  }

  fn discover(&self, prefix: &str) -> Result<Vec<PathBuf>, ImportError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&self.config.input_dir)? {
      let entry = entry?;
      if !entry.file_type()?.is_file() {
        continue;
      }
      let name = entry.file_name();
      if name.to_string_lossy().starts_with(prefix) {
        files.push(entry.path());
      }
    }
    files.sort();
    Ok(files)
  }

  async fn import_entity_file(&self, path: &Path) -> Result<(), ImportError> {
    info!(file = %path.display(), "loading entity file");

    let work: BatchQueue<Record> = BatchQueue::new(self.config.queue_capacity);
    let audit: BatchQueue<Record> = BatchQueue::new(self.config.queue_capacity);
    let mirror = self.config.echo_records.then(|| {
      RecordMirror::spawn(
        self.config.echo_capacity,
        self.config.echo_batch_size,
        self.config.echo_flush_interval,
        &self.counters,
      )
    });

    let writer_ctx = WriterContext {
      store: self.store.clone(),
      work: work.clone(),
      audit: audit.clone(),
      counters: self.counters.clone(),
      fatal: self.fatal.clone(),
      poll_timeout: self.config.poll_timeout,
      idle_backoff: self.config.idle_backoff,
    };
    let writers = WorkerPool::spawn("entity-writer", self.config.write_workers, {
      let ctx = writer_ctx;
      move |index, handle, idle| write_worker(ctx.clone(), index, handle, idle)
    });

    let auditor_ctx = AuditorContext {
      store: self.store.clone(),
      audit: audit.clone(),
      mirror: mirror.as_ref().map(RecordMirror::handle),
      counters: self.counters.clone(),
      fatal: self.fatal.clone(),
      poll_timeout: self.config.poll_timeout,
      idle_backoff: self.config.idle_backoff,
    };
    let auditors = WorkerPool::spawn("entity-auditor", self.config.audit_workers, {
      let ctx = auditor_ctx;
      move |index, handle, idle| audit_worker(ctx.clone(), index, handle, idle)
    });

    // Stream the file into the work queue; a full queue stalls the producer.
    let mut records = record_stream(path);
    let mut read = 0usize;
    let mut read_error: Option<ReaderError> = None;
    while let Some(item) = records.next().await {
      match item {
        Ok(record) => {
          read += 1;
          self.counters.records_read.fetch_add(1, Ordering::Relaxed);
          if read % 1000 == 0 {
            debug!(read, "publishing to work queue");
          }
          let queued = tokio::select! {
            _ = self.fatal.raised() => false,
            pushed = work.push(record) => pushed,
          };
          if !queued {
            break;
          }
        }
        Err(e) => {
          read_error = Some(e);
          break;
        }
      }
    }

    // Even a file that ends in a format error gets its already-queued
    // records fully written and audited before we report it.
    let monitor = ProgressMonitor::new(self.config.monitor_interval, self.fatal.clone());
    monitor.drain_and_stop(&work, &writers, "entity write").await;
    if self.fatal.is_raised() {
      work.close();
      audit.close();
    }
    writers.join().await;

    monitor.drain_and_stop(&audit, &auditors, "entity audit").await;
    if self.fatal.is_raised() {
      audit.close();
    }
    auditors.join().await;

    if let Some(mirror) = mirror {
      mirror.shutdown().await;
    }
    work.close();
    audit.close();

    match read_error {
      Some(e) => Err(e.into()),
      None => {
        info!(file = %path.display(), records = read, "finished entity file");
        Ok(())
      }
    }
  }

  async fn import_metadata_file(&self, path: &Path) -> Result<(), ImportError> {
    info!(file = %path.display(), "loading metadata file");

    let queue: BatchQueue<MetadataTask> = BatchQueue::new(self.config.queue_capacity);
    let metadata_ctx = MetadataContext {
      store: self.store.clone(),
      queue: queue.clone(),
      counters: self.counters.clone(),
      poll_timeout: self.config.poll_timeout,
      idle_backoff: self.config.idle_backoff,
    };
    let pool = WorkerPool::spawn("metadata", self.config.metadata_workers, {
      let ctx = metadata_ctx;
      move |index, handle, idle| metadata_worker(ctx.clone(), index, handle, idle)
    });

    let mut entries = metadata_stream(path);
    let mut read_error: Option<ReaderError> = None;
    while let Some(item) = entries.next().await {
      match item {
        Ok(entry) => {
          // Resolve the reference before enqueue; unknown entities are
          // dropped here, not retried downstream.
          let Ok(id) = Uuid::parse_str(&entry.entity_key) else {
            warn!(key = %entry.entity_key, "field name is not a valid entity id, skipping");
            self.counters.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
          };
          match self.store.entity_ref(id).await {
            Ok(entity) => {
              debug!(%entity, "queued metadata task");
              self.counters.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
              let task = MetadataTask {
                entity,
                payload: entry.payload,
              };
              if !queue.push(task).await {
                break;
              }
            }
            Err(_) => {
              warn!(%id, "entity not found, dropping metadata task");
              self.counters.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            }
          }
        }
        Err(e) => {
          read_error = Some(e);
          break;
        }
      }
    }

    let monitor = ProgressMonitor::new(self.config.monitor_interval, self.fatal.clone());
    monitor.drain_and_stop(&queue, &pool, "metadata load").await;
    pool.join().await;
    queue.close();

    match read_error {
      Some(e) => Err(e.into()),
      None => {
        info!(file = %path.display(), "finished metadata file");
        Ok(())
      }
    }
  }
}
