//! Concurrent bulk-import pipeline: streaming readers feed bounded hand-off
//! queues drained by writer, auditor, and metadata worker pools, with a
//! progress monitor that detects completion heuristically.

mod auditor;
mod config;
mod counters;
mod error;
mod metadata;
mod mirror;
mod monitor;
mod orchestrator;
mod pool;
mod queue;
mod reader;
mod writer;

pub use config::ImportConfig;
pub use counters::{ImportCounters, ImportSummary};
pub use error::{ImportError, ReaderError};
pub use metadata::{DICTIONARIES_KEY, MEMBERSHIPS_KEY, MetadataImporter, MetadataTask};
pub use monitor::ProgressMonitor;
pub use orchestrator::{ENTITY_FILE_PREFIX, Importer, METADATA_FILE_PREFIX};
pub use pool::{FatalSignal, WorkerHandle, WorkerPool};
pub use queue::BatchQueue;
pub use reader::{MetadataEntry, MetadataReader, RecordReader, metadata_stream, record_stream};
