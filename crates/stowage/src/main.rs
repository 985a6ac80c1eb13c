mod cli;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use stowage_import::{ImportError, Importer};
use stowage_store::MemoryStore;

#[tokio::main]
async fn main() -> ExitCode {
  logging::init("stowage");

  let config = cli::Cli::parse().into_config();
  info!(
    input_dir = %config.input_dir.display(),
    exists = config.input_dir.exists(),
    "importing from directory"
  );

  let store = Arc::new(MemoryStore::new());
  let importer = Importer::new(store.clone(), config);

  match importer.run().await {
    Ok(summary) => {
      info!(
        records_read = summary.records_read,
        written = summary.written,
        duplicates = summary.duplicates,
        write_failures = summary.write_failures,
        audited = summary.audited,
        metadata_applied = summary.metadata_applied,
        metadata_failures = summary.metadata_failures,
        entities = store.entity_count(),
        groups = store.group_count(),
        "import complete"
      );
      ExitCode::SUCCESS
    }
    Err(error @ ImportError::Integrity { .. }) => {
      error!(%error, "import halted on integrity fault");
      ExitCode::from(2)
    }
    Err(error) => {
      error!(%error, "import failed");
      ExitCode::FAILURE
    }
  }
}
