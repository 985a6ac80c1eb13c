use std::path::PathBuf;

use clap::Parser;
use stowage_import::ImportConfig;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Bulk-import entity exports into a backing store", long_about = None)]
#[command(version)]
pub struct Cli {
  /// Directory containing `entities.*` and `metadata.*` export files
  #[arg(long, default_value = "export")]
  pub input_dir: PathBuf,

  /// Number of entity writer workers
  #[arg(long, default_value_t = num_cpus::get())]
  pub write_workers: usize,

  /// Number of audit workers verifying write visibility
  #[arg(long, default_value_t = num_cpus::get())]
  pub audit_workers: usize,

  /// Number of metadata relationship workers
  #[arg(long, default_value_t = num_cpus::get())]
  pub metadata_workers: usize,

  /// Echo every audited record to stdout
  #[arg(short, long)]
  pub verbose: bool,
}

impl Cli {
  pub fn into_config(self) -> ImportConfig {
    ImportConfig {
      input_dir: self.input_dir,
      write_workers: self.write_workers,
      audit_workers: self.audit_workers,
      metadata_workers: self.metadata_workers,
      echo_records: self.verbose,
      ..ImportConfig::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_the_export_layout() {
    let cli = Cli::parse_from(["stowage"]);

    assert_eq!(cli.input_dir, PathBuf::from("export"));
    assert!(!cli.verbose);
    assert!(cli.write_workers >= 1);
  }

  #[test]
  fn worker_counts_are_configurable() {
    let cli = Cli::parse_from([
      "stowage",
      "--input-dir",
      "/tmp/export",
      "--write-workers",
      "8",
      "--audit-workers",
      "4",
      "--metadata-workers",
      "2",
      "--verbose",
    ]);
    let config = cli.into_config();

    assert_eq!(config.input_dir, PathBuf::from("/tmp/export"));
    assert_eq!(config.write_workers, 8);
    assert_eq!(config.audit_workers, 4);
    assert_eq!(config.metadata_workers, 2);
    assert!(config.echo_records);
  }
}
