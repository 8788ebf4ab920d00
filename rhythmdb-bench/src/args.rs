use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub(crate) struct App {
  #[command(subcommand)]
  pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
  /// Loop `load -> delete-by-type -> load` over a database file. Soak test
  /// for the persistence layer and the commit engine under repeated churn.
  Bench(BenchArgs),
  /// Run a handful of consistency invariants against a real database file
  /// and report failures as miette diagnostics.
  Check(CheckArgs),
}

#[derive(Parser, Debug)]
pub(crate) struct BenchArgs {
  /// Path to the rhythmdb.xml file to load.
  #[arg(long)]
  pub(crate) file: String,

  /// Entry type to delete between the two loads (e.g. "song", "ignore").
  #[arg(long, default_value = "song")]
  pub(crate) entry_type: String,

  /// Number of load/delete/load cycles to run.
  #[arg(long, default_value_t = 1)]
  pub(crate) iterations: u32,
}

#[derive(Parser, Debug)]
pub(crate) struct CheckArgs {
  /// Path to a rhythmdb.xml file. Loads it, runs its assertions against a
  /// throwaway copy, and never rewrites the input file.
  #[arg(long)]
  pub(crate) file: String,
}
