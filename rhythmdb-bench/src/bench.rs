//! `bench`: loop `load -> delete-by-type -> load` over a file. Exercises the
//! persistence layer and the commit engine under repeated churn without
//! asserting anything — a soak test, not a check.

use crate::args::BenchArgs;
use miette::{IntoDiagnostic, Result};
use rhythmdb::Db;
use tracing::info;

pub(crate) async fn run(args: &BenchArgs) -> Result<()> {
  let db = Db::new();

  for iteration in 0..args.iterations {
    let loaded = db.load_file(&args.file).await.into_diagnostic()?;
    info!(iteration, loaded, "loaded");

    let victims: Vec<_> = {
      let mut v = Vec::new();
      db.store().entry_foreach_by_type(&args.entry_type, |e| v.push(e.clone()));
      v
    };
    let victim_count = victims.len();
    for entry in victims {
      db.store().entry_delete(&entry);
    }
    let report = db.commit().await.into_diagnostic()?;
    info!(iteration, deleted = report.deleted, requested = victim_count, "deleted by type");

    let reloaded = db.load_file(&args.file).await.into_diagnostic()?;
    info!(iteration, reloaded, "reloaded");
  }

  db.shutdown().await;
  Ok(())
}
