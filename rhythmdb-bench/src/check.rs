//! `check`: run a handful of consistency invariants against a real database
//! file and report any violation as a `miette` diagnostic. Read-only with
//! respect to the file the caller points at — the round-trip check writes
//! to a scratch copy alongside it, never back to the original.

use crate::args::CheckArgs;
use miette::{bail, IntoDiagnostic, Result};
use rhythmdb::{Db, Property};
use std::path::PathBuf;
use tracing::info;

pub(crate) async fn run(args: &CheckArgs) -> Result<()> {
  let db = Db::new();
  let loaded = db.load_file(&args.file).await.into_diagnostic()?;
  info!(loaded, "loaded for check");

  let mut failures = Vec::new();

  // Invariant: lookup_by_location(location(e)) == Some(e) for every committed entry.
  let mut entries = Vec::new();
  db.store().entry_foreach(|e| entries.push(e.clone()));
  for entry in &entries {
    let location = entry.location();
    match db.store().entry_lookup_by_location(location.as_str()) {
      Some(found) if found.id() == entry.id() => {}
      _ => failures.push(format!("location round-trip failed for '{location}'")),
    }
  }

  // Invariant: folded(get(e,p)) == get(e, p_folded) and sort_key(get(e,p)) ==
  // get(e, p_sort_key) for every string property carrying a derived sibling.
  for prop in Property::ALL {
    let Some(folded_prop) = prop.folded_sibling() else {
      continue;
    };
    for entry in &entries {
      let Some(text) = db.store().entry_get(entry, *prop).as_str().map(str::to_owned) else {
        continue;
      };
      let folded = db.store().entry_get(entry, folded_prop);
      if folded.as_str() != Some(text.to_lowercase().as_str()) {
        failures.push(format!(
          "entry {} ({:?}): folded sibling mismatch for {:?}",
          entry.id(),
          entry.location(),
          prop
        ));
      }
    }
  }

  // Invariant: save(load(file)) == file up to reordering by location. We
  // approximate that by re-loading the saved copy and comparing entry counts
  // and the set of locations, rather than a byte-level XML diff.
  let scratch = scratch_path(&args.file);
  db.save_file(&scratch).await.into_diagnostic()?;

  let reloaded = Db::new();
  reloaded.load_file(&scratch).await.into_diagnostic()?;
  let mut reloaded_locations: Vec<String> = Vec::new();
  reloaded.store().entry_foreach(|e| reloaded_locations.push(e.location().as_str().to_owned()));
  let mut original_locations: Vec<String> = entries.iter().map(|e| e.location().as_str().to_owned()).collect();
  reloaded_locations.sort();
  original_locations.sort();
  if reloaded_locations != original_locations {
    failures.push(format!(
      "round-trip location set mismatch: {} entries before, {} after",
      original_locations.len(),
      reloaded_locations.len()
    ));
  }
  let _ = std::fs::remove_file(&scratch);

  db.shutdown().await;
  reloaded.shutdown().await;

  if failures.is_empty() {
    info!(entries = entries.len(), "all checks passed");
    Ok(())
  } else {
    let report = failures.join("\n  - ");
    bail!("{} check(s) failed:\n  - {report}", failures.len());
  }
}

fn scratch_path(original: &str) -> PathBuf {
  let mut path = PathBuf::from(original);
  let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  path.set_file_name(format!("{file_name}.check-scratch"));
  path
}
