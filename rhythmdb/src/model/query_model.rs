//! Ordered, filtered, optionally-limited live views over the entry store.
//!
//! The model keeps its visible rows in a plain sorted `Vec<Entry>` plus a
//! `HashMap<u32, usize>` id → index cache, rather than a balanced tree: this
//! keeps the implementation in safe, dependency-free Rust at the cost of
//! O(n) insert/remove (a shift of the backing vector) instead of O(log n).
//! Documented in DESIGN.md as a deliberate simplification.
//!
//! Query-driven and chained models also keep `matched`: every entry that
//! satisfies the query, sorted, *before* the limit is applied. `rows` is
//! always `apply_limit(matched)`'s visible half; `overflow` is the trimmed
//! half. Every incremental update mutates `matched` first and then re-derives
//! `rows`/`overflow` from it, which is what lets a limit promote an overflow
//! entry (or demote a visible one) as soon as the property that moved it
//! across the cut changes.

use crate::{
  action::Event,
  entry::Entry,
  error::{Error, Result},
  property::{Property, Value},
  store::EntryStore,
};
use std::{
  cmp::Ordering,
  collections::HashMap,
  sync::{Arc, Mutex, RwLock, Weak},
};

pub enum Limit {
  None,
  Count(usize),
  Duration(u64),
  Size(u64),
}

pub enum Sort {
  Property(Property, bool),
  Custom(Arc<dyn Fn(&Entry, &Entry) -> Ordering + Send + Sync>),
}

impl Sort {
  fn validate(&self) -> Result<()> {
    if let Sort::Property(p, _) = self {
      if matches!(p.kind(), crate::property::PropertyKind::Boolean) {
        return Err(Error::invalid(format!("{:?} is not a comparable sort property", p)));
      }
    }
    Ok(())
  }

  fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
    let ord = match self {
      Sort::Property(p, ascending) => {
        let ord = compare_values(&a.get(*p), &b.get(*p));
        if *ascending {
          ord
        } else {
          ord.reverse()
        }
      }
      Sort::Custom(f) => f(a, b),
    };
    // Equal sort keys are broken by location to give a total order.
    ord.then_with(|| a.location().as_str().cmp(b.location().as_str()))
  }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
  match (a, b) {
    (Value::Str(x), Value::Str(y)) => x.sort_key().cmp(y.sort_key()),
    (Value::ULong(x), Value::ULong(y)) => x.cmp(y),
    (Value::FileSize(x), Value::FileSize(y)) => x.cmp(y),
    (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
    (Value::Double(x), Value::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
    _ => Ordering::Equal,
  }
}

#[derive(Debug, Clone)]
pub enum RowEvent {
  RowInserted(Entry, usize),
  RowDeleted(Entry, usize),
  RowMoved(Entry, usize, usize),
  EntryPropChanged(Entry, Property, Value, Value),
  Complete,
  PostEntryDelete(Entry),
}

pub type RowSink = Arc<dyn Fn(&RowEvent) + Send + Sync>;

enum Mode {
  QueryDriven,
  Explicit,
  Chained(Arc<QueryModel>),
}

struct Sinks(Mutex<Vec<Weak<dyn Fn(&RowEvent) + Send + Sync>>>);

impl Sinks {
  fn new() -> Self {
    Sinks(Mutex::new(Vec::new()))
  }

  fn add(&self, sink: &RowSink) {
    self.0.lock().expect("poisoned").push(Arc::downgrade(sink) as Weak<dyn Fn(&RowEvent) + Send + Sync>);
  }

  fn emit(&self, event: RowEvent) {
    let mut guard = self.0.lock().expect("poisoned");
    guard.retain(|w| w.upgrade().is_some());
    for w in guard.iter() {
      if let Some(cb) = w.upgrade() {
        cb(&event);
      }
    }
  }
}

/// An ordered live view of entries matching `query`.
pub struct QueryModel {
  store: Arc<EntryStore>,
  mode: Mode,
  query: Mutex<crate::query::Query>,
  sort: Mutex<Sort>,
  limit: Limit,
  show_hidden: bool,
  /// Every entry that currently satisfies the query, in sort order, before
  /// the limit cut. Empty and unused in `Mode::Explicit`.
  matched: RwLock<Vec<Entry>>,
  rows: RwLock<Vec<Entry>>,
  index_of: RwLock<HashMap<u32, usize>>,
  overflow: RwLock<Vec<Entry>>,
  sinks: Sinks,
}

impl QueryModel {
  pub fn new(
    store: Arc<EntryStore>,
    query: crate::query::Query,
    sort: Sort,
    limit: Limit,
    show_hidden: bool,
  ) -> Result<Arc<Self>> {
    sort.validate()?;
    Ok(Arc::new(QueryModel {
      store,
      mode: Mode::QueryDriven,
      query: Mutex::new(crate::query::preprocess(&query)),
      sort: Mutex::new(sort),
      limit,
      show_hidden,
      matched: RwLock::new(Vec::new()),
      rows: RwLock::new(Vec::new()),
      index_of: RwLock::new(HashMap::new()),
      overflow: RwLock::new(Vec::new()),
      sinks: Sinks::new(),
    }))
  }

  pub fn explicit(store: Arc<EntryStore>, sort: Sort, limit: Limit) -> Result<Arc<Self>> {
    sort.validate()?;
    Ok(Arc::new(QueryModel {
      store,
      mode: Mode::Explicit,
      query: Mutex::new(crate::query::match_all()),
      sort: Mutex::new(sort),
      limit,
      show_hidden: true,
      matched: RwLock::new(Vec::new()),
      rows: RwLock::new(Vec::new()),
      index_of: RwLock::new(HashMap::new()),
      overflow: RwLock::new(Vec::new()),
      sinks: Sinks::new(),
    }))
  }

  /// Chain this model on top of `base`'s rows instead of the entry store.
  /// `mode` is fixed at construction and never reassigned, so a chain can
  /// only ever point at a model that already existed before it — cycles
  /// cannot arise structurally.
  pub fn chained(
    base: Arc<QueryModel>,
    query: crate::query::Query,
    sort: Sort,
    limit: Limit,
  ) -> Result<Arc<Self>> {
    sort.validate()?;
    Ok(Arc::new(QueryModel {
      store: base.store.clone(),
      mode: Mode::Chained(base),
      query: Mutex::new(crate::query::preprocess(&query)),
      sort: Mutex::new(sort),
      limit,
      show_hidden: true,
      matched: RwLock::new(Vec::new()),
      rows: RwLock::new(Vec::new()),
      index_of: RwLock::new(HashMap::new()),
      overflow: RwLock::new(Vec::new()),
      sinks: Sinks::new(),
    }))
  }

  pub fn subscribe(&self, sink: &RowSink) {
    self.sinks.add(sink);
  }

  pub fn rows(&self) -> Vec<Entry> {
    self.rows.read().expect("poisoned").clone()
  }

  pub fn overflow(&self) -> Vec<Entry> {
    self.overflow.read().expect("poisoned").clone()
  }

  pub fn len(&self) -> usize {
    self.rows.read().expect("poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn source_entries(&self) -> Vec<Entry> {
    match &self.mode {
      Mode::QueryDriven | Mode::Explicit => {
        let mut out = Vec::new();
        self.store.entry_foreach(|e| out.push(e.clone()));
        out
      }
      Mode::Chained(base) => base.rows(),
    }
  }

  fn matches(&self, entry: &Entry) -> bool {
    if !self.show_hidden && entry.is_hidden() {
      return false;
    }
    let query = self.query.lock().expect("poisoned");
    crate::query::evaluate(&query, entry).unwrap_or(false)
  }

  /// Drain the source and (re)populate the model from scratch (the
  /// query-driven population mode). Emits `row-inserted` for each visible
  /// row followed by a single `complete`.
  pub fn do_query(&self) {
    let mut candidates: Vec<Entry> = self.source_entries().into_iter().filter(|e| self.matches(e)).collect();
    let sort = self.sort.lock().expect("poisoned");
    candidates.sort_by(|a, b| sort.compare(a, b));
    drop(sort);

    *self.matched.write().expect("poisoned") = candidates.clone();
    let (visible, overflow) = apply_limit(&self.limit, candidates);

    {
      let mut index = self.index_of.write().expect("poisoned");
      index.clear();
      for (i, e) in visible.iter().enumerate() {
        index.insert(e.id(), i);
      }
    }
    *self.rows.write().expect("poisoned") = visible.clone();
    *self.overflow.write().expect("poisoned") = overflow;

    for (i, entry) in visible.into_iter().enumerate() {
      self.sinks.emit(RowEvent::RowInserted(entry, i));
    }
    self.sinks.emit(RowEvent::Complete);
  }

  // --- explicit-mode mutation API ---

  pub fn add_entry(&self, entry: Entry, pos: Option<usize>) {
    let mut rows = self.rows.write().expect("poisoned");
    let pos = pos.unwrap_or(rows.len()).min(rows.len());
    rows.insert(pos, entry.clone());
    reindex(&rows, &mut self.index_of.write().expect("poisoned"));
    drop(rows);
    self.sinks.emit(RowEvent::RowInserted(entry, pos));
  }

  pub fn remove_entry(&self, entry: &Entry) {
    let mut rows = self.rows.write().expect("poisoned");
    if let Some(pos) = rows.iter().position(|e| e.id() == entry.id()) {
      let removed = rows.remove(pos);
      reindex(&rows, &mut self.index_of.write().expect("poisoned"));
      drop(rows);
      self.sinks.emit(RowEvent::RowDeleted(removed.clone(), pos));
      self.sinks.emit(RowEvent::PostEntryDelete(removed));
    }
  }

  pub fn move_entry(&self, entry: &Entry, new_pos: usize) {
    let mut rows = self.rows.write().expect("poisoned");
    let Some(old_pos) = rows.iter().position(|e| e.id() == entry.id()) else {
      return;
    };
    let e = rows.remove(old_pos);
    let new_pos = new_pos.min(rows.len());
    rows.insert(new_pos, e.clone());
    reindex(&rows, &mut self.index_of.write().expect("poisoned"));
    drop(rows);
    if old_pos != new_pos {
      self.sinks.emit(RowEvent::RowMoved(e, old_pos, new_pos));
    }
  }

  pub fn reorder(&self, new_order: Vec<Entry>) {
    *self.rows.write().expect("poisoned") = new_order.clone();
    reindex(&new_order, &mut self.index_of.write().expect("poisoned"));
  }

  /// Incremental update from an entry-store commit notification
  /// (query-driven/chained mode only; explicit models ignore store events).
  pub fn handle_event(&self, event: &Event) {
    if matches!(self.mode, Mode::Explicit) {
      return;
    }
    match event {
      Event::EntryAdded(entry) => self.consider_insert(entry.clone()),
      Event::EntryDeleted(entry) => self.remove_if_present(entry),
      Event::EntryChanged(entry, records) => {
        for record in records {
          self.sinks.emit(RowEvent::EntryPropChanged(
            entry.clone(),
            record.property,
            record.old.clone(),
            record.new.clone(),
          ));
        }
        self.reconcile_changed(entry, records);
      }
      Event::Complete { .. } => {}
    }
  }

  fn reconcile_changed(&self, entry: &Entry, records: &[crate::action::ChangeRecord]) {
    let now_matches = self.matches(entry);
    let was_matched = self.matched.read().expect("poisoned").iter().any(|e| e.id() == entry.id());

    if !was_matched && now_matches {
      self.consider_insert(entry.clone());
      return;
    }
    if was_matched && !now_matches {
      self.remove_if_present(entry);
      return;
    }
    if !was_matched {
      return;
    }

    let sort_prop = match &*self.sort.lock().expect("poisoned") {
      Sort::Property(p, _) => Some(*p),
      Sort::Custom(_) => None,
    };
    let sort_affected = sort_prop.is_some_and(|p| records.iter().any(|r| r.property == p)) || sort_prop.is_none();
    if sort_affected {
      self.reposition(entry);
    }
  }

  fn consider_insert(&self, entry: Entry) {
    if !self.matches(&entry) {
      return;
    }
    let already = self.matched.read().expect("poisoned").iter().any(|e| e.id() == entry.id());
    if already {
      return;
    }
    self.insert_into_matched(entry);
    self.recompute_and_diff(None);
  }

  fn remove_if_present(&self, entry: &Entry) {
    let mut matched = self.matched.write().expect("poisoned");
    let Some(pos) = matched.iter().position(|e| e.id() == entry.id()) else {
      return;
    };
    matched.remove(pos);
    drop(matched);
    self.recompute_and_diff(None);
  }

  /// The bound property changed in a way that affects sort order; the entry
  /// stays matched. Re-sort it within `matched` and re-derive `rows`, moving
  /// it within the visible window (emitting `row-moved` rather than
  /// delete+insert) or promoting/demoting it across the limit cut.
  fn reposition(&self, entry: &Entry) {
    {
      let mut matched = self.matched.write().expect("poisoned");
      let Some(old_pos) = matched.iter().position(|e| e.id() == entry.id()) else {
        return;
      };
      let e = matched.remove(old_pos);
      let sort = self.sort.lock().expect("poisoned");
      let new_pos = matched.binary_search_by(|probe| sort.compare(probe, &e)).unwrap_or_else(|i| i);
      drop(sort);
      matched.insert(new_pos, e);
    }
    self.recompute_and_diff(Some(entry));
  }

  fn insert_into_matched(&self, entry: Entry) {
    let sort = self.sort.lock().expect("poisoned");
    let mut matched = self.matched.write().expect("poisoned");
    let pos = matched.binary_search_by(|probe| sort.compare(probe, &entry)).unwrap_or_else(|i| i);
    drop(sort);
    matched.insert(pos, entry);
  }

  /// Re-derive `rows`/`overflow` from `matched` and diff against the
  /// previous `rows` to emit the minimal set of row events: deletions for
  /// entries the limit now excludes (demotions), insertions for entries it
  /// now includes (promotions from overflow, or brand new matches), and —
  /// when `reordered_entry` names an entry that stayed visible on both
  /// sides — a single `row-moved` for it.
  fn recompute_and_diff(&self, reordered_entry: Option<&Entry>) {
    let candidates = self.matched.read().expect("poisoned").clone();
    let (new_visible, new_overflow) = apply_limit(&self.limit, candidates);
    let old_rows = self.rows.read().expect("poisoned").clone();

    let old_index: HashMap<u32, usize> = old_rows.iter().enumerate().map(|(i, e)| (e.id(), i)).collect();
    let new_index: HashMap<u32, usize> = new_visible.iter().enumerate().map(|(i, e)| (e.id(), i)).collect();

    let mut demoted: Vec<(usize, Entry)> = old_rows
      .iter()
      .enumerate()
      .filter(|(_, e)| !new_index.contains_key(&e.id()))
      .map(|(i, e)| (i, e.clone()))
      .collect();
    demoted.sort_by(|a, b| b.0.cmp(&a.0));
    for (pos, entry) in &demoted {
      self.sinks.emit(RowEvent::RowDeleted(entry.clone(), *pos));
      self.sinks.emit(RowEvent::PostEntryDelete(entry.clone()));
    }

    let mut promoted: Vec<(usize, Entry)> = new_visible
      .iter()
      .enumerate()
      .filter(|(_, e)| !old_index.contains_key(&e.id()))
      .map(|(i, e)| (i, e.clone()))
      .collect();
    promoted.sort_by(|a, b| a.0.cmp(&b.0));
    for (pos, entry) in &promoted {
      self.sinks.emit(RowEvent::RowInserted(entry.clone(), *pos));
    }

    if let Some(entry) = reordered_entry {
      if let (Some(&old_pos), Some(&new_pos)) = (old_index.get(&entry.id()), new_index.get(&entry.id())) {
        if old_pos != new_pos {
          self.sinks.emit(RowEvent::RowMoved(entry.clone(), old_pos, new_pos));
        }
      }
    }

    reindex(&new_visible, &mut self.index_of.write().expect("poisoned"));
    *self.rows.write().expect("poisoned") = new_visible;
    *self.overflow.write().expect("poisoned") = new_overflow;
  }
}

fn reindex(rows: &[Entry], index: &mut HashMap<u32, usize>) {
  index.clear();
  for (i, e) in rows.iter().enumerate() {
    index.insert(e.id(), i);
  }
}

/// Apply the model's limit policy, splitting sorted `candidates` into
/// (visible, overflow). `Count` keeps the first `n`; `Duration`/`Size`
/// accumulate the named property in sort order and cut at the first entry
/// whose inclusion would exceed the budget — that entry is excluded
/// entirely, never included partially.
fn apply_limit(limit: &Limit, candidates: Vec<Entry>) -> (Vec<Entry>, Vec<Entry>) {
  match limit {
    Limit::None => (candidates, Vec::new()),
    Limit::Count(n) => {
      if candidates.len() <= *n {
        (candidates, Vec::new())
      } else {
        let mut visible = candidates;
        let overflow = visible.split_off(*n);
        (visible, overflow)
      }
    }
    Limit::Duration(budget) => split_by_accumulator(candidates, *budget, |e| e.get(Property::Duration).as_ulong().unwrap_or(0)),
    Limit::Size(budget) => split_by_accumulator(candidates, *budget, |e| e.get(Property::FileSize).as_ulong().unwrap_or(0)),
  }
}

fn split_by_accumulator(candidates: Vec<Entry>, budget: u64, value_of: impl Fn(&Entry) -> u64) -> (Vec<Entry>, Vec<Entry>) {
  let mut visible = Vec::new();
  let mut overflow = Vec::new();
  let mut total = 0u64;
  let mut cut = false;
  for entry in candidates {
    if cut {
      overflow.push(entry);
      continue;
    }
    let next_total = total + value_of(&entry);
    if next_total > budget {
      cut = true;
      overflow.push(entry);
      continue;
    }
    total = next_total;
    visible.push(entry);
  }
  (visible, overflow)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{atom::intern, types::SONG};

  fn setup() -> (Arc<EntryStore>, Entry, Entry) {
    let store = Arc::new(EntryStore::new(Arc::new(crate::types::Registry::new())));
    let song = store.registry().lookup(SONG).unwrap();
    let a = store.entry_new(song.clone(), "file:///a.ogg").unwrap();
    let b = store.entry_new(song, "file:///b.ogg").unwrap();
    store.entry_set(&a, Property::Title, Value::Str(intern("Alpha"))).unwrap();
    store.entry_set(&b, Property::Title, Value::Str(intern("Beta"))).unwrap();
    // Commit bypassed here: tests drive the store directly and mark
    // committed by hand since action::Db owns the real commit engine.
    a.mark_committed();
    b.mark_committed();
    (store, a, b)
  }

  #[test]
  fn do_query_populates_sorted_rows() {
    let (store, a, b) = setup();
    let model = QueryModel::new(
      store,
      crate::query::match_all(),
      Sort::Property(Property::Title, true),
      Limit::None,
      false,
    )
    .unwrap();
    model.do_query();
    let rows = model.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id(), a.id());
    assert_eq!(rows[1].id(), b.id());
  }

  #[test]
  fn count_limit_splits_overflow() {
    let (store, _a, _b) = setup();
    let model = QueryModel::new(
      store,
      crate::query::match_all(),
      Sort::Property(Property::Title, true),
      Limit::Count(1),
      false,
    )
    .unwrap();
    model.do_query();
    assert_eq!(model.len(), 1);
    assert_eq!(model.overflow().len(), 1);
  }

  #[test]
  fn invalid_sort_property_is_rejected() {
    let store = Arc::new(EntryStore::new(Arc::new(crate::types::Registry::new())));
    let err = QueryModel::new(store, crate::query::match_all(), Sort::Property(Property::Hidden, true), Limit::None, false);
    assert!(matches!(err, Err(Error::Invalid(_))));
  }

  #[test]
  fn explicit_model_add_remove() {
    let store = Arc::new(EntryStore::new(Arc::new(crate::types::Registry::new())));
    let song = store.registry().lookup(SONG).unwrap();
    let e = store.entry_new(song, "file:///x.ogg").unwrap();
    let model = QueryModel::explicit(store, Sort::Property(Property::Title, true), Limit::None).unwrap();
    model.add_entry(e.clone(), None);
    assert_eq!(model.len(), 1);
    model.remove_entry(&e);
    assert_eq!(model.len(), 0);
  }

  /// A change that promotes an overflow entry above the cut emits
  /// row-inserted; a change that demotes a visible entry emits row-deleted
  /// for that entry and row-inserted for the newly-promoted one.
  #[test]
  fn sort_change_promotes_overflow_entry_past_count_cut() {
    let (store, a, b) = setup();
    let model = QueryModel::new(
      store,
      crate::query::match_all(),
      Sort::Property(Property::Title, true),
      Limit::Count(1),
      false,
    )
    .unwrap();
    model.do_query();
    // "Alpha" < "Beta": a is visible, b is overflow.
    assert_eq!(model.rows()[0].id(), a.id());
    assert_eq!(model.overflow()[0].id(), b.id());

    // Rename b to sort before a; it should be promoted and a demoted.
    model.store.entry_set(&b, Property::Title, Value::Str(intern("Aaa"))).unwrap();
    let records = vec![crate::action::ChangeRecord {
      property: Property::Title,
      old: Value::Str(intern("Beta")),
      new: Value::Str(intern("Aaa")),
    }];
    model.store.apply_property(&b, Property::Title, Value::Str(intern("Aaa")));
    model.handle_event(&Event::EntryChanged(b.clone(), records));

    let rows = model.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), b.id());
    assert_eq!(model.overflow()[0].id(), a.id());
  }
}
