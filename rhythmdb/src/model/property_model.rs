//! Grouping ("browser") views bound to exactly one query model.
//!
//! A property model buckets the bound query model's rows by one property's
//! display value, tracking every member entry of each bucket (so a
//! representative can be reassigned when it leaves) and a synthetic `"All"`
//! row whose count is the sum of every other row's.

use crate::{
  entry::Entry,
  model::query_model::{QueryModel, RowEvent},
  property::{Property, Value},
};
use std::{
  collections::HashMap,
  sync::{Arc, Mutex, RwLock, Weak},
};

#[derive(Debug, Clone)]
pub enum PropertyRowEvent {
  RowInserted(String, usize),
  PreRowDeletion(String),
  RowDeleted(String, usize),
}

pub type PropertyRowSink = Arc<dyn Fn(&PropertyRowEvent) + Send + Sync>;

/// Every entry currently grouped under this bucket's value, in first-seen
/// order. The representative is always `members[0]`; it is
/// replaced only when it leaves (`remove`), never by a later arrival.
struct Bucket {
  members: Vec<Entry>,
}

impl Bucket {
  fn new(entry: Entry) -> Self {
    Bucket { members: vec![entry] }
  }

  fn count(&self) -> usize {
    self.members.len()
  }

  fn representative(&self) -> &Entry {
    &self.members[0]
  }

  fn add(&mut self, entry: Entry) {
    self.members.push(entry);
  }

  /// Remove `entry` from this bucket. Returns `true` if the bucket is now
  /// empty (the caller should drop it).
  fn remove(&mut self, entry_id: u32) -> bool {
    if let Some(pos) = self.members.iter().position(|e| e.id() == entry_id) {
      self.members.remove(pos);
    }
    self.members.is_empty()
  }
}

struct Sinks(Mutex<Vec<Weak<dyn Fn(&PropertyRowEvent) + Send + Sync>>>);

impl Sinks {
  fn new() -> Self {
    Sinks(Mutex::new(Vec::new()))
  }
  fn add(&self, sink: &PropertyRowSink) {
    self.0.lock().expect("poisoned").push(Arc::downgrade(sink) as Weak<dyn Fn(&PropertyRowEvent) + Send + Sync>);
  }
  fn emit(&self, event: PropertyRowEvent) {
    let mut guard = self.0.lock().expect("poisoned");
    guard.retain(|w| w.upgrade().is_some());
    for w in guard.iter() {
      if let Some(cb) = w.upgrade() {
        cb(&event);
      }
    }
  }
}

/// The always-present row summarising every other row's count.
pub const ALL_ROW: &str = "";

pub struct PropertyModel {
  property: Property,
  base: RwLock<Option<Arc<QueryModel>>>,
  /// Display value -> bucket. The empty string is a legitimate key: entries
  /// with no value for `property` collapse into one row rather than being
  /// dropped or duplicated.
  buckets: RwLock<HashMap<String, Bucket>>,
  /// Insertion order of bucket keys, for a stable enumeration; the `"All"`
  /// row is always first and is not stored as a key here.
  order: RwLock<Vec<String>>,
  sinks: Sinks,
  held_sink: Mutex<Option<crate::model::query_model::RowSink>>,
}

impl PropertyModel {
  pub fn new(property: Property) -> Arc<Self> {
    Arc::new(PropertyModel {
      property,
      base: RwLock::new(None),
      buckets: RwLock::new(HashMap::new()),
      order: RwLock::new(Vec::new()),
      sinks: Sinks::new(),
      held_sink: Mutex::new(None),
    })
  }

  pub fn subscribe(&self, sink: &PropertyRowSink) {
    self.sinks.add(sink);
  }

  /// Bind (or rebind) to a query model, fully resynchronising from scratch
  /// without losing subscriber references: old subscriptions to the
  /// previous base are dropped and counts are rebuilt from scratch.
  pub fn bind(self: &Arc<Self>, query_model: Arc<QueryModel>) {
    *self.base.write().expect("poisoned") = Some(query_model.clone());
    self.resync(&query_model);

    let weak_self = Arc::downgrade(self);
    let sink: crate::model::query_model::RowSink = Arc::new(move |event: &RowEvent| {
      if let Some(model) = weak_self.upgrade() {
        model.handle_row_event(event);
      }
    });
    // The query model only keeps a `Weak` reference to subscribers; hold the
    // strong `Arc` here for as long as this property model lives. Assigning
    // a new `held_sink` drops the old one, which is exactly the "drop old
    // subscriptions" half of a rebind.
    *self.held_sink.lock().expect("poisoned") = Some(sink.clone());
    query_model.subscribe(&sink);
  }

  pub fn set_base(self: &Arc<Self>, other: Arc<QueryModel>) {
    self.bind(other);
  }

  fn resync(&self, query_model: &QueryModel) {
    let mut buckets = self.buckets.write().expect("poisoned");
    let mut order = self.order.write().expect("poisoned");
    buckets.clear();
    order.clear();
    for entry in query_model.rows() {
      insert_into(&mut buckets, &mut order, self.property, entry);
    }
  }

  fn handle_row_event(&self, event: &RowEvent) {
    match event {
      RowEvent::RowInserted(entry, _) => {
        let key = display_key(self.property, entry);
        let mut buckets = self.buckets.write().expect("poisoned");
        let mut order = self.order.write().expect("poisoned");
        let is_new = !buckets.contains_key(&key);
        insert_into(&mut buckets, &mut order, self.property, entry.clone());
        drop(buckets);
        drop(order);
        if is_new {
          let pos = self.order.read().expect("poisoned").iter().position(|k| k == &key).unwrap_or(0);
          self.sinks.emit(PropertyRowEvent::RowInserted(key, pos));
        }
      }
      RowEvent::RowDeleted(entry, _) | RowEvent::PostEntryDelete(entry) => {
        self.remove_one_by_key(&display_key(self.property, entry), entry);
      }
      RowEvent::EntryPropChanged(entry, prop, old, new) if *prop == self.property => {
        self.reconcile_value_change(entry, old, new);
      }
      _ => {}
    }
  }

  fn reconcile_value_change(&self, entry: &Entry, old: &Value, new: &Value) {
    let old_key = value_key(old);
    let new_key = value_key(new);
    if old_key == new_key {
      return;
    }
    self.remove_one_by_key(&old_key, entry);

    let mut buckets = self.buckets.write().expect("poisoned");
    let mut order = self.order.write().expect("poisoned");
    let is_new = !buckets.contains_key(&new_key);
    insert_bucket(&mut buckets, &mut order, new_key.clone(), entry.clone());
    drop(buckets);
    drop(order);
    if is_new {
      let pos = self.order.read().expect("poisoned").iter().position(|k| k == &new_key).unwrap_or(0);
      self.sinks.emit(PropertyRowEvent::RowInserted(new_key, pos));
    }
  }

  /// Remove `entry` from the bucket named `key`. If that empties the bucket,
  /// drop it with a `pre-row-deletion` / `row-deleted` pair; otherwise leave
  /// it, re-assigning the representative if `entry` was it — the
  /// representative is only ever replaced when it leaves the group.
  fn remove_one_by_key(&self, key: &str, entry: &Entry) {
    let mut buckets = self.buckets.write().expect("poisoned");
    let Some(bucket) = buckets.get_mut(key) else {
      return;
    };
    let now_empty = bucket.remove(entry.id());
    drop(buckets);
    if now_empty {
      let mut order = self.order.write().expect("poisoned");
      if let Some(pos) = order.iter().position(|k| k == key) {
        self.sinks.emit(PropertyRowEvent::PreRowDeletion(key.to_string()));
        order.remove(pos);
        self.buckets.write().expect("poisoned").remove(key);
        self.sinks.emit(PropertyRowEvent::RowDeleted(key.to_string(), pos));
      }
    }
  }

  /// Every row's display value, ordered by the sort key of the display
  /// property (sortname variants respected, via each bucket's
  /// representative entry), with `""` (the "All" row) always first.
  pub fn rows(&self) -> Vec<(String, usize)> {
    let buckets = self.buckets.read().expect("poisoned");
    let order = self.order.read().expect("poisoned");
    let total: usize = buckets.values().map(|b| b.count()).sum();

    let mut keys: Vec<&String> = order.iter().filter(|k| buckets.contains_key(*k)).collect();
    keys.sort_by(|a, b| {
      let ka = sort_key_for(self.property, buckets[*a].representative());
      let kb = sort_key_for(self.property, buckets[*b].representative());
      ka.cmp(&kb)
    });

    let mut out = vec![(ALL_ROW.to_string(), total)];
    for key in keys {
      out.push((key.clone(), buckets[key].count()));
    }
    out
  }

  pub fn representative(&self, key: &str) -> Option<Entry> {
    self.buckets.read().expect("poisoned").get(key).map(|b| b.representative().clone())
  }
}

fn sort_key_for(property: Property, entry: &Entry) -> String {
  let sort_prop = property.sort_key_sibling().unwrap_or(property);
  entry.get(sort_prop).as_str().map(str::to_string).unwrap_or_default()
}

fn value_key(value: &Value) -> String {
  value.as_str().map(str::to_string).unwrap_or_default()
}

fn display_key(property: Property, entry: &Entry) -> String {
  value_key(&entry.get(property))
}

fn insert_into(buckets: &mut HashMap<String, Bucket>, order: &mut Vec<String>, property: Property, entry: Entry) {
  let key = display_key(property, &entry);
  insert_bucket(buckets, order, key, entry);
}

fn insert_bucket(buckets: &mut HashMap<String, Bucket>, order: &mut Vec<String>, key: String, entry: Entry) {
  match buckets.get_mut(&key) {
    Some(bucket) => bucket.add(entry),
    None => {
      order.push(key.clone());
      buckets.insert(key, Bucket::new(entry));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    action::ChangeRecord,
    atom::intern,
    model::query_model::{Limit, QueryModel, Sort},
    property::Property,
    store::EntryStore,
    types::SONG,
  };
  use std::sync::Arc;

  fn store_with(titles: &[(&str, &str)]) -> (Arc<EntryStore>, Vec<Entry>) {
    let store = Arc::new(EntryStore::new(Arc::new(crate::types::Registry::new())));
    let song = store.registry().lookup(SONG).unwrap();
    let mut entries = Vec::new();
    for (i, (loc, title)) in titles.iter().enumerate() {
      let e = store.entry_new(song.clone(), loc).unwrap();
      store.entry_set(&e, Property::Title, Value::Str(intern(title))).unwrap();
      store.entry_set(&e, Property::Artist, Value::Str(intern("Shared Artist"))).unwrap();
      e.mark_committed();
      let _ = i;
      entries.push(e);
    }
    (store, entries)
  }

  #[test]
  fn all_row_count_matches_total() {
    let (store, _entries) = store_with(&[("file:///a.ogg", "A"), ("file:///b.ogg", "B")]);
    let qm = QueryModel::new(store, crate::query::match_all(), Sort::Property(Property::Title, true), Limit::None, false).unwrap();
    qm.do_query();
    let pm = PropertyModel::new(Property::Artist);
    pm.bind(qm);
    let rows = pm.rows();
    assert_eq!(rows[0], (ALL_ROW.to_string(), 2));
  }

  #[test]
  fn representative_reassigned_when_it_leaves() {
    let (store, entries) = store_with(&[("file:///a.ogg", "A"), ("file:///b.ogg", "B")]);
    let qm = QueryModel::new(store.clone(), crate::query::match_all(), Sort::Property(Property::Title, true), Limit::None, false).unwrap();
    qm.do_query();
    let pm = PropertyModel::new(Property::Artist);
    pm.bind(qm.clone());

    let key = "shared artist".to_string();
    assert_eq!(pm.representative(&key).unwrap().id(), entries[0].id());

    // The first entry's artist changes away; the bucket must keep its
    // second member as the new representative rather than going stale.
    store.apply_property(&entries[0], Property::Artist, Value::Str(intern("Solo Artist")));
    qm.handle_event(&crate::action::Event::EntryChanged(
      entries[0].clone(),
      vec![ChangeRecord {
        property: Property::Artist,
        old: Value::Str(intern("Shared Artist")),
        new: Value::Str(intern("Solo Artist")),
      }],
    ));

    assert_eq!(pm.representative(&key).unwrap().id(), entries[1].id());
    assert_eq!(pm.representative(&key).unwrap().id(), entries[1].id());
  }

  #[test]
  fn empty_string_values_collapse_to_one_row() {
    let store = Arc::new(EntryStore::new(Arc::new(crate::types::Registry::new())));
    let song = store.registry().lookup(SONG).unwrap();
    let a = store.entry_new(song.clone(), "file:///a.ogg").unwrap();
    let b = store.entry_new(song, "file:///b.ogg").unwrap();
    a.mark_committed();
    b.mark_committed();

    let qm = QueryModel::new(store, crate::query::match_all(), Sort::Property(Property::Title, true), Limit::None, false).unwrap();
    qm.do_query();
    let pm = PropertyModel::new(Property::Artist);
    pm.bind(qm);

    let rows = pm.rows();
    // One "" (All) row plus one "" (unset-artist) row, not two duplicates.
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1], (String::new(), 2));
  }

  #[test]
  fn default_order_sorts_articles_by_their_own_text() {
    let store = Arc::new(EntryStore::new(Arc::new(crate::types::Registry::new())));
    let song = store.registry().lookup(SONG).unwrap();
    let a = store.entry_new(song.clone(), "file:///a.ogg").unwrap();
    let the_b = store.entry_new(song.clone(), "file:///b.ogg").unwrap();
    let c = store.entry_new(song, "file:///c.ogg").unwrap();
    store.apply_property(&a, Property::Artist, Value::Str(intern("a")));
    store.apply_property(&the_b, Property::Artist, Value::Str(intern("the b")));
    store.apply_property(&c, Property::Artist, Value::Str(intern("c")));
    a.mark_committed();
    the_b.mark_committed();
    c.mark_committed();

    let qm = QueryModel::new(store, crate::query::match_all(), Sort::Property(Property::Title, true), Limit::None, false).unwrap();
    qm.do_query();
    let pm = PropertyModel::new(Property::Artist);
    pm.bind(qm);

    let keys: Vec<String> = pm.rows().into_iter().skip(1).map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a".to_string(), "c".to_string(), "the b".to_string()]);
  }

  #[test]
  fn sortname_override_reorders_without_changing_display_value() {
    let store = Arc::new(EntryStore::new(Arc::new(crate::types::Registry::new())));
    let song = store.registry().lookup(SONG).unwrap();
    let a = store.entry_new(song.clone(), "file:///a.ogg").unwrap();
    let the_b = store.entry_new(song.clone(), "file:///b.ogg").unwrap();
    let c = store.entry_new(song, "file:///c.ogg").unwrap();
    store.apply_property(&a, Property::Artist, Value::Str(intern("a")));
    store.apply_property(&the_b, Property::Artist, Value::Str(intern("the b")));
    store.apply_property(&c, Property::Artist, Value::Str(intern("c")));
    a.mark_committed();
    the_b.mark_committed();
    c.mark_committed();

    let qm = QueryModel::new(store.clone(), crate::query::match_all(), Sort::Property(Property::Title, true), Limit::None, false).unwrap();
    qm.do_query();
    let pm = PropertyModel::new(Property::Artist);
    pm.bind(qm);

    let keys: Vec<String> = pm.rows().into_iter().skip(1).map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a".to_string(), "c".to_string(), "the b".to_string()]);

    // Giving "the b" an explicit sortname reorders it by that sortname,
    // without touching the artist name shown in the bucket key.
    store.apply_property(&the_b, Property::ArtistSortName, Value::Str(intern("b, the")));
    let keys: Vec<String> = pm.rows().into_iter().skip(1).map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a".to_string(), "the b".to_string(), "c".to_string()]);

    // A later sortname change reorders again.
    store.apply_property(&the_b, Property::ArtistSortName, Value::Str(intern("zzz")));
    let keys: Vec<String> = pm.rows().into_iter().skip(1).map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a".to_string(), "c".to_string(), "the b".to_string()]);
  }
}
