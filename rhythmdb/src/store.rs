//! The entry store: the process's one authoritative table of entries.
//!
//! Reads (`entry_get`, `entry_lookup_by_location`, `entry_lookup_by_id`,
//! `entry_foreach*`) never block: they clone an `Arc<HashMap<..>>` snapshot
//! (a pointer bump under a very briefly held `RwLock`) and then walk that
//! snapshot lock-free. Structural writes (`entry_new`, the delete half of a
//! commit) build a new map from the old one and swap the `Arc` in.
//!
//! Staged property mutations (`entry_set`/`entry_delete`) do *not* touch the
//! entry itself — see `entry.rs`'s module doc — they accumulate in
//! `pending`, a small multi-writer table keyed by entry id, which the commit
//! engine (`action.rs`) drains and applies.

use crate::{
  atom::{intern, Atom},
  entry::{derive_siblings, derive_sortname_override, Entry, EntryInner},
  error::{Error, Result},
  property::{Property, Value},
  types::{EntryTypeHandle, Registry},
};
use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex, RwLock,
  },
};

#[derive(Default, Debug)]
pub(crate) struct PendingChange {
  pub first_old: Option<Value>,
  pub last_new: Value,
}

#[derive(Default, Debug)]
pub(crate) struct PendingEntryChanges {
  pub changes: Vec<(Property, PendingChange)>,
  pub deleted: bool,
}

impl PendingEntryChanges {
  fn stage_set(&mut self, prop: Property, old: Value, new: Value) {
    if let Some((_, existing)) = self.changes.iter_mut().find(|(p, _)| *p == prop) {
      existing.last_new = new;
    } else {
      self.changes.push((
        prop,
        PendingChange {
          first_old: Some(old),
          last_new: new,
        },
      ));
    }
  }
}

pub struct EntryStore {
  registry: Arc<Registry>,
  next_id: AtomicU32,
  by_location: RwLock<Arc<HashMap<Atom, Entry>>>,
  by_id: RwLock<Arc<HashMap<u32, Entry>>>,
  pub(crate) pending: Mutex<HashMap<u32, PendingEntryChanges>>,
}

impl EntryStore {
  pub fn new(registry: Arc<Registry>) -> Self {
    EntryStore {
      registry,
      next_id: AtomicU32::new(1),
      by_location: RwLock::new(Arc::new(HashMap::new())),
      by_id: RwLock::new(Arc::new(HashMap::new())),
      pending: Mutex::new(HashMap::new()),
    }
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  /// Create a new entry at `location` under `entry_type`. Fails with
  /// `Error::Conflict` if the location is already taken by a live entry.
  /// The entry is reachable via `entry_lookup_by_id` right away (ids are
  /// bookkeeping, not query state) but `entry_lookup_by_location` and every
  /// query model will not see it until the next successful `commit`.
  #[tracing::instrument(skip(self, entry_type))]
  pub fn entry_new(&self, entry_type: EntryTypeHandle, location: &str) -> Result<Entry> {
    let location_atom = intern(location);

    {
      let map = self.by_location.read().expect("store poisoned");
      if map.contains_key(&location_atom) {
        return Err(Error::conflict(format!("location '{location}' already exists")));
      }
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let entry = EntryInner::new(id, location_atom.clone(), entry_type.clone());

    if let Some(hook) = &entry_type.hooks.entry_created {
      hook(&entry);
    }

    {
      let mut map = self.by_location.write().expect("store poisoned");
      let mut next = HashMap::clone(&map);
      next.insert(location_atom, entry.clone());
      *map = Arc::new(next);
    }
    {
      let mut map = self.by_id.write().expect("store poisoned");
      let mut next = HashMap::clone(&map);
      next.insert(id, entry.clone());
      *map = Arc::new(next);
    }

    Ok(entry)
  }

  pub fn entry_lookup_by_location(&self, location: &str) -> Option<Entry> {
    let map = self.by_location.read().expect("store poisoned").clone();
    map.get(&intern(location))
      .filter(|e| e.is_committed() && !e.is_deleted())
      .cloned()
  }

  pub fn entry_lookup_by_id(&self, id: u32) -> Option<Entry> {
    let map = self.by_id.read().expect("store poisoned").clone();
    map.get(&id).filter(|e| !e.is_deleted()).cloned()
  }

  pub fn entry_foreach(&self, mut f: impl FnMut(&Entry)) {
    let map = self.by_location.read().expect("store poisoned").clone();
    for entry in map.values() {
      if entry.is_committed() && !entry.is_deleted() {
        f(entry);
      }
    }
  }

  pub fn entry_foreach_by_type(&self, entry_type: &str, mut f: impl FnMut(&Entry)) {
    self.entry_foreach(|e| {
      if e.entry_type().name == entry_type {
        f(e)
      }
    });
  }

  pub fn entry_get(&self, entry: &Entry, prop: Property) -> Value {
    entry.get(prop)
  }

  /// Stage a property write. Visible only after the next `commit`. Rejects
  /// writes to derived properties (they are maintained automatically) and
  /// writes whose value doesn't match the property's declared kind.
  pub fn entry_set(&self, entry: &Entry, prop: Property, value: Value) -> Result<()> {
    if entry.is_deleted() {
      return Err(Error::invalid("cannot set a property on a deleted entry"));
    }
    if prop.is_derived() {
      return Err(Error::invalid(format!("{:?} is a derived property and cannot be set directly", prop)));
    }
    if !value.kind_matches(prop.kind()) {
      return Err(Error::invalid(format!("value does not match the declared kind of {:?}", prop)));
    }

    let old = entry.get(prop);
    let mut pending = self.pending.lock().expect("store poisoned");
    pending.entry(entry.id()).or_default().stage_set(prop, old, value);
    Ok(())
  }

  /// Stage a deletion. The entry remains findable until the next `commit`.
  pub fn entry_delete(&self, entry: &Entry) {
    let mut pending = self.pending.lock().expect("store poisoned");
    pending.entry(entry.id()).or_default().deleted = true;
  }

  pub fn entry_keyword_add(&self, entry: &Entry, keyword: &str) {
    entry.keyword_add(intern(keyword));
  }

  pub fn entry_keyword_remove(&self, entry: &Entry, keyword: &str) {
    entry.keyword_remove(&intern(keyword));
  }

  pub fn entry_keyword_has(&self, entry: &Entry, keyword: &str) -> bool {
    entry.keyword_has(&intern(keyword))
  }

  pub fn entry_keyword_list(&self, entry: &Entry) -> Vec<Atom> {
    entry.keyword_list()
  }

  // --- internals used by the commit engine (action.rs) ---

  pub(crate) fn apply_property(&self, entry: &Entry, prop: Property, value: Value) {
    entry.set_slot(prop, value.clone());
    for (sib_prop, sib_value) in derive_siblings(prop, &value) {
      entry.set_slot(sib_prop, sib_value);
    }
    if let Some(sortname_prop) = prop.sortname_sibling() {
      // setting the display property itself does not override an existing
      // sortname-derived sort key; only an explicit sortname write does.
      let _ = sortname_prop;
    }
    if let Some((sort_prop, sort_value)) = derive_sortname_override(prop, &value) {
      entry.set_slot(sort_prop, sort_value);
    }
  }

  pub(crate) fn remove_from_indices(&self, entry: &Entry) {
    {
      let mut map = self.by_location.write().expect("store poisoned");
      let mut next = HashMap::clone(&map);
      next.remove(&entry.location());
      *map = Arc::new(next);
    }
    {
      let mut map = self.by_id.write().expect("store poisoned");
      let mut next = HashMap::clone(&map);
      next.remove(&entry.id());
      *map = Arc::new(next);
    }
  }

  /// Discard an entry created via `entry_new` that turned out to be
  /// unloadable (a schema error elsewhere in the same `<entry>` element —
  /// that entry only is dropped, the rest of the load continues). Only valid
  /// before the entry's first commit; never notifies subscribers.
  pub(crate) fn discard_uncommitted(&self, entry: &Entry) {
    entry.mark_deleted();
    self.remove_from_indices(entry);
    self.pending.lock().expect("store poisoned").remove(&entry.id());
  }

  pub(crate) fn drain_pending(&self) -> HashMap<u32, PendingEntryChanges> {
    std::mem::take(&mut *self.pending.lock().expect("store poisoned"))
  }

  pub(crate) fn lookup_any_by_id(&self, id: u32) -> Option<Entry> {
    self.by_id.read().expect("store poisoned").get(&id).cloned()
  }

  pub fn len(&self) -> usize {
    self
      .by_location
      .read()
      .expect("store poisoned")
      .values()
      .filter(|e| e.is_committed() && !e.is_deleted())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::SONG;

  fn store() -> EntryStore {
    EntryStore::new(Arc::new(Registry::new()))
  }

  #[test]
  fn new_entry_conflicts_on_duplicate_location() {
    let s = store();
    let song = s.registry().lookup(SONG).unwrap();
    s.entry_new(song.clone(), "file:///a.ogg").unwrap();
    let err = s.entry_new(song, "file:///a.ogg");
    assert!(matches!(err, Err(Error::Conflict(_))));
  }

  #[test]
  fn uncommitted_entry_is_not_visible_by_location() {
    let s = store();
    let song = s.registry().lookup(SONG).unwrap();
    s.entry_new(song, "file:///a.ogg").unwrap();
    assert!(s.entry_lookup_by_location("file:///a.ogg").is_none());
  }

  #[test]
  fn entry_new_is_visible_by_id_immediately() {
    let s = store();
    let song = s.registry().lookup(SONG).unwrap();
    let e = s.entry_new(song, "file:///a.ogg").unwrap();
    assert!(s.entry_lookup_by_id(e.id()).is_some());
  }

  #[test]
  fn set_derived_property_is_rejected() {
    let s = store();
    let song = s.registry().lookup(SONG).unwrap();
    let e = s.entry_new(song, "file:///a.ogg").unwrap();
    let err = s.entry_set(&e, Property::TitleFolded, Value::Str(intern("x")));
    assert!(matches!(err, Err(Error::Invalid(_))));
  }

  #[test]
  fn set_wrong_kind_is_rejected() {
    let s = store();
    let song = s.registry().lookup(SONG).unwrap();
    let e = s.entry_new(song, "file:///a.ogg").unwrap();
    let err = s.entry_set(&e, Property::Title, Value::ULong(5));
    assert!(matches!(err, Err(Error::Invalid(_))));
  }
}
