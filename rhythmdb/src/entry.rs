//! The entry record and its lifecycle.
//!
//! Staged mutations live off the entry entirely (see `store.rs`'s `pending`
//! table), which keeps the entry immutable between commits and permits
//! lock-free reads. What lives *on* the entry is exactly the
//! already-committed state, each property in its own slot, plus the one
//! genuinely immediate, unstaged piece of state: the keyword set, guarded by
//! a `Mutex` (Rust has no public spinlock in `std`).

use crate::{
  atom::Atom,
  property::{Property, Value},
  types::EntryTypeHandle,
};
use std::{
  collections::HashSet,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
  },
};

/// Variable-size type-specific trailer. Podcast feed/post entries use
/// `Podcast`; every other builtin type carries `None`.
#[derive(Debug, Clone, Default)]
pub enum Trailer {
  #[default]
  None,
  Podcast(PodcastTrailer),
}

#[derive(Debug, Clone, Default)]
pub struct PodcastTrailer {
  pub feed_location: Option<Atom>,
  pub status: Option<u64>,
}

const NUM_PROPERTIES: usize = Property::ALL.len();

fn property_index(p: Property) -> usize {
  Property::ALL.iter().position(|x| *x == p).expect("exhaustive Property::ALL")
}

pub struct EntryInner {
  id: u32,
  location: RwLock<Atom>,
  entry_type: EntryTypeHandle,
  slots: Box<[RwLock<Value>; NUM_PROPERTIES]>,
  trailer: RwLock<Trailer>,
  keywords: std::sync::Mutex<HashSet<Atom>>,
  deleted: AtomicBool,
  /// Set once this entry has survived its first `commit`. Not visible to
  /// queries until then.
  committed: AtomicBool,
}

pub type Entry = Arc<EntryInner>;

impl EntryInner {
  pub(crate) fn new(id: u32, location: Atom, entry_type: EntryTypeHandle) -> Entry {
    let slots: Vec<RwLock<Value>> = (0..NUM_PROPERTIES).map(|_| RwLock::new(Value::Null)).collect();
    let inner = EntryInner {
      id,
      location: RwLock::new(location.clone()),
      entry_type,
      slots: slots.into_boxed_slice().try_into().unwrap_or_else(|_| unreachable!()),
      trailer: RwLock::new(Trailer::None),
      keywords: std::sync::Mutex::new(HashSet::new()),
      deleted: AtomicBool::new(false),
      committed: AtomicBool::new(false),
    };
    inner.set_slot(Property::Location, Value::Str(location));
    Arc::new(inner)
  }

  pub fn id(&self) -> u32 {
    self.id
  }

  pub fn entry_type(&self) -> &EntryTypeHandle {
    &self.entry_type
  }

  pub fn location(&self) -> Atom {
    self.location.read().expect("entry poisoned").clone()
  }

  pub(crate) fn set_location(&self, new_location: Atom) {
    *self.location.write().expect("entry poisoned") = new_location;
  }

  /// Read-only accessor. No write lock is ever taken on this path; string
  /// atoms are read via a brief read-lock on the slot.
  pub fn get(&self, prop: Property) -> Value {
    self.slots[property_index(prop)].read().expect("entry poisoned").clone()
  }

  pub(crate) fn set_slot(&self, prop: Property, value: Value) {
    *self.slots[property_index(prop)].write().expect("entry poisoned") = value;
  }

  pub fn is_deleted(&self) -> bool {
    self.deleted.load(Ordering::Acquire)
  }

  pub(crate) fn mark_deleted(&self) {
    self.deleted.store(true, Ordering::Release);
  }

  pub fn is_committed(&self) -> bool {
    self.committed.load(Ordering::Acquire)
  }

  pub(crate) fn mark_committed(&self) {
    self.committed.store(true, Ordering::Release);
  }

  pub fn is_hidden(&self) -> bool {
    self.get(Property::Hidden).as_bool().unwrap_or(false)
  }

  pub fn trailer(&self) -> Trailer {
    self.trailer.read().expect("entry poisoned").clone()
  }

  pub(crate) fn set_trailer(&self, trailer: Trailer) {
    *self.trailer.write().expect("entry poisoned") = trailer;
  }

  // --- keywords: immediate, not staged ---

  pub fn keyword_add(&self, kw: Atom) {
    self.keywords.lock().expect("entry poisoned").insert(kw);
  }

  pub fn keyword_remove(&self, kw: &Atom) {
    self.keywords.lock().expect("entry poisoned").remove(kw);
  }

  pub fn keyword_has(&self, kw: &Atom) -> bool {
    self.keywords.lock().expect("entry poisoned").contains(kw)
  }

  pub fn keyword_list(&self) -> Vec<Atom> {
    self.keywords.lock().expect("entry poisoned").iter().cloned().collect()
  }
}

impl Drop for EntryInner {
  fn drop(&mut self) {
    if let Some(hook) = &self.entry_type.hooks.destroy_entry {
      let mut trailer = self.trailer.write().expect("entry poisoned");
      hook(&mut trailer);
    }
  }
}

/// Applies the automatic-derived-sibling rule to a single `entry_set`.
/// Returns the list of `(property, value)` pairs that should additionally be
/// written as a result of setting `prop` to `value`.
pub fn derive_siblings(prop: Property, value: &Value) -> Vec<(Property, Value)> {
  let mut out = Vec::new();
  if let Some(text) = value.as_str() {
    if let Some(folded_prop) = prop.folded_sibling() {
      out.push((folded_prop, Value::Str(crate::atom::intern(&text.to_lowercase()))));
    }
    if let Some(sort_prop) = prop.sort_key_sibling() {
      let atom = value.as_atom().expect("string property carries an atom");
      out.push((sort_prop, Value::Str(crate::atom::intern(atom.sort_key()))));
    }
  }
  if let Value::Timestamp(ts) = value {
    if let Some(str_prop) = prop.timestamp_str_sibling() {
      out.push((str_prop, Value::Str(crate::atom::intern(&format_timestamp(*ts)))));
    }
  }
  out
}

/// When a `*_SORTNAME` property is set, the paired display property's sort
/// key must be recomputed from the sortname rather than the display value
/// itself: renaming "the b"'s sortname to "b, the" reorders it without
/// changing its displayed artist name.
pub fn derive_sortname_override(sortname_prop: Property, value: &Value) -> Option<(Property, Value)> {
  let display_prop = sortname_prop.paired_display()?;
  let sort_prop = display_prop.sort_key_sibling()?;
  let text = value.as_str()?;
  Some((sort_prop, Value::Str(crate::atom::intern(&fold_sort_key(text)))))
}

fn fold_sort_key(raw: &str) -> String {
  let folded = raw.to_lowercase();
  for article in ["the ", "a ", "an "] {
    if let Some(rest) = folded.strip_prefix(article) {
      return rest.to_string();
    }
  }
  folded
}

/// Locale-formatted sibling for a timestamp property: timestamps
/// additionally expose a human-readable string form. Delegates to the same
/// `HumanDate` trait a player UI would use to render "last played" and
/// "first seen" columns, so the two never drift apart.
fn format_timestamp(ts: i64) -> String {
  use chrono::{TimeZone, Utc};
  use humandate::HumanDate;
  match Utc.timestamp_opt(ts, 0) {
    chrono::LocalResult::Single(dt) => dt.format_from_now(),
    _ => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Category, EntryType};

  fn test_entry() -> Entry {
    let et = Arc::new(EntryType::new("song", true, Category::Normal));
    EntryInner::new(1, crate::atom::intern("file:///a.ogg"), et)
  }

  #[test]
  fn get_set_roundtrip() {
    let e = test_entry();
    e.set_slot(Property::Title, Value::Str(crate::atom::intern("Sin")));
    assert_eq!(e.get(Property::Title).as_str(), Some("Sin"));
  }

  #[test]
  fn derive_title_siblings() {
    let siblings = derive_siblings(Property::Title, &Value::Str(crate::atom::intern("FOO")));
    let folded = siblings.iter().find(|(p, _)| *p == Property::TitleFolded).unwrap();
    assert_eq!(folded.1.as_str(), Some("foo"));
    let sort = siblings.iter().find(|(p, _)| *p == Property::TitleSortKey).unwrap();
    assert!(!sort.1.as_str().unwrap().is_empty());
  }

  #[test]
  fn sortname_overrides_sort_key_not_display() {
    let (prop, value) =
      derive_sortname_override(Property::ArtistSortName, &Value::Str(crate::atom::intern("b, the"))).unwrap();
    assert_eq!(prop, Property::ArtistSortKey);
    assert_eq!(value.as_str(), Some("b, the"));
  }
}
