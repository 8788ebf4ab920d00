//! Entry-type registry.
//!
//! Per-entry-type behaviour (creation and teardown hooks) is modeled as a
//! plain struct of callbacks captured by value — a vtable without runtime
//! inheritance — registered under a name in a process-lifetime table, rather
//! than any form of class hierarchy.

use crate::entry::{Entry, Trailer};
use std::{
  collections::HashMap,
  sync::{Arc, RwLock},
};

/// Normal / container / virtual. `Virtual` covers search/placeholder entries
/// such as `podcast-search` that are neither a normal playable entry nor a
/// container grouping other entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Category {
  Normal,
  Container,
  Virtual,
}

/// Callback table for one registered entry kind. Fields default to no-ops;
/// callers only need to supply the hooks their kind actually uses.
pub struct EntryTypeHooks {
  pub entry_created: Option<Box<dyn Fn(&Entry) + Send + Sync>>,
  pub destroy_entry: Option<Box<dyn Fn(&mut Trailer) + Send + Sync>>,
  pub can_sync_metadata: Option<Box<dyn Fn(&Entry) -> bool + Send + Sync>>,
  pub sync_metadata: Option<Box<dyn Fn(&Entry) + Send + Sync>>,
  pub get_playback_uri: Option<Box<dyn Fn(&Entry) -> Option<String> + Send + Sync>>,
  pub create_ext_db_key: Option<Box<dyn Fn(&Entry) -> String + Send + Sync>>,
}

impl Default for EntryTypeHooks {
  fn default() -> Self {
    EntryTypeHooks {
      entry_created: None,
      destroy_entry: None,
      can_sync_metadata: None,
      sync_metadata: None,
      get_playback_uri: None,
      create_ext_db_key: None,
    }
  }
}

pub struct EntryType {
  pub name: String,
  pub persistable: bool,
  pub category: Category,
  /// Bytes reserved for the type-specific trailer; purely advisory, since
  /// the trailer itself is a Rust enum (see `entry::Trailer`) and needs no
  /// preallocated storage.
  pub trailer_size: usize,
  pub persist_keywords: bool,
  pub hooks: EntryTypeHooks,
}

impl EntryType {
  pub fn new(name: impl Into<String>, persistable: bool, category: Category) -> Self {
    EntryType {
      name: name.into(),
      persistable,
      category,
      trailer_size: 0,
      persist_keywords: false,
      hooks: EntryTypeHooks::default(),
    }
  }

  pub fn with_hooks(mut self, hooks: EntryTypeHooks) -> Self {
    self.hooks = hooks;
    self
  }

  pub fn with_trailer_size(mut self, size: usize) -> Self {
    self.trailer_size = size;
    self
  }

  pub fn persist_keywords(mut self, yes: bool) -> Self {
    self.persist_keywords = yes;
    self
  }
}

pub type EntryTypeHandle = Arc<EntryType>;

/// Process-lifetime name -> type table. Builtin types are registered at
/// `Registry::new()`; the registry itself is normally wrapped once in an
/// `Arc` and shared by every `EntryStore`/model that needs to look a type up
/// by name (e.g. during persistence load).
pub struct Registry {
  types: RwLock<HashMap<String, EntryTypeHandle>>,
}

pub const SONG: &str = "song";
pub const IRADIO_STATION: &str = "iradio-station";
pub const PODCAST_POST: &str = "podcast-post";
pub const PODCAST_FEED: &str = "podcast-feed";
pub const PODCAST_SEARCH: &str = "podcast-search";
pub const IGNORE: &str = "ignore";

impl Registry {
  pub fn new() -> Self {
    let registry = Registry {
      types: RwLock::new(HashMap::new()),
    };
    registry.register_builtin();
    registry
  }

  fn register_builtin(&self) {
    let builtins = [
      EntryType::new(SONG, true, Category::Normal),
      EntryType::new(IRADIO_STATION, true, Category::Normal),
      EntryType::new(PODCAST_POST, true, Category::Normal),
      EntryType::new(PODCAST_FEED, true, Category::Container),
      EntryType::new(PODCAST_SEARCH, false, Category::Virtual),
      EntryType::new(IGNORE, true, Category::Normal),
    ];
    let mut guard = self.types.write().expect("registry poisoned");
    for t in builtins {
      guard.insert(t.name.clone(), Arc::new(t));
    }
  }

  /// Register a new entry type. Fails with `Error::Conflict` if the name is
  /// already taken (including by a builtin type).
  pub fn register(&self, entry_type: EntryType) -> crate::error::Result<EntryTypeHandle> {
    let mut guard = self.types.write().expect("registry poisoned");
    if guard.contains_key(&entry_type.name) {
      return Err(crate::error::Error::conflict(format!(
        "entry type '{}' already registered",
        entry_type.name
      )));
    }
    let name = entry_type.name.clone();
    let handle = Arc::new(entry_type);
    guard.insert(name, handle.clone());
    Ok(handle)
  }

  pub fn lookup(&self, name: &str) -> Option<EntryTypeHandle> {
    self.types.read().expect("registry poisoned").get(name).cloned()
  }
}

impl Default for Registry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builtins_are_registered() {
    let r = Registry::new();
    assert!(r.lookup(SONG).is_some());
    assert!(r.lookup(PODCAST_FEED).is_some());
    assert!(r.lookup("no-such-type").is_none());
  }

  #[test]
  fn duplicate_register_is_conflict() {
    let r = Registry::new();
    let err = r.register(EntryType::new(SONG, true, Category::Normal));
    assert!(matches!(err, Err(crate::error::Error::Conflict(_))));
  }

  #[test]
  fn custom_type_registers() {
    let r = Registry::new();
    let handle = r
      .register(EntryType::new("custom-kind", false, Category::Normal))
      .unwrap();
    assert_eq!(handle.name, "custom-kind");
    assert!(r.lookup("custom-kind").is_some());
  }
}
