//! The action queue and commit engine.
//!
//! All structural mutation (committing staged property writes, loading and
//! saving the XML file) is serialized through a single writer thread that
//! drains an `Action` channel. Readers never wait on this thread: query
//! evaluation and `entry_get` run directly against the store's lock-free
//! snapshots from whatever thread calls them.
//!
//! Subscribers are held by weak reference: `subscribe` hands the caller an
//! `Arc` and only keeps a `Weak` copy in the db's table, so a dropped model
//! or UI handle stops receiving events without an explicit unsubscribe call.

use crate::{
  entry::Entry,
  error::{Error, Result},
  store::EntryStore,
  types::Registry,
};
use std::{
  path::PathBuf,
  sync::{Arc, Mutex, Weak},
  thread::JoinHandle,
};
use tokio::sync::{mpsc, oneshot};

/// One coalesced property change, as seen by subscribers: `old` is the value
/// before the *first* staged write in this commit, `new` is the value after
/// the *last* one.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
  pub property: crate::property::Property,
  pub old: crate::property::Value,
  pub new: crate::property::Value,
}

#[derive(Debug, Clone)]
pub enum Event {
  EntryAdded(Entry),
  EntryChanged(Entry, Vec<ChangeRecord>),
  EntryDeleted(Entry),
  /// Emitted once per successful commit, after every add/change/delete event
  /// for that commit — one emission per successful commit, not one per
  /// staged write.
  Complete { added: usize, changed: usize, deleted: usize },
}

#[derive(Debug, Default, Clone)]
pub struct CommitReport {
  pub added: usize,
  pub changed: usize,
  pub deleted: usize,
}

enum Action {
  Commit { reply: oneshot::Sender<Result<CommitReport>> },
  LoadFile { path: PathBuf, reply: oneshot::Sender<Result<usize>> },
  SaveFile { path: PathBuf, reply: oneshot::Sender<Result<usize>> },
  Shutdown,
}

type Subscriber = Weak<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Subscribers(Mutex<Vec<Subscriber>>);

impl Subscribers {
  fn notify(&self, event: &Event) {
    let mut guard = self.0.lock().expect("subscriber table poisoned");
    guard.retain(|w| w.upgrade().is_some());
    for w in guard.iter() {
      if let Some(cb) = w.upgrade() {
        cb(event);
      }
    }
  }

  fn add(&self, cb: Subscriber) {
    self.0.lock().expect("subscriber table poisoned").push(cb);
  }
}

/// A subscription handle. Keep it alive for as long as you want events;
/// dropping it lets the weak entry in the db's table expire silently.
pub type Subscription = Arc<dyn Fn(&Event) + Send + Sync>;

/// The top-level database handle: an entry store, a type registry, and a
/// dedicated writer thread serializing commits and file I/O.
pub struct Db {
  store: Arc<EntryStore>,
  subscribers: Arc<Subscribers>,
  tx: mpsc::Sender<Action>,
  writer: Option<JoinHandle<()>>,
}

impl Db {
  pub fn new() -> Self {
    Self::with_registry(Arc::new(Registry::new()))
  }

  pub fn with_registry(registry: Arc<Registry>) -> Self {
    let store = Arc::new(EntryStore::new(registry));
    let subscribers = Arc::new(Subscribers::default());
    let (tx, rx) = mpsc::channel(256);

    let writer_store = store.clone();
    let writer_subs = subscribers.clone();
    let writer = std::thread::Builder::new()
      .name("rhythmdb-writer".into())
      .spawn(move || writer_loop(writer_store, writer_subs, rx))
      .expect("failed to spawn rhythmdb writer thread");

    Db {
      store,
      subscribers,
      tx,
      writer: Some(writer),
    }
  }

  pub fn store(&self) -> &Arc<EntryStore> {
    &self.store
  }

  /// Register a callback. The db keeps only a `Weak` reference; the caller
  /// must hold on to `callback` for as long as it wants events delivered.
  pub fn subscribe(&self, callback: &Subscription) {
    self.subscribers.add(Arc::downgrade(callback) as Weak<dyn Fn(&Event) + Send + Sync>);
  }

  /// Apply every staged `entry_set`/`entry_delete` since the last commit.
  /// Cancellable by dropping the returned future before it resolves; the
  /// writer thread still applies the commit (it is not safely abortable
  /// mid-apply) but the caller simply never observes the result.
  pub async fn commit(&self) -> Result<CommitReport> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Action::Commit { reply })
      .await
      .map_err(|_| Error::Cancelled)?;
    rx.await.map_err(|_| Error::Cancelled)?
  }

  pub async fn load_file(&self, path: impl Into<PathBuf>) -> Result<usize> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Action::LoadFile { path: path.into(), reply })
      .await
      .map_err(|_| Error::Cancelled)?;
    rx.await.map_err(|_| Error::Cancelled)?
  }

  pub async fn save_file(&self, path: impl Into<PathBuf>) -> Result<usize> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Action::SaveFile { path: path.into(), reply })
      .await
      .map_err(|_| Error::Cancelled)?;
    rx.await.map_err(|_| Error::Cancelled)?
  }

  pub async fn shutdown(mut self) {
    let _ = self.tx.send(Action::Shutdown).await;
    if let Some(handle) = self.writer.take() {
      let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }
  }
}

impl Default for Db {
  fn default() -> Self {
    Self::new()
  }
}

fn writer_loop(store: Arc<EntryStore>, subscribers: Arc<Subscribers>, mut rx: mpsc::Receiver<Action>) {
  while let Some(action) = rx.blocking_recv() {
    match action {
      Action::Commit { reply } => {
        let report = process_commit(&store, &subscribers);
        let _ = reply.send(Ok(report));
      }
      Action::LoadFile { path, reply } => {
        let result = crate::persistence::load_into(&store, &subscribers, &path);
        let _ = reply.send(result);
      }
      Action::SaveFile { path, reply } => {
        let result = crate::persistence::save_from(&store, &path);
        let _ = reply.send(result);
      }
      Action::Shutdown => break,
    }
  }
}

/// The commit engine: drain staged changes, apply them to each entry's
/// committed slots, then notify in a fixed order — every addition, then
/// every property change, then every deletion — and finally a single
/// `Complete` summarizing the commit.
///
/// `pub(crate)` so `persistence::load_into` can issue the same per-chunk
/// commits (one per file-worth or per 1000 entries) without going through
/// the action channel it already runs on top of.
pub(crate) fn process_commit(store: &EntryStore, subscribers: &Subscribers) -> CommitReport {
  let pending = store.drain_pending();

  let mut added = Vec::new();
  let mut changed = Vec::new();
  let mut deleted = Vec::new();

  for (id, pending_changes) in pending {
    let Some(entry) = store.lookup_any_by_id(id) else {
      continue;
    };

    if pending_changes.deleted {
      entry.mark_deleted();
      store.remove_from_indices(&entry);
      deleted.push(entry);
      continue;
    }

    let was_committed = entry.is_committed();
    let mut records = Vec::with_capacity(pending_changes.changes.len());
    for (prop, change) in pending_changes.changes {
      store.apply_property(&entry, prop, change.last_new.clone());
      records.push(ChangeRecord {
        property: prop,
        old: change.first_old.unwrap_or(crate::property::Value::Null),
        new: change.last_new,
      });
    }

    if !was_committed {
      entry.mark_committed();
      added.push(entry);
    } else if !records.is_empty() {
      changed.push((entry, records));
    }
  }

  let report = CommitReport {
    added: added.len(),
    changed: changed.len(),
    deleted: deleted.len(),
  };

  for entry in added {
    subscribers.notify(&Event::EntryAdded(entry));
  }
  for (entry, records) in changed {
    subscribers.notify(&Event::EntryChanged(entry, records));
  }
  for entry in deleted {
    subscribers.notify(&Event::EntryDeleted(entry));
  }
  subscribers.notify(&Event::Complete {
    added: report.added,
    changed: report.changed,
    deleted: report.deleted,
  });

  report
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{property::Value, types::SONG};

  #[tokio::test]
  async fn commit_emits_added_then_complete() {
    let db = Db::new();
    let song = db.store().registry().lookup(SONG).unwrap();
    let entry = db.store().entry_new(song, "file:///a.ogg").unwrap();
    db.store()
      .entry_set(&entry, crate::property::Property::Title, Value::Str(crate::atom::intern("Sin")))
      .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let sub: Subscription = Arc::new(move |ev: &Event| {
      seen_clone.lock().unwrap().push(format!("{ev:?}"));
    });
    db.subscribe(&sub);

    let report = db.commit().await.unwrap();
    assert_eq!(report.added, 1);
    assert!(entry.is_committed());
    drop(sub);
  }

  #[tokio::test]
  async fn second_commit_on_unchanged_entry_reports_nothing() {
    let db = Db::new();
    let song = db.store().registry().lookup(SONG).unwrap();
    let entry = db.store().entry_new(song, "file:///a.ogg").unwrap();
    db.commit().await.unwrap();
    let report = db.commit().await.unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.changed, 0);
    let _ = entry;
  }

  #[tokio::test]
  async fn delete_removes_from_location_index_after_commit() {
    let db = Db::new();
    let song = db.store().registry().lookup(SONG).unwrap();
    let entry = db.store().entry_new(song, "file:///a.ogg").unwrap();
    db.commit().await.unwrap();
    assert!(db.store().entry_lookup_by_location("file:///a.ogg").is_some());

    db.store().entry_delete(&entry);
    db.commit().await.unwrap();
    assert!(db.store().entry_lookup_by_location("file:///a.ogg").is_none());
  }
}
