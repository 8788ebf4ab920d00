//! Process-wide interned string pool.
//!
//! Every string-valued property is stored as an [`Atom`]: an immutable,
//! reference-counted byte string with its case-folded form and collation sort
//! key computed once at creation and cached for the atom's lifetime. Atoms
//! compare by pointer identity (`Arc::ptr_eq`), so two entries that share a
//! value share storage.

use std::{
  collections::HashMap,
  fmt,
  hash::{Hash, Hasher},
  sync::{Arc, Mutex, OnceLock, Weak},
};

struct AtomInner {
  raw: Box<str>,
  folded: Box<str>,
  sort_key: Box<str>,
}

/// An interned, immutable string. Cheap to clone (`Arc` bump); equality and
/// hashing are by pointer identity, not content, so `Atom`s are only ever
/// compared meaningfully against other `Atom`s produced by the same pool.
#[derive(Clone)]
pub struct Atom(Arc<AtomInner>);

impl Atom {
  pub fn as_str(&self) -> &str {
    &self.0.raw
  }

  pub fn folded(&self) -> &str {
    &self.0.folded
  }

  pub fn sort_key(&self) -> &str {
    &self.0.sort_key
  }

  pub fn is_empty(&self) -> bool {
    self.0.raw.is_empty()
  }

  fn ptr(&self) -> *const AtomInner {
    Arc::as_ptr(&self.0)
  }
}

impl PartialEq for Atom {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}
impl Eq for Atom {}

impl Hash for Atom {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.ptr().hash(state)
  }
}

impl fmt::Debug for Atom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Atom({:?})", self.as_str())
  }
}

impl fmt::Display for Atom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Case-fold a string the way the search index expects: lowercase, with
/// diacritics left in place. A full Unicode normalisation pass is out of
/// scope for this crate; `to_lowercase` covers the common Latin-script case.
fn fold(raw: &str) -> String {
  raw.to_lowercase()
}

/// Collation sort key: the folded form, by value. Leading-article reshuffling
/// ("The B" sorting as "B") is not part of the default sort key — it only
/// happens when a caller explicitly sets a `*_SORTNAME` override (see
/// `entry::derive_sortname_override`); a plain artist/album/title sorts by
/// its own literal text.
fn sort_key(raw: &str) -> String {
  fold(raw)
}

struct Pool {
  by_bytes: HashMap<Box<str>, Weak<AtomInner>>,
  by_folded: HashMap<Box<str>, Vec<Weak<AtomInner>>>,
}

impl Pool {
  fn new() -> Self {
    Pool {
      by_bytes: HashMap::new(),
      by_folded: HashMap::new(),
    }
  }
}

fn pool() -> &'static Mutex<Pool> {
  static POOL: OnceLock<Mutex<Pool>> = OnceLock::new();
  POOL.get_or_init(|| Mutex::new(Pool::new()))
}

/// Intern `raw`, returning the shared [`Atom`]. Creates a new atom (computing
/// its folded form and sort key once) if no live atom for this value exists.
pub fn intern(raw: &str) -> Atom {
  let mut guard = pool().lock().expect("atom pool poisoned");

  if let Some(weak) = guard.by_bytes.get(raw) {
    if let Some(arc) = weak.upgrade() {
      return Atom(arc);
    }
  }

  let folded = fold(raw);
  let inner = Arc::new(AtomInner {
    raw: raw.into(),
    folded: folded.clone().into_boxed_str(),
    sort_key: sort_key(raw).into_boxed_str(),
  });

  guard
    .by_bytes
    .insert(raw.into(), Arc::downgrade(&inner));
  guard
    .by_folded
    .entry(folded.into_boxed_str())
    .or_default()
    .push(Arc::downgrade(&inner));

  Atom(inner)
}

/// All currently-live atoms whose folded form equals `folded_needle`. Used by
/// the search-match synthetic property's reverse lookup.
pub fn lookup_by_folded(folded_needle: &str) -> Vec<Atom> {
  let guard = pool().lock().expect("atom pool poisoned");
  match guard.by_folded.get(folded_needle) {
    Some(weaks) => weaks.iter().filter_map(|w| w.upgrade().map(Atom)).collect(),
    None => Vec::new(),
  }
}

/// Sweep dead (refcount-zero) slots out of the pool's lookup tables. Atoms
/// free themselves when their last `Arc` drops regardless; this just keeps
/// the `HashMap`s from accumulating stale `Weak` entries during a long load.
pub fn gc_dead_atoms() {
  let mut guard = pool().lock().expect("atom pool poisoned");
  guard.by_bytes.retain(|_, w| w.strong_count() > 0);
  for v in guard.by_folded.values_mut() {
    v.retain(|w| w.strong_count() > 0);
  }
  guard.by_folded.retain(|_, v| !v.is_empty());
}

#[cfg(test)]
pub(crate) fn pool_len() -> usize {
  pool().lock().expect("atom pool poisoned").by_bytes.len()
}
