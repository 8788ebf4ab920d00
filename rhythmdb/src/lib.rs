//! `rhythmdb`: the typed entry database behind a Rhythmbox-style music
//! player.
//!
//! This crate owns exactly one set of concerns: an interned string pool, a typed entry store with an
//! entry-type registry, a single-writer commit engine, a declarative query
//! language, live query and property models, and an XML persistence layer
//! with schema migration. Everything else — playback, device sync, GUI
//! widgets — is a consumer of these contracts, not part of this crate.
//!
//! The top-level handle is [`Db`]; most other modules are reachable only
//! through it or through the types it hands back.

pub mod action;
pub mod atom;
pub mod entry;
pub mod error;
pub mod model;
pub mod persistence;
pub mod property;
pub mod query;
pub mod settings;
pub mod store;
pub mod types;

pub use action::{ChangeRecord, CommitReport, Db, Event, Subscription};
pub use entry::Entry;
pub use error::{Error, Result};
pub use property::{Property, PropertyKind, Value};
pub use types::{Category, EntryType, EntryTypeHandle, EntryTypeHooks, Registry};
