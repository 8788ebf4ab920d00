//! Error taxonomy for the entry database.
//!
//! Kept deliberately small and `thiserror`-based rather than reaching for an
//! application diagnostics crate: this is a library, and the caller (a GUI
//! shell, a sync daemon, a test harness) should decide how to render these.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Duplicate location on `entry_new`, or duplicate type name on register.
  #[error("conflict: {0}")]
  Conflict(String),

  /// Lookup by location/id/name returned nothing.
  #[error("not found: {0}")]
  NotFound(String),

  /// Query referenced an unknown property, a value type mismatch on set, or a
  /// sort on a non-comparable property.
  #[error("invalid: {0}")]
  Invalid(String),

  /// Persistence-only: malformed XML.
  #[error("parse error at {line}:{col}: {message}")]
  ParseError {
    line: u64,
    col: u64,
    message: String,
  },

  /// Persistence-only: I/O failure.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A long-running action was cancelled via its result sink being dropped.
  #[error("cancelled")]
  Cancelled,
}

impl Error {
  pub fn invalid(msg: impl fmt::Display) -> Self {
    Error::Invalid(msg.to_string())
  }

  pub fn conflict(msg: impl fmt::Display) -> Self {
    Error::Conflict(msg.to_string())
  }

  pub fn not_found(msg: impl fmt::Display) -> Self {
    Error::NotFound(msg.to_string())
  }
}
