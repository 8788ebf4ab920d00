//! Property identifiers and the typed value each one holds.
//!
//! A flat, closed enumeration rather than an open string-keyed bag, so every
//! get/set is a single match away from its storage slot and the compiler
//! catches property/type mismatches statically instead of at runtime.

use crate::atom::Atom;
use std::fmt;

/// Every entry property. Ordering here is also the deterministic order used
/// when serialising an entry to XML.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Property {
  Location,
  Title,
  TitleFolded,
  TitleSortKey,
  Genre,
  GenreFolded,
  GenreSortKey,
  Artist,
  ArtistFolded,
  ArtistSortKey,
  ArtistSortName,
  Album,
  AlbumFolded,
  AlbumSortKey,
  AlbumSortName,
  TrackNumber,
  DiscNumber,
  Duration,
  FileSize,
  Bitrate,
  Date,
  LastPlayed,
  LastPlayedStr,
  PlayCount,
  Rating,
  Hidden,
  SearchMatch,
  MimeType,
  MountPoint,
  StreamTitle,
  StreamArtist,
  StreamAlbum,
  PodcastSubtitle,
  PodcastGuid,
  Comment,
  Composer,
  ComposerFolded,
  ComposerSortKey,
  FileDescription,
}

/// The kind of storage a property occupies. Used by the query engine and the
/// models to decide how to compare/sort values, and by `entry_set` to reject
/// type mismatches as `Error::Invalid`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyKind {
  String,
  ULong,
  Double,
  Boolean,
  Timestamp,
  FileSize,
}

impl Property {
  pub const ALL: &'static [Property] = &[
    Property::Location,
    Property::Title,
    Property::TitleFolded,
    Property::TitleSortKey,
    Property::Genre,
    Property::GenreFolded,
    Property::GenreSortKey,
    Property::Artist,
    Property::ArtistFolded,
    Property::ArtistSortKey,
    Property::ArtistSortName,
    Property::Album,
    Property::AlbumFolded,
    Property::AlbumSortKey,
    Property::AlbumSortName,
    Property::TrackNumber,
    Property::DiscNumber,
    Property::Duration,
    Property::FileSize,
    Property::Bitrate,
    Property::Date,
    Property::LastPlayed,
    Property::LastPlayedStr,
    Property::PlayCount,
    Property::Rating,
    Property::Hidden,
    Property::SearchMatch,
    Property::MimeType,
    Property::MountPoint,
    Property::StreamTitle,
    Property::StreamArtist,
    Property::StreamAlbum,
    Property::PodcastSubtitle,
    Property::PodcastGuid,
    Property::Comment,
    Property::Composer,
    Property::ComposerFolded,
    Property::ComposerSortKey,
    Property::FileDescription,
  ];

  /// The on-disk / wire name: the XML leaf element name for this property.
  pub fn name(self) -> &'static str {
    use Property::*;
    match self {
      Location => "location",
      Title => "title",
      TitleFolded => "title-folded",
      TitleSortKey => "title-sort-key",
      Genre => "genre",
      GenreFolded => "genre-folded",
      GenreSortKey => "genre-sort-key",
      Artist => "artist",
      ArtistFolded => "artist-folded",
      ArtistSortKey => "artist-sort-key",
      ArtistSortName => "artist-sortname",
      Album => "album",
      AlbumFolded => "album-folded",
      AlbumSortKey => "album-sort-key",
      AlbumSortName => "album-sortname",
      TrackNumber => "track-number",
      DiscNumber => "disc-number",
      Duration => "duration",
      FileSize => "file-size",
      Bitrate => "bitrate",
      Date => "date",
      LastPlayed => "last-played",
      LastPlayedStr => "last-played-str",
      PlayCount => "play-count",
      Rating => "rating",
      Hidden => "hidden",
      SearchMatch => "search-match",
      MimeType => "mime-type",
      MountPoint => "mountpoint",
      StreamTitle => "stream-title",
      StreamArtist => "stream-artist",
      StreamAlbum => "stream-album",
      PodcastSubtitle => "subtitle",
      PodcastGuid => "guid",
      Comment => "comment",
      Composer => "composer",
      ComposerFolded => "composer-folded",
      ComposerSortKey => "composer-sort-key",
      FileDescription => "description",
    }
  }

  pub fn from_name(name: &str) -> Option<Property> {
    Self::ALL.iter().copied().find(|p| p.name() == name)
  }

  pub fn kind(self) -> PropertyKind {
    use Property::*;
    match self {
      Location | Title | Genre | Artist | Album | MimeType | MountPoint | StreamTitle
      | StreamArtist | StreamAlbum | PodcastSubtitle | PodcastGuid | Comment | Composer
      | FileDescription | ArtistSortName | AlbumSortName => PropertyKind::String,
      TitleFolded | TitleSortKey | GenreFolded | GenreSortKey | ArtistFolded | ArtistSortKey
      | AlbumFolded | AlbumSortKey | ComposerFolded | ComposerSortKey | LastPlayedStr
      | SearchMatch => PropertyKind::String,
      TrackNumber | DiscNumber | Bitrate | Date | PlayCount => PropertyKind::ULong,
      Duration => PropertyKind::ULong,
      FileSize => PropertyKind::FileSize,
      LastPlayed => PropertyKind::Timestamp,
      Rating => PropertyKind::Double,
      Hidden => PropertyKind::Boolean,
    }
  }

  /// Whether this property is derived (automatically maintained from another
  /// property) and therefore never staged directly by a caller, and never
  /// emitted to disk on its own.
  pub fn is_derived(self) -> bool {
    use Property::*;
    matches!(
      self,
      TitleFolded
        | TitleSortKey
        | GenreFolded
        | GenreSortKey
        | ArtistFolded
        | ArtistSortKey
        | AlbumFolded
        | AlbumSortKey
        | ComposerFolded
        | ComposerSortKey
        | LastPlayedStr
        | SearchMatch
    )
  }

  /// For a display string property, its folded sibling; for a sortname
  /// property, the display property whose sort key it feeds.
  pub fn folded_sibling(self) -> Option<Property> {
    use Property::*;
    match self {
      Title => Some(TitleFolded),
      Genre => Some(GenreFolded),
      Artist => Some(ArtistFolded),
      Album => Some(AlbumFolded),
      Composer => Some(ComposerFolded),
      _ => None,
    }
  }

  pub fn sort_key_sibling(self) -> Option<Property> {
    use Property::*;
    match self {
      Title => Some(TitleSortKey),
      Genre => Some(GenreSortKey),
      Artist => Some(ArtistSortKey),
      Album => Some(AlbumSortKey),
      Composer => Some(ComposerSortKey),
      _ => None,
    }
  }

  /// For a `*_SORTNAME` property, the display property whose sort key it
  /// overrides: every `*_SORTNAME` property participates in the sort-key
  /// derivation for its paired display property.
  pub fn paired_display(self) -> Option<Property> {
    match self {
      Property::ArtistSortName => Some(Property::Artist),
      Property::AlbumSortName => Some(Property::Album),
      _ => None,
    }
  }

  pub fn sortname_sibling(self) -> Option<Property> {
    match self {
      Property::Artist => Some(Property::ArtistSortName),
      Property::Album => Some(Property::AlbumSortName),
      _ => None,
    }
  }

  pub fn timestamp_str_sibling(self) -> Option<Property> {
    match self {
      Property::LastPlayed => Some(Property::LastPlayedStr),
      _ => None,
    }
  }
}

/// A typed property value. `Value::Atom` backs every string-kinded property;
/// other variants are plain Rust scalars.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
  Str(Atom),
  ULong(u64),
  Double(f64),
  Bool(bool),
  Timestamp(i64),
  FileSize(u64),
  Null,
}

impl Value {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(a) => Some(a.as_str()),
      _ => None,
    }
  }

  pub fn as_atom(&self) -> Option<&Atom> {
    match self {
      Value::Str(a) => Some(a),
      _ => None,
    }
  }

  pub fn as_ulong(&self) -> Option<u64> {
    match self {
      Value::ULong(v) | Value::FileSize(v) => Some(*v),
      Value::Timestamp(v) => Some(*v as u64),
      _ => None,
    }
  }

  pub fn as_double(&self) -> Option<f64> {
    match self {
      Value::Double(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(v) => Some(*v),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn kind_matches(&self, kind: PropertyKind) -> bool {
    matches!(
      (self, kind),
      (Value::Str(_), PropertyKind::String)
        | (Value::ULong(_), PropertyKind::ULong)
        | (Value::Double(_), PropertyKind::Double)
        | (Value::Bool(_), PropertyKind::Boolean)
        | (Value::Timestamp(_), PropertyKind::Timestamp)
        | (Value::FileSize(_), PropertyKind::FileSize)
        | (Value::Null, _)
    )
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Str(a) => f.write_str(a.as_str()),
      Value::ULong(v) => write!(f, "{v}"),
      Value::Double(v) => write!(f, "{v}"),
      Value::Bool(v) => write!(f, "{}", if *v { 1 } else { 0 }),
      Value::Timestamp(v) => write!(f, "{v}"),
      Value::FileSize(v) => write!(f, "{v}"),
      Value::Null => Ok(()),
    }
  }
}
