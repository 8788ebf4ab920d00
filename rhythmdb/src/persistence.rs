//! XML persistence: a single `<rhythmdb version="...">` document, one
//! `<entry type="...">` per persistable entry, one leaf element per
//! non-default, non-derived property.
//!
//! Load runs a SAX-style streaming parse so memory stays bounded regardless
//! of library size: entries are staged through the normal `entry_new`/
//! `entry_set` path and a chunked commit is issued every 1000 entries (or
//! once at end of file, whichever comes first). Save drains every
//! persistable entry, writes a temp file in the target directory, fsyncs,
//! and renames it into place atomically.

use crate::{
  action::{process_commit, Subscribers},
  atom::intern,
  entry::Entry,
  error::{Error, Result},
  property::{Property, PropertyKind, Value},
  store::EntryStore,
  types,
};
use quick_xml::{
  events::{BytesEnd, BytesStart, BytesText, Event},
  Reader, Writer,
};
use std::{
  fs::File,
  io::{BufRead, BufReader, BufWriter, Write},
  path::Path,
};

/// The on-disk format version this crate writes. Files at a lower version
/// are migrated in place during load.
pub const CURRENT_VERSION: u32 = 2;

const CHUNK_SIZE: usize = 1000;

/// One migration step, run against a freshly-parsed entry's raw
/// `(location, properties)` before `entry_new` is called for it.
/// `applies_below` gates the step to files whose `version` attribute is
/// strictly less than this value.
pub struct Migration {
  pub name: &'static str,
  pub applies_below: u32,
  pub run: fn(entry_type: &str, location: &mut String, props: &mut Vec<(String, String)>),
}

pub const MIGRATIONS: &[Migration] = &[Migration {
  name: "podcast-location-mountpoint-split",
  applies_below: 2,
  run: migrate_podcast_location_split,
}];

/// Versions before 2 stored a podcast entry's location as
/// `"<local path>|<feed url>"`, conflating the on-disk file with the remote
/// mountpoint. This splits them into `location` (local path) and
/// `mountpoint` (remote URL).
fn migrate_podcast_location_split(entry_type: &str, location: &mut String, props: &mut Vec<(String, String)>) {
  if entry_type != types::PODCAST_POST && entry_type != types::PODCAST_FEED {
    return;
  }
  if let Some((local, remote)) = location.clone().split_once('|') {
    props.push(("mountpoint".to_string(), remote.to_string()));
    *location = local.to_string();
  }
}

fn parse_value_for_kind(kind: PropertyKind, text: &str) -> Result<Value> {
  Ok(match kind {
    PropertyKind::String => Value::Str(intern(text)),
    PropertyKind::ULong => Value::ULong(text.parse().map_err(|_| Error::invalid(format!("bad ulong '{text}'")))?),
    PropertyKind::FileSize => {
      Value::FileSize(text.parse().map_err(|_| Error::invalid(format!("bad file size '{text}'")))?)
    }
    PropertyKind::Timestamp => {
      Value::Timestamp(text.parse().map_err(|_| Error::invalid(format!("bad timestamp '{text}'")))?)
    }
    PropertyKind::Double => Value::Double(text.parse().map_err(|_| Error::invalid(format!("bad double '{text}'")))?),
    PropertyKind::Boolean => Value::Bool(text == "1"),
  })
}

/// Load `path` into `store`, committing every [`CHUNK_SIZE`] entries (or
/// once at EOF) and notifying `subscribers` for each chunk. Returns the
/// number of entries successfully loaded.
pub(crate) fn load_into(store: &EntryStore, subscribers: &Subscribers, path: &Path) -> Result<usize> {
  let file = File::open(path)?;
  let mut reader = Reader::from_reader(BufReader::new(file));
  let mut buf = Vec::new();

  let file_version = read_root_version(&mut reader, &mut buf)?;

  let mut loaded = 0usize;
  let mut since_commit = 0usize;

  loop {
    buf.clear();
    match reader.read_event_into(&mut buf).map_err(|e| xml_error(&reader, e))? {
      Event::Start(start) if local_name(&start) == "entry" => {
        let entry_type_name = attr(&start, "type")
          .ok_or_else(|| Error::invalid("<entry> missing 'type' attribute"))?;
        match load_one_entry(store, &mut reader, &entry_type_name, file_version) {
          Ok(Some(_entry)) => {
            loaded += 1;
            since_commit += 1;
          }
          Ok(None) => {
            tracing::warn!(entry_type = %entry_type_name, "skipped entry (unknown type or schema error)");
          }
          Err(err) => return Err(err),
        }
        if since_commit >= CHUNK_SIZE {
          process_commit(store, subscribers);
          since_commit = 0;
        }
      }
      Event::End(end) if local_name_end(&end) == "rhythmdb" => break,
      Event::Eof => break,
      _ => {}
    }
  }

  if since_commit > 0 {
    process_commit(store, subscribers);
  }

  Ok(loaded)
}

fn read_root_version(reader: &mut Reader<BufReader<File>>, buf: &mut Vec<u8>) -> Result<u32> {
  loop {
    buf.clear();
    match reader.read_event_into(buf).map_err(|e| xml_error(reader, e))? {
      Event::Start(start) if local_name(&start) == "rhythmdb" => {
        let version = attr(&start, "version").ok_or_else(|| Error::invalid("<rhythmdb> missing 'version'"))?;
        return version.parse().map_err(|_| Error::invalid(format!("bad version '{version}'")));
      }
      Event::Eof => return Err(Error::invalid("empty document: no <rhythmdb> root")),
      _ => {}
    }
  }
}

/// Parse one `<entry>` element (already past its `Start` event) into a live,
/// staged-but-uncommitted `Entry`. Returns `Ok(None)` for a recoverable
/// skip (unknown type, unknown location, or a schema error anywhere inside
/// the element — the whole entry is dropped, the rest of the file loads
/// normally).
fn load_one_entry(
  store: &EntryStore,
  reader: &mut Reader<BufReader<File>>,
  entry_type_name: &str,
  file_version: u32,
) -> Result<Option<Entry>> {
  let mut props = read_entry_leaves(reader)?;

  let Some(entry_type) = store.registry().lookup(entry_type_name) else {
    return Ok(None);
  };

  let Some(loc_pos) = props.iter().position(|(k, _)| k == "location") else {
    return Ok(None);
  };
  let mut location = props.remove(loc_pos).1;

  for migration in MIGRATIONS {
    if file_version < migration.applies_below {
      (migration.run)(entry_type_name, &mut location, &mut props);
    }
  }

  let entry = match store.entry_new(entry_type, &location) {
    Ok(e) => e,
    Err(_) => return Ok(None),
  };

  for (name, text) in props {
    let Some(property) = Property::from_name(&name) else {
      tracing::debug!(property = %name, "skipping unknown property on load");
      continue;
    };
    if property.is_derived() {
      continue;
    }
    let value = match parse_value_for_kind(property.kind(), &text) {
      Ok(v) => v,
      Err(_) => {
        store.discard_uncommitted(&entry);
        return Ok(None);
      }
    };
    if store.entry_set(&entry, property, value).is_err() {
      store.discard_uncommitted(&entry);
      return Ok(None);
    }
  }

  Ok(Some(entry))
}

/// Read leaf `<name>text</name>` children until the matching `</entry>`.
fn read_entry_leaves(reader: &mut Reader<BufReader<File>>) -> Result<Vec<(String, String)>> {
  let mut props = Vec::new();
  let mut buf = Vec::new();

  loop {
    buf.clear();
    match reader.read_event_into(&mut buf).map_err(|e| xml_error(reader, e))? {
      Event::Start(start) => {
        let name = local_name(&start);
        let text = read_leaf_text(reader)?;
        props.push((name, text));
      }
      Event::End(end) if local_name_end(&end) == "entry" => break,
      Event::Eof => return Err(Error::invalid("unexpected end of <entry>")),
      _ => {}
    }
  }

  Ok(props)
}

fn read_leaf_text(reader: &mut Reader<BufReader<File>>) -> Result<String> {
  let mut buf = Vec::new();
  loop {
    buf.clear();
    match reader.read_event_into(&mut buf).map_err(|e| xml_error(reader, e))? {
      Event::Text(t) => return Ok(t.unescape().map_err(|e| Error::invalid(e.to_string()))?.into_owned()),
      Event::End(_) => return Ok(String::new()),
      Event::Eof => return Err(Error::invalid("unexpected end of leaf element")),
      _ => {}
    }
  }
}

fn local_name(start: &BytesStart) -> String {
  String::from_utf8_lossy(start.name().as_ref()).to_string()
}

fn local_name_end(end: &BytesEnd) -> String {
  String::from_utf8_lossy(end.name().as_ref()).to_string()
}

fn attr(start: &BytesStart, key: &str) -> Option<String> {
  start
    .attributes()
    .flatten()
    .find(|a| a.key.as_ref() == key.as_bytes())
    .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn xml_error(reader: &Reader<BufReader<File>>, err: quick_xml::Error) -> Error {
  Error::ParseError {
    line: 0,
    col: reader.buffer_position(),
    message: err.to_string(),
  }
}

/// Drain every persistable, non-deleted entry (sorted by location), write
/// it to a temp file beside `path`, fsync, and atomically rename into
/// place. Returns the number of entries written.
pub(crate) fn save_from(store: &EntryStore, path: &Path) -> Result<usize> {
  let mut entries = Vec::new();
  store.entry_foreach(|e| {
    if e.entry_type().persistable {
      entries.push(e.clone());
    }
  });
  entries.sort_by(|a, b| a.location().as_str().cmp(b.location().as_str()));

  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  let tmp_path = dir.join(format!(
    ".{}.tmp",
    path.file_name().and_then(|n| n.to_str()).unwrap_or("rhythmdb")
  ));

  {
    let file = File::create(&tmp_path)?;
    let mut buf_writer = BufWriter::new(file);
    write_document(&mut buf_writer, &entries)?;
    buf_writer.flush()?;
    buf_writer.get_ref().sync_all()?;
  }

  std::fs::rename(&tmp_path, path)?;
  Ok(entries.len())
}

fn write_document(out: &mut impl Write, entries: &[Entry]) -> Result<()> {
  let mut writer = Writer::new_with_indent(out, b' ', 2);

  let mut root = BytesStart::new("rhythmdb");
  root.push_attribute(("version", CURRENT_VERSION.to_string().as_str()));
  writer.write_event(Event::Start(root))?;

  for entry in entries {
    write_entry(&mut writer, entry)?;
    if entry.entry_type().persist_keywords {
      write_keywords(&mut writer, entry)?;
    }
  }

  writer.write_event(Event::End(BytesEnd::new("rhythmdb")))?;
  Ok(())
}

fn write_entry(writer: &mut Writer<&mut impl Write>, entry: &Entry) -> Result<()> {
  let mut start = BytesStart::new("entry");
  start.push_attribute(("type", entry.entry_type().name.as_str()));
  writer.write_event(Event::Start(start))?;

  writer.write_event(Event::Start(BytesStart::new("location")))?;
  writer.write_event(Event::Text(BytesText::new(entry.location().as_str())))?;
  writer.write_event(Event::End(BytesEnd::new("location")))?;

  for &property in Property::ALL {
    if property == Property::Location || property.is_derived() {
      continue;
    }
    let value = entry.get(property);
    if value.is_null() {
      continue;
    }
    writer.write_event(Event::Start(BytesStart::new(property.name())))?;
    writer.write_event(Event::Text(BytesText::new(&value.to_string())))?;
    writer.write_event(Event::End(BytesEnd::new(property.name())))?;
  }

  writer.write_event(Event::End(BytesEnd::new("entry")))?;
  Ok(())
}

fn write_keywords(writer: &mut Writer<&mut impl Write>, entry: &Entry) -> Result<()> {
  let keywords = entry.keyword_list();
  if keywords.is_empty() {
    return Ok(());
  }
  let mut start = BytesStart::new("rhythmdb-keywords");
  start.push_attribute(("location", entry.location().as_str()));
  writer.write_event(Event::Start(start))?;
  for kw in keywords {
    writer.write_event(Event::Start(BytesStart::new("keyword")))?;
    writer.write_event(Event::Text(BytesText::new(kw.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new("keyword")))?;
  }
  writer.write_event(Event::End(BytesEnd::new("rhythmdb-keywords")))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{action::Db, types::SONG};

  #[tokio::test]
  async fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.xml");

    let db = Db::new();
    let song = db.store().registry().lookup(SONG).unwrap();
    let entry = db.store().entry_new(song, "file:///round-trip.ogg").unwrap();
    db.store()
      .entry_set(&entry, Property::Title, Value::Str(intern("Sin")))
      .unwrap();
    db.store()
      .entry_set(&entry, Property::TrackNumber, Value::ULong(3))
      .unwrap();
    db.commit().await.unwrap();
    db.save_file(&path).await.unwrap();

    let db2 = Db::new();
    let loaded = db2.load_file(&path).await.unwrap();
    assert_eq!(loaded, 1);
    let reloaded = db2.store().entry_lookup_by_location("file:///round-trip.ogg").unwrap();
    assert_eq!(reloaded.get(Property::Title).as_str(), Some("Sin"));
    assert_eq!(reloaded.get(Property::TitleFolded).as_str(), Some("sin"));
  }

  #[tokio::test]
  async fn unknown_entry_type_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.xml");
    std::fs::write(
      &path,
      r#"<rhythmdb version="2"><entry type="no-such-type"><location>file:///x.ogg</location></entry></rhythmdb>"#,
    )
    .unwrap();

    let db = Db::new();
    let loaded = db.load_file(&path).await.unwrap();
    assert_eq!(loaded, 0);
  }

  #[tokio::test]
  async fn podcast_location_migrates_on_old_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.xml");
    std::fs::write(
      &path,
      format!(
        r#"<rhythmdb version="1"><entry type="{}"><location>/home/user/ep1.mp3|http://feed.example/ep1.mp3</location></entry></rhythmdb>"#,
        types::PODCAST_POST
      ),
    )
    .unwrap();

    let db = Db::new();
    let loaded = db.load_file(&path).await.unwrap();
    assert_eq!(loaded, 1);
    let entry = db.store().entry_lookup_by_location("/home/user/ep1.mp3").unwrap();
    assert_eq!(entry.get(Property::MountPoint).as_str(), Some("http://feed.example/ep1.mp3"));
  }
}
