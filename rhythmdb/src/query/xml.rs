//! XML serialisation for [`Query`] trees.
//!
//! Element names are kept short and mirror the clause vocabulary a user-
//! facing query builder would expose (`equals`, `like`, `prefix`, `suffix`,
//! `less`, `greater`, `year-equals`, ..., `disjunction`, `subquery`), so a
//! query that round-trips through this format stays a legible, inspectable
//! artifact on its own (e.g. embedded in a saved smart-playlist file).

use super::{Clause, Op, Query, Term};
use crate::{
  error::{Error, Result},
  property::{Property, Value},
};
use quick_xml::{
  events::{BytesEnd, BytesStart, BytesText, Event},
  Reader, Writer,
};
use std::io::Cursor;

/// Serialise `query` to a `<query>` XML document. Each disjunct becomes a
/// `<conjunction>` wrapper (omitted when there is exactly one, to keep the
/// common single-AND-group case readable); each clause becomes its own
/// element named after its operator, carrying `property` and `value`
/// attributes.
pub fn serialize(query: &Query) -> String {
  let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
  writer
    .write_event(Event::Start(BytesStart::new("query")))
    .expect("writing to an in-memory buffer cannot fail");

  for group in query {
    write_group(&mut writer, group);
  }

  writer
    .write_event(Event::End(BytesEnd::new("query")))
    .expect("writing to an in-memory buffer cannot fail");

  String::from_utf8(writer.into_inner().into_inner()).expect("quick-xml emits valid UTF-8")
}

fn write_group(writer: &mut Writer<Cursor<Vec<u8>>>, group: &[Term]) {
  let wrap = group.len() != 1 || matches!(group.first(), Some(Term::Subquery(_)));
  if wrap {
    writer.write_event(Event::Start(BytesStart::new("conjunction"))).unwrap();
  }
  for term in group {
    write_term(writer, term);
  }
  if wrap {
    writer.write_event(Event::End(BytesEnd::new("conjunction"))).unwrap();
  }
}

fn write_term(writer: &mut Writer<Cursor<Vec<u8>>>, term: &Term) {
  match term {
    Term::Subquery(q) => {
      writer.write_event(Event::Start(BytesStart::new("subquery"))).unwrap();
      for group in q {
        write_group(writer, group);
      }
      writer.write_event(Event::End(BytesEnd::new("subquery"))).unwrap();
    }
    Term::Clause(c) => write_clause(writer, c),
  }
}

fn op_tag(op: &Op) -> &'static str {
  match op {
    Op::Equals(_) => "equals",
    Op::NotEqual(_) => "not-equal",
    Op::Like(_) => "like",
    Op::Prefix(_) => "prefix",
    Op::Suffix(_) => "suffix",
    Op::Less(_) => "less",
    Op::Greater(_) => "greater",
    Op::CurrentTimeWithin(_) => "current-time-within",
    Op::CurrentTimeNotWithin(_) => "current-time-not-within",
  }
}

fn op_value_text(op: &Op) -> String {
  match op {
    Op::Equals(v) | Op::NotEqual(v) | Op::Less(v) | Op::Greater(v) => v.to_string(),
    Op::Like(s) | Op::Prefix(s) | Op::Suffix(s) => s.clone(),
    Op::CurrentTimeWithin(secs) | Op::CurrentTimeNotWithin(secs) => secs.to_string(),
  }
}

fn write_clause(writer: &mut Writer<Cursor<Vec<u8>>>, clause: &Clause) {
  let mut start = BytesStart::new(op_tag(&clause.op));
  start.push_attribute(("property", clause.property.name()));
  writer.write_event(Event::Start(start)).unwrap();
  writer
    .write_event(Event::Text(BytesText::new(&op_value_text(&clause.op))))
    .unwrap();
  writer.write_event(Event::End(BytesEnd::new(op_tag(&clause.op)))).unwrap();
}

/// Parse a `<query>` document produced by [`serialize`]. An exact inverse
/// within one format version: `deserialize(serialize(q)) == q`.
///
/// Grammar (matching `write_group`/`write_term` above): the body of a
/// `<query>` or `<subquery>` element is a sequence of *groups*, each either
/// a `<conjunction>` wrapping several terms or a single bare clause element
/// standing for its own one-term group. The body of a `<conjunction>` is a
/// sequence of *terms*: bare clause elements or nested `<subquery>`
/// elements.
pub fn deserialize(xml: &str) -> Result<Query> {
  let mut reader = Reader::from_str(xml);

  match reader.read_event().map_err(|e| xml_error(&reader, e))? {
    Event::Start(start) if local_name(&start) == "query" => {}
    other => return Err(Error::invalid(format!("expected <query>, found {other:?}"))),
  }
  read_groups(&mut reader, "query")
}

/// Read a sequence of groups up to (and consuming) `</{end_tag}>`.
fn read_groups(reader: &mut Reader<&[u8]>, end_tag: &str) -> Result<Query> {
  let mut query: Query = Vec::new();

  loop {
    match reader.read_event().map_err(|e| xml_error(reader, e))? {
      Event::Start(start) => {
        let name = local_name(&start);
        if name == "conjunction" {
          query.push(read_terms(reader, "conjunction")?);
        } else {
          query.push(vec![read_clause(reader, &start, &name)?]);
        }
      }
      Event::End(end) if String::from_utf8_lossy(end.name().as_ref()) == end_tag => break,
      Event::Eof => return Err(Error::invalid(format!("unexpected end of <{end_tag}>"))),
      _ => {}
    }
  }

  if query.is_empty() {
    query.push(Vec::new());
  }
  Ok(query)
}

/// Read a sequence of terms (bare clauses or nested `<subquery>`) up to
/// (and consuming) `</{end_tag}>`.
fn read_terms(reader: &mut Reader<&[u8]>, end_tag: &str) -> Result<Vec<Term>> {
  let mut terms = Vec::new();

  loop {
    match reader.read_event().map_err(|e| xml_error(reader, e))? {
      Event::Start(start) => {
        let name = local_name(&start);
        if name == "subquery" {
          terms.push(Term::Subquery(read_groups(reader, "subquery")?));
        } else {
          terms.push(read_clause(reader, &start, &name)?);
        }
      }
      Event::End(end) if String::from_utf8_lossy(end.name().as_ref()) == end_tag => break,
      Event::Eof => return Err(Error::invalid(format!("unexpected end of <{end_tag}>"))),
      _ => {}
    }
  }

  Ok(terms)
}

fn read_clause(reader: &mut Reader<&[u8]>, start: &BytesStart, tag: &str) -> Result<Term> {
  let property =
    attr(start, "property").ok_or_else(|| Error::invalid("clause element missing 'property' attribute"))?;
  let property =
    Property::from_name(&property).ok_or_else(|| Error::invalid(format!("unknown property '{property}'")))?;
  let text = read_text(reader)?;
  let op = parse_op(tag, &text, property.kind())?;
  Ok(Term::Clause(Clause { property, op }))
}

fn local_name(start: &BytesStart) -> String {
  String::from_utf8_lossy(start.name().as_ref()).to_string()
}

fn attr(start: &BytesStart, key: &str) -> Option<String> {
  start.attributes().flatten().find(|a| a.key.as_ref() == key.as_bytes()).map(|a| {
    String::from_utf8_lossy(&a.value).to_string()
  })
}

fn read_text(reader: &mut Reader<&[u8]>) -> Result<String> {
  match reader.read_event().map_err(|e| xml_error(reader, e))? {
    Event::Text(t) => Ok(t.unescape().map_err(|e| Error::invalid(e.to_string()))?.into_owned()),
    Event::End(_) => Ok(String::new()),
    other => Err(Error::invalid(format!("expected clause text, found {other:?}"))),
  }
}

fn parse_op(tag: &str, text: &str, kind: crate::property::PropertyKind) -> Result<Op> {
  Ok(match tag {
    "equals" => Op::Equals(parse_value(text, kind)?),
    "not-equal" => Op::NotEqual(parse_value(text, kind)?),
    "like" => Op::Like(text.to_string()),
    "prefix" => Op::Prefix(text.to_string()),
    "suffix" => Op::Suffix(text.to_string()),
    "less" => Op::Less(parse_value(text, kind)?),
    "greater" => Op::Greater(parse_value(text, kind)?),
    "current-time-within" => Op::CurrentTimeWithin(parse_u64(text)?),
    "current-time-not-within" => Op::CurrentTimeNotWithin(parse_u64(text)?),
    other => return Err(Error::invalid(format!("unknown query element '{other}'"))),
  })
}

fn parse_value(text: &str, kind: crate::property::PropertyKind) -> Result<Value> {
  use crate::property::PropertyKind::*;
  Ok(match kind {
    String => Value::Str(crate::atom::intern(text)),
    ULong => Value::ULong(parse_u64(text)?),
    FileSize => Value::FileSize(parse_u64(text)?),
    Timestamp => Value::Timestamp(
      text
        .parse()
        .map_err(|_| Error::invalid(format!("expected a timestamp, found '{text}'")))?,
    ),
    Double => Value::Double(
      text
        .parse()
        .map_err(|_| Error::invalid(format!("expected a float, found '{text}'")))?,
    ),
    Boolean => Value::Bool(text == "1"),
  })
}

fn parse_u64(text: &str) -> Result<u64> {
  text.parse().map_err(|_| Error::invalid(format!("expected an integer, found '{text}'")))
}

fn xml_error(reader: &Reader<&[u8]>, err: quick_xml::Error) -> Error {
  let pos = reader.buffer_position();
  Error::ParseError {
    line: 0,
    col: pos,
    message: err.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::{parse, Token};

  #[test]
  fn simple_equals_round_trips() {
    let q = parse(&[Token::PropEquals(Property::Genre, Value::Str(crate::atom::intern("Rock")))]).unwrap();
    let xml = serialize(&q);
    let back = deserialize(&xml).unwrap();
    assert_eq!(q, back);
  }

  #[test]
  fn disjunction_round_trips() {
    let q = parse(&[
      Token::PropEquals(Property::Genre, Value::Str(crate::atom::intern("Rock"))),
      Token::Disjunction,
      Token::PropEquals(Property::Genre, Value::Str(crate::atom::intern("Jazz"))),
    ])
    .unwrap();
    let xml = serialize(&q);
    let back = deserialize(&xml).unwrap();
    assert_eq!(q, back);
  }

  #[test]
  fn subquery_round_trips() {
    let inner = parse(&[Token::PropLike(Property::Title, "sin".into())]).unwrap();
    let q = parse(&[
      Token::PropEquals(Property::Genre, Value::Str(crate::atom::intern("Rock"))),
      Token::Subquery(inner),
    ])
    .unwrap();
    let xml = serialize(&q);
    let back = deserialize(&xml).unwrap();
    assert_eq!(q, back);
  }

  #[test]
  fn unknown_property_is_invalid() {
    let xml = "<query><equals property=\"no-such-prop\">x</equals></query>";
    assert!(matches!(deserialize(xml), Err(Error::Invalid(_))));
  }
}
