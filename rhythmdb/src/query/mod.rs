//! The declarative query language: a flat, tagged-token builder, a
//! preprocessing pass, and an evaluator.
//!
//! A [`Query`] is an OR of ANDs: the outer `Vec` is disjunctive, each inner
//! `Vec<Term>` is conjunctive. Nesting beyond that one level only happens
//! through an explicit [`Term::Subquery`], deliberately a flat token stream
//! rather than a general boolean-expression tree.

mod xml;

pub use xml::{deserialize, serialize};

use crate::{
  atom::intern,
  entry::Entry,
  error::{Error, Result},
  property::{Property, Value},
};

/// One tagged item of the stream `parse` consumes: a flat, ordered
/// alternative to building a query through nested builder calls.
#[derive(Debug, Clone)]
pub enum Token {
  PropEquals(Property, Value),
  PropNotEqual(Property, Value),
  PropLike(Property, String),
  PropPrefix(Property, String),
  PropSuffix(Property, String),
  PropLess(Property, Value),
  PropGreater(Property, Value),
  YearEquals(Property, i32),
  YearNotEqual(Property, i32),
  YearLess(Property, i32),
  YearGreater(Property, i32),
  CurrentTimeWithin(Property, u64),
  CurrentTimeNotWithin(Property, u64),
  Disjunction,
  Subquery(Query),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
  Equals(Value),
  NotEqual(Value),
  Like(String),
  Prefix(String),
  Suffix(String),
  Less(Value),
  Greater(Value),
  CurrentTimeWithin(u64),
  CurrentTimeNotWithin(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
  pub property: Property,
  pub op: Op,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
  Clause(Clause),
  Subquery(Query),
}

/// An OR of ANDs of [`Term`]s.
pub type Query = Vec<Vec<Term>>;

/// Build a [`Query`] from a tagged token stream. `Disjunction` starts a new
/// conjunctive group; everything else appends to the current one.
pub fn parse(tokens: &[Token]) -> Result<Query> {
  let mut groups: Query = vec![Vec::new()];

  for token in tokens {
    if let Token::Disjunction = token {
      groups.push(Vec::new());
      continue;
    }
    let term = token_to_term(token)?;
    groups.last_mut().expect("always at least one group").push(term);
  }

  groups.retain(|g| !g.is_empty());
  if groups.is_empty() {
    groups.push(Vec::new());
  }
  Ok(groups)
}

fn token_to_term(token: &Token) -> Result<Term> {
  Ok(match token {
    Token::PropEquals(p, v) => clause(*p, Op::Equals(v.clone())),
    Token::PropNotEqual(p, v) => clause(*p, Op::NotEqual(v.clone())),
    Token::PropLike(p, s) => clause(*p, Op::Like(s.clone())),
    Token::PropPrefix(p, s) => clause(*p, Op::Prefix(s.clone())),
    Token::PropSuffix(p, s) => clause(*p, Op::Suffix(s.clone())),
    Token::PropLess(p, v) => clause(*p, Op::Less(v.clone())),
    Token::PropGreater(p, v) => clause(*p, Op::Greater(v.clone())),
    Token::YearEquals(p, y) => return Ok(year_equals_term(*p, *y)),
    Token::YearNotEqual(p, y) => return Ok(year_not_equal_term(*p, *y)),
    Token::YearLess(p, y) => clause(*p, Op::Less(Value::ULong(julian_day(*y, 1, 1) as u64))),
    Token::YearGreater(p, y) => clause(
      *p,
      Op::Greater(Value::ULong((julian_day(*y + 1, 1, 1) - 1) as u64)),
    ),
    Token::CurrentTimeWithin(p, secs) => clause(*p, Op::CurrentTimeWithin(*secs)),
    Token::CurrentTimeNotWithin(p, secs) => clause(*p, Op::CurrentTimeNotWithin(*secs)),
    Token::Subquery(q) => Term::Subquery(q.clone()),
    Token::Disjunction => unreachable!("handled by caller"),
  })
}

fn clause(property: Property, op: Op) -> Term {
  Term::Clause(Clause { property, op })
}

fn year_not_equal_term(property: Property, year: i32) -> Term {
  let start = julian_day(year, 1, 1) as u64;
  let end_exclusive = julian_day(year + 1, 1, 1) as u64;
  Term::Subquery(vec![
    vec![clause(property, Op::Less(Value::ULong(start)))],
    vec![clause(property, Op::Greater(Value::ULong(end_exclusive - 1)))],
  ])
}

fn year_equals_term(property: Property, year: i32) -> Term {
  let start = julian_day(year, 1, 1) as u64;
  let end_exclusive = julian_day(year + 1, 1, 1) as u64;
  Term::Subquery(vec![vec![
    clause(property, Op::Greater(Value::ULong(start.saturating_sub(1)))),
    clause(property, Op::Less(Value::ULong(end_exclusive))),
  ]])
}

/// Proleptic-Gregorian Julian day number, matching `g_date_get_julian`'s
/// convention closely enough for year-range bucketing (day 1 = 0001-01-01).
pub fn julian_day(year: i32, month: u32, day: u32) -> i64 {
  let a = (14 - month as i64) / 12;
  let y = year as i64 + 4800 - a;
  let m = month as i64 + 12 * a - 3;
  day as i64 + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045
}

/// The synthetic search property: each whitespace-separated word of the
/// comparand must appear somewhere across the four folded text properties,
/// but different words may match different properties — "pretty nine"
/// matches an album "Pretty Hate Machine" by artist "Nine Inch Nails" even
/// though neither field alone contains the whole phrase. One [`Term`] per
/// word, each an OR over the four fields; the caller ANDs them together by
/// splicing all of them into the enclosing conjunctive group.
fn expand_search_match(text: &str) -> Vec<Term> {
  let folded = text.to_lowercase();
  folded
    .split_whitespace()
    .map(|word| {
      Term::Subquery(vec![
        vec![clause(Property::Artist, Op::Like(word.to_string()))],
        vec![clause(Property::Album, Op::Like(word.to_string()))],
        vec![clause(Property::Title, Op::Like(word.to_string()))],
        vec![clause(Property::Genre, Op::Like(word.to_string()))],
      ])
    })
    .collect()
}

/// Fold string comparands and expand `SEARCH_MATCH`/year clauses. Idempotent:
/// preprocessing an already-preprocessed query is a no-op aside from
/// re-lowercasing strings that are already lowercase.
pub fn preprocess(query: &Query) -> Query {
  query.iter().map(|group| group.iter().flat_map(preprocess_term).collect()).collect()
}

fn preprocess_term(term: &Term) -> Vec<Term> {
  match term {
    Term::Subquery(q) => vec![Term::Subquery(preprocess(q))],
    Term::Clause(c) if c.property == Property::SearchMatch => match &c.op {
      Op::Like(text) => expand_search_match(text),
      _ => vec![Term::Clause(c.clone())],
    },
    Term::Clause(c) => vec![Term::Clause(fold_clause(c))],
  }
}

fn fold_clause(clause: &Clause) -> Clause {
  let op = match &clause.op {
    Op::Like(s) => Op::Like(s.to_lowercase()),
    Op::Prefix(s) => Op::Prefix(s.to_lowercase()),
    Op::Suffix(s) => Op::Suffix(s.to_lowercase()),
    other => other.clone(),
  };
  Clause {
    property: clause.property,
    op,
  }
}

/// Evaluate a preprocessed query against `entry`. An un-preprocessed query
/// (one still carrying a raw `SEARCH_MATCH` clause) is rejected with
/// `Error::Invalid`.
pub fn evaluate(query: &Query, entry: &Entry) -> Result<bool> {
  for group in query {
    let mut all = true;
    for term in group {
      if !evaluate_term(term, entry)? {
        all = false;
        break;
      }
    }
    if all {
      return Ok(true);
    }
  }
  Ok(false)
}

fn evaluate_term(term: &Term, entry: &Entry) -> Result<bool> {
  match term {
    Term::Subquery(q) => evaluate(q, entry),
    Term::Clause(c) => evaluate_clause(c, entry),
  }
}

fn folded_str(entry: &Entry, property: Property) -> Option<String> {
  let prop = property.folded_sibling().unwrap_or(property);
  entry.get(prop).as_str().map(|s| s.to_string())
}

fn evaluate_clause(clause: &Clause, entry: &Entry) -> Result<bool> {
  if clause.property == Property::SearchMatch {
    return Err(Error::invalid("query was not preprocessed: raw SEARCH_MATCH clause"));
  }

  Ok(match &clause.op {
    Op::Equals(v) => entry.get(clause.property) == *v,
    Op::NotEqual(v) => entry.get(clause.property) != *v,
    Op::Like(needle) => {
      if needle.is_empty() {
        true
      } else {
        folded_str(entry, clause.property).is_some_and(|hay| hay.contains(needle.as_str()))
      }
    }
    Op::Prefix(needle) => {
      if needle.is_empty() {
        true
      } else {
        folded_str(entry, clause.property).is_some_and(|hay| hay.starts_with(needle.as_str()))
      }
    }
    Op::Suffix(needle) => {
      if needle.is_empty() {
        true
      } else {
        folded_str(entry, clause.property).is_some_and(|hay| hay.ends_with(needle.as_str()))
      }
    }
    Op::Less(v) => numeric_cmp(entry, clause.property, v, |a, b| a < b),
    Op::Greater(v) => numeric_cmp(entry, clause.property, v, |a, b| a > b),
    Op::CurrentTimeWithin(secs) => current_time_within(entry, clause.property, *secs),
    Op::CurrentTimeNotWithin(secs) => !current_time_within(entry, clause.property, *secs),
  })
}

fn numeric_cmp(entry: &Entry, property: Property, rhs: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
  let actual = entry.get(property);
  if actual.is_null() {
    return false;
  }
  match (actual.as_ulong(), rhs.as_ulong()) {
    (Some(a), Some(b)) => cmp(a as f64, b as f64),
    _ => match (actual.as_double(), rhs.as_double()) {
      (Some(a), Some(b)) => cmp(a, b),
      _ => false,
    },
  }
}

fn current_time_within(entry: &Entry, property: Property, secs: u64) -> bool {
  let Value::Timestamp(ts) = entry.get(property) else {
    return false;
  };
  let now = chrono::Utc::now().timestamp();
  now.saturating_sub(ts) <= secs as i64
}

/// Build a `YearEquals`/`YearNotEqual` term directly (exposed since
/// `year_equals` needs two conjoined clauses, which doesn't fit the
/// single-`Term` shape of [`token_to_term`]).
pub fn year_equals(property: Property, year: i32) -> Term {
  year_equals_term(property, year)
}

pub fn year_not_equal(property: Property, year: i32) -> Term {
  year_not_equal_term(property, year)
}

/// Convenience: a query matching every entry (an empty OR-of-AND).
pub fn match_all() -> Query {
  vec![vec![]]
}

pub fn intern_like(text: &str) -> Value {
  Value::Str(intern(text))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{action::Db, entry::Entry, types::SONG};

  async fn two_entries() -> (Db, Entry, Entry) {
    let db = Db::new();
    let song = db.store().registry().lookup(SONG).unwrap();

    let sin = db.store().entry_new(song.clone(), "file:///sin.ogg").unwrap();
    db.store().entry_set(&sin, Property::Title, Value::Str(intern("Sin"))).unwrap();
    db.store().entry_set(&sin, Property::Artist, Value::Str(intern("Nine Inch Nails"))).unwrap();
    db.store().entry_set(&sin, Property::Album, Value::Str(intern("Pretty Hate Machine"))).unwrap();
    db.store().entry_set(&sin, Property::Genre, Value::Str(intern("Rock"))).unwrap();
    db.store().entry_set(&sin, Property::Date, Value::ULong(julian_day(1989, 1, 1) as u64)).unwrap();

    let other = db.store().entry_new(song, "file:///other.ogg").unwrap();
    db.store().entry_set(&other, Property::Title, Value::Str(intern("Other Song"))).unwrap();
    db.store().entry_set(&other, Property::Artist, Value::Str(intern("Someone Else"))).unwrap();
    db.store().entry_set(&other, Property::Album, Value::Str(intern("Other Album"))).unwrap();
    db.store().entry_set(&other, Property::Genre, Value::Str(intern("Jazz"))).unwrap();
    db.store().entry_set(&other, Property::Date, Value::ULong(julian_day(2000, 1, 1) as u64)).unwrap();

    db.commit().await.unwrap();
    (db, sin, other)
  }

  fn check(tokens: Vec<Token>, entry: &Entry) -> bool {
    let query = preprocess(&parse(&tokens).unwrap());
    evaluate(&query, entry).unwrap()
  }

  #[tokio::test]
  async fn title_equals_matches_only_that_entry() {
    let (_db, sin, other) = two_entries().await;
    let tokens = vec![Token::PropEquals(Property::Title, Value::Str(intern("Sin")))];
    assert!(check(tokens.clone(), &sin));
    assert!(!check(tokens, &other));
  }

  #[tokio::test]
  async fn artist_like_is_case_insensitive_substring() {
    let (_db, sin, other) = two_entries().await;
    let tokens = vec![Token::PropLike(Property::Artist, "Nine Inch".into())];
    assert!(check(tokens.clone(), &sin));
    assert!(!check(tokens, &other));
  }

  #[tokio::test]
  async fn album_like_non_matching_substring_fails() {
    let (_db, sin, _other) = two_entries().await;
    let tokens = vec![Token::PropLike(Property::Album, "Load".into())];
    assert!(!check(tokens, &sin));
  }

  #[tokio::test]
  async fn search_match_finds_words_split_across_fields() {
    let (_db, sin, other) = two_entries().await;
    // "pretty" only appears in the album, "nine" only in the artist — a
    // single whole-phrase needle would never match either field.
    let tokens = vec![Token::PropLike(Property::SearchMatch, "Pretty Nine".into())];
    assert!(check(tokens.clone(), &sin));
    assert!(!check(tokens, &other));
  }

  #[tokio::test]
  async fn year_equals_and_not_equal() {
    let (_db, sin, other) = two_entries().await;
    let equals = vec![Token::YearEquals(Property::Date, 1989)];
    assert!(check(equals.clone(), &sin));
    assert!(!check(equals, &other));

    let not_equal = vec![Token::YearNotEqual(Property::Date, 1989)];
    assert!(!check(not_equal.clone(), &sin));
    assert!(check(not_equal, &other));
  }

  #[tokio::test]
  async fn disjunction_matches_either_group() {
    let (_db, sin, other) = two_entries().await;
    let tokens = vec![
      Token::PropLike(Property::Title, "Sin".into()),
      Token::Disjunction,
      Token::PropLike(Property::Title, "Son".into()),
    ];
    assert!(check(tokens.clone(), &sin));
    assert!(!check(tokens, &other));
  }
}
