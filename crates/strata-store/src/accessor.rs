//! Typed accessor paths for navigating stored state.
//!
//! Raw accessors are strings (or numbers, rendered to their decimal
//! string) using dotted syntax: `"session.user.name"`. A final segment
//! may be a bracketed field set, `"acct.funds.[balance|deposit]"`,
//! which fetches the named sibling fields as one object.
//!
//! Accessor strings are parsed exactly once at the boundary into an
//! [`AccessorSpec`]; everything downstream operates on the typed tree.

use crate::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw accessor supplied by the caller: a key or dotted path.
///
/// Numbers are accepted and rendered to their decimal string, matching
/// keys the way a JSON object would.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Accessor(String);

impl Accessor {
    /// The accessor string, verbatim.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Accessor {
    fn from(s: &str) -> Self {
        Accessor(s.to_owned())
    }
}

impl From<String> for Accessor {
    fn from(s: String) -> Self {
        Accessor(s)
    }
}

impl From<&String> for Accessor {
    fn from(s: &String) -> Self {
        Accessor(s.clone())
    }
}

macro_rules! accessor_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Accessor {
                fn from(n: $t) -> Self {
                    Accessor(n.to_string())
                }
            }
        )+
    };
}

accessor_from_int!(i32, i64, u32, u64, usize);

impl From<Accessor> for String {
    fn from(a: Accessor) -> Self {
        a.0
    }
}

/// A single segment in an accessor path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// Descend one level through an object key.
    Key(String),
    /// Fetch the named sibling fields as one object (bracket syntax).
    /// Always the deepest segment of a group.
    FieldSet(Vec<String>),
}

impl Segment {
    /// Create a key segment.
    #[inline]
    pub fn key(k: impl Into<String>) -> Self {
        Segment::Key(k.into())
    }

    /// Create a field-set segment.
    #[inline]
    pub fn field_set<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Segment::FieldSet(fields.into_iter().map(Into::into).collect())
    }

    /// Returns true if this is a key segment.
    #[inline]
    pub fn is_key(&self) -> bool {
        matches!(self, Segment::Key(_))
    }

    /// Get the key if this is a key segment.
    #[inline]
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            Segment::FieldSet(_) => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::FieldSet(fields) => write!(f, "[{}]", fields.join("|")),
        }
    }
}

/// One parsed accessor: the ordered segments of a single dotted path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathGroup(Vec<Segment>);

impl PathGroup {
    /// The segments of this group.
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Number of segments.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the group has no segments.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The top-level state key this group belongs to, when the first
    /// segment is a plain key.
    #[inline]
    pub fn first_key(&self) -> Option<&str> {
        self.0.first().and_then(Segment::as_key)
    }
}

impl fmt::Display for PathGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

/// Parsed form of a subscriber's accessor list.
///
/// Holds two derived views of the same raw accessors: `first_level`
/// for coarse changed-key matching and `structured` for the precise
/// path walk. Invariant: `first_level[i]` is the first segment of
/// `structured[i]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessorSpec {
    raw: Vec<String>,
    first_level: Vec<String>,
    structured: Vec<PathGroup>,
}

impl AccessorSpec {
    /// Parse a list of raw accessors.
    ///
    /// Rejects an empty list. In debug builds each accessor is also run
    /// through strict syntax validation; release builds parse leniently,
    /// treating odd segments verbatim.
    pub fn parse<I, A>(accessors: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = A>,
        A: Into<Accessor>,
    {
        let raw: Vec<String> = accessors
            .into_iter()
            .map(|a| String::from(a.into()))
            .collect();

        if raw.is_empty() {
            return Err(StoreError::empty_accessors());
        }

        if cfg!(debug_assertions) {
            for accessor in &raw {
                if let Err(reason) = lint(accessor) {
                    return Err(StoreError::invalid_accessor(accessor, reason));
                }
            }
        }

        let first_level = raw
            .iter()
            .map(|a| a.split('.').next().unwrap_or_default().to_owned())
            .collect();
        let structured = raw.iter().map(|a| parse_group(a)).collect();

        Ok(Self {
            raw,
            first_level,
            structured,
        })
    }

    /// The raw accessor strings, verbatim.
    #[inline]
    pub fn raw(&self) -> &[String] {
        &self.raw
    }

    /// The top-level key of each accessor, in order.
    #[inline]
    pub fn first_level(&self) -> &[String] {
        &self.first_level
    }

    /// The parsed path groups, in order.
    #[inline]
    pub fn structured(&self) -> &[PathGroup] {
        &self.structured
    }

    /// True when any of this spec's top-level keys appears in `keys`.
    ///
    /// The cheap pre-filter run before any path walk.
    #[inline]
    pub fn matches_any(&self, keys: &[String]) -> bool {
        self.first_level
            .iter()
            .any(|first| keys.iter().any(|k| k == first))
    }
}

/// Parse one raw accessor into its segments.
///
/// Bracket syntax is only recognized in multi-segment paths; a
/// single-segment accessor is kept verbatim as a key.
fn parse_group(raw: &str) -> PathGroup {
    let parts: Vec<&str> = raw.split('.').collect();

    if parts.len() == 1 {
        return PathGroup(vec![Segment::Key(parts[0].to_owned())]);
    }

    PathGroup(
        parts
            .iter()
            .map(|part| {
                if part.contains('[') {
                    let fields = part
                        .replace(['[', ']'], "")
                        .split('|')
                        .map(str::to_owned)
                        .collect();
                    Segment::FieldSet(fields)
                } else {
                    Segment::Key((*part).to_owned())
                }
            })
            .collect(),
    )
}

/// Strict accessor syntax validation, active in debug builds only.
fn lint(raw: &str) -> Result<(), &'static str> {
    if raw.is_empty() {
        return Err("accessor is empty");
    }

    let parts: Vec<&str> = raw.split('.').collect();
    let last = parts.len() - 1;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            return Err("empty path segment");
        }

        if part.contains('[') || part.contains(']') {
            if parts.len() == 1 {
                return Err("field set requires a parent path");
            }
            if i != last {
                return Err("field set must terminate the path");
            }
            if !(part.starts_with('[') && part.ends_with(']')) || part.len() < 2 {
                return Err("malformed field set");
            }
            let inner = &part[1..part.len() - 1];
            if inner.contains('[') || inner.contains(']') {
                return Err("malformed field set");
            }
            if inner.split('|').any(str::is_empty) {
                return Err("empty field set member");
            }
        } else if part.contains('|') {
            return Err("field separator outside of a field set");
        }
    }

    Ok(())
}
