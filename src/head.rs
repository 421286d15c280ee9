//! Request/response head types: [`Headers`], [`Version`], and the parsed
//! [`RequestHead`] record produced by `proto::h1::parse`.
//!
//! `Headers` is a hand-rolled ordered multimap rather than `http::HeaderMap`:
//! emission must preserve the writer-supplied header name casing
//! byte-for-byte, which `HeaderMap` does not guarantee since it
//! canonicalizes names on insertion. The topology otherwise follows
//! hyper's own (legacy) header-collection style in `proto/h1/role.rs`: an
//! ordered list of name/value pairs plus a case-insensitive lookup.

use std::fmt;

use bytes::Bytes;
use http::Method;

/// An HTTP version, restricted to the `major.minor` shape this crate
/// parses (`1.0` and `1.1`; anything else is rejected by the parser
/// before a `Version` value ever exists).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };

    /// Whether persistent connections are supported by default at this
    /// version (only 1.1; 1.0 never defaults to keep-alive).
    pub fn persistent_by_default(&self) -> bool {
        *self >= Version::HTTP_11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// One stored header: the exact bytes the writer supplied for the name
/// (for case-preserving emission) alongside its value.
#[derive(Debug, Clone)]
struct Entry {
    name: Box<str>,
    value: Bytes,
}

/// An ordered, case-insensitive-keyed multimap of headers, preserving
/// insertion order and duplicate entries.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }

    /// Appends a header, keeping any existing entries of the same name.
    pub fn append(&mut self, name: impl Into<Box<str>>, value: impl Into<Bytes>) {
        self.entries.push(Entry {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Removes every existing entry for `name` (case-insensitive), then
    /// inserts a single entry with the given writer-supplied casing.
    pub fn set(&mut self, name: impl Into<Box<str>>, value: impl Into<Bytes>) {
        let name = name.into();
        self.entries.retain(|e| !e.name.eq_ignore_ascii_case(&name));
        self.entries.push(Entry { name, value: value.into() });
    }

    /// Returns the first value for `name` (case-insensitive), if present.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_ref())
    }

    /// Returns all values for `name` (case-insensitive), in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Number of entries with `name` (case-insensitive).
    pub fn count(&self, name: &str) -> usize {
        self.entries.iter().filter(|e| e.name.eq_ignore_ascii_case(name)).count()
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|e| !e.name.eq_ignore_ascii_case(name));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates entries in insertion order, exposing the writer-supplied
    /// name casing exactly as stored.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|e| (&*e.name, e.value.as_ref()))
    }

    /// Parses this header's sole value (case-insensitively looked up) as
    /// a non-negative decimal integer with no sign and no internal
    /// whitespace, per the Content-Length grammar. Returns `None`
    /// if the header is absent; `Some(Err(..))` if present but malformed
    /// or duplicated with distinct values.
    pub fn content_length(&self) -> Option<Result<u64, ()>> {
        let mut values = self.get_all("content-length");
        let first = values.next()?;
        for other in values {
            if other != first {
                return Some(Err(()));
            }
        }
        let s = std::str::from_utf8(first).map_err(|_| ()).ok()?;
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Some(Err(()));
        }
        Some(s.parse::<u64>().map_err(|_| ()))
    }

    /// True if `Transfer-Encoding` is present and its last coding
    /// (case-insensitive) is `chunked`.
    pub fn is_chunked(&self) -> bool {
        match self.get("transfer-encoding") {
            Some(v) => std::str::from_utf8(v)
                .ok()
                .and_then(|s| s.rsplit(',').next())
                .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false),
            None => false,
        }
    }
}

/// A parsed request head: method, raw (percent-encoded) request-target,
/// version, and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}
