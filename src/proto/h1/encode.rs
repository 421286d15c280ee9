//! Response serialization primitives.
//!
//! Formats the status line and headers directly into a `Vec<u8>` via the
//! `FastWrite` adapter below, avoiding intermediate `String` allocation.

use std::fmt::Write as _;

use http::StatusCode;

use crate::head::{Headers, Version};

/// Appends `HTTP/x.y status reason\r\n` to `out`.
pub fn encode_status_line(out: &mut Vec<u8>, version: Version, status: StatusCode, reason: Option<&str>) {
    let _ = write!(FastWrite(out), "HTTP/{}.{} {}", version.major, version.minor, status.as_u16());
    out.push(b' ');
    match reason {
        Some(r) => out.extend_from_slice(r.as_bytes()),
        None => out.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes()),
    }
    out.extend_from_slice(b"\r\n");
}

/// Appends every header in `headers` as `Name: value\r\n`, preserving the
/// writer-supplied name casing byte-for-byte.
pub fn encode_headers(out: &mut Vec<u8>, headers: &Headers) {
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
}

/// Appends the trailing empty line terminating the head section.
pub fn encode_head_terminator(out: &mut Vec<u8>) {
    out.extend_from_slice(b"\r\n");
}

struct FastWrite<'a>(&'a mut Vec<u8>);

impl std::fmt::Write for FastWrite<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_status_line_with_canonical_reason() {
        let mut out = Vec::new();
        encode_status_line(&mut out, Version::HTTP_11, StatusCode::OK, None);
        assert_eq!(out, b"HTTP/1.1 200 OK\r\n");
    }

    #[test]
    fn encodes_status_line_with_explicit_reason() {
        let mut out = Vec::new();
        encode_status_line(&mut out, Version::HTTP_10, StatusCode::NO_CONTENT, Some("Nothing Here"));
        assert_eq!(out, b"HTTP/1.0 204 Nothing Here\r\n");
    }
}
