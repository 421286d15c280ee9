//! The head parser.
//!
//! A hand-rolled byte-oriented state machine, not `httparse` (dropped —
//! see `DESIGN.md`): typed, state-specific errors (`VersionTooOld` vs.
//! `VersionTooNew` vs. `VersionParseError`, obs-folded-header rejection)
//! need a granularity a single-shot parser doesn't expose. Scans without
//! allocating, borrowing slices of the read buffer directly, moving
//! through five states: `start` / `method` / `target` / `version` /
//! `header_line`.

use bytes::Bytes;
use http::Method;

use crate::error::Error;
use crate::head::{Headers, RequestHead, Version};
use crate::proto::h1::io::Buffered;

fn is_ctl(b: u8) -> bool {
    b < 0x20 || b == 0x7f
}

fn is_token_char(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
    ) || b.is_ascii_alphanumeric()
}

fn is_token(s: &[u8]) -> bool {
    !s.is_empty() && s.iter().all(|&b| is_token_char(b))
}

/// Parses a single `name: value` header line (no trailing CRLF). Used for
/// both the head parser below and trailer parsing in `body::incoming`.
/// OWS is trimmed from the value only.
pub fn parse_header_line(line: &[u8]) -> Result<(&str, &[u8]), ()> {
    let colon = line.iter().position(|&b| b == b':').ok_or(())?;
    let name = &line[..colon];
    if !is_token(name) {
        return Err(());
    }
    let name = std::str::from_utf8(name).map_err(|_| ())?;
    let mut value = &line[colon + 1..];
    while matches!(value.first(), Some(b' ') | Some(b'\t')) {
        value = &value[1..];
    }
    while matches!(value.last(), Some(b' ') | Some(b'\t')) {
        value = &value[..value.len() - 1];
    }
    Ok((name, value))
}

fn parse_version(token: &[u8]) -> Result<Version, Error> {
    // "HTTP/" DIGIT "." DIGIT
    let rest = token.strip_prefix(b"HTTP/").ok_or_else(Error::new_version_parse_error)?;
    if rest.len() != 3 || rest[1] != b'.' || !rest[0].is_ascii_digit() || !rest[2].is_ascii_digit() {
        return Err(Error::new_version_parse_error());
    }
    Ok(Version {
        major: rest[0] - b'0',
        minor: rest[2] - b'0',
    })
}

/// Parses one request head (request-line + headers) from `io`, enforcing
/// `max_head_size` over the *entire* head including line terminators.
/// Returns `Ok(None)` if the peer disconnects before sending
/// any bytes of a new request — the "between requests" EOF, which the
/// exchange driver treats as a silent close rather than an error.
pub async fn parse_head<T>(
    io: &mut Buffered<T>,
    max_head_size: usize,
    min_version: Version,
    max_version: Version,
) -> Result<Option<RequestHead>, Error>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut consumed = 0usize;

    // state: start — tolerate at most one leading blank line.
    let mut line = match io.read_line(max_head_size.saturating_sub(consumed)).await? {
        Some(l) => l,
        None => return Ok(None),
    };
    consumed += line.len() + 2;
    if line.is_empty() {
        line = match io.read_line(max_head_size.saturating_sub(consumed)).await? {
            Some(l) => l,
            None => return Ok(None),
        };
        consumed += line.len() + 2;
    }
    if consumed > max_head_size {
        return Err(Error::new_max_head_size());
    }

    // states: method, target, version
    let mut parts = line.splitn(3, |&b| b == b' ');
    let method_tok = parts.next().unwrap_or(&[]);
    let target_tok = parts.next().unwrap_or(&[]);
    let version_tok = parts.next().unwrap_or(&[]);

    if method_tok.is_empty() || method_tok.iter().any(|&b| is_ctl(b)) {
        return Err(Error::new_request_line_parse_error());
    }
    if target_tok.is_empty() || target_tok.iter().any(|&b| is_ctl(b)) {
        return Err(Error::new_request_line_parse_error());
    }
    if version_tok.is_empty() {
        return Err(Error::new_request_line_parse_error());
    }

    let method = Method::from_bytes(method_tok).map_err(|_| Error::new_request_line_parse_error())?;
    let target = String::from_utf8(target_tok.to_vec()).map_err(|_| Error::new_request_line_parse_error())?;
    let version = parse_version(version_tok)?;

    if version < min_version {
        return Err(Error::new_version_too_old());
    }
    if version > max_version {
        return Err(Error::new_version_too_new());
    }

    // state: header_line, repeated until the empty terminator line.
    let mut headers = Headers::new();
    loop {
        let line = match io.read_line(max_head_size.saturating_sub(consumed)).await? {
            Some(l) => l,
            None => return Err(Error::new_disconnect()),
        };
        consumed += line.len() + 2;
        if consumed > max_head_size {
            return Err(Error::new_max_head_size());
        }
        if line.is_empty() {
            break;
        }
        if matches!(line.first(), Some(b' ') | Some(b'\t')) {
            // obs-fold: rejected per RFC 7230 §3.2.4.
            return Err(Error::new_bad_header());
        }
        let (name, value) = parse_header_line(&line).map_err(|_| Error::new_bad_header())?;
        headers.append(name, Bytes::copy_from_slice(value));
    }

    Ok(Some(RequestHead {
        method,
        target,
        version,
        headers,
    }))
}
