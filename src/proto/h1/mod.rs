//! HTTP/1.0 and HTTP/1.1 wire encoding and decoding: the byte source
//! (`io`), the request-head parser (`parse`), and response serialization
//! (`encode`).

pub mod encode;
pub mod io;
pub mod parse;
