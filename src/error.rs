//! Error types.
//!
//! `rustle` models failures as a single [`Error`] type wrapping a flat,
//! non-exhaustive [`Kind`] tag rather than a hierarchy of exception types.
//! The exception pipeline (`crate::exception`) discriminates on the tag
//! via the `is_*` predicate methods below; it never matches on `Kind`
//! itself, which stays private so new variants can be added without
//! breaking callers.

use std::error::Error as StdError;
use std::fmt;

type Cause = Box<dyn StdError + Send + Sync>;

/// The error type for `rustle`.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Kind {
    // client framing
    RequestLineParseError,
    VersionParseError,
    BadHeader,
    FramingConflict,
    VersionTooOld,
    VersionTooNew,
    IllegalRequestBody,
    IllegalResponseBody,
    // resource limits
    MaxHeadSize,
    MaxBody,
    MaxTrailers,
    MaxErrorResponses,
    // resolution
    NoRouteFound,
    MethodNotAllowed,
    MediaTypeUnsupported,
    InvalidPattern,
    RouteCollision,
    // flow
    ResponseRejected,
    IllegalState,
    IdleTimeoutRead,
    IdleTimeoutWrite,
    LockTimeout,
    IllegalLockUpgrade,
    IllegalMonitorState,
    Disconnect,
    // other
    Io,
    User,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(kind: Kind, cause: C) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                cause: Some(cause.into()),
            }),
        }
    }

    pub(crate) fn kind(&self) -> Kind {
        self.inner.kind
    }

    // --- constructors, one per Kind, grounded on error.rs::new_* ---

    pub(crate) fn new_request_line_parse_error() -> Error {
        Error::new(Kind::RequestLineParseError)
    }

    pub(crate) fn new_version_parse_error() -> Error {
        Error::new(Kind::VersionParseError)
    }

    pub(crate) fn new_bad_header() -> Error {
        Error::new(Kind::BadHeader)
    }

    pub(crate) fn new_framing_conflict() -> Error {
        Error::new(Kind::FramingConflict)
    }

    pub(crate) fn new_version_too_old() -> Error {
        Error::new(Kind::VersionTooOld)
    }

    pub(crate) fn new_version_too_new() -> Error {
        Error::new(Kind::VersionTooNew)
    }

    pub(crate) fn new_illegal_request_body() -> Error {
        Error::new(Kind::IllegalRequestBody)
    }

    pub(crate) fn new_illegal_response_body() -> Error {
        Error::new(Kind::IllegalResponseBody)
    }

    pub(crate) fn new_max_head_size() -> Error {
        Error::new(Kind::MaxHeadSize)
    }

    pub(crate) fn new_max_body() -> Error {
        Error::new(Kind::MaxBody)
    }

    pub(crate) fn new_max_trailers() -> Error {
        Error::new(Kind::MaxTrailers)
    }

    pub(crate) fn new_max_error_responses() -> Error {
        Error::new(Kind::MaxErrorResponses)
    }

    pub(crate) fn new_no_route_found() -> Error {
        Error::new(Kind::NoRouteFound)
    }

    pub(crate) fn new_method_not_allowed() -> Error {
        Error::new(Kind::MethodNotAllowed)
    }

    pub(crate) fn new_media_type_unsupported() -> Error {
        Error::new(Kind::MediaTypeUnsupported)
    }

    pub(crate) fn new_invalid_pattern(msg: &'static str) -> Error {
        Error::with(Kind::InvalidPattern, msg)
    }

    pub(crate) fn new_route_collision() -> Error {
        Error::new(Kind::RouteCollision)
    }

    pub(crate) fn new_response_rejected() -> Error {
        Error::new(Kind::ResponseRejected)
    }

    pub(crate) fn new_illegal_state(why: &'static str) -> Error {
        Error::with(Kind::IllegalState, why)
    }

    pub(crate) fn new_idle_timeout_read() -> Error {
        Error::new(Kind::IdleTimeoutRead)
    }

    pub(crate) fn new_idle_timeout_write() -> Error {
        Error::new(Kind::IdleTimeoutWrite)
    }

    pub(crate) fn new_lock_timeout() -> Error {
        Error::new(Kind::LockTimeout)
    }

    pub(crate) fn new_illegal_lock_upgrade() -> Error {
        Error::new(Kind::IllegalLockUpgrade)
    }

    pub(crate) fn new_illegal_monitor_state() -> Error {
        Error::new(Kind::IllegalMonitorState)
    }

    pub(crate) fn new_disconnect() -> Error {
        Error::new(Kind::Disconnect)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::with(Kind::Io, cause)
    }

    /// Wraps an error returned by user code (a handler, action, or
    /// exception handler).
    pub fn new_user<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::User, cause)
    }

    // --- public predicates over the error taxonomy ---

    /// The client sent a malformed or inconsistent request head.
    pub fn is_client_framing(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::RequestLineParseError
                | Kind::VersionParseError
                | Kind::BadHeader
                | Kind::FramingConflict
                | Kind::VersionTooOld
                | Kind::VersionTooNew
                | Kind::IllegalRequestBody
                | Kind::IllegalResponseBody
        )
    }

    /// A configured resource limit (head size, body size, trailers,
    /// consecutive error responses) was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::MaxHeadSize | Kind::MaxBody | Kind::MaxTrailers | Kind::MaxErrorResponses
        )
    }

    /// Route or action resolution failed.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::NoRouteFound
                | Kind::MethodNotAllowed
                | Kind::MediaTypeUnsupported
                | Kind::InvalidPattern
                | Kind::RouteCollision
        )
    }

    /// A read or write idle-timeout fired.
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::IdleTimeoutRead | Kind::IdleTimeoutWrite)
    }

    pub(crate) fn is_timeout_read(&self) -> bool {
        matches!(self.inner.kind, Kind::IdleTimeoutRead)
    }

    pub(crate) fn is_timeout_write(&self) -> bool {
        matches!(self.inner.kind, Kind::IdleTimeoutWrite)
    }

    /// The peer disconnected; there is nothing to respond to.
    pub fn is_disconnect(&self) -> bool {
        matches!(self.inner.kind, Kind::Disconnect)
    }

    /// The channel-writer contract was violated by the caller.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self.inner.kind, Kind::IllegalState)
    }

    /// A path-lock related failure (timeout, illegal upgrade, bad release).
    pub fn is_lock(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::LockTimeout | Kind::IllegalLockUpgrade | Kind::IllegalMonitorState
        )
    }

    /// An underlying I/O error (not classified further by this crate).
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Originated from user code (a handler, action, or exception handler).
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::RequestLineParseError => "invalid request line",
            Kind::VersionParseError => "invalid HTTP version",
            Kind::BadHeader => "invalid header",
            Kind::FramingConflict => "conflicting framing headers",
            Kind::VersionTooOld => "HTTP version too old",
            Kind::VersionTooNew => "HTTP version too new",
            Kind::IllegalRequestBody => "illegal request body for method",
            Kind::IllegalResponseBody => "illegal response body",
            Kind::MaxHeadSize => "request head too large",
            Kind::MaxBody => "request body too large",
            Kind::MaxTrailers => "request trailers too large",
            Kind::MaxErrorResponses => "too many consecutive error responses",
            Kind::NoRouteFound => "no matching route",
            Kind::MethodNotAllowed => "method not allowed",
            Kind::MediaTypeUnsupported => "unsupported media type",
            Kind::InvalidPattern => "invalid route pattern",
            Kind::RouteCollision => "route collision",
            Kind::ResponseRejected => "response rejected by client version",
            Kind::IllegalState => "illegal channel state",
            Kind::IdleTimeoutRead => "idle read timeout",
            Kind::IdleTimeoutWrite => "idle write timeout",
            Kind::LockTimeout => "path lock acquire timeout",
            Kind::IllegalLockUpgrade => "illegal read-to-write lock upgrade",
            Kind::IllegalMonitorState => "lock released by non-owner",
            Kind::Disconnect => "peer disconnected",
            Kind::Io => "I/O error",
            Kind::User => "error from user code",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("rustle::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field("cause", cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.cause {
            Some(ref cause) => write!(f, "{}: {}", self.description(), cause),
            None => f.write_str(self.description()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.cause.as_ref().map(|c| &**c as _)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::new_io(e)
    }
}

/// A `Result` alias with `rustle`'s [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
