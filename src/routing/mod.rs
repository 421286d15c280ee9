//! The route/action resolution tree.
//!
//! A segment trie (static children map, at most one single-param child,
//! at most one terminal catch-all) with a static > single-param >
//! catch-all tie-break rule, in the style of `karlivory-khttp`'s
//! `Router`/`RouteParams` split (route params as a typed accessor keyed
//! by pattern), adapted from khttp's registration-order router to a
//! proper segment trie.

pub mod action;
pub mod tree;

use std::sync::Arc;

use http::Method;

use crate::error::Error;
use crate::routing::action::{ActionTree, MatchedAction};
use crate::routing::tree::{Resolution, RouteTree};

/// The registration surface handed to application setup code: one route
/// tree plus one action tree, matched against the same normalized path
/// segments per exchange. Mutated only before the server starts
/// accepting, or between exchanges on an idle connection — never
/// concurrently with a lookup that must see a torn state.
#[derive(Default)]
pub struct Routes {
    routes: RouteTree,
    actions: ActionTree,
}

impl Routes {
    pub fn new() -> Routes {
        Routes::default()
    }

    pub fn route(&mut self, pattern: &str, method: Method, handler: BoxHandler) -> Result<(), Error> {
        self.routes.register(pattern, method, handler)
    }

    pub fn before(&mut self, pattern: &str, action: BoxAction) -> Result<(), Error> {
        self.actions.register_before(pattern, action)
    }

    pub fn after(&mut self, pattern: &str, action: BoxAction) -> Result<(), Error> {
        self.actions.register_after(pattern, action)
    }

    /// Resolves a single request-target against both trees at once, the
    /// shape the exchange driver (C6) consumes directly: route resolution
    /// (step 2) plus before/after actions (step 3). `raw_target` is the
    /// request-line's request-target verbatim (path plus any `?query`);
    /// the query part, if any, plays no role in route matching.
    pub fn resolve<'a>(&'a self, raw_target: &str, method: &Method) -> Resolved<'a> {
        let segments = path_segments(raw_target);
        Resolved {
            route: self.routes.resolve(&segments, method),
            before: self.actions.resolve_before(&segments),
            after: self.actions.resolve_after(&segments),
        }
    }
}

/// The combined result of resolving one path against both trees.
pub struct Resolved<'a> {
    pub route: Resolution<'a>,
    pub before: Vec<MatchedAction>,
    pub after: Vec<MatchedAction>,
}

/// A route handler: the receiver invoked once route+method resolution
/// succeeds.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: crate::request::Request) -> crate::response::Response;
}

pub type BoxHandler = Arc<dyn Handler>;

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(crate::request::Request) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = crate::response::Response> + Send,
{
    async fn call(&self, req: crate::request::Request) -> crate::response::Response {
        (self)(req).await
    }
}

/// A before- or after-action: may short-circuit the exchange by
/// returning `Some(response)`.
#[async_trait::async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, req: crate::request::Request) -> Option<crate::response::Response>;
}

pub type BoxAction = Arc<dyn Action>;

#[async_trait::async_trait]
impl<F, Fut> Action for F
where
    F: Fn(crate::request::Request) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Option<crate::response::Response>> + Send,
{
    async fn call(&self, req: crate::request::Request) -> Option<crate::response::Response> {
        (self)(req).await
    }
}

/// A parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Static(String),
    Param(String),
    CatchAll(String),
}

/// Splits a registered pattern into segments, without percent-decoding
/// (patterns are developer-supplied literals, not wire data). Enforces:
/// a catch-all segment is only legal last, parameter names are unique
/// within the pattern, and static segments are never empty.
pub(crate) fn pattern_segments(pattern: &str) -> Result<Vec<Segment>, crate::error::Error> {
    use crate::error::Error;

    let trimmed = pattern.strip_prefix('/').unwrap_or(pattern);
    let mut segments = Vec::new();
    let mut names = std::collections::HashSet::new();

    if trimmed.is_empty() {
        return Ok(segments);
    }

    let raw: Vec<&str> = trimmed.split('/').collect();
    for (i, seg) in raw.iter().enumerate() {
        if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(Error::new_invalid_pattern("empty parameter name"));
            }
            if !names.insert(name.to_string()) {
                return Err(Error::new_invalid_pattern("duplicate parameter name in pattern"));
            }
            segments.push(Segment::Param(name.to_string()));
        } else if let Some(name) = seg.strip_prefix('*') {
            if name.is_empty() {
                return Err(Error::new_invalid_pattern("empty catch-all name"));
            }
            if i + 1 != raw.len() {
                return Err(Error::new_invalid_pattern("catch-all must be the last segment"));
            }
            if !names.insert(name.to_string()) {
                return Err(Error::new_invalid_pattern("duplicate parameter name in pattern"));
            }
            segments.push(Segment::CatchAll(name.to_string()));
        } else {
            if seg.is_empty() {
                return Err(Error::new_invalid_pattern("empty static segment"));
            }
            segments.push(Segment::Static(seg.to_string()));
        }
    }

    Ok(segments)
}

/// Recomputes the path-parameter bindings a pattern would produce against
/// already-matched `segments`. The action tree (unlike the route tree)
/// only tracks *which* patterns match, not their bindings, since most
/// collected actions never inspect `params` at all — re-deriving them
/// here, only for the ones the exchange driver actually dispatches to, is
/// cheap and avoids threading a second params map through `collect`.
pub(crate) fn params_for_pattern(pattern: &str, segments: &[String]) -> Vec<(String, String)> {
    let parsed = pattern_segments(pattern).unwrap_or_default();
    let mut params = Vec::new();
    let mut segs = segments.iter();
    for seg in &parsed {
        match seg {
            Segment::Static(_) => {
                segs.next();
            }
            Segment::Param(name) => {
                if let Some(s) = segs.next() {
                    params.push((name.clone(), s.clone()));
                }
            }
            Segment::CatchAll(name) => {
                let rest: Vec<String> = segs.by_ref().cloned().collect();
                params.push((name.clone(), rest.join("/")));
            }
        }
    }
    params
}

/// Splits a request-target's `?query` off (route matching never sees it)
/// and normalizes the remaining path into segments. The exchange driver
/// calls this once per exchange and reuses the result for both
/// `Routes::resolve` and `params_for_pattern`.
pub fn path_segments(raw_target: &str) -> Vec<String> {
    let path = raw_target.split('?').next().unwrap_or(raw_target);
    normalize_path_segments(path)
}

/// Percent-decodes and normalizes a request-target path into segments:
/// leading, trailing, and consecutive empty segments are eliminated.
pub fn normalize_path_segments(raw_path: &str) -> Vec<String> {
    let path = percent_decode(raw_path);
    path.split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

/// Decodes `%XX` escapes: scans for `%`, parses the following two hex
/// digits as a byte, and passes everything else through unchanged.
/// Invalid escapes are left as literal text rather than rejected — there
/// is no dedicated error for malformed path escapes.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_pattern_has_no_segments() {
        assert_eq!(pattern_segments("/").unwrap(), vec![]);
    }

    #[test]
    fn catch_all_must_be_last() {
        assert!(pattern_segments("/*rest/more").is_err());
    }

    #[test]
    fn normalizes_percent_encoding_and_empty_segments() {
        assert_eq!(normalize_path_segments("/foo//bar%2Fbaz/"), vec!["foo", "bar/baz"]);
    }

    #[test]
    fn root_path_normalizes_to_zero_segments() {
        assert_eq!(normalize_path_segments("/"), Vec::<String>::new());
    }

    struct Ok200;
    #[async_trait::async_trait]
    impl Handler for Ok200 {
        async fn call(&self, _req: crate::request::Request) -> crate::response::Response {
            crate::response::Response::new(http::StatusCode::OK)
        }
    }

    struct NoOp;
    #[async_trait::async_trait]
    impl Action for NoOp {
        async fn call(&self, _req: crate::request::Request) -> Option<crate::response::Response> {
            None
        }
    }

    #[test]
    fn params_for_pattern_recovers_bindings_including_catch_all() {
        let segments = normalize_path_segments("/users/42/files/a/b.txt");
        let params = params_for_pattern("/users/:id/files/*rest", &segments);
        assert_eq!(params, vec![("id".to_string(), "42".to_string()), ("rest".to_string(), "a/b.txt".to_string())]);
    }

    #[test]
    fn resolve_returns_route_and_actions_together() {
        let mut routes = Routes::new();
        routes.route("/foo", http::Method::GET, Arc::new(Ok200)).unwrap();
        routes.before("/*", Arc::new(NoOp)).unwrap();
        routes.after("/foo", Arc::new(NoOp)).unwrap();

        let resolved = routes.resolve("/foo", &http::Method::GET);
        assert!(matches!(resolved.route, crate::routing::tree::Resolution::Matched(_)));
        assert_eq!(resolved.before.len(), 1);
        assert_eq!(resolved.after.len(), 1);
    }
}
