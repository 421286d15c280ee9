//! The route tree: resolves at most one route per path.

use std::collections::HashMap;

use http::Method;

use crate::error::Error;
use crate::routing::{pattern_segments, BoxHandler, Segment};

#[derive(Default)]
struct Node {
    static_children: HashMap<String, Node>,
    param_child: Option<(String, Box<Node>)>,
    catch_all: Option<(String, Leaf)>,
    leaf: Option<Leaf>,
}

#[derive(Default)]
struct Leaf {
    pattern: String,
    methods: HashMap<Method, BoxHandler>,
}

/// The result of a successful route lookup.
pub struct Matched<'a> {
    pub pattern: &'a str,
    pub handler: &'a BoxHandler,
    pub params: Vec<(String, String)>,
}

/// Resolution outcomes other than a clean match.
pub enum Resolution<'a> {
    Matched(Matched<'a>),
    /// The path matched a route, but not this method. Carries the
    /// implemented methods for the `Allow` header / 405 body.
    MethodNotAllowed(Vec<Method>),
    NoRouteFound,
}

/// A segment-trie of registered routes.
#[derive(Default)]
pub struct RouteTree {
    root: Node,
}

impl RouteTree {
    pub fn new() -> RouteTree {
        RouteTree::default()
    }

    /// Registers `handler` at `pattern` for `method`. Rejects a pattern
    /// whose match set would overlap an existing route at the same depth
    /// class (two distinct parameter names at the same position, two
    /// catch-alls at the same position, or the same pattern+method
    /// registered twice) with `RouteCollision`.
    pub fn register(&mut self, pattern: &str, method: Method, handler: BoxHandler) -> Result<(), Error> {
        let segments = pattern_segments(pattern)?;
        let mut node = &mut self.root;
        let mut iter = segments.into_iter().peekable();

        while let Some(seg) = iter.next() {
            match seg {
                Segment::Static(s) => {
                    node = node.static_children.entry(s).or_default();
                }
                Segment::Param(name) => {
                    match &mut node.param_child {
                        Some((existing, _)) if *existing != name => {
                            return Err(Error::new_route_collision());
                        }
                        Some(_) => {}
                        None => {
                            node.param_child = Some((name.clone(), Box::new(Node::default())));
                        }
                    }
                    node = &mut node.param_child.as_mut().unwrap().1;
                }
                Segment::CatchAll(name) => {
                    if iter.peek().is_some() {
                        return Err(Error::new_invalid_pattern("catch-all must be the last segment"));
                    }
                    if node.catch_all.is_some() {
                        return Err(Error::new_route_collision());
                    }
                    let mut leaf = Leaf {
                        pattern: pattern.to_string(),
                        methods: HashMap::new(),
                    };
                    leaf.methods.insert(method, handler);
                    node.catch_all = Some((name, leaf));
                    return Ok(());
                }
            }
        }

        let leaf = node.leaf.get_or_insert_with(|| Leaf {
            pattern: pattern.to_string(),
            methods: HashMap::new(),
        });
        if leaf.methods.contains_key(&method) {
            return Err(Error::new_route_collision());
        }
        leaf.methods.insert(method, handler);
        Ok(())
    }

    /// Resolves `segments` against `method`, preferring static segments
    /// over single-param over catch-all.
    pub fn resolve(&self, segments: &[String], method: &Method) -> Resolution<'_> {
        match resolve_node(&self.root, segments, Vec::new()) {
            Some((leaf, params)) => match leaf.methods.get(method) {
                Some(handler) => Resolution::Matched(Matched {
                    pattern: &leaf.pattern,
                    handler,
                    params,
                }),
                None => {
                    let mut methods: Vec<Method> = leaf.methods.keys().cloned().collect();
                    methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                    Resolution::MethodNotAllowed(methods)
                }
            },
            None => Resolution::NoRouteFound,
        }
    }
}

fn resolve_node<'a>(
    node: &'a Node,
    segments: &[String],
    mut params: Vec<(String, String)>,
) -> Option<(&'a Leaf, Vec<(String, String)>)> {
    if segments.is_empty() {
        if let Some(leaf) = &node.leaf {
            return Some((leaf, params));
        }
        // A catch-all may also match a fully-consumed (empty) remainder.
        if let Some((name, leaf)) = &node.catch_all {
            let mut p = params.clone();
            p.push((name.clone(), String::new()));
            return Some((leaf, p));
        }
        return None;
    }

    let (head, rest) = segments.split_first().unwrap();

    if let Some(child) = node.static_children.get(head) {
        if let Some(found) = resolve_node(child, rest, params.clone()) {
            return Some(found);
        }
    }

    if let Some((name, child)) = &node.param_child {
        let mut p = params.clone();
        p.push((name.clone(), head.clone()));
        if let Some(found) = resolve_node(child, rest, p) {
            return Some(found);
        }
    }

    if let Some((name, leaf)) = &node.catch_all {
        params.push((name.clone(), segments.join("/")));
        return Some((leaf, params));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ok200;
    #[async_trait::async_trait]
    impl crate::routing::Handler for Ok200 {
        async fn call(&self, _req: crate::request::Request) -> crate::response::Response {
            crate::response::Response::new(http::StatusCode::OK)
        }
    }

    fn h() -> BoxHandler {
        std::sync::Arc::new(Ok200)
    }

    #[test]
    fn static_beats_param_at_same_depth() {
        let mut tree = RouteTree::new();
        tree.register("/foo/bar", Method::GET, h()).unwrap();
        tree.register("/foo/:x", Method::GET, h()).unwrap();
        match tree.resolve(&["foo".into(), "bar".into()], &Method::GET) {
            Resolution::Matched(m) => assert_eq!(m.pattern, "/foo/bar"),
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn root_matches_only_root_pattern() {
        let mut tree = RouteTree::new();
        tree.register("/", Method::GET, h()).unwrap();
        assert!(matches!(tree.resolve(&[], &Method::GET), Resolution::Matched(_)));
        assert!(matches!(
            tree.resolve(&["x".into()], &Method::GET),
            Resolution::NoRouteFound
        ));
    }

    #[test]
    fn catch_all_matches_everything_including_root() {
        let mut tree = RouteTree::new();
        tree.register("/*x", Method::GET, h()).unwrap();
        assert!(matches!(tree.resolve(&[], &Method::GET), Resolution::Matched(_)));
        assert!(matches!(
            tree.resolve(&["a".into(), "b".into()], &Method::GET),
            Resolution::Matched(_)
        ));
    }

    #[test]
    fn wrong_method_yields_method_not_allowed() {
        let mut tree = RouteTree::new();
        tree.register("/foo", Method::GET, h()).unwrap();
        match tree.resolve(&["foo".into()], &Method::POST) {
            Resolution::MethodNotAllowed(methods) => assert_eq!(methods, vec![Method::GET]),
            _ => panic!("expected method not allowed"),
        }
    }

    #[test]
    fn conflicting_param_names_at_same_position_collide() {
        let mut tree = RouteTree::new();
        tree.register("/:a/bar", Method::GET, h()).unwrap();
        let err = tree.register("/:b/bar", Method::GET, h()).unwrap_err();
        assert!(err.is_resolution());
    }

    #[test]
    fn duplicate_pattern_and_method_collides() {
        let mut tree = RouteTree::new();
        tree.register("/foo", Method::GET, h()).unwrap();
        let err = tree.register("/foo", Method::GET, h()).unwrap_err();
        assert!(err.is_resolution());
    }
}
