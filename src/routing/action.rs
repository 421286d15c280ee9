//! The action tree: resolves *all* matching before/after actions for a
//! path and orders them by specificity.
//!
//! Unlike the route tree, overlapping patterns are explicitly permitted,
//! so every branch of the trie that structurally matches the path is
//! collected, not just the most specific one. Each registered pattern
//! keeps its own "depth of divergence" (the index of its first
//! non-static segment) and the kind of that segment, which together form
//! the ordering key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Error;
use crate::routing::{pattern_segments, BoxAction, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DivKind {
    CatchAll,
    Param,
    Static,
}

struct Entry {
    pattern: String,
    divergence_depth: usize,
    kind: DivKind,
    registration_index: u64,
    action: BoxAction,
}

#[derive(Default)]
struct Leaf {
    before: Vec<Entry>,
    after: Vec<Entry>,
}

#[derive(Default)]
struct Node {
    static_children: HashMap<String, Box<Node>>,
    param_children: Vec<(String, Box<Node>)>,
    catch_alls: Vec<(String, Leaf)>,
    leaf: Leaf,
}

/// One matched action with its pattern, ready to be driven by the
/// exchange.
pub struct MatchedAction {
    pub pattern: String,
    pub action: BoxAction,
}

/// A segment-trie of registered before/after actions.
#[derive(Default)]
pub struct ActionTree {
    root: Node,
    next_before_index: AtomicU64,
    next_after_index: AtomicU64,
}

fn divergence(segments: &[Segment]) -> (usize, DivKind) {
    for (i, s) in segments.iter().enumerate() {
        match s {
            Segment::Param(_) => return (i, DivKind::Param),
            Segment::CatchAll(_) => return (i, DivKind::CatchAll),
            Segment::Static(_) => {}
        }
    }
    (segments.len(), DivKind::Static)
}

impl ActionTree {
    pub fn new() -> ActionTree {
        ActionTree::default()
    }

    pub fn register_before(&mut self, pattern: &str, action: BoxAction) -> Result<(), Error> {
        let idx = self.next_before_index.fetch_add(1, Ordering::Relaxed);
        self.register(pattern, action, idx, true)
    }

    pub fn register_after(&mut self, pattern: &str, action: BoxAction) -> Result<(), Error> {
        let idx = self.next_after_index.fetch_add(1, Ordering::Relaxed);
        self.register(pattern, action, idx, false)
    }

    fn register(&mut self, pattern: &str, action: BoxAction, idx: u64, is_before: bool) -> Result<(), Error> {
        let segments = pattern_segments(pattern)?;
        let (divergence_depth, kind) = divergence(&segments);

        let mut node = &mut self.root;
        let mut iter = segments.into_iter().peekable();
        let mut leaf: &mut Leaf;

        loop {
            match iter.next() {
                Some(Segment::Static(s)) => {
                    node = node.static_children.entry(s).or_insert_with(|| Box::new(Node::default()));
                }
                Some(Segment::Param(name)) => {
                    let found = node.param_children.iter().position(|(n, _)| *n == name);
                    let pos = found.unwrap_or_else(|| {
                        node.param_children.push((name.clone(), Box::new(Node::default())));
                        node.param_children.len() - 1
                    });
                    node = &mut node.param_children[pos].1;
                }
                Some(Segment::CatchAll(name)) => {
                    let found = node.catch_alls.iter().position(|(n, _)| *n == name);
                    let pos = found.unwrap_or_else(|| {
                        node.catch_alls.push((name.clone(), Leaf::default()));
                        node.catch_alls.len() - 1
                    });
                    leaf = &mut node.catch_alls[pos].1;
                    return insert_entry(leaf, pattern, divergence_depth, kind, idx, action, is_before);
                }
                None => {
                    leaf = &mut node.leaf;
                    return insert_entry(leaf, pattern, divergence_depth, kind, idx, action, is_before);
                }
            }
        }
    }

    /// Collects and orders all matching before-actions:
    /// ascending depth; at equal depth, catch-all < single-param < static;
    /// at equal specificity, registration order ascending.
    pub fn resolve_before(&self, segments: &[String]) -> Vec<MatchedAction> {
        let mut out = Vec::new();
        collect(&self.root, segments, &mut out, true);
        out.sort_by(|a: &&Entry, b: &&Entry| {
            a.divergence_depth
                .cmp(&b.divergence_depth)
                .then_with(|| b.kind.cmp(&a.kind))
                .then_with(|| a.registration_index.cmp(&b.registration_index))
        });
        out.into_iter().map(to_matched).collect()
    }

    /// Collects and orders all matching after-actions:
    /// descending depth; at equal depth, static < single-param <
    /// catch-all; at equal specificity, registration order ascending.
    pub fn resolve_after(&self, segments: &[String]) -> Vec<MatchedAction> {
        let mut out = Vec::new();
        collect(&self.root, segments, &mut out, false);
        out.sort_by(|a: &&Entry, b: &&Entry| {
            b.divergence_depth
                .cmp(&a.divergence_depth)
                .then_with(|| a.kind.cmp(&b.kind))
                .then_with(|| a.registration_index.cmp(&b.registration_index))
        });
        out.into_iter().map(to_matched).collect()
    }
}

fn to_matched(e: &Entry) -> MatchedAction {
    MatchedAction {
        pattern: e.pattern.clone(),
        action: e.action.clone(),
    }
}

fn insert_entry(
    leaf: &mut Leaf,
    pattern: &str,
    divergence_depth: usize,
    kind: DivKind,
    idx: u64,
    action: BoxAction,
    is_before: bool,
) -> Result<(), Error> {
    let list = if is_before { &mut leaf.before } else { &mut leaf.after };
    if list
        .iter()
        .any(|e| e.pattern == pattern && Arc::ptr_eq(&e.action, &action))
    {
        return Err(Error::new_route_collision());
    }
    list.push(Entry {
        pattern: pattern.to_string(),
        divergence_depth,
        kind,
        registration_index: idx,
        action,
    });
    Ok(())
}

fn collect<'a>(node: &'a Node, segments: &[String], out: &mut Vec<&'a Entry>, before: bool) {
    if segments.is_empty() {
        out.extend(if before { &node.leaf.before } else { &node.leaf.after });
        for (_, leaf) in &node.catch_alls {
            out.extend(if before { &leaf.before } else { &leaf.after });
        }
        return;
    }

    let (head, rest) = segments.split_first().unwrap();

    if let Some(child) = node.static_children.get(head) {
        collect(child, rest, out, before);
    }
    for (_, child) in &node.param_children {
        collect(child, rest, out, before);
    }
    for (_, leaf) in &node.catch_alls {
        out.extend(if before { &leaf.before } else { &leaf.after });
    }
}
