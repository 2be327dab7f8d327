//! The grammar: owner of patterns and nodes, and the compile scheduler.
//!
//! A `Grammar` owns a [`PatternRegistry`] and a name→node mapping.  Nodes
//! are added unbound by their producers, inserted (optionally binding them
//! to the grammar), and then driven to readiness by [`Grammar::compile`],
//! a fixed-point scheduler: each pass compiles the remaining candidates in
//! ascending `compile_order_hint` order and demotes the ones that still
//! fail, until a pass makes no progress.  Convergence does not depend on
//! the hints; they only reduce the number of passes for acyclic dependency
//! chains.  The residual failed set describes the unresolved subgraph.
//!
//! The grammar and its nodes form a single ownership domain: adding,
//! removing or recompiling nodes must not race any match-time traversal.
//! Matching itself needs only `&Grammar`, but the indentation node keeps
//! per-node mutable state, so concurrent matches require distinct (cloned)
//! grammars; cloning deep-copies that state and [`Grammar::reset`] clears
//! it between inputs.

use crate::buffer::BufferMatcher;
use crate::diag::LoadError;
use crate::diag::MatchError;
use crate::diag::NodeError;
use crate::nodes::GrammarNode;
use crate::nodes::ModeOverride;
use crate::nodes::NodeSpec;
use crate::nodes::Value;
use crate::patterns::PatternRegistry;
use fnv::FnvHashMap;
use fnv::FnvHashSet;
use itertools::Itertools;
use log::debug;
use log::trace;
use std::cell::Ref;
use std::cell::RefCell;

/// The portable form of a grammar: its patterns and node configurations.
///
/// Node order is significant (it is the compile scheduler's initial
/// traversal order) and is preserved by [`Grammar::describe`] and
/// [`Grammar::from_description`].  The concrete on-disk encoding is the
/// host's choice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarDescription {
    /// Pattern sources by name, sorted by name.
    pub patterns: Vec<(String, Vec<u8>)>,
    /// Node configurations by name, in insertion order.
    pub nodes: Vec<(String, NodeSpec)>,
}

/// A set of named, cross-referencing match nodes plus their pattern
/// registry.
#[derive(Clone, Debug, Default)]
pub struct Grammar {
    patterns: PatternRegistry,
    nodes: FnvHashMap<String, RefCell<GrammarNode>>,
    order: Vec<String>,
}

impl Grammar {
    /// Creates an empty grammar.
    pub fn new() -> Grammar {
        Grammar::default()
    }

    /// The pattern registry.
    pub fn patterns(&self) -> &PatternRegistry {
        &self.patterns
    }

    /// The pattern registry, for registration and removal.
    pub fn patterns_mut(&mut self) -> &mut PatternRegistry {
        &mut self.patterns
    }

    /// Borrows a node by name.
    pub fn node(&self, name: &str) -> Option<Ref<'_, GrammarNode>> {
        self.nodes.get(name).map(|cell| cell.borrow())
    }

    /// True when `name` is present.
    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Node names in insertion order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|n| n.as_str())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when the grammar holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Inserts `node` under its own name.
    ///
    /// Refuses a name collision unless `replace` is set (a replacement keeps
    /// the original position in the traversal order).  `bind` sets the
    /// node's grammar binding; `compile` schedules a compile of the new node
    /// immediately.
    pub fn add_node(
        &mut self,
        node: GrammarNode,
        replace: bool,
        bind: bool,
        compile: bool,
    ) -> Result<(), NodeError> {
        let name = node.name().to_string();
        if !replace && self.nodes.contains_key(&name) {
            return Err(NodeError::Exists { name });
        }
        let mut node = node;
        node.set_bound(bind);
        if !self.nodes.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.nodes.insert(name.clone(), RefCell::new(node));
        if compile {
            self.compile(Some(&[name.as_str()]), false);
        }
        Ok(())
    }

    /// Removes and returns the node called `name`, unbinding it.
    ///
    /// A missing name is an error unless `ignore_missing` is set.  `compile`
    /// schedules a recompile of the remaining failed nodes, so dependents
    /// notice the removal.
    pub fn pop_node(
        &mut self,
        name: &str,
        ignore_missing: bool,
        compile: bool,
    ) -> Result<Option<GrammarNode>, NodeError> {
        match self.nodes.remove(name) {
            Some(cell) => {
                self.order.retain(|n| n != name);
                let mut node = cell.into_inner();
                node.set_bound(false);
                if compile {
                    self.compile(None, true);
                }
                Ok(Some(node))
            }
            None if ignore_missing => Ok(None),
            None => Err(NodeError::Missing {
                name: name.to_string(),
            }),
        }
    }

    /// Partitions the given names (or all nodes) into the ready set and the
    /// failed set.  Names the grammar does not hold count as failed.
    pub fn node_stat(
        &self,
        names: Option<&[&str]>,
    ) -> (FnvHashSet<String>, FnvHashSet<String>) {
        let mut ready = FnvHashSet::default();
        let mut failed = FnvHashSet::default();
        let selection: Vec<String> = match names {
            None => self.order.clone(),
            Some(names) => names.iter().map(|n| n.to_string()).collect(),
        };
        for name in selection {
            match self.nodes.get(&name) {
                Some(cell) if cell.borrow().is_ready() => ready.insert(name),
                _ => failed.insert(name),
            };
        }
        (ready, failed)
    }

    /// Drives the given nodes (or all nodes) towards readiness, returning
    /// the names that remain failed.
    ///
    /// With `needed` set, only nodes whose `failure` is currently set are
    /// candidates; running the scheduler twice in a row therefore produces
    /// the same ready/failed partition.
    pub fn compile(&self, names: Option<&[&str]>, needed: bool) -> FnvHashSet<String> {
        let mut unknown = FnvHashSet::default();
        let mut candidates: Vec<String> = Vec::new();
        match names {
            None => candidates.extend(self.order.iter().cloned()),
            Some(names) => {
                for name in names {
                    if self.nodes.contains_key(*name) {
                        candidates.push(name.to_string());
                    } else {
                        unknown.insert(name.to_string());
                    }
                }
            }
        }
        if needed {
            candidates.retain(|name| !self.nodes[name].borrow().is_ready());
        }
        let total = candidates.len();
        let mut successes = FnvHashSet::default();
        loop {
            let before = successes.len();
            let round = candidates
                .iter()
                .filter(|name| !successes.contains(*name))
                .sorted_by_key(|name| self.nodes[*name].borrow().compile_order_hint());
            for name in round {
                let mut node = self.nodes[name].borrow_mut();
                node.compile(self);
                if node.is_ready() {
                    trace!("compiled node {:?}", name);
                    successes.insert(name.clone());
                } else {
                    trace!("node {:?} failed: {}", name, node.failure().unwrap());
                    node.bump_hint();
                }
            }
            debug!("compile pass: {} of {} node(s) ready", successes.len(), total);
            if successes.len() == before {
                break;
            }
        }
        candidates
            .into_iter()
            .filter(|name| !successes.contains(name))
            .chain(unknown)
            .collect()
    }

    /// Matches the node called `name` against `bm` with its configured
    /// return mode.
    pub fn match_node(
        &self,
        name: &str,
        bm: &mut BufferMatcher<'_>,
    ) -> Result<Option<Value>, MatchError> {
        self.match_node_with(name, bm, None)
    }

    /// Matches the node called `name` against `bm`, optionally overriding
    /// its return mode for this call.
    pub fn match_node_with(
        &self,
        name: &str,
        bm: &mut BufferMatcher<'_>,
        over: Option<ModeOverride>,
    ) -> Result<Option<Value>, MatchError> {
        let node = self.node(name).ok_or_else(|| MatchError::NodeMissing {
            name: name.to_string(),
        })?;
        node.invoke(self, bm, over)
    }

    /// Matches the node called `name` against a fresh cursor over `data`.
    pub fn match_bytes(&self, name: &str, data: &[u8]) -> Result<Option<Value>, MatchError> {
        let mut bm = BufferMatcher::new(data);
        self.match_node(name, &mut bm)
    }

    /// Resets match-time state (indentation stacks) for reuse across
    /// inputs.
    pub fn reset(&self) {
        for cell in self.nodes.values() {
            cell.borrow().reset_state();
        }
    }

    /// The grammar's portable description; see [`GrammarDescription`].
    pub fn describe(&self) -> GrammarDescription {
        let patterns = self
            .patterns
            .names()
            .sorted()
            .map(|name| {
                (
                    name.to_string(),
                    self.patterns.source(name).unwrap_or_default().to_vec(),
                )
            })
            .collect();
        let nodes = self
            .order
            .iter()
            .map(|name| (name.clone(), self.nodes[name].borrow().spec()))
            .collect();
        GrammarDescription { patterns, nodes }
    }

    /// Rebuilds a grammar from a description produced by
    /// [`Grammar::describe`].  Nodes come back bound but uncompiled; run
    /// [`Grammar::compile`] to resolve them.
    pub fn from_description(desc: &GrammarDescription) -> Result<Grammar, LoadError> {
        let mut grammar = Grammar::new();
        for (name, source) in &desc.patterns {
            grammar.patterns.add(name, source, false)?;
        }
        for (name, spec) in &desc.nodes {
            let node = GrammarNode::from_spec(name, spec.clone())?;
            grammar.add_node(node, false, true, false)?;
        }
        Ok(grammar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::PatternMode;
    use crate::nodes::RepeatMode;
    use crate::nodes::SeqItem;
    use crate::nodes::SequenceMode;
    use crate::nodes::UnionMode;
    use assert_matches::assert_matches;

    fn lit(name: &str, bytes: &[u8]) -> GrammarNode {
        GrammarNode::literal(name, bytes).unwrap()
    }

    #[test]
    fn add_refuses_collisions_without_replace() {
        let mut g = Grammar::new();
        g.add_node(lit("a", b"x"), false, true, false).unwrap();
        assert_matches!(
            g.add_node(lit("a", b"y"), false, true, false),
            Err(NodeError::Exists { .. })
        );
        g.add_node(lit("a", b"y"), true, true, false).unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn replace_keeps_the_traversal_position() {
        let mut g = Grammar::new();
        g.add_node(lit("a", b"x"), false, true, false).unwrap();
        g.add_node(lit("b", b"y"), false, true, false).unwrap();
        g.add_node(lit("a", b"z"), true, true, false).unwrap();
        let names: Vec<&str> = g.node_names().collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn pop_unbinds_and_reports_missing() {
        let mut g = Grammar::new();
        g.add_node(lit("a", b"x"), false, true, false).unwrap();
        let popped = g.pop_node("a", false, false).unwrap().unwrap();
        assert!(!popped.is_bound());
        assert_matches!(g.pop_node("a", false, false), Err(NodeError::Missing { .. }));
        assert_matches!(g.pop_node("a", true, false), Ok(None));
    }

    #[test]
    fn unbound_nodes_fail_compilation() {
        let mut g = Grammar::new();
        g.add_node(lit("a", b"x"), false, false, false).unwrap();
        let failed = g.compile(None, false);
        assert!(failed.contains("a"));
        assert_matches!(
            g.node("a").unwrap().failure(),
            Some(NodeError::NotBound { .. })
        );
    }

    #[test]
    fn node_stat_partitions_the_node_set() {
        let mut g = Grammar::new();
        g.add_node(lit("a", b"x"), false, true, false).unwrap();
        g.add_node(
            GrammarNode::repeat("r", "ghost", 0, None, RepeatMode::Seq).unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        g.compile(None, false);
        let (ready, failed) = g.node_stat(None);
        assert!(ready.contains("a"));
        assert!(failed.contains("r"));
        assert_eq!(ready.len() + failed.len(), g.len());
        let (ready, failed) = g.node_stat(Some(&["a", "nowhere"]));
        assert!(ready.contains("a"));
        assert!(failed.contains("nowhere"));
    }

    #[test]
    fn compile_converges_regardless_of_insertion_order() {
        // dependencies inserted after their dependents
        let mut g = Grammar::new();
        g.add_node(
            GrammarNode::sequence(
                "stmt",
                vec![SeqItem::plain("head"), SeqItem::plain("tail")],
                SequenceMode::Seq,
                true,
                None,
            )
            .unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        g.add_node(
            GrammarNode::union("head", vec!["word".into()], UnionMode::Val).unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        g.add_node(
            GrammarNode::pattern("word", "word", None, PatternMode::Full),
            false,
            true,
            false,
        )
        .unwrap();
        g.add_node(lit("tail", b";"), false, true, false).unwrap();
        g.patterns_mut().add("word", br"\w+", false).unwrap();
        let failed = g.compile(None, false);
        assert!(failed.is_empty(), "failed: {:?}", failed);

        // and the same graph inserted leaves-first
        let mut g = Grammar::new();
        g.patterns_mut().add("word", br"\w+", false).unwrap();
        g.add_node(lit("tail", b";"), false, true, false).unwrap();
        g.add_node(
            GrammarNode::pattern("word", "word", None, PatternMode::Full),
            false,
            true,
            false,
        )
        .unwrap();
        g.add_node(
            GrammarNode::union("head", vec!["word".into()], UnionMode::Val).unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        g.add_node(
            GrammarNode::sequence(
                "stmt",
                vec![SeqItem::plain("head"), SeqItem::plain("tail")],
                SequenceMode::Seq,
                true,
                None,
            )
            .unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        assert!(g.compile(None, false).is_empty());
    }

    #[test]
    fn needed_compilation_is_idempotent() {
        let mut g = Grammar::new();
        g.add_node(lit("a", b"x"), false, true, false).unwrap();
        g.add_node(
            GrammarNode::repeat("r", "ghost", 0, None, RepeatMode::Seq).unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        let first = g.compile(None, true);
        let second = g.compile(None, true);
        assert_eq!(first, second);
        assert_eq!(g.node_stat(None), {
            g.compile(None, true);
            g.node_stat(None)
        });
    }

    #[test]
    fn dependency_failures_chain_to_their_cause() {
        let mut g = Grammar::new();
        g.add_node(
            GrammarNode::pattern("word", "word", None, PatternMode::Full),
            false,
            true,
            false,
        )
        .unwrap();
        g.add_node(
            GrammarNode::repeat("words", "word", 1, None, RepeatMode::Seq).unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        g.compile(None, false);
        assert_matches!(
            g.node("words").unwrap().failure(),
            Some(NodeError::DependencyNotReady { cause, .. })
                if matches!(cause.as_ref(), NodeError::PatternMissing { .. })
        );
    }

    #[test]
    fn a_node_cannot_be_its_own_sub_node() {
        let mut g = Grammar::new();
        g.add_node(
            GrammarNode::repeat("r", "r", 0, None, RepeatMode::Seq).unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        let failed = g.compile(None, false);
        assert!(failed.contains("r"));
    }

    #[test]
    fn self_referencing_through_a_reference_node_compiles() {
        let mut g = Grammar::new();
        g.add_node(GrammarNode::reference("loop", "loop"), false, true, false)
            .unwrap();
        assert!(g.compile(None, false).is_empty());
    }

    #[test]
    fn compile_reports_unknown_candidates() {
        let g = Grammar::new();
        let failed = g.compile(Some(&["ghost"]), false);
        assert!(failed.contains("ghost"));
    }

    #[test]
    fn descriptions_round_trip() {
        let mut g = Grammar::new();
        g.patterns_mut().add("word", br"\w+", false).unwrap();
        g.add_node(
            GrammarNode::pattern("word", "word", None, PatternMode::Full),
            false,
            true,
            false,
        )
        .unwrap();
        g.add_node(
            GrammarNode::repeat("words", "word", 1, None, RepeatMode::Count).unwrap(),
            false,
            true,
            false,
        )
        .unwrap();
        g.add_node(GrammarNode::indentation("ind"), false, true, false)
            .unwrap();
        let desc = g.describe();
        let rebuilt = Grammar::from_description(&desc).unwrap();
        assert_eq!(rebuilt.describe(), desc);
        let names: Vec<&str> = rebuilt.node_names().collect();
        assert_eq!(names, ["word", "words", "ind"]);
        assert!(rebuilt.compile(None, false).is_empty());
        assert_eq!(
            rebuilt.match_bytes("words", b"a b c").unwrap(),
            Some(Value::Int(1))
        );
    }
}
