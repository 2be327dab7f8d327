//! Grammar nodes and the match engine.
//!
//! A grammar is a set of named, cross-referencing match nodes.  The node
//! kinds form a closed set, modelled as the [`NodeKind`] variants; every
//! node carries the common metadata ([`GrammarNode`]): its name, its binding
//! to an owning grammar, a mutable `failure` slot, and the
//! `compile_order_hint` used by the compile scheduler.
//!
//! Nesting kinds hold their sub-nodes *by name* and resolve them against the
//! owning grammar, so the node graph can be cyclic without owning cycles and
//! nodes can be removed at any time.  Compilation verifies that every
//! reference resolves (and, except for [`NodeKind::Reference`], that the
//! referent is itself ready); matching then runs without re-checking inner
//! nodes.
//!
//! Matching a node either consumes input and produces a [`Value`], or
//! consumes nothing and reports no-match.  The outcome type is
//! `Result<Option<Value>, MatchError>`: `Ok(None)` is the no-match sentinel,
//! `Ok(Some(Value::None))` a vacuous success (a real value, distinct from
//! no-match), and `Err` the fatal errors that abort the whole match.  Every
//! kind's contract requires that a no-match return leaves the cursor exactly
//! where it was; Sequence, Repeat and Not implement this with explicit
//! save/restore on the cursor.

use crate::buffer::BufferMatcher;
use crate::diag::MatchError;
use crate::diag::NodeError;
use crate::grammar::Grammar;
use crate::patterns::bytes_regex;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::cell::Ref;
use std::cell::RefCell;
use tinyvec::TinyVec;

lazy_static! {
    static ref WHITESPACE: Regex = bytes_regex(r"\A\s+").unwrap();
    static ref INDENT: Regex = bytes_regex(r"\A\n([ \t]*)").unwrap();
}

/// Distinguished marks in the returned-value space.
///
/// These are produced only by the indentation node; no other match result
/// may collide with them, which is why [`Value::Mark`] values are rejected
/// as the configured result of Always and Not nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mark {
    /// The indentation level grew; the new level was pushed.
    Indent,
    /// The indentation level is unchanged.
    NoChange,
    /// The indentation level shrank; carries the number of levels popped.
    Dedent(usize),
}

/// A successful match result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// A vacuous success: a real value, distinct from no-match.
    None,
    /// An integer (repeat counts, configured Always/Not values).
    Int(i64),
    /// Raw matched bytes.
    Bytes(Vec<u8>),
    /// A name (union `NAME`/`PAIR` results).
    Str(String),
    /// An ordered sequence of sub-results.
    Seq(Vec<Value>),
    /// An insertion-ordered mapping of named sub-results.
    Map(Vec<(String, Value)>),
    /// An indentation mark.
    Mark(Mark),
    /// The raw record of a pattern hit (pattern mode `MATCH`).
    Match(MatchRecord),
}

impl Value {
    /// True for indentation marks.
    pub fn is_mark(&self) -> bool {
        matches!(self, Value::Mark(_))
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::Mark(_) => "mark",
            Value::Match(_) => "match record",
        }
    }
}

/// Inserts into an ordered mapping, keeping the first position but the last
/// value for duplicate keys.
fn map_insert(map: &mut Vec<(String, Value)>, key: String, value: Value) {
    match map.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => map.push((key, value)),
    }
}

/// The raw record of a pattern hit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchRecord {
    /// Absolute byte offset the hit started at.
    pub start: usize,
    /// The full matched bytes (group 0).
    pub full: Vec<u8>,
    /// Positional capture groups 1.., `None` where a group did not
    /// participate.
    pub groups: Vec<Option<Vec<u8>>>,
    /// Named capture groups, in declaration order.
    pub named: Vec<(String, Option<Vec<u8>>)>,
}

/// Result shape of a successful pattern match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternMode {
    /// The raw [`MatchRecord`].
    Match,
    /// Named capture groups as a mapping.
    Dict,
    /// Positional capture groups as a sequence.
    Seq,
    /// The full matched bytes.
    Full,
}

impl Default for PatternMode {
    fn default() -> PatternMode {
        PatternMode::Match
    }
}

/// Result shape of a successful union match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnionMode {
    /// `(name, value)` of the winning alternative.
    Pair,
    /// A mapping with keys `name` and `val`.
    Struct,
    /// The winning alternative's name alone.
    Name,
    /// The winning alternative's value alone.
    Val,
}

impl Default for UnionMode {
    fn default() -> UnionMode {
        UnionMode::Pair
    }
}

/// Result shape of a successful sequence match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceMode {
    /// All sub-results in order.
    Seq,
    /// Sub-results keyed by tag or sub-node name; duplicates keep the last.
    Dict,
    /// Sub-results merged: mappings merge, sequences concatenate, a single
    /// element is returned bare, no elements return none.
    Unpack,
}

impl Default for SequenceMode {
    fn default() -> SequenceMode {
        SequenceMode::Seq
    }
}

/// Result shape of a successful repeat match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepeatMode {
    /// All sub-results in order.
    Seq,
    /// The first sub-result (none when `min == 0` and nothing matched).
    First,
    /// The last sub-result (none when `min == 0` and nothing matched).
    Last,
    /// The number of matches.
    Count,
}

impl Default for RepeatMode {
    fn default() -> RepeatMode {
        RepeatMode::Seq
    }
}

/// A per-call override of a node's configured return mode.
///
/// The override must fit the node's kind; kinds without a return mode reject
/// any override.  An override passed to a Reference is forwarded to its
/// target.
#[derive(Clone, Copy, Debug)]
pub enum ModeOverride {
    /// Override for a pattern node.
    Pattern(PatternMode),
    /// Override for a union node.
    Union(UnionMode),
    /// Override for a sequence node.
    Sequence(SequenceMode),
    /// Override for a repeat node.
    Repeat(RepeatMode),
}

/// One position of a sequence: the sub-node's name plus its optional tag.
///
/// `tag` of `None` means the item participates positionally; a non-empty tag
/// keys the item under the `DICT` mode; the empty tag marks the item as the
/// sole value of the group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeqItem {
    /// Name of the sub-node.
    pub node: String,
    /// Optional tag; see the type documentation.
    pub tag: Option<String>,
}

impl SeqItem {
    /// An untagged item.
    pub fn plain(node: &str) -> SeqItem {
        SeqItem {
            node: node.to_string(),
            tag: None,
        }
    }
}

/// The closed set of node kinds, with their configuration and kind-specific
/// state.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Applies a registered pattern's compiled regex.
    Pattern {
        /// Name of the pattern in the owning grammar's registry.
        pattern: String,
        /// When set, a hit returns this capture group's bytes regardless of
        /// the return mode.
        group: Option<usize>,
        /// Configured return mode.
        mode: PatternMode,
        /// Compiled by the scheduler; `None` until then.
        regex: Option<Regex>,
    },
    /// Compares a literal byte string.
    Literal {
        /// The bytes to match.
        bytes: Vec<u8>,
    },
    /// Tries sub-nodes in order, first success wins.
    Union {
        /// Sub-node names, in the order they are tried.
        members: Vec<String>,
        /// Configured return mode.
        mode: UnionMode,
    },
    /// Matches sub-nodes in order, all or nothing.
    Sequence {
        /// The items, in match order.
        items: Vec<SeqItem>,
        /// Configured return mode.
        mode: SequenceMode,
        /// Skip whitespace before each item.
        skip_ws: bool,
        /// When set, a failure at or after this item index escalates to a
        /// hard error instead of backtracking.
        stealer: Option<usize>,
    },
    /// Matches one sub-node between `min` and `max` times, greedily.
    Repeat {
        /// Name of the repeated sub-node.
        node: String,
        /// Minimum number of matches.
        min: usize,
        /// Maximum number of matches; `None` is unbounded.
        max: Option<usize>,
        /// Configured return mode.
        mode: RepeatMode,
    },
    /// Succeeds (with a configured value) exactly when its sub-node fails.
    Not {
        /// Name of the negated sub-node.
        node: String,
        /// Value returned on negative success.
        value: Value,
    },
    /// Always succeeds with a configured value, consuming nothing.
    Always {
        /// The value returned.
        value: Value,
    },
    /// Never matches.
    Never,
    /// Tracks indentation, producing [`Mark`] values.
    Indentation {
        /// The open indentation levels; strictly increasing, 0 at the
        /// bottom.
        stack: RefCell<TinyVec<[usize; 4]>>,
    },
    /// Delegates to another node, resolved lazily by name.
    Reference {
        /// Name of the target node.
        target: String,
    },
}

const HINT_VALUE: i32 = -900;
const HINT_LEAF: i32 = -100;
const HINT_SINGLE: i32 = 100;
const HINT_REPEAT: i32 = 150;
const HINT_MULTI: i32 = 200;
const HINT_SEQUENCE: i32 = 250;

fn indent_stack() -> TinyVec<[usize; 4]> {
    let mut stack: TinyVec<[usize; 4]> = TinyVec::default();
    stack.push(0);
    stack
}

/// A named match node.
#[derive(Clone, Debug)]
pub struct GrammarNode {
    name: String,
    bound: bool,
    compile_order_hint: i32,
    failure: Option<NodeError>,
    kind: NodeKind,
}

impl GrammarNode {
    fn new(name: &str, hint: i32, compiled: bool, kind: NodeKind) -> GrammarNode {
        GrammarNode {
            name: name.to_string(),
            bound: false,
            compile_order_hint: hint,
            failure: if compiled {
                None
            } else {
                Some(NodeError::NeverCompiled {
                    name: name.to_string(),
                })
            },
            kind,
        }
    }

    fn config_error(name: &str, detail: &str) -> NodeError {
        NodeError::Config {
            name: name.to_string(),
            detail: detail.to_string(),
        }
    }

    /// A pattern node.  A `group` of 0 selects the whole match and is
    /// normalized away.
    pub fn pattern(
        name: &str,
        pattern: &str,
        group: Option<usize>,
        mode: PatternMode,
    ) -> GrammarNode {
        GrammarNode::new(
            name,
            HINT_LEAF,
            false,
            NodeKind::Pattern {
                pattern: pattern.to_string(),
                group: group.filter(|&g| g != 0),
                mode,
                regex: None,
            },
        )
    }

    /// A literal node.  The literal must be non-empty.
    pub fn literal(name: &str, bytes: &[u8]) -> Result<GrammarNode, NodeError> {
        if bytes.is_empty() {
            return Err(GrammarNode::config_error(name, "a literal cannot be empty"));
        }
        Ok(GrammarNode::new(
            name,
            HINT_LEAF,
            true,
            NodeKind::Literal {
                bytes: bytes.to_vec(),
            },
        ))
    }

    /// A union node.  At least one member is required.
    pub fn union(
        name: &str,
        members: Vec<String>,
        mode: UnionMode,
    ) -> Result<GrammarNode, NodeError> {
        if members.is_empty() {
            return Err(GrammarNode::config_error(name, "a union needs members"));
        }
        let hint = HINT_MULTI + 10 * members.len() as i32;
        Ok(GrammarNode::new(
            name,
            hint,
            false,
            NodeKind::Union { members, mode },
        ))
    }

    /// A sequence node.  An empty item list is permitted and matches
    /// vacuously.
    pub fn sequence(
        name: &str,
        items: Vec<SeqItem>,
        mode: SequenceMode,
        skip_ws: bool,
        stealer: Option<usize>,
    ) -> Result<GrammarNode, NodeError> {
        if stealer == Some(0) {
            return Err(GrammarNode::config_error(
                name,
                "a stealer cannot open a group",
            ));
        }
        if let Some(s) = stealer {
            if s > items.len() {
                return Err(GrammarNode::config_error(
                    name,
                    "the stealer index is past the end of the group",
                ));
            }
        }
        let solos = items
            .iter()
            .filter(|i| i.tag.as_deref() == Some(""))
            .count();
        if solos > 1 {
            return Err(GrammarNode::config_error(
                name,
                "a group can have only one sole-value item",
            ));
        }
        let named = items
            .iter()
            .any(|i| matches!(i.tag.as_deref(), Some(t) if !t.is_empty()));
        if solos == 1 && named {
            return Err(GrammarNode::config_error(
                name,
                "a sole-value item cannot be mixed with named items",
            ));
        }
        let hint = HINT_SEQUENCE + 10 * items.len() as i32;
        Ok(GrammarNode::new(
            name,
            hint,
            false,
            NodeKind::Sequence {
                items,
                mode,
                skip_ws,
                stealer,
            },
        ))
    }

    /// A repeat node.  `max`, when bounded, must exceed `min`.
    pub fn repeat(
        name: &str,
        node: &str,
        min: usize,
        max: Option<usize>,
        mode: RepeatMode,
    ) -> Result<GrammarNode, NodeError> {
        if let Some(max) = max {
            if max <= min {
                return Err(GrammarNode::config_error(
                    name,
                    "the repeat maximum must exceed the minimum",
                ));
            }
        }
        Ok(GrammarNode::new(
            name,
            HINT_REPEAT,
            false,
            NodeKind::Repeat {
                node: node.to_string(),
                min,
                max,
                mode,
            },
        ))
    }

    /// A negative-lookahead node returning `value` when its sub-node does
    /// not match.  Marks are reserved and rejected.
    pub fn negation(name: &str, node: &str, value: Value) -> Result<GrammarNode, NodeError> {
        if value.is_mark() {
            return Err(GrammarNode::config_error(
                name,
                "marks are reserved and cannot be a configured value",
            ));
        }
        Ok(GrammarNode::new(
            name,
            HINT_SINGLE,
            false,
            NodeKind::Not {
                node: node.to_string(),
                value,
            },
        ))
    }

    /// An always-matching node.  Marks are reserved and rejected.
    pub fn always(name: &str, value: Value) -> Result<GrammarNode, NodeError> {
        if value.is_mark() {
            return Err(GrammarNode::config_error(
                name,
                "marks are reserved and cannot be a configured value",
            ));
        }
        Ok(GrammarNode::new(
            name,
            HINT_VALUE,
            true,
            NodeKind::Always { value },
        ))
    }

    /// A never-matching node.
    pub fn never(name: &str) -> GrammarNode {
        GrammarNode::new(name, HINT_VALUE, true, NodeKind::Never)
    }

    /// An indentation-tracking node.
    pub fn indentation(name: &str) -> GrammarNode {
        GrammarNode::new(
            name,
            HINT_LEAF,
            true,
            NodeKind::Indentation {
                stack: RefCell::new(indent_stack()),
            },
        )
    }

    /// A reference to another node, resolved lazily at match time.
    pub fn reference(name: &str, target: &str) -> GrammarNode {
        GrammarNode::new(
            name,
            HINT_SINGLE,
            false,
            NodeKind::Reference {
                target: target.to_string(),
            },
        )
    }

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's kind and configuration.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The stored failure, if the node is not ready.
    pub fn failure(&self) -> Option<&NodeError> {
        self.failure.as_ref()
    }

    /// True when `failure` is clear.
    pub fn is_ready(&self) -> bool {
        self.failure.is_none()
    }

    /// True when the node is bound to a grammar.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// The scheduler's ordering hint for this node.
    pub fn compile_order_hint(&self) -> i32 {
        self.compile_order_hint
    }

    pub(crate) fn set_bound(&mut self, bound: bool) {
        self.bound = bound;
    }

    pub(crate) fn bump_hint(&mut self) {
        self.compile_order_hint += 1;
    }

    /// Resets match-time state (the indentation stack).  Configuration,
    /// binding and compile results are untouched.
    pub(crate) fn reset_state(&self) {
        if let NodeKind::Indentation { stack } = &self.kind {
            *stack.borrow_mut() = indent_stack();
        }
    }

    /// Attempts to (re)compile the node against `grammar`, storing the
    /// outcome in `failure`.
    pub(crate) fn compile(&mut self, grammar: &Grammar) {
        self.failure = None;
        if !self.bound {
            self.failure = Some(NodeError::NotBound {
                name: self.name.clone(),
            });
            return;
        }
        let mut compiled = None;
        let failure = match &self.kind {
            NodeKind::Pattern { pattern, .. } => {
                if !grammar.patterns().is_complete(pattern) {
                    Some(NodeError::PatternMissing {
                        name: self.name.clone(),
                        pattern: pattern.clone(),
                    })
                } else {
                    match grammar.patterns().compile(pattern) {
                        Ok(re) => {
                            compiled = Some(re);
                            None
                        }
                        Err(e) => Some(NodeError::PatternInvalid {
                            name: self.name.clone(),
                            pattern: pattern.clone(),
                            detail: e.to_string(),
                        }),
                    }
                }
            }
            NodeKind::Literal { .. }
            | NodeKind::Always { .. }
            | NodeKind::Never
            | NodeKind::Indentation { .. } => None,
            NodeKind::Union { members, .. } => {
                self.check_dependencies(grammar, members.iter().map(String::as_str))
            }
            NodeKind::Sequence { items, .. } => {
                self.check_dependencies(grammar, items.iter().map(|i| i.node.as_str()))
            }
            NodeKind::Repeat { node, .. } | NodeKind::Not { node, .. } => {
                self.check_dependencies(grammar, std::iter::once(node.as_str()))
            }
            // lazily resolved: only existence is required at compile time,
            // which is what lets mutually recursive grammars converge
            NodeKind::Reference { target } => {
                if grammar.contains_node(target) {
                    None
                } else {
                    Some(NodeError::DependencyMissing {
                        name: self.name.clone(),
                        dependency: target.clone(),
                    })
                }
            }
        };
        if let NodeKind::Pattern { regex, .. } = &mut self.kind {
            *regex = compiled;
        }
        self.failure = failure;
    }

    fn check_dependencies<'s, I>(&self, grammar: &Grammar, deps: I) -> Option<NodeError>
    where
        I: Iterator<Item = &'s str>,
    {
        for dep in deps {
            if dep == self.name {
                return Some(NodeError::DependencyNotReady {
                    name: self.name.clone(),
                    dependency: dep.to_string(),
                    cause: Box::new(GrammarNode::config_error(
                        &self.name,
                        "a node cannot be its own direct sub-node",
                    )),
                });
            }
            match grammar.node(dep) {
                None => {
                    return Some(NodeError::DependencyMissing {
                        name: self.name.clone(),
                        dependency: dep.to_string(),
                    })
                }
                Some(node) => {
                    if let Some(cause) = node.failure() {
                        return Some(NodeError::DependencyNotReady {
                            name: self.name.clone(),
                            dependency: dep.to_string(),
                            cause: Box::new(cause.clone()),
                        });
                    }
                }
            }
        }
        None
    }

    /// Readiness-checked match: the entry point for a top-level invocation
    /// and for delegation through a Reference.
    pub fn invoke(
        &self,
        grammar: &Grammar,
        bm: &mut BufferMatcher<'_>,
        over: Option<ModeOverride>,
    ) -> Result<Option<Value>, MatchError> {
        if let Some(failure) = &self.failure {
            return Err(MatchError::NotReady(NodeError::NotReady {
                name: self.name.clone(),
                cause: Box::new(failure.clone()),
            }));
        }
        self.match_on(grammar, bm, over)
    }

    /// Matches without the readiness check; inner nodes were verified at
    /// compile time.
    fn match_on(
        &self,
        grammar: &Grammar,
        bm: &mut BufferMatcher<'_>,
        over: Option<ModeOverride>,
    ) -> Result<Option<Value>, MatchError> {
        match &self.kind {
            NodeKind::Pattern {
                regex: Some(re),
                group,
                mode,
                ..
            } => {
                let mode = self.pattern_mode(*mode, over)?;
                self.match_pattern(re, *group, mode, bm)
            }
            NodeKind::Pattern { regex: None, .. } => {
                Err(MatchError::NotReady(NodeError::NeverCompiled {
                    name: self.name.clone(),
                }))
            }
            NodeKind::Literal { bytes } => {
                self.no_mode(over)?;
                self.match_literal(bytes, bm)
            }
            NodeKind::Union { members, mode } => {
                let mode = self.union_mode(*mode, over)?;
                self.match_union(grammar, members, mode, bm)
            }
            NodeKind::Sequence {
                items,
                mode,
                skip_ws,
                stealer,
            } => {
                let mode = self.sequence_mode(*mode, over)?;
                self.match_sequence(grammar, items, mode, *skip_ws, *stealer, bm)
            }
            NodeKind::Repeat {
                node,
                min,
                max,
                mode,
            } => {
                let mode = self.repeat_mode(*mode, over)?;
                self.match_repeat(grammar, node, *min, *max, mode, bm)
            }
            NodeKind::Not { node, value } => {
                self.no_mode(over)?;
                self.match_not(grammar, node, value, bm)
            }
            NodeKind::Always { value } => {
                self.no_mode(over)?;
                Ok(Some(value.clone()))
            }
            NodeKind::Never => {
                self.no_mode(over)?;
                Ok(None)
            }
            NodeKind::Indentation { stack } => {
                self.no_mode(over)?;
                self.match_indentation(stack, bm)
            }
            NodeKind::Reference { target } => {
                let node = self.lookup(grammar, target)?;
                node.invoke(grammar, bm, over)
            }
        }
    }

    fn lookup<'g>(
        &self,
        grammar: &'g Grammar,
        name: &str,
    ) -> Result<Ref<'g, GrammarNode>, MatchError> {
        grammar.node(name).ok_or_else(|| MatchError::NodeMissing {
            name: name.to_string(),
        })
    }

    fn match_pattern(
        &self,
        re: &Regex,
        group: Option<usize>,
        mode: PatternMode,
        bm: &mut BufferMatcher<'_>,
    ) -> Result<Option<Value>, MatchError> {
        let start = bm.pos();
        let caps = match bm.apply(|h| re.captures(h)) {
            Some(caps) => caps,
            None => return Ok(None),
        };
        let group_bytes = |i: usize| caps.get(i).map(|m| m.as_bytes().to_vec());
        if let Some(g) = group {
            return Ok(Some(match group_bytes(g) {
                Some(bytes) => Value::Bytes(bytes),
                None => Value::None,
            }));
        }
        Ok(Some(match mode {
            PatternMode::Full => Value::Bytes(caps[0].to_vec()),
            PatternMode::Seq => Value::Seq(
                (1..caps.len())
                    .map(|i| group_bytes(i).map_or(Value::None, Value::Bytes))
                    .collect(),
            ),
            PatternMode::Dict => {
                let mut map = Vec::new();
                for (i, name) in re.capture_names().enumerate() {
                    if let Some(name) = name {
                        map_insert(
                            &mut map,
                            name.to_string(),
                            group_bytes(i).map_or(Value::None, Value::Bytes),
                        );
                    }
                }
                Value::Map(map)
            }
            PatternMode::Match => {
                let mut named = Vec::new();
                for (i, name) in re.capture_names().enumerate() {
                    if let Some(name) = name {
                        named.push((name.to_string(), group_bytes(i)));
                    }
                }
                Value::Match(MatchRecord {
                    start,
                    full: caps[0].to_vec(),
                    groups: (1..caps.len()).map(group_bytes).collect(),
                    named,
                })
            }
        }))
    }

    fn match_literal(
        &self,
        bytes: &[u8],
        bm: &mut BufferMatcher<'_>,
    ) -> Result<Option<Value>, MatchError> {
        if bm.peek(bytes.len()) == bytes {
            bm.step(bytes.len() as isize)?;
            Ok(Some(Value::Bytes(bytes.to_vec())))
        } else {
            Ok(None)
        }
    }

    fn match_union(
        &self,
        grammar: &Grammar,
        members: &[String],
        mode: UnionMode,
        bm: &mut BufferMatcher<'_>,
    ) -> Result<Option<Value>, MatchError> {
        // a failing member leaves the cursor unchanged (its own contract),
        // so the union itself takes no snapshot
        for member in members {
            let node = self.lookup(grammar, member)?;
            if let Some(value) = node.match_on(grammar, bm, None)? {
                return Ok(Some(match mode {
                    UnionMode::Pair => {
                        Value::Seq(vec![Value::Str(member.clone()), value])
                    }
                    UnionMode::Struct => Value::Map(vec![
                        ("name".to_string(), Value::Str(member.clone())),
                        ("val".to_string(), value),
                    ]),
                    UnionMode::Name => Value::Str(member.clone()),
                    UnionMode::Val => value,
                }));
            }
        }
        Ok(None)
    }

    fn match_sequence(
        &self,
        grammar: &Grammar,
        items: &[SeqItem],
        mode: SequenceMode,
        skip_ws: bool,
        stealer: Option<usize>,
        bm: &mut BufferMatcher<'_>,
    ) -> Result<Option<Value>, MatchError> {
        let save = bm.save();
        let mut values = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if skip_ws {
                bm.apply(|h| WHITESPACE.captures(h));
            }
            let node = self.lookup(grammar, &item.node)?;
            match node.match_on(grammar, bm, None)? {
                Some(value) => values.push(value),
                None => {
                    if stealer.map_or(false, |s| i >= s) {
                        // past the stealer the sequence refuses to backtrack
                        return Err(MatchError::Stealer {
                            name: self.name.clone(),
                            index: i,
                            at: bm.position(),
                        });
                    }
                    bm.restore(save);
                    return Ok(None);
                }
            }
        }
        if let Some(solo) = items.iter().position(|i| i.tag.as_deref() == Some("")) {
            return Ok(Some(values.swap_remove(solo)));
        }
        if items.is_empty() {
            return Ok(Some(Value::None));
        }
        Ok(Some(match mode {
            SequenceMode::Seq => Value::Seq(values),
            SequenceMode::Dict => {
                let tagged = items
                    .iter()
                    .any(|i| matches!(i.tag.as_deref(), Some(t) if !t.is_empty()));
                let mut map = Vec::new();
                for (item, value) in items.iter().zip(values) {
                    match item.tag.as_deref() {
                        Some(tag) if !tag.is_empty() => {
                            map_insert(&mut map, tag.to_string(), value)
                        }
                        _ if !tagged => map_insert(&mut map, item.node.clone(), value),
                        _ => {}
                    }
                }
                Value::Map(map)
            }
            SequenceMode::Unpack => self.unpack_values(values)?,
        }))
    }

    fn unpack_values(&self, mut values: Vec<Value>) -> Result<Value, MatchError> {
        if values.is_empty() {
            return Ok(Value::None);
        }
        if values.len() == 1 {
            return Ok(values.remove(0));
        }
        let mismatch = |got: &Value, wanted: &str| MatchError::Unpack {
            name: self.name.clone(),
            detail: format!("cannot merge a {} into {}", got.kind_name(), wanted),
        };
        match &values[0] {
            Value::Map(_) => {
                let mut merged = Vec::new();
                for value in values {
                    match value {
                        Value::Map(entries) => {
                            for (key, entry) in entries {
                                map_insert(&mut merged, key, entry);
                            }
                        }
                        other => return Err(mismatch(&other, "mappings")),
                    }
                }
                Ok(Value::Map(merged))
            }
            Value::Seq(_) => {
                let mut merged = Vec::new();
                for value in values {
                    match value {
                        Value::Seq(entries) => merged.extend(entries),
                        other => return Err(mismatch(&other, "sequences")),
                    }
                }
                Ok(Value::Seq(merged))
            }
            Value::Bytes(_) => {
                let mut merged = Vec::new();
                for value in values {
                    match value {
                        Value::Bytes(bytes) => merged.extend_from_slice(&bytes),
                        other => return Err(mismatch(&other, "bytes")),
                    }
                }
                Ok(Value::Bytes(merged))
            }
            first => Err(MatchError::Unpack {
                name: self.name.clone(),
                detail: format!("{} results cannot be merged", first.kind_name()),
            }),
        }
    }

    fn match_repeat(
        &self,
        grammar: &Grammar,
        node_name: &str,
        min: usize,
        max: Option<usize>,
        mode: RepeatMode,
        bm: &mut BufferMatcher<'_>,
    ) -> Result<Option<Value>, MatchError> {
        let save = bm.save();
        let node = self.lookup(grammar, node_name)?;
        let mut values = Vec::new();
        for _ in 0..min {
            match node.match_on(grammar, bm, None)? {
                Some(value) => values.push(value),
                None => {
                    bm.restore(save);
                    return Ok(None);
                }
            }
        }
        match max {
            Some(max) => {
                for _ in min..max {
                    match node.match_on(grammar, bm, None)? {
                        Some(value) => values.push(value),
                        None => break,
                    }
                }
            }
            None => loop {
                let before = bm.pos();
                match node.match_on(grammar, bm, None)? {
                    Some(value) => {
                        values.push(value);
                        // a zero-width match would repeat forever
                        if bm.pos() == before {
                            break;
                        }
                    }
                    None => break,
                }
            },
        }
        Ok(Some(match mode {
            RepeatMode::Seq => Value::Seq(values),
            RepeatMode::First => values.into_iter().next().unwrap_or(Value::None),
            RepeatMode::Last => values.into_iter().last().unwrap_or(Value::None),
            RepeatMode::Count => Value::Int(values.len() as i64),
        }))
    }

    fn match_not(
        &self,
        grammar: &Grammar,
        node_name: &str,
        value: &Value,
        bm: &mut BufferMatcher<'_>,
    ) -> Result<Option<Value>, MatchError> {
        let save = bm.save();
        let node = self.lookup(grammar, node_name)?;
        match node.match_on(grammar, bm, None)? {
            None => Ok(Some(value.clone())),
            Some(_) => {
                bm.restore(save);
                Ok(None)
            }
        }
    }

    fn match_indentation(
        &self,
        stack: &RefCell<TinyVec<[usize; 4]>>,
        bm: &mut BufferMatcher<'_>,
    ) -> Result<Option<Value>, MatchError> {
        let at = bm.position();
        let count = match bm.apply(|h| INDENT.captures(h)) {
            Some(caps) => caps.get(1).map_or(0, |m| m.as_bytes().len()),
            None => {
                // no newline here: only a line start counts as level zero
                if !bm.at_line_start() {
                    return Ok(Some(Value::Mark(Mark::NoChange)));
                }
                0
            }
        };
        let mut stack = stack.borrow_mut();
        let top = *stack.last().expect("indentation stack holds 0 at the bottom");
        if count > top {
            stack.push(count);
            return Ok(Some(Value::Mark(Mark::Indent)));
        }
        if count == top {
            return Ok(Some(Value::Mark(Mark::NoChange)));
        }
        let mut pops = 0;
        while stack.last().map_or(false, |&level| count < level) {
            stack.pop();
            pops += 1;
        }
        let level = *stack.last().expect("indentation stack holds 0 at the bottom");
        if level != count {
            return Err(MatchError::Indentation {
                expected: level,
                found: count,
                at,
            });
        }
        Ok(Some(Value::Mark(Mark::Dedent(pops))))
    }

    fn pattern_mode(
        &self,
        cfg: PatternMode,
        over: Option<ModeOverride>,
    ) -> Result<PatternMode, MatchError> {
        match over {
            None => Ok(cfg),
            Some(ModeOverride::Pattern(mode)) => Ok(mode),
            Some(other) => Err(self.mode_error(&other, "pattern")),
        }
    }

    fn union_mode(
        &self,
        cfg: UnionMode,
        over: Option<ModeOverride>,
    ) -> Result<UnionMode, MatchError> {
        match over {
            None => Ok(cfg),
            Some(ModeOverride::Union(mode)) => Ok(mode),
            Some(other) => Err(self.mode_error(&other, "union")),
        }
    }

    fn sequence_mode(
        &self,
        cfg: SequenceMode,
        over: Option<ModeOverride>,
    ) -> Result<SequenceMode, MatchError> {
        match over {
            None => Ok(cfg),
            Some(ModeOverride::Sequence(mode)) => Ok(mode),
            Some(other) => Err(self.mode_error(&other, "sequence")),
        }
    }

    fn repeat_mode(
        &self,
        cfg: RepeatMode,
        over: Option<ModeOverride>,
    ) -> Result<RepeatMode, MatchError> {
        match over {
            None => Ok(cfg),
            Some(ModeOverride::Repeat(mode)) => Ok(mode),
            Some(other) => Err(self.mode_error(&other, "repeat")),
        }
    }

    fn no_mode(&self, over: Option<ModeOverride>) -> Result<(), MatchError> {
        match over {
            None => Ok(()),
            Some(other) => Err(MatchError::Mode {
                name: self.name.clone(),
                detail: format!("{:?} overrides a node kind with no return mode", other),
            }),
        }
    }

    fn mode_error(&self, over: &ModeOverride, kind: &str) -> MatchError {
        MatchError::Mode {
            name: self.name.clone(),
            detail: format!("{:?} does not apply to a {} node", over, kind),
        }
    }

    /// The node's persistable configuration.
    pub fn spec(&self) -> NodeSpec {
        match &self.kind {
            NodeKind::Pattern {
                pattern,
                group,
                mode,
                ..
            } => NodeSpec::Pattern {
                pattern: pattern.clone(),
                group: *group,
                mode: *mode,
            },
            NodeKind::Literal { bytes } => NodeSpec::Literal {
                bytes: bytes.clone(),
            },
            NodeKind::Union { members, mode } => NodeSpec::Union {
                members: members.clone(),
                mode: *mode,
            },
            NodeKind::Sequence {
                items,
                mode,
                skip_ws,
                stealer,
            } => NodeSpec::Sequence {
                items: items.clone(),
                mode: *mode,
                skip_ws: *skip_ws,
                stealer: *stealer,
            },
            NodeKind::Repeat {
                node,
                min,
                max,
                mode,
            } => NodeSpec::Repeat {
                node: node.clone(),
                min: *min,
                max: *max,
                mode: *mode,
            },
            NodeKind::Not { node, value } => NodeSpec::Not {
                node: node.clone(),
                value: value.clone(),
            },
            NodeKind::Always { value } => NodeSpec::Always {
                value: value.clone(),
            },
            NodeKind::Never => NodeSpec::Never,
            NodeKind::Indentation { .. } => NodeSpec::Indentation,
            NodeKind::Reference { target } => NodeSpec::Reference {
                target: target.clone(),
            },
        }
    }

    /// Rebuilds a node from its persisted configuration.
    pub fn from_spec(name: &str, spec: NodeSpec) -> Result<GrammarNode, NodeError> {
        match spec {
            NodeSpec::Pattern {
                pattern,
                group,
                mode,
            } => Ok(GrammarNode::pattern(name, &pattern, group, mode)),
            NodeSpec::Literal { bytes } => GrammarNode::literal(name, &bytes),
            NodeSpec::Union { members, mode } => GrammarNode::union(name, members, mode),
            NodeSpec::Sequence {
                items,
                mode,
                skip_ws,
                stealer,
            } => GrammarNode::sequence(name, items, mode, skip_ws, stealer),
            NodeSpec::Repeat {
                node,
                min,
                max,
                mode,
            } => GrammarNode::repeat(name, &node, min, max, mode),
            NodeSpec::Not { node, value } => GrammarNode::negation(name, &node, value),
            NodeSpec::Always { value } => GrammarNode::always(name, value),
            NodeSpec::Never => Ok(GrammarNode::never(name)),
            NodeSpec::Indentation => Ok(GrammarNode::indentation(name)),
            NodeSpec::Reference { target } => Ok(GrammarNode::reference(name, &target)),
        }
    }
}

/// The persistable configuration of a node: its kind plus constructor
/// arguments, without compiled or match-time state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeSpec {
    /// See [`NodeKind::Pattern`].
    Pattern {
        /// Pattern name.
        pattern: String,
        /// Selected capture group.
        group: Option<usize>,
        /// Return mode.
        mode: PatternMode,
    },
    /// See [`NodeKind::Literal`].
    Literal {
        /// The literal bytes.
        bytes: Vec<u8>,
    },
    /// See [`NodeKind::Union`].
    Union {
        /// Member names.
        members: Vec<String>,
        /// Return mode.
        mode: UnionMode,
    },
    /// See [`NodeKind::Sequence`].
    Sequence {
        /// The items.
        items: Vec<SeqItem>,
        /// Return mode.
        mode: SequenceMode,
        /// Whitespace skipping.
        skip_ws: bool,
        /// Stealer index.
        stealer: Option<usize>,
    },
    /// See [`NodeKind::Repeat`].
    Repeat {
        /// Repeated sub-node.
        node: String,
        /// Minimum matches.
        min: usize,
        /// Maximum matches.
        max: Option<usize>,
        /// Return mode.
        mode: RepeatMode,
    },
    /// See [`NodeKind::Not`].
    Not {
        /// Negated sub-node.
        node: String,
        /// Value on negative success.
        value: Value,
    },
    /// See [`NodeKind::Always`].
    Always {
        /// The value returned.
        value: Value,
    },
    /// See [`NodeKind::Never`].
    Never,
    /// See [`NodeKind::Indentation`].
    Indentation,
    /// See [`NodeKind::Reference`].
    Reference {
        /// Target name.
        target: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn repeat_bounds_are_validated() {
        assert_matches!(
            GrammarNode::repeat("r", "x", 2, Some(2), RepeatMode::Seq),
            Err(NodeError::Config { .. })
        );
        assert_matches!(
            GrammarNode::repeat("r", "x", 2, Some(1), RepeatMode::Seq),
            Err(NodeError::Config { .. })
        );
        assert!(GrammarNode::repeat("r", "x", 2, Some(3), RepeatMode::Seq).is_ok());
        assert!(GrammarNode::repeat("r", "x", 2, None, RepeatMode::Seq).is_ok());
    }

    #[test]
    fn reserved_values_are_rejected() {
        assert_matches!(
            GrammarNode::always("t", Value::Mark(Mark::Indent)),
            Err(NodeError::Config { .. })
        );
        assert_matches!(
            GrammarNode::negation("n", "x", Value::Mark(Mark::NoChange)),
            Err(NodeError::Config { .. })
        );
        assert!(GrammarNode::always("t", Value::Int(1)).is_ok());
    }

    #[test]
    fn empty_literals_and_unions_are_rejected() {
        assert_matches!(GrammarNode::literal("l", b""), Err(NodeError::Config { .. }));
        assert_matches!(
            GrammarNode::union("u", vec![], UnionMode::Val),
            Err(NodeError::Config { .. })
        );
        // an empty sequence is a vacuous success, not an error
        assert!(GrammarNode::sequence("s", vec![], SequenceMode::Seq, true, None).is_ok());
    }

    #[test]
    fn stealer_and_solo_placement_is_validated() {
        let items = vec![SeqItem::plain("a"), SeqItem::plain("b")];
        assert_matches!(
            GrammarNode::sequence("s", items.clone(), SequenceMode::Seq, true, Some(0)),
            Err(NodeError::Config { .. })
        );
        assert_matches!(
            GrammarNode::sequence("s", items.clone(), SequenceMode::Seq, true, Some(3)),
            Err(NodeError::Config { .. })
        );
        assert!(GrammarNode::sequence("s", items, SequenceMode::Seq, true, Some(1)).is_ok());
        let two_solos = vec![
            SeqItem {
                node: "a".into(),
                tag: Some(String::new()),
            },
            SeqItem {
                node: "b".into(),
                tag: Some(String::new()),
            },
        ];
        assert_matches!(
            GrammarNode::sequence("s", two_solos, SequenceMode::Seq, true, None),
            Err(NodeError::Config { .. })
        );
        let solo_and_named = vec![
            SeqItem {
                node: "a".into(),
                tag: Some(String::new()),
            },
            SeqItem {
                node: "b".into(),
                tag: Some("tag".into()),
            },
        ];
        assert_matches!(
            GrammarNode::sequence("s", solo_and_named, SequenceMode::Seq, true, None),
            Err(NodeError::Config { .. })
        );
    }

    #[test]
    fn pattern_group_zero_is_normalized() {
        let node = GrammarNode::pattern("p", "word", Some(0), PatternMode::Full);
        assert_matches!(node.kind(), NodeKind::Pattern { group: None, .. });
        let node = GrammarNode::pattern("p", "word", Some(2), PatternMode::Full);
        assert_matches!(node.kind(), NodeKind::Pattern { group: Some(2), .. });
    }

    #[test]
    fn hints_order_leaves_before_nesting_kinds() {
        let lit = GrammarNode::literal("l", b"x").unwrap();
        let rep = GrammarNode::repeat("r", "l", 0, None, RepeatMode::Seq).unwrap();
        let uni = GrammarNode::union("u", vec!["l".into()], UnionMode::Val).unwrap();
        let seq =
            GrammarNode::sequence("s", vec![SeqItem::plain("l")], SequenceMode::Seq, true, None)
                .unwrap();
        assert!(lit.compile_order_hint() < rep.compile_order_hint());
        assert!(rep.compile_order_hint() < uni.compile_order_hint());
        assert!(uni.compile_order_hint() < seq.compile_order_hint());
    }

    #[test]
    fn new_nodes_report_their_compile_state() {
        assert!(GrammarNode::literal("l", b"x").unwrap().is_ready());
        assert!(GrammarNode::never("n").is_ready());
        let rep = GrammarNode::repeat("r", "x", 0, None, RepeatMode::Seq).unwrap();
        assert_matches!(rep.failure(), Some(NodeError::NeverCompiled { .. }));
        assert!(!rep.is_bound());
    }

    #[test]
    fn specs_round_trip() {
        let node = GrammarNode::repeat("r", "x", 1, Some(4), RepeatMode::Count).unwrap();
        let rebuilt = GrammarNode::from_spec("r", node.spec()).unwrap();
        assert_eq!(node.spec(), rebuilt.spec());
        let node = GrammarNode::indentation("ind");
        assert_eq!(node.spec(), NodeSpec::Indentation);
    }
}
