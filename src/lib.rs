//! A grammar execution engine for the Caustic language.
//!
//! A grammar is a set of named productions built from primitive matchers
//! (literal byte strings, byte-mode regular expressions) and composite
//! operators (sequence, alternation, repetition, negative lookahead,
//! always-match, cross-reference).  Given a grammar and an input byte
//! buffer, the engine reports, for any chosen start production, either a
//! structured match value or a no-match result, with precise location
//! tracking for errors.  The engine is an interpreter: grammars are data,
//! not generated code.
//!
//! The pieces, leaves first:
//!
//! * [`buffer::BufferMatcher`]: the position-tracked cursor over the input,
//!   with constant-time save/restore used for all backtracking.
//! * [`patterns::PatternRegistry`]: named, composable byte-regex patterns
//!   with completeness tracking.
//! * [`nodes`]: the closed set of match-node kinds and the recursive match
//!   engine, including the per-kind return modes that shape successful
//!   results.
//! * [`grammar::Grammar`]: the owner of patterns and nodes.  Its
//!   fixed-point compile scheduler is what makes grammars with forward
//!   references and cycles work: nodes are inserted in any order, then
//!   repeatedly compiled until the ready set stops growing.
//! * [`compiler`]: parses the textual grammar notation into nodes and
//!   patterns.
//!
//! A typical round trip:
//!
//! ```
//! use caustic_grammar::compiler::compile_grammar;
//! use caustic_grammar::Grammar;
//! use caustic_grammar::Value;
//!
//! let mut grammar = Grammar::new();
//! compile_grammar(&mut grammar, b"greeting = \"hello\" ;").unwrap();
//! assert!(grammar.compile(None, true).is_empty());
//! assert_eq!(
//!     grammar.match_bytes("greeting", b"hello world").unwrap(),
//!     Some(Value::Bytes(b"hello".to_vec())),
//! );
//! ```
//!
//! Matching is single-threaded and synchronous.  A grammar and its nodes
//! are one ownership domain: do not add, remove or recompile nodes while a
//! match is traversing them.  The indentation node kind holds per-node
//! mutable state, so concurrent matches need distinct (cloned) grammar
//! instances, and [`grammar::Grammar::reset`] restores that state between
//! inputs.

pub mod buffer;
pub mod compiler;
pub mod diag;
pub mod grammar;
pub mod nodes;
pub mod patterns;


pub use buffer::BufferMatcher;
pub use buffer::Location;
pub use grammar::Grammar;
pub use grammar::GrammarDescription;
pub use nodes::GrammarNode;
pub use nodes::Mark;
pub use nodes::ModeOverride;
pub use nodes::Value;
pub use patterns::PatternRegistry;
