//! Error taxonomy for the grammar engine.
//!
//! Three families of errors exist, with different propagation rules:
//!
//! * [`NodeError`] values describe why a node cannot be used.  Compile-time
//!   failures are *stored* on the offending node's `failure` field and only
//!   re-raised, chained to the underlying cause, when the host tries to
//!   match through that node.
//! * [`MatchError`] values are fatal match-time errors (indentation
//!   mismatches, stealer violations, cursor overruns).  A plain failure to
//!   match is never an error; it is the ordinary `Ok(None)` return.
//! * [`SyntaxError`] is raised by the textual grammar compiler and carries
//!   the position of the offending byte; [`SyntaxError::render`] produces an
//!   annotated snippet of the source line.

use crate::buffer::OutOfRange;
use crate::buffer::Position;
use annotate_snippets::display_list::DisplayList;
use annotate_snippets::display_list::FormatOptions;
use annotate_snippets::snippet::Annotation;
use annotate_snippets::snippet::AnnotationType;
use annotate_snippets::snippet::Slice;
use annotate_snippets::snippet::Snippet;
use annotate_snippets::snippet::SourceAnnotation;
use std::error::Error;
use std::fmt;

/// Why a node cannot compile or be matched through.
///
/// These are storable (every node carries an `Option<NodeError>`) and
/// cloneable so a stored failure can be re-raised as the cause of a later
/// one without losing the original.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeError {
    /// A needed node name is absent from the grammar.
    Missing {
        /// The absent name.
        name: String,
    },
    /// An insertion was refused because the name is taken and `replace` was
    /// not given.
    Exists {
        /// The colliding name.
        name: String,
    },
    /// The node has no grammar binding.
    NotBound {
        /// The unbound node.
        name: String,
    },
    /// The node requires compilation but has never been compiled.
    NeverCompiled {
        /// The uncompiled node.
        name: String,
    },
    /// A pattern node's pattern is missing or incomplete.
    PatternMissing {
        /// The pattern node.
        name: String,
        /// The missing or incomplete pattern.
        pattern: String,
    },
    /// A pattern node's composed source failed to compile as a regex.
    PatternInvalid {
        /// The pattern node.
        name: String,
        /// The offending pattern.
        pattern: String,
        /// The regex engine's complaint.
        detail: String,
    },
    /// A nesting node names a sub-node that is absent.
    DependencyMissing {
        /// The nesting node.
        name: String,
        /// The absent sub-node.
        dependency: String,
    },
    /// A nesting node's sub-node has a failure of its own.
    DependencyNotReady {
        /// The nesting node.
        name: String,
        /// The unready sub-node.
        dependency: String,
        /// The sub-node's stored failure.
        cause: Box<NodeError>,
    },
    /// A match was attempted through a node whose failure is set.
    NotReady {
        /// The unready node.
        name: String,
        /// The node's stored failure.
        cause: Box<NodeError>,
    },
    /// The node's configuration is invalid.
    Config {
        /// The misconfigured node.
        name: String,
        /// What is wrong with it.
        detail: String,
    },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeError::Missing { name } => write!(f, "node {:?} is missing", name),
            NodeError::Exists { name } => write!(f, "node {:?} already exists", name),
            NodeError::NotBound { name } => write!(f, "node {:?} is unbound", name),
            NodeError::NeverCompiled { name } => {
                write!(f, "node {:?} has never been compiled", name)
            }
            NodeError::PatternMissing { name, pattern } => write!(
                f,
                "node {:?} requires pattern {:?}, which is missing or incomplete",
                name, pattern
            ),
            NodeError::PatternInvalid {
                name,
                pattern,
                detail,
            } => write!(
                f,
                "node {:?} could not compile pattern {:?}: {}",
                name, pattern, detail
            ),
            NodeError::DependencyMissing { name, dependency } => write!(
                f,
                "node {:?} requires node {:?}, which is missing",
                name, dependency
            ),
            NodeError::DependencyNotReady { name, dependency, .. } => write!(
                f,
                "node {:?} requires node {:?}, which is not ready",
                name, dependency
            ),
            NodeError::NotReady { name, .. } => write!(f, "node {:?} is not ready", name),
            NodeError::Config { name, detail } => {
                write!(f, "node {:?} is misconfigured: {}", name, detail)
            }
        }
    }
}

impl Error for NodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NodeError::DependencyNotReady { cause, .. } | NodeError::NotReady { cause, .. } => {
                Some(cause.as_ref())
            }
            _ => None,
        }
    }
}

/// Errors from the pattern registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternError {
    /// A registration was refused because the name is taken and `replace`
    /// was not given.
    Exists {
        /// The colliding name.
        name: String,
    },
    /// A referenced pattern name is absent.
    Missing {
        /// The absent name.
        name: String,
    },
    /// A registration would close a reference cycle.
    Cyclic {
        /// The pattern being registered.
        name: String,
        /// The reference that reaches back to it.
        via: String,
    },
    /// The composed source failed to compile as a regex.
    Regex {
        /// The pattern.
        name: String,
        /// The regex engine's complaint.
        detail: String,
    },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatternError::Exists { name } => write!(f, "pattern {:?} already exists", name),
            PatternError::Missing { name } => write!(f, "pattern {:?} is missing", name),
            PatternError::Cyclic { name, via } => write!(
                f,
                "pattern {:?} would reference itself through {:?}",
                name, via
            ),
            PatternError::Regex { name, detail } => {
                write!(f, "pattern {:?} does not compile: {}", name, detail)
            }
        }
    }
}

impl Error for PatternError {}

/// Fatal match-time errors.
///
/// `NO_MATCH` is not among these: a node that simply fails to match returns
/// the ordinary no-match value and leaves the cursor where it was.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchError {
    /// A match was attempted through an unready node.
    NotReady(NodeError),
    /// A node named during matching is absent from the grammar.
    NodeMissing {
        /// The absent name.
        name: String,
    },
    /// A dedent fell through the indentation stack to a non-matching level.
    Indentation {
        /// Stack level left after popping.
        expected: usize,
        /// Indentation actually found.
        found: usize,
        /// Where the indentation was read.
        at: Position,
    },
    /// A sequence failed after crossing its stealer marker.
    Stealer {
        /// The sequence node.
        name: String,
        /// Index of the sub-node that failed.
        index: usize,
        /// Where the failure happened.
        at: Position,
    },
    /// `UNPACK` could not merge heterogeneous sub-results.
    Unpack {
        /// The sequence node.
        name: String,
        /// What could not be merged.
        detail: String,
    },
    /// A per-call return-mode override does not fit the node's kind.
    Mode {
        /// The node.
        name: String,
        /// The mismatch.
        detail: String,
    },
    /// The cursor was stepped outside the buffer.
    OutOfRange(OutOfRange),
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MatchError::NotReady(e) => e.fmt(f),
            MatchError::NodeMissing { name } => write!(f, "node {:?} is missing", name),
            MatchError::Indentation {
                expected,
                found,
                at,
            } => write!(
                f,
                "indentation of {} does not match any open level (nearest is {}) at {}",
                found, expected, at
            ),
            MatchError::Stealer { name, index, at } => write!(
                f,
                "required sub-node {} of sequence {:?} failed at {}",
                index, name, at
            ),
            MatchError::Unpack { name, detail } => {
                write!(f, "sequence {:?} cannot unpack its results: {}", name, detail)
            }
            MatchError::Mode { name, detail } => {
                write!(f, "bad return mode for node {:?}: {}", name, detail)
            }
            MatchError::OutOfRange(e) => e.fmt(f),
        }
    }
}

impl Error for MatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MatchError::NotReady(e) => Some(e),
            MatchError::OutOfRange(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OutOfRange> for MatchError {
    fn from(e: OutOfRange) -> MatchError {
        MatchError::OutOfRange(e)
    }
}

/// An error raised while parsing the textual grammar notation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntaxError {
    /// What went wrong.
    pub message: String,
    /// Where it went wrong.
    pub at: Position,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "syntax error at {}: {}", self.at, self.message)
    }
}

impl Error for SyntaxError {}

impl SyntaxError {
    /// Renders the error as an annotated snippet of the offending source
    /// line.  `origin` names the source (a file name, typically).
    pub fn render(&self, source: &[u8], origin: Option<&str>) -> String {
        let offset = self.at.offset.min(source.len());
        let start = source[..offset]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let end = source[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(source.len(), |i| start + i);
        let line = String::from_utf8_lossy(&source[start..end]);
        let col = offset - start;
        let hi = (col + 1).min(line.len());
        let lo = col.min(hi);
        let snippet = Snippet {
            title: Some(Annotation {
                label: Some(&self.message),
                id: None,
                annotation_type: AnnotationType::Error,
            }),
            footer: vec![],
            slices: vec![Slice {
                source: &line,
                line_start: self.at.line,
                origin,
                fold: false,
                annotations: vec![SourceAnnotation {
                    range: (lo, hi),
                    label: "here",
                    annotation_type: AnnotationType::Error,
                }],
            }],
            opt: FormatOptions {
                color: false,
                ..Default::default()
            },
        };
        DisplayList::from(snippet).to_string()
    }
}

/// Errors from rebuilding a grammar out of its persisted description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// A pattern registration failed.
    Pattern(PatternError),
    /// A node could not be constructed or inserted.
    Node(NodeError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Pattern(e) => e.fmt(f),
            LoadError::Node(e) => e.fmt(f),
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::Pattern(e) => Some(e),
            LoadError::Node(e) => Some(e),
        }
    }
}

impl From<PatternError> for LoadError {
    fn from(e: PatternError) -> LoadError {
        LoadError::Pattern(e)
    }
}

impl From<NodeError> for LoadError {
    fn from(e: NodeError) -> LoadError {
        LoadError::Node(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_chain_through_source() {
        let inner = NodeError::PatternMissing {
            name: "word".into(),
            pattern: "w".into(),
        };
        let outer = NodeError::DependencyNotReady {
            name: "stmt".into(),
            dependency: "word".into(),
            cause: Box::new(inner.clone()),
        };
        let raised = MatchError::NotReady(NodeError::NotReady {
            name: "stmt".into(),
            cause: Box::new(outer),
        });
        let mut chain = Vec::new();
        let mut cur: Option<&(dyn Error + 'static)> = Some(&raised);
        while let Some(e) = cur {
            chain.push(e.to_string());
            cur = e.source();
        }
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[3], inner.to_string());
    }

    #[test]
    fn syntax_error_renders_the_offending_line() {
        let src = b"a = \"x\" ;\nb = ?? ;\n";
        let err = SyntaxError {
            message: "expected an item".into(),
            at: Position {
                offset: 14,
                line: 2,
                column: 4,
            },
        };
        let rendered = err.render(src, Some("demo.cag"));
        assert!(rendered.contains("expected an item"));
        assert!(rendered.contains("b = ?? ;"));
        assert!(rendered.contains("demo.cag"));
    }
}
