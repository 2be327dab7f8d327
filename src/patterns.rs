//! Named, composable byte-regex patterns.
//!
//! The registry maps pattern names to regular-expression sources that operate
//! on bytes, never on code points.  A source may reference other patterns by
//! name with the curly-brace syntax `{other}`; references are resolved by
//! textual substitution when the pattern is compiled.  A pattern is
//! *complete* when every transitively referenced name has been registered;
//! completeness is the precondition for compiling the pattern nodes that use
//! it.  Cyclic references are rejected at registration time, so completeness
//! checks and composition never have to worry about them.
//!
//! Braces that do not enclose a name (repetition counts like `a{2,3}` in
//! particular) are left for the regex engine to interpret.

use crate::diag::PatternError;
use fnv::FnvHashMap;
use fnv::FnvHashSet;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use regex::bytes::RegexBuilder;

lazy_static! {
    static ref REFERENCE: Regex = bytes_regex(r"\{([A-Za-z_][A-Za-z0-9_.]*)\}").unwrap();
}

/// Builds a byte-oriented regex: byte semantics, ASCII character classes.
pub(crate) fn bytes_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).unicode(false).build()
}

/// Compiles a pattern source anchored at the start of its haystack, the form
/// [`BufferMatcher::apply`](crate::buffer::BufferMatcher::apply) expects.
pub(crate) fn compile_anchored(source: &[u8]) -> Result<Regex, String> {
    let text = std::str::from_utf8(source)
        .map_err(|_| "pattern source is not valid UTF-8".to_string())?;
    let mut wrapped = String::with_capacity(text.len() + 8);
    wrapped.push_str(r"\A(?:");
    wrapped.push_str(text);
    wrapped.push(')');
    bytes_regex(&wrapped).map_err(|e| e.to_string())
}

#[derive(Clone, Debug)]
struct PatternEntry {
    source: Vec<u8>,
    refs: Vec<String>,
}

fn scan_refs(source: &[u8]) -> Vec<String> {
    REFERENCE
        .captures_iter(source)
        .map(|caps| String::from_utf8_lossy(&caps[1]).into_owned())
        .collect()
}

/// A mapping from pattern name to byte-regex source, with `{name}`
/// composition and completeness tracking.
#[derive(Clone, Debug, Default)]
pub struct PatternRegistry {
    patterns: FnvHashMap<String, PatternEntry>,
}

impl PatternRegistry {
    /// Creates an empty registry.
    pub fn new() -> PatternRegistry {
        PatternRegistry::default()
    }

    /// Registers `source` under `name`.
    ///
    /// Refuses a name collision unless `replace` is set, and refuses any
    /// registration that would close a reference cycle.
    pub fn add(&mut self, name: &str, source: &[u8], replace: bool) -> Result<(), PatternError> {
        if !replace && self.patterns.contains_key(name) {
            return Err(PatternError::Exists {
                name: name.to_string(),
            });
        }
        let refs = scan_refs(source);
        if let Some(via) = self.find_cycle(name, &refs) {
            return Err(PatternError::Cyclic {
                name: name.to_string(),
                via,
            });
        }
        self.patterns.insert(
            name.to_string(),
            PatternEntry {
                source: source.to_vec(),
                refs,
            },
        );
        Ok(())
    }

    /// Registers every `(name, source)` pair in `patterns`.
    pub fn multiadd<I, N, S>(&mut self, patterns: I, replace: bool) -> Result<(), PatternError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: AsRef<str>,
        S: AsRef<[u8]>,
    {
        for (name, source) in patterns {
            self.add(name.as_ref(), source.as_ref(), replace)?;
        }
        Ok(())
    }

    /// Removes a pattern, returning its source if it was present.
    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.patterns.remove(name).map(|e| e.source)
    }

    /// True when `name` has been registered.
    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    /// The raw source registered under `name`.
    pub fn source(&self, name: &str) -> Option<&[u8]> {
        self.patterns.get(name).map(|e| e.source.as_slice())
    }

    /// Registered names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(|k| k.as_str())
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True when `name` and every pattern it transitively references have
    /// been registered.
    pub fn is_complete(&self, name: &str) -> bool {
        let mut seen = FnvHashSet::default();
        let mut stack = vec![name.to_string()];
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            match self.patterns.get(&next) {
                None => return false,
                Some(entry) => stack.extend(entry.refs.iter().cloned()),
            }
        }
        true
    }

    /// Resolves every `{name}` reference, yielding the final regex source.
    pub fn compose(&self, name: &str) -> Result<Vec<u8>, PatternError> {
        let entry = self.patterns.get(name).ok_or_else(|| PatternError::Missing {
            name: name.to_string(),
        })?;
        let mut out = Vec::with_capacity(entry.source.len());
        let mut last = 0;
        for caps in REFERENCE.captures_iter(&entry.source) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            out.extend_from_slice(&entry.source[last..whole.start]);
            let sub = self.compose(&String::from_utf8_lossy(&caps[1]))?;
            out.extend_from_slice(b"(?:");
            out.extend_from_slice(&sub);
            out.push(b')');
            last = whole.end;
        }
        out.extend_from_slice(&entry.source[last..]);
        Ok(out)
    }

    /// Composes and compiles `name` to an anchored byte regex.
    pub fn compile(&self, name: &str) -> Result<Regex, PatternError> {
        let source = self.compose(name)?;
        compile_anchored(&source).map_err(|detail| PatternError::Regex {
            name: name.to_string(),
            detail,
        })
    }

    /// Would adding `name -> refs` close a reference cycle?  Returns the
    /// offending reference if so.
    fn find_cycle(&self, name: &str, refs: &[String]) -> Option<String> {
        for origin in refs {
            let mut seen = FnvHashSet::default();
            let mut stack = vec![origin.clone()];
            while let Some(next) = stack.pop() {
                if next == name {
                    return Some(origin.clone());
                }
                if !seen.insert(next.clone()) {
                    continue;
                }
                if let Some(entry) = self.patterns.get(&next) {
                    stack.extend(entry.refs.iter().cloned());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn completeness_is_transitive() {
        let mut reg = PatternRegistry::new();
        reg.add("word", br"\w+", false).unwrap();
        reg.add("pair", br"{word}={word}", false).unwrap();
        reg.add("line", br"{pair}(,{pair})*", false).unwrap();
        assert!(reg.is_complete("word"));
        assert!(reg.is_complete("line"));
        reg.remove("word");
        assert!(!reg.is_complete("pair"));
        assert!(!reg.is_complete("line"));
        assert!(!reg.is_complete("missing"));
    }

    #[test]
    fn composition_compiles_and_matches() {
        let mut reg = PatternRegistry::new();
        reg.add("digit", br"[0-9]", false).unwrap();
        reg.add("number", br"{digit}+", false).unwrap();
        let re = reg.compile("number").unwrap();
        let caps = re.captures(b"1234x").unwrap();
        assert_eq!(&caps[0], b"1234");
        // anchored: no hit when the match would not start at the slice start
        assert!(re.captures(b"x1234").is_none());
    }

    #[test]
    fn repetition_counts_are_not_references() {
        let mut reg = PatternRegistry::new();
        reg.add("three", br"a{3}", false).unwrap();
        assert!(reg.is_complete("three"));
        let re = reg.compile("three").unwrap();
        assert!(re.is_match(b"aaa"));
        assert!(!re.is_match(b"aa"));
    }

    #[test]
    fn cycles_are_rejected_at_registration() {
        let mut reg = PatternRegistry::new();
        assert_matches!(
            reg.add("selfish", br"{selfish}", false),
            Err(PatternError::Cyclic { .. })
        );
        reg.add("a", br"{b}", false).unwrap();
        assert_matches!(reg.add("b", br"x{a}", false), Err(PatternError::Cyclic { .. }));
        // b never made it in, so a stays incomplete rather than cyclic
        assert!(!reg.is_complete("a"));
    }

    #[test]
    fn replace_flag_gates_collisions() {
        let mut reg = PatternRegistry::new();
        reg.add("p", br"a", false).unwrap();
        assert_matches!(reg.add("p", br"b", false), Err(PatternError::Exists { .. }));
        reg.add("p", br"b", true).unwrap();
        assert_eq!(reg.source("p"), Some(&b"b"[..]));
    }

    #[test]
    fn invalid_regex_surfaces_at_compile() {
        let mut reg = PatternRegistry::new();
        reg.add("bad", br"(", false).unwrap();
        assert!(reg.is_complete("bad"));
        assert_matches!(reg.compile("bad"), Err(PatternError::Regex { .. }));
    }
}
