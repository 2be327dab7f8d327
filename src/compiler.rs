//! The textual grammar compiler.
//!
//! Parses the byte-oriented grammar notation into nodes and patterns of a
//! [`Grammar`].  A grammar file is a sequence of productions terminated by
//! `;`:
//!
//! ```text
//! NAME = <expression> ;
//! ```
//!
//! A lowercase name introduces a *nonterminal* (whitespace between its
//! children is skipped); an uppercase name a *terminal* (whitespace is
//! significant).  An expression is a sequence of items:
//!
//! * `"..."` / `'...'`: a byte-string literal, with backslash escapes;
//! * `[digit]/pattern/flags`: a regex literal (flags from `i`, `m`, `s`;
//!   the optional leading digit picks a capture group);
//! * `( ... )`: a sub-sequence; `{ ... }`: a whitespace-sensitive one;
//! * `[ a | b | c ]`: a union;
//! * `<target>`: a reference to another production;
//! * `min..max~ item`: repetition (empty min is 0, empty max unbounded);
//! * `not(item, value)`: negative lookahead returning `value`;
//! * `!`: a stealer; past it, failures in the group become hard errors;
//! * a leading `name:` tags an item; the empty tag `:item` makes the item
//!   the group's sole value.
//!
//! Whitespace and `#`-to-end-of-line comments are skipped anywhere outside
//! string and regex literals.  Productions whose expression is a single
//! untagged item compile to that item's node directly; anything else becomes
//! a sequence named after the production, with generated `name.N` children.

use crate::buffer::BufferMatcher;
use crate::diag::NodeError;
use crate::diag::SyntaxError;
use crate::grammar::Grammar;
use crate::nodes::GrammarNode;
use crate::nodes::PatternMode;
use crate::nodes::RepeatMode;
use crate::nodes::SeqItem;
use crate::nodes::SequenceMode;
use crate::nodes::UnionMode;
use crate::nodes::Value;
use crate::patterns::bytes_regex;
use crate::patterns::compile_anchored;
use lazy_static::lazy_static;
use log::debug;
use regex::bytes::Regex;

lazy_static! {
    static ref DISCARD: Regex = bytes_regex(r"\A(?:\s+|#[^\n]*)+").unwrap();
    static ref NAME: Regex = bytes_regex(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap();
    static ref TAG: Regex = bytes_regex(r"\A([A-Za-z0-9_]*):").unwrap();
    static ref STRING: Regex =
        bytes_regex(r#"(?s)\A(?:"((?:[^\\"]|\\.)*)"|'((?:[^\\']|\\.)*)')"#).unwrap();
    static ref REGEX_LIT: Regex =
        bytes_regex(r"(?s)\A([0-9])?/((?:[^\\/]|\\.)+)/([ims]*)").unwrap();
    static ref REPEAT_PREFIX: Regex = bytes_regex(r"\A([0-9]*)\.\.([0-9]*)~").unwrap();
    static ref NOT_OPEN: Regex = bytes_regex(r"\Anot\s*\(").unwrap();
    static ref INT_LIT: Regex = bytes_regex(r"\A-?[0-9]+").unwrap();
    static ref REF_TARGET: Regex = bytes_regex(r"\A<\s*([A-Za-z_][A-Za-z0-9_]*)\s*>").unwrap();
}

/// Parses `data` as grammar notation, adding its productions (and the nodes
/// and patterns they expand to) to `grammar`, bound but not yet compiled.
///
/// Returns the production names in file order.  Existing nodes of the same
/// names are replaced.  Run [`Grammar::compile`] afterwards to resolve the
/// new nodes.
pub fn compile_grammar(grammar: &mut Grammar, data: &[u8]) -> Result<Vec<String>, SyntaxError> {
    let mut compiler = Compiler {
        grammar,
        bm: BufferMatcher::new(data),
    };
    let productions = compiler.run()?;
    debug!(
        "compiled {} production(s) from {} byte(s) of grammar",
        productions.len(),
        data.len()
    );
    Ok(productions)
}

/// An expression item, before node names are assigned.
enum Item {
    Literal(Vec<u8>),
    Regex {
        group: Option<usize>,
        source: Vec<u8>,
    },
    Group {
        items: Vec<Tagged>,
        stealer: Option<usize>,
        ws_sensitive: bool,
    },
    Union(Vec<Vec<Tagged>>),
    Reference(String),
    Repeat {
        min: usize,
        max: Option<usize>,
        item: Box<Item>,
    },
    Not {
        item: Box<Item>,
        value: Value,
    },
}

struct Tagged {
    tag: Option<String>,
    item: Item,
}

struct Compiler<'g, 'a> {
    grammar: &'g mut Grammar,
    bm: BufferMatcher<'a>,
}

impl<'g, 'a> Compiler<'g, 'a> {
    fn run(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut added = Vec::new();
        loop {
            self.discard();
            if self.bm.peek(1).is_empty() {
                return Ok(added);
            }
            added.push(self.production()?);
        }
    }

    fn production(&mut self) -> Result<String, SyntaxError> {
        let caps = self
            .bm
            .apply(|h| NAME.captures(h))
            .ok_or_else(|| self.err("expected a production name"))?;
        let name = String::from_utf8_lossy(&caps[0]).into_owned();
        let terminal = caps[0][0].is_ascii_uppercase();
        self.discard();
        self.expect(b'=')?;
        let (items, _, _) = self.expression(&[b';'], false)?;
        self.lower_production(&name, items, !terminal)?;
        Ok(name)
    }

    /// Parses items up to one of `stops`, returning the items, the stealer
    /// index (only legal when `in_group`), and the stop byte found.
    fn expression(
        &mut self,
        stops: &[u8],
        in_group: bool,
    ) -> Result<(Vec<Tagged>, Option<usize>, u8), SyntaxError> {
        let mut items = Vec::new();
        let mut stealer = None;
        loop {
            self.discard();
            let tag = self
                .bm
                .apply(|h| TAG.captures(h))
                .map(|caps| String::from_utf8_lossy(&caps[1]).into_owned());
            if tag.is_some() {
                self.discard();
            }
            let next = self.bm.peek(1);
            if next.is_empty() {
                let wanted: String = stops.iter().map(|&b| b as char).collect();
                return Err(self.err(&format!(
                    "reached end of input while looking for one of {:?}",
                    wanted
                )));
            }
            let c = next[0];
            if stops.contains(&c) {
                if tag.is_some() {
                    return Err(self.err("expected an item after the tag"));
                }
                self.bump();
                return Ok((items, stealer, c));
            }
            if c == b'!' {
                if tag.is_some() {
                    return Err(self.err("a stealer marker cannot be tagged"));
                }
                if !in_group {
                    return Err(self.err("a stealer marker is only allowed inside a group"));
                }
                if items.is_empty() {
                    return Err(self.err("a stealer marker cannot open a group"));
                }
                self.bump();
                if stealer.is_none() {
                    stealer = Some(items.len());
                }
                continue;
            }
            let item = self.item(c)?;
            items.push(Tagged { tag, item });
        }
    }

    fn item(&mut self, c: u8) -> Result<Item, SyntaxError> {
        if let Some(caps) = self.bm.apply(|h| REPEAT_PREFIX.captures(h)) {
            let min = self.parse_bound(&caps[1])?.unwrap_or(0);
            let max = self.parse_bound(&caps[2])?;
            if let Some(max) = max {
                if max <= min {
                    return Err(self.err("the repeat maximum must exceed the minimum"));
                }
            }
            self.discard();
            let next = self.bm.peek(1);
            if next.is_empty() {
                return Err(self.err("expected an item after the repeat bounds"));
            }
            let inner = self.item(next[0])?;
            return Ok(Item::Repeat {
                min,
                max,
                item: Box::new(inner),
            });
        }
        if self.bm.apply(|h| NOT_OPEN.captures(h)).is_some() {
            self.discard();
            let next = self.bm.peek(1);
            if next.is_empty() {
                return Err(self.err("expected an item inside not(...)"));
            }
            let inner = self.item(next[0])?;
            self.discard();
            self.expect(b',')?;
            self.discard();
            let value = self.value_literal()?;
            self.discard();
            self.expect(b')')?;
            return Ok(Item::Not {
                item: Box::new(inner),
                value,
            });
        }
        if let Some(caps) = self.bm.apply(|h| STRING.captures(h)) {
            let raw = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_bytes().to_vec())
                .unwrap_or_default();
            let bytes = self.unescape(&raw)?;
            if bytes.is_empty() {
                return Err(self.err("a string literal cannot be empty"));
            }
            return Ok(Item::Literal(bytes));
        }
        if let Some(caps) = self.bm.apply(|h| REGEX_LIT.captures(h)) {
            let group = match caps.get(1) {
                Some(m) => self.parse_bound(m.as_bytes())?,
                None => None,
            };
            // `\/` only escapes the notation's delimiter, not a regex escape
            let mut pattern = Vec::with_capacity(caps[2].len());
            let mut i = 0;
            while i < caps[2].len() {
                if caps[2][i] == b'\\' && caps[2].get(i + 1) == Some(&b'/') {
                    pattern.push(b'/');
                    i += 2;
                } else {
                    pattern.push(caps[2][i]);
                    i += 1;
                }
            }
            let flags = caps[3].to_vec();
            let source = if flags.is_empty() {
                pattern
            } else {
                let mut wrapped = Vec::with_capacity(pattern.len() + flags.len() + 4);
                wrapped.extend_from_slice(b"(?");
                wrapped.extend_from_slice(&flags);
                wrapped.push(b':');
                wrapped.extend_from_slice(&pattern);
                wrapped.push(b')');
                wrapped
            };
            if let Err(detail) = compile_anchored(&source) {
                return Err(self.err(&format!("bad regex literal: {}", detail)));
            }
            return Ok(Item::Regex { group, source });
        }
        match c {
            b'(' => {
                self.bump();
                let (items, stealer, _) = self.expression(&[b')'], true)?;
                Ok(Item::Group {
                    items,
                    stealer,
                    ws_sensitive: false,
                })
            }
            b'{' => {
                self.bump();
                let (items, stealer, _) = self.expression(&[b'}'], true)?;
                Ok(Item::Group {
                    items,
                    stealer,
                    ws_sensitive: true,
                })
            }
            b'[' => self.union(),
            b'<' => match self.bm.apply(|h| REF_TARGET.captures(h)) {
                Some(caps) => Ok(Item::Reference(
                    String::from_utf8_lossy(&caps[1]).into_owned(),
                )),
                None => Err(self.err("expected a production name inside '<...>'")),
            },
            _ => Err(self.err(&format!("expected an item, found {:?}", c as char))),
        }
    }

    fn union(&mut self) -> Result<Item, SyntaxError> {
        self.bump();
        let mut alternatives = Vec::new();
        loop {
            let (items, _, stop) = self.expression(&[b'|', b']'], false)?;
            if items.is_empty() {
                return Err(self.err("a union alternative cannot be empty"));
            }
            alternatives.push(items);
            if stop == b']' {
                return Ok(Item::Union(alternatives));
            }
        }
    }

    fn value_literal(&mut self) -> Result<Value, SyntaxError> {
        if let Some(caps) = self.bm.apply(|h| STRING.captures(h)) {
            let raw = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_bytes().to_vec())
                .unwrap_or_default();
            return Ok(Value::Bytes(self.unescape(&raw)?));
        }
        if let Some(caps) = self.bm.apply(|h| INT_LIT.captures(h)) {
            let text = String::from_utf8_lossy(&caps[0]).into_owned();
            return text
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| self.err("integer value out of range"));
        }
        Err(self.err("expected an integer or string value"))
    }

    fn lower_production(
        &mut self,
        name: &str,
        items: Vec<Tagged>,
        skip_ws: bool,
    ) -> Result<(), SyntaxError> {
        let mut items = items;
        if items.len() == 1 && items[0].tag.is_none() {
            // a single-item production is that item, under the production's
            // name
            if let Some(Tagged { item, .. }) = items.pop() {
                return self.lower_item(name, item, skip_ws);
            }
        }
        self.lower_group(name, items, None, skip_ws)
    }

    fn lower_item(&mut self, name: &str, item: Item, skip_ws: bool) -> Result<(), SyntaxError> {
        let node = match item {
            Item::Literal(bytes) => self.node_err(GrammarNode::literal(name, &bytes))?,
            Item::Regex { group, source } => {
                self.grammar
                    .patterns_mut()
                    .add(name, &source, true)
                    .map_err(|e| self.err(&e.to_string()))?;
                GrammarNode::pattern(name, name, group, PatternMode::Match)
            }
            Item::Group {
                items,
                stealer,
                ws_sensitive,
            } => {
                let skip = if ws_sensitive { false } else { skip_ws };
                return self.lower_group(name, items, stealer, skip);
            }
            Item::Union(alternatives) => {
                let mut members = Vec::new();
                for (i, alternative) in alternatives.into_iter().enumerate() {
                    let child = format!("{}.{}", name, i);
                    let mut alternative = alternative;
                    if alternative.len() == 1 && alternative[0].tag.is_none() {
                        if let Some(Tagged { item, .. }) = alternative.pop() {
                            self.lower_item(&child, item, skip_ws)?;
                        }
                    } else {
                        self.lower_group(&child, alternative, None, skip_ws)?;
                    }
                    members.push(child);
                }
                self.node_err(GrammarNode::union(name, members, UnionMode::Val))?
            }
            Item::Reference(target) => GrammarNode::reference(name, &target),
            Item::Repeat { min, max, item } => {
                let child = format!("{}.0", name);
                self.lower_item(&child, *item, skip_ws)?;
                self.node_err(GrammarNode::repeat(name, &child, min, max, RepeatMode::Seq))?
            }
            Item::Not { item, value } => {
                let child = format!("{}.0", name);
                self.lower_item(&child, *item, skip_ws)?;
                self.node_err(GrammarNode::negation(name, &child, value))?
            }
        };
        self.add(node)
    }

    fn lower_group(
        &mut self,
        name: &str,
        items: Vec<Tagged>,
        stealer: Option<usize>,
        skip_ws: bool,
    ) -> Result<(), SyntaxError> {
        let mut seq_items = Vec::with_capacity(items.len());
        for (i, tagged) in items.into_iter().enumerate() {
            let child = format!("{}.{}", name, i);
            self.lower_item(&child, tagged.item, skip_ws)?;
            seq_items.push(SeqItem {
                node: child,
                tag: tagged.tag,
            });
        }
        let named = seq_items
            .iter()
            .any(|i| matches!(i.tag.as_deref(), Some(t) if !t.is_empty()));
        let mode = if named {
            SequenceMode::Dict
        } else {
            SequenceMode::Seq
        };
        let node = self.node_err(GrammarNode::sequence(name, seq_items, mode, skip_ws, stealer))?;
        self.add(node)
    }

    fn node_err(
        &self,
        result: Result<GrammarNode, NodeError>,
    ) -> Result<GrammarNode, SyntaxError> {
        result.map_err(|e| self.err(&e.to_string()))
    }

    fn add(&mut self, node: GrammarNode) -> Result<(), SyntaxError> {
        self.grammar
            .add_node(node, true, true, false)
            .map_err(|e| self.err(&e.to_string()))
    }

    fn parse_bound(&self, digits: &[u8]) -> Result<Option<usize>, SyntaxError> {
        if digits.is_empty() {
            return Ok(None);
        }
        String::from_utf8_lossy(digits)
            .parse::<usize>()
            .map(Some)
            .map_err(|_| self.err("repeat bound out of range"))
    }

    fn unescape(&self, raw: &[u8]) -> Result<Vec<u8>, SyntaxError> {
        let mut out = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] != b'\\' {
                out.push(raw[i]);
                i += 1;
                continue;
            }
            i += 1;
            let escape = match raw.get(i) {
                Some(&b) => b,
                None => {
                    out.push(b'\\');
                    break;
                }
            };
            match escape {
                b'n' => out.push(b'\n'),
                b'r' => out.push(b'\r'),
                b't' => out.push(b'\t'),
                b'0' => out.push(0),
                b'\\' => out.push(b'\\'),
                b'"' => out.push(b'"'),
                b'\'' => out.push(b'\''),
                b'x' => {
                    let hi = raw.get(i + 1).and_then(|&b| (b as char).to_digit(16));
                    let lo = raw.get(i + 2).and_then(|&b| (b as char).to_digit(16));
                    match (hi, lo) {
                        (Some(hi), Some(lo)) => {
                            out.push((hi * 16 + lo) as u8);
                            i += 2;
                        }
                        _ => return Err(self.err("bad \\x escape in string literal")),
                    }
                }
                other => {
                    // unknown escapes pass through untouched
                    out.push(b'\\');
                    out.push(other);
                }
            }
            i += 1;
        }
        Ok(out)
    }

    fn discard(&mut self) {
        self.bm.apply(|h| DISCARD.captures(h));
    }

    fn bump(&mut self) {
        self.bm.step_clamped(1);
    }

    fn expect(&mut self, byte: u8) -> Result<(), SyntaxError> {
        if self.bm.peek(1).first() == Some(&byte) {
            self.bump();
            Ok(())
        } else {
            Err(self.err(&format!("expected {:?}", byte as char)))
        }
    }

    fn err(&self, message: &str) -> SyntaxError {
        SyntaxError {
            message: message.to_string(),
            at: self.bm.position(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::NodeKind;
    use assert_matches::assert_matches;

    fn compiled(src: &[u8]) -> Grammar {
        let mut g = Grammar::new();
        compile_grammar(&mut g, src).unwrap();
        let failed = g.compile(None, false);
        assert!(failed.is_empty(), "failed nodes: {:?}", failed);
        g
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        let g = compiled(b"# leading comment\n  a = \"x\" # trailing\n ; # done\n");
        assert_matches!(g.node("a").unwrap().kind(), NodeKind::Literal { .. });
    }

    #[test]
    fn escapes_are_decoded() {
        let g = compiled(br#"a = "a\n\t\x41\q\\" ;"#);
        assert_matches!(
            g.node("a").unwrap().kind(),
            NodeKind::Literal { bytes } if bytes == b"a\n\tA\\q\\"
        );
    }

    #[test]
    fn both_quote_styles_work() {
        let g = compiled(b"a = 'it\\'s' \"x\" ;");
        assert_matches!(
            g.node("a.0").unwrap().kind(),
            NodeKind::Literal { bytes } if bytes == b"it's"
        );
    }

    #[test]
    fn multi_item_productions_become_sequences() {
        let g = compiled(b"a = \"x\" \"y\" ;");
        assert_matches!(
            g.node("a").unwrap().kind(),
            NodeKind::Sequence { items, skip_ws: true, .. } if items.len() == 2
        );
        assert_matches!(g.node("a.0").unwrap().kind(), NodeKind::Literal { .. });
        assert_matches!(g.node("a.1").unwrap().kind(), NodeKind::Literal { .. });
    }

    #[test]
    fn terminals_keep_whitespace_significant() {
        let g = compiled(b"T = \"a\" \"b\" ;\nt = \"a\" \"b\" ;");
        assert_matches!(
            g.node("T").unwrap().kind(),
            NodeKind::Sequence { skip_ws: false, .. }
        );
        assert!(g.match_bytes("T", b"a b").unwrap().is_none());
        assert!(g.match_bytes("T", b"ab").unwrap().is_some());
        assert!(g.match_bytes("t", b"a  b").unwrap().is_some());
    }

    #[test]
    fn braced_groups_are_whitespace_sensitive() {
        let g = compiled(b"a = { \"x\" \"y\" } ;");
        assert_matches!(
            g.node("a").unwrap().kind(),
            NodeKind::Sequence { skip_ws: false, .. }
        );
        assert!(g.match_bytes("a", b"xy").unwrap().is_some());
        assert!(g.match_bytes("a", b"x y").unwrap().is_none());
    }

    #[test]
    fn tags_select_the_dict_mode() {
        let g = compiled(b"kv = k:/\\w+/ \"=\" v:/\\w+/ ;");
        assert_matches!(
            g.node("kv").unwrap().kind(),
            NodeKind::Sequence { mode: SequenceMode::Dict, .. }
        );
        match g.match_bytes("kv", b"x=1").unwrap() {
            Some(Value::Map(entries)) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, ["k", "v"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn the_empty_tag_selects_a_sole_value() {
        let g = compiled(b"q = \"(\" :\"x\" \")\" ;");
        assert_eq!(
            g.match_bytes("q", b"(x)").unwrap(),
            Some(Value::Bytes(b"x".to_vec()))
        );
    }

    #[test]
    fn unions_lower_alternatives() {
        let g = compiled(b"u = [ \"a\" | \"b\" \"c\" | <u> ] ;");
        assert_matches!(
            g.node("u").unwrap().kind(),
            NodeKind::Union { members, mode: UnionMode::Val } if members.len() == 3
        );
        // the multi-item alternative became an anonymous sequence
        assert_matches!(g.node("u.1").unwrap().kind(), NodeKind::Sequence { .. });
        assert_matches!(g.node("u.2").unwrap().kind(), NodeKind::Reference { .. });
    }

    #[test]
    fn regex_literals_register_patterns() {
        let g = compiled(b"w = 1/(a+)b/i ;");
        assert_matches!(
            g.node("w").unwrap().kind(),
            NodeKind::Pattern { group: Some(1), .. }
        );
        assert!(g.patterns().contains("w"));
        assert_eq!(
            g.match_bytes("w", b"AAb").unwrap(),
            Some(Value::Bytes(b"AA".to_vec()))
        );
    }

    #[test]
    fn escaped_slashes_reach_the_regex_engine_unescaped() {
        let g = compiled(br"p = /a\/b/ ;");
        assert!(g.match_bytes("p", b"a/b").unwrap().is_some());
    }

    #[test]
    fn repeat_prefixes_wrap_their_item() {
        let g = compiled(b"r = 2..4~ \"x\" ;");
        assert_matches!(
            g.node("r").unwrap().kind(),
            NodeKind::Repeat { min: 2, max: Some(4), .. }
        );
        let g = compiled(b"r = ..~ \"x\" ;");
        assert_matches!(
            g.node("r").unwrap().kind(),
            NodeKind::Repeat { min: 0, max: None, .. }
        );
    }

    #[test]
    fn stealer_placement_is_enforced() {
        let mut g = Grammar::new();
        assert_matches!(
            compile_grammar(&mut g, b"a = \"x\" ! \"y\" ;"),
            Err(SyntaxError { .. })
        );
        assert_matches!(
            compile_grammar(&mut g, b"a = ( ! \"y\" ) ;"),
            Err(SyntaxError { .. })
        );
        assert_matches!(
            compile_grammar(&mut g, b"a = ( \"x\" n:! \"y\" ) ;"),
            Err(SyntaxError { .. })
        );
        let mut g = Grammar::new();
        compile_grammar(&mut g, b"a = ( \"x\" ! \"y\" ) ;").unwrap();
        assert_matches!(
            g.node("a").unwrap().kind(),
            NodeKind::Sequence { stealer: Some(1), .. }
        );
    }

    #[test]
    fn bad_inputs_are_rejected_with_locations() {
        let mut g = Grammar::new();
        let err = compile_grammar(&mut g, b"a = ?? ;").unwrap_err();
        assert_eq!(err.at.line, 1);
        assert_matches!(compile_grammar(&mut g, b"a \"x\" ;"), Err(_));
        assert_matches!(compile_grammar(&mut g, b"a = \"\" ;"), Err(_));
        assert_matches!(compile_grammar(&mut g, b"a = 2..2~ \"x\" ;"), Err(_));
        assert_matches!(compile_grammar(&mut g, b"a = \"x\""), Err(_));
        assert_matches!(compile_grammar(&mut g, b"a = /(/ ;"), Err(_));
        assert_matches!(compile_grammar(&mut g, b"a = [ ] ;"), Err(_));
    }

    #[test]
    fn not_items_parse_with_integer_and_string_values() {
        let g = compiled(b"a = not(\"end\", 1) ;");
        assert_matches!(
            g.node("a").unwrap().kind(),
            NodeKind::Not { value: Value::Int(1), .. }
        );
        let g = compiled(b"a = not(\"end\", 'tok') ;");
        assert_matches!(
            g.node("a").unwrap().kind(),
            NodeKind::Not { value: Value::Bytes(v), .. } if v == b"tok"
        );
    }
}
