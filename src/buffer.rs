//! Position-tracked cursor over an immutable byte buffer.
//!
//! `BufferMatcher` is the abstraction every match operation runs against: it
//! holds a byte offset into the input together with the derived line and
//! column numbers, and exposes the four operations the engine needs:
//! applying a regex-match function at the current position, peeking ahead,
//! stepping, and constant-time save/restore of the cursor state.  Save and
//! restore are what implement backtracking; there is no other parser state
//! to unwind.
//!
//! Line and column numbers are maintained incrementally as the cursor
//! advances, which is the authoritative implementation for the hot match
//! path.  The recompute-from-prefix definitions survive as [`line_at`] and
//! [`column_at`]; they are used when the cursor moves backwards by an
//! arbitrary amount and by tests, which assert that the two forms agree.
//!
//! Lines are 1-based and columns 0-based: the line number is the count of
//! newline bytes (0x0A) in `buffer[0..offset]` plus one, and the column is
//! the offset minus the offset of the most recent preceding newline (or the
//! offset itself on the first line).

use regex::bytes::Captures;
use std::fmt;

/// Number of the line containing `pos`, computed from the byte prefix.
pub fn line_at(data: &[u8], pos: usize) -> usize {
    data[..pos].iter().filter(|&&b| b == b'\n').count() + 1
}

/// Column of `pos`, computed from the byte prefix.
pub fn column_at(data: &[u8], pos: usize) -> usize {
    match data[..pos].iter().rposition(|&b| b == b'\n') {
        Some(nl) => pos - nl,
        None => pos,
    }
}

/// A human-meaningful place in the input, carried by location-bearing errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    /// Byte offset.
    pub offset: usize,
    /// 1-based line number.
    pub line: usize,
    /// Column; see the module documentation for the exact semantics.
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "offset {} ({}:{})", self.offset, self.line, self.column)
    }
}

/// An opaque snapshot of cursor state.
///
/// `restore` reproduces offset, line and column exactly, in constant time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pos: usize,
    line: usize,
    column: usize,
}

impl Location {
    /// The byte offset this location was taken at.
    pub fn offset(&self) -> usize {
        self.pos
    }
}

/// Error raised by [`BufferMatcher::step`] when a move would cross the
/// buffer's bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutOfRange {
    /// Offset the cursor was at.
    pub from: usize,
    /// Requested (signed) move.
    pub delta: isize,
    /// Length of the buffer.
    pub len: usize,
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "cannot step by {} from offset {} in a buffer of {} byte(s)",
            self.delta, self.from, self.len
        )
    }
}

impl std::error::Error for OutOfRange {}

/// A cursor over an immutable byte buffer, tracking line and column numbers.
#[derive(Clone, Debug)]
pub struct BufferMatcher<'a> {
    data: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> BufferMatcher<'a> {
    /// Creates a cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> BufferMatcher<'a> {
        BufferMatcher {
            data,
            pos: 0,
            line: 1,
            column: 0,
        }
    }

    /// The underlying buffer.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// The current byte offset, in `[0, data.len()]`.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The 1-based line number at the current offset.
    pub fn line(&self) -> usize {
        self.line
    }

    /// The column at the current offset.
    pub fn column(&self) -> usize {
        self.column
    }

    /// The current place as a [`Position`], for error reporting.
    pub fn position(&self) -> Position {
        Position {
            offset: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    /// True when the cursor has consumed the whole buffer.
    pub fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    /// True at the start of input or immediately after a newline byte.
    pub fn at_line_start(&self) -> bool {
        self.pos == 0 || self.data[self.pos - 1] == b'\n'
    }

    /// Applies a regex-match function to the remainder of the buffer.
    ///
    /// On a hit the cursor advances past the matched bytes and the captures
    /// are returned; on a miss the cursor does not move.  The function is
    /// expected to anchor its match at the start of the slice it is given
    /// (compiled patterns in this crate are wrapped in `\A(?:...)`).
    pub fn apply<F>(&mut self, f: F) -> Option<Captures<'a>>
    where
        F: FnOnce(&'a [u8]) -> Option<Captures<'a>>,
    {
        let caps = f(&self.data[self.pos..])?;
        let len = caps.get(0).map_or(0, |m| m.end());
        self.advance(len);
        Some(caps)
    }

    /// Returns the next `n` bytes without advancing; shorter near the end of
    /// the buffer.
    pub fn peek(&self, n: usize) -> &'a [u8] {
        &self.data[self.pos..self.data.len().min(self.pos + n)]
    }

    /// Advances (or retreats, for negative `delta`) by `delta` bytes,
    /// returning the bytes moved over.
    ///
    /// A move that would cross the buffer's bounds is refused with
    /// [`OutOfRange`]; use [`step_clamped`](Self::step_clamped) to permit
    /// overrun.
    pub fn step(&mut self, delta: isize) -> Result<&'a [u8], OutOfRange> {
        let target = self.pos as isize + delta;
        if target < 0 || target > self.data.len() as isize {
            return Err(OutOfRange {
                from: self.pos,
                delta,
                len: self.data.len(),
            });
        }
        Ok(self.move_to(target as usize))
    }

    /// Like [`step`](Self::step), but clamps the target offset to
    /// `[0, data.len()]` instead of refusing the move.
    pub fn step_clamped(&mut self, delta: isize) -> &'a [u8] {
        let target = (self.pos as isize + delta).clamp(0, self.data.len() as isize);
        self.move_to(target as usize)
    }

    /// Snapshots the cursor state.
    pub fn save(&self) -> Location {
        Location {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    /// Restores a previously saved cursor state.
    pub fn restore(&mut self, loc: Location) {
        self.pos = loc.pos;
        self.line = loc.line;
        self.column = loc.column;
    }

    fn move_to(&mut self, target: usize) -> &'a [u8] {
        if target >= self.pos {
            let moved = &self.data[self.pos..target];
            self.advance(moved.len());
            moved
        } else {
            let moved = &self.data[target..self.pos];
            self.pos = target;
            self.line = line_at(self.data, target);
            self.column = column_at(self.data, target);
            moved
        }
    }

    fn advance(&mut self, len: usize) {
        let consumed = &self.data[self.pos..self.pos + len];
        self.pos += len;
        match consumed.iter().rposition(|&b| b == b'\n') {
            Some(nl) => {
                self.line += consumed.iter().filter(|&&b| b == b'\n').count();
                self.column = len - nl;
            }
            None => self.column += len,
        }
        debug_assert_eq!(self.line, line_at(self.data, self.pos));
        debug_assert_eq!(self.column, column_at(self.data, self.pos));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::bytes_regex;

    #[test]
    fn peek_is_shorter_near_the_end() {
        let bm = BufferMatcher::new(b"abc");
        assert_eq!(bm.peek(2), b"ab");
        assert_eq!(bm.peek(10), b"abc");
        let mut bm = bm;
        bm.step(3).unwrap();
        assert_eq!(bm.peek(1), b"");
    }

    #[test]
    fn step_tracks_lines_and_columns() {
        let mut bm = BufferMatcher::new(b"ab\ncd\nef");
        assert_eq!(bm.step(4).unwrap(), b"ab\nc");
        assert_eq!((bm.pos(), bm.line(), bm.column()), (4, 2, 2));
        bm.step(3).unwrap();
        assert_eq!((bm.pos(), bm.line(), bm.column()), (7, 3, 2));
        // backwards moves recompute from the prefix
        bm.step(-6).unwrap();
        assert_eq!((bm.pos(), bm.line(), bm.column()), (1, 1, 1));
    }

    #[test]
    fn step_refuses_overrun() {
        let mut bm = BufferMatcher::new(b"ab");
        assert_eq!(
            bm.step(-1),
            Err(OutOfRange {
                from: 0,
                delta: -1,
                len: 2
            })
        );
        assert!(bm.step(3).is_err());
        assert_eq!(bm.pos(), 0);
        assert_eq!(bm.step_clamped(5), b"ab");
        assert_eq!(bm.pos(), 2);
        assert_eq!(bm.step_clamped(-9), b"ab");
        assert_eq!(bm.pos(), 0);
    }

    #[test]
    fn save_restore_is_identity() {
        let mut bm = BufferMatcher::new(b"one\ntwo\nthree");
        bm.step(9).unwrap();
        let loc = bm.save();
        bm.step(3).unwrap();
        bm.restore(loc);
        assert_eq!((bm.pos(), bm.line(), bm.column()), (9, 3, 2));
    }

    #[test]
    fn apply_advances_only_on_a_hit() {
        let word = bytes_regex(r"\A\w+").unwrap();
        let mut bm = BufferMatcher::new(b"abc def");
        let caps = bm.apply(|h| word.captures(h)).unwrap();
        assert_eq!(&caps[0], b"abc");
        assert_eq!(bm.pos(), 3);
        assert!(bm.apply(|h| word.captures(h)).is_none());
        assert_eq!(bm.pos(), 3);
    }

    #[test]
    fn incremental_counts_agree_with_the_prefix() {
        let data = b"a\nbb\n\nccc\nd";
        let mut bm = BufferMatcher::new(data);
        for step in [1, 3, 1, 4, 2] {
            bm.step(step).unwrap();
            assert_eq!(bm.line(), line_at(data, bm.pos()));
            assert_eq!(bm.column(), column_at(data, bm.pos()));
        }
        assert!(bm.at_end());
    }

    #[test]
    fn line_start_detection() {
        let mut bm = BufferMatcher::new(b"x\ny");
        assert!(bm.at_line_start());
        bm.step(1).unwrap();
        assert!(!bm.at_line_start());
        bm.step(1).unwrap();
        assert!(bm.at_line_start());
    }
}
