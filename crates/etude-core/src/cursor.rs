//! Index bookkeeping for a connection's fixed read buffer.
//!
//! Three indices walk the buffer from left to right:
//!
//! ```text
//! 0        line_start      check_pos          read_fill        capacity
//! |  parsed | current line  | received, unseen |   free space    |
//! ```
//!
//! `0 <= line_start <= check_pos <= read_fill <= capacity` holds after every
//! call. Reads may fail when the buffer is full; any other transition that
//! would break the ordering is a bug in the caller and panics.

use crate::error::{EtudeError, EtudeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCursor {
    line_start: usize,
    check_pos: usize,
    read_fill: usize,
    capacity: usize,
}

impl ReadCursor {
    pub const fn new(capacity: usize) -> Self {
        Self {
            line_start: 0,
            check_pos: 0,
            read_fill: 0,
            capacity,
        }
    }

    #[inline(always)]
    pub fn line_start(&self) -> usize {
        self.line_start
    }

    #[inline(always)]
    pub fn check(&self) -> usize {
        self.check_pos
    }

    #[inline(always)]
    pub fn fill(&self) -> usize {
        self.read_fill
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can still be received.
    #[inline(always)]
    pub fn spare(&self) -> usize {
        self.capacity - self.read_fill
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.read_fill == self.capacity
    }

    /// Bytes received but not yet examined by the line scanner.
    #[inline(always)]
    pub fn unchecked(&self) -> std::ops::Range<usize> {
        self.check_pos..self.read_fill
    }

    /// Account for `n` freshly received bytes at the end of the filled region.
    pub fn record_read(&mut self, n: usize) -> EtudeResult<()> {
        if n > self.spare() {
            return Err(EtudeError::ReadBufferFull);
        }
        self.read_fill += n;
        Ok(())
    }

    /// Move the scan position forward by `n` examined bytes.
    pub fn advance_check(&mut self, n: usize) {
        assert!(
            n <= self.read_fill - self.check_pos,
            "check_pos would pass read_fill ({} + {} > {})",
            self.check_pos,
            n,
            self.read_fill
        );
        self.check_pos += n;
    }

    /// The line ending at `check_pos` has been consumed; the next one starts there.
    pub fn commit_line(&mut self) {
        self.line_start = self.check_pos;
    }

    pub fn reset(&mut self) {
        self.line_start = 0;
        self.check_pos = 0;
        self.read_fill = 0;
    }

    #[cfg(test)]
    pub(crate) fn holds_invariant(&self) -> bool {
        self.line_start <= self.check_pos
            && self.check_pos <= self.read_fill
            && self.read_fill <= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_walks_forward() {
        let mut cursor = ReadCursor::new(16);
        assert!(cursor.holds_invariant());

        cursor.record_read(10).unwrap();
        assert_eq!(cursor.unchecked(), 0..10);

        cursor.advance_check(4);
        cursor.commit_line();
        assert_eq!(cursor.line_start(), 4);
        assert_eq!(cursor.check(), 4);
        assert_eq!(cursor.spare(), 6);
        assert!(cursor.holds_invariant());
    }

    #[test]
    fn test_cursor_rejects_overflowing_read() {
        let mut cursor = ReadCursor::new(8);
        cursor.record_read(8).unwrap();
        assert!(cursor.is_full());
        assert!(matches!(cursor.record_read(1), Err(EtudeError::ReadBufferFull)));
        assert_eq!(cursor.fill(), 8);
        assert!(cursor.holds_invariant());
    }

    #[test]
    #[should_panic(expected = "check_pos would pass read_fill")]
    fn test_cursor_check_cannot_pass_fill() {
        let mut cursor = ReadCursor::new(8);
        cursor.record_read(3).unwrap();
        cursor.advance_check(4);
    }

    #[test]
    fn test_cursor_reset_keeps_capacity() {
        let mut cursor = ReadCursor::new(32);
        cursor.record_read(20).unwrap();
        cursor.advance_check(20);
        cursor.commit_line();
        cursor.reset();
        assert_eq!(cursor, ReadCursor::new(32));
    }
}
