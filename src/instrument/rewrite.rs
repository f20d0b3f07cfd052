//! Span-based source editing.
//!
//! The rewriter never regenerates a file wholesale: it collects byte-range
//! edits against the original text and applies them in one pass, so every
//! byte outside the edited spans (comments and formatting included)
//! survives the round-trip untouched.
//!
//! Insertions at the same position apply in prepend order: the edit added
//! last ends up first in the output. That models statement injection at a
//! function body's entry, where each later rule prepends in front of the
//! statements earlier rules put there.

#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
    seq: usize,
}

/// An ordered collection of edits against one source string.
#[derive(Debug, Default)]
pub struct EditBuffer {
    edits: Vec<Edit>,
    next_seq: usize,
}

impl EditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert text at a byte position.
    pub fn insert(&mut self, pos: usize, text: String) {
        self.push(pos, pos, text);
    }

    /// Replace a byte range with text. Insertions strictly inside the
    /// range are dropped when the buffer is applied.
    pub fn replace(&mut self, start: usize, end: usize, text: String) {
        self.push(start, end, text);
    }

    fn push(&mut self, start: usize, end: usize, text: String) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.edits.push(Edit {
            start,
            end,
            text,
            seq,
        });
    }

    /// Apply all edits to the source.
    pub fn apply(mut self, source: &str) -> String {
        // Drop edits swallowed by a replacement range
        let replaced: Vec<(usize, usize, usize)> = self
            .edits
            .iter()
            .filter(|e| e.end > e.start)
            .map(|e| (e.start, e.end, e.seq))
            .collect();
        self.edits.retain(|e| {
            !replaced
                .iter()
                .any(|&(start, end, seq)| seq != e.seq && e.start > start && e.start < end)
        });

        // Position ascending; at the same position the edit added last
        // comes first (prepend order)
        self.edits.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| b.seq.cmp(&a.seq))
        });

        let mut out = String::with_capacity(source.len() + 256);
        let mut cursor = 0usize;
        for edit in &self.edits {
            if edit.start < cursor {
                // Overlapping replacements; keep the earlier one
                continue;
            }
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.text);
            cursor = edit.end;
        }
        out.push_str(&source[cursor..]);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}
