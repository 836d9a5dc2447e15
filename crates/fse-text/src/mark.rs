//! Mark tracking — positions that survive edits.
//!
//! A [`Mark`] is a `(line, column)` position with a back-reference to its
//! line; the line's mark list is the other half of the link. Marks never
//! dangle: before a region of text is deleted,
//! [`squeeze_marks`](TextStore::squeeze_marks) relocates every mark inside
//! the region to the region's end, and after text moves,
//! [`shift_marks`](TextStore::shift_marks) carries the affected marks along.
//! The store's extract path then only has to assert that lines leaving the
//! document carry no marks.
//!
//! # Slots
//!
//! Callers own marks through `Option<MarkId>` slots ("dot", the interpreter's
//! working position, a saved location). [`place_mark`](TextStore::place_mark)
//! fills an empty slot with a fresh mark or relocates the one already there —
//! a mark is never silently duplicated.
//!
//! # Column boundaries
//!
//! Columns are 0-based char offsets and saturate at `u32::MAX`. The exact
//! clamping at a squeeze region's end column is deliberate and pinned by the
//! tests below: a mark *at* `(last, last_col)` is outside the region and does
//! not move; a mark at the region's start does.

use crate::store::{LineId, MarkId, TextStore};

// ---------------------------------------------------------------------------
// Mark
// ---------------------------------------------------------------------------

/// A tracked position: a line handle plus a 0-based column.
#[derive(Debug)]
pub struct Mark {
    pub(crate) line: LineId,
    pub(crate) col: u32,
}

impl Mark {
    /// The line this mark is attached to.
    #[inline]
    #[must_use]
    pub const fn line(&self) -> LineId {
        self.line
    }

    /// The mark's column.
    #[inline]
    #[must_use]
    pub const fn col(&self) -> u32 {
        self.col
    }
}

// ---------------------------------------------------------------------------
// Mark operations
// ---------------------------------------------------------------------------

impl TextStore {
    /// Borrow a mark.
    #[inline]
    #[must_use]
    pub fn mark(&self, id: MarkId) -> &Mark {
        self.marks.get(id)
    }

    /// Put a mark at `(line, col)` through a caller-owned slot.
    ///
    /// An empty slot gets a freshly allocated mark, already attached to
    /// `line`. An occupied slot's mark is relocated: detached from its old
    /// line's list, attached to the new one.
    ///
    /// # Panics
    ///
    /// Debug builds panic when `line` is not part of a document.
    pub fn place_mark(&mut self, slot: &mut Option<MarkId>, line: LineId, col: u32) {
        debug_assert!(
            self.lines.get(line).group().is_some(),
            "marks only attach to document lines"
        );
        match *slot {
            Some(id) => {
                let old = self.marks.get(id).line;
                if old != line {
                    self.lines.get_mut(old).marks.retain(|&m| m != id);
                    self.lines.get_mut(line).marks.push(id);
                }
                let mark = self.marks.get_mut(id);
                mark.line = line;
                mark.col = col;
            }
            None => {
                let id = self.marks.alloc(Mark { line, col });
                self.lines.get_mut(line).marks.push(id);
                *slot = Some(id);
            }
        }
    }

    /// Detach a mark from its line and free it.
    pub fn destroy_mark(&mut self, id: MarkId) {
        let line = self.marks.get(id).line;
        self.lines.get_mut(line).marks.retain(|&m| m != id);
        let _ = self.marks.free(id);
    }

    /// Relocate every mark inside the region `[(fl, fc), (ll, lc))` to
    /// exactly `(ll, lc)`, ahead of that region's deletion.
    ///
    /// - On `fl` (when `fl != ll`): marks at or after `fc` move.
    /// - On lines strictly between `fl` and `ll`: every mark moves.
    /// - On `ll`: marks before `lc` snap to column `lc`; marks at or after
    ///   `lc` stay put.
    /// - When `fl == ll`: only marks in `[fc, lc)` snap to `lc`.
    ///
    /// Afterwards no mark points strictly inside the region, so the interior
    /// lines can be extracted without stranding anything.
    pub fn squeeze_marks(&mut self, fl: LineId, fc: u32, ll: LineId, lc: u32) {
        if fl == ll {
            let ids: Vec<MarkId> = self.lines.get(fl).marks.clone();
            for id in ids {
                let mark = self.marks.get_mut(id);
                if mark.col >= fc && mark.col < lc {
                    mark.col = lc;
                }
            }
            return;
        }

        self.relocate_marks(fl, fc, ll, lc);
        let mut cur = self.next_line(fl);
        while let Some(id) = cur {
            if id == ll {
                break;
            }
            self.relocate_marks(id, 0, ll, lc);
            cur = self.next_line(id);
        }
        let ids: Vec<MarkId> = self.lines.get(ll).marks.clone();
        for id in ids {
            let mark = self.marks.get_mut(id);
            if mark.col < lc {
                mark.col = lc;
            }
        }
    }

    /// After a `width`-column span of text moved from `(src, src_col)` to
    /// `(dest, dest_col)`, carry the marks sitting in the source span along:
    /// each mark in `[src_col, src_col + width)` is offset by
    /// `dest_col - src_col` (saturating at both column extremes) and
    /// re-homed onto `dest` when the lines differ.
    ///
    /// Insertion is the degenerate move of a line's tail rightward on the
    /// same line; joining two lines is a move of the second line's tail onto
    /// the first.
    pub fn shift_marks(&mut self, src: LineId, src_col: u32, width: u32, dest: LineId, dest_col: u32) {
        let hi = src_col.saturating_add(width);
        let delta = i64::from(dest_col) - i64::from(src_col);
        let affected: Vec<MarkId> = self
            .lines
            .get(src)
            .marks
            .iter()
            .copied()
            .filter(|&id| {
                let col = self.marks.get(id).col;
                col >= src_col && col < hi
            })
            .collect();

        for &id in &affected {
            let mark = self.marks.get_mut(id);
            let shifted = i64::from(mark.col) + delta;
            mark.col = shifted.clamp(0, i64::from(u32::MAX)) as u32;
            mark.line = dest;
        }

        if src != dest && !affected.is_empty() {
            self.lines.get_mut(src).marks.retain(|m| !affected.contains(m));
            self.lines.get_mut(dest).marks.extend_from_slice(&affected);
        }
    }

    /// Move the marks on `from` at or after `min_col` to `(to, to_col)`.
    fn relocate_marks(&mut self, from: LineId, min_col: u32, to: LineId, to_col: u32) {
        let moved: Vec<MarkId> = self
            .lines
            .get(from)
            .marks
            .iter()
            .copied()
            .filter(|&id| self.marks.get(id).col >= min_col)
            .collect();
        if moved.is_empty() {
            return;
        }
        for &id in &moved {
            let mark = self.marks.get_mut(id);
            mark.line = to;
            mark.col = to_col;
        }
        self.lines.get_mut(from).marks.retain(|m| !moved.contains(m));
        self.lines.get_mut(to).marks.extend_from_slice(&moved);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
