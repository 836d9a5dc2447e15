//! Line/group storage — the document's spine.
//!
//! A document ([`Frame`]) is a doubly linked chain of [`Group`]s, each owning
//! up to [`MAX_GROUP_LINES`] consecutive [`Line`]s. The group layer exists
//! for exactly one reason: cheap line numbering after edits. Every group
//! caches the document-wide number of its first line, so
//!
//! - [`line_to_number`](TextStore::line_to_number) is O(1), and
//! - inserting or deleting a run of lines costs O(groups touched), never
//!   O(lines in the document) — only group headers are renumbered, the lines
//!   themselves are left alone.
//!
//! # Detached lines
//!
//! Lines move between two states. *In a document*: owned by a group, carrying
//! an offset within it, reachable from the frame. *Detached*: freshly created
//! by [`create_lines`](TextStore::create_lines) or pulled out by
//! [`extract_lines`](TextStore::extract_lines), linked only to each other and
//! owned by nobody. Detached lines must carry no marks and are the only lines
//! [`destroy_lines`](TextStore::destroy_lines) accepts.
//!
//! # The sentinel
//!
//! Every frame ends with a sentinel end-of-document line: no text, no
//! successor, never extracted. It gives every insertion point a line to
//! stand "before", so appending at the end is not a special case.
//!
//! # Ordering contracts
//!
//! Callers extract marks (`squeeze_marks`) before extracting lines, and take
//! line text before destroying lines. These are structural preconditions:
//! violated, they are caught by `debug_assert!` / [`validate`](TextStore::validate)
//! in debug builds and are unreachable through well-ordered callers in
//! release builds.

use std::fmt;

use crate::arena::{Arena, Id};
use crate::mark::Mark;

/// Maximum number of lines one group may hold. Insertions that would
/// overflow a group split it into freshly allocated groups instead.
pub const MAX_GROUP_LINES: u16 = 50;

/// Handle to a [`Line`] in the store.
pub type LineId = Id<Line>;

/// Handle to a [`Group`] in the store.
pub type GroupId = Id<Group>;

/// Handle to a [`Mark`] in the store.
pub type MarkId = Id<Mark>;

// ---------------------------------------------------------------------------
// Line
// ---------------------------------------------------------------------------

/// One text line.
///
/// The text buffer is materialized lazily: an empty line is an empty
/// `String`, which owns no heap allocation at all. `offset` is the line's
/// position within its owning group; it is only meaningful while the line is
/// in a document.
pub struct Line {
    text: String,
    group: Option<GroupId>,
    offset: u16,
    prev: Option<LineId>,
    next: Option<LineId>,
    pub(crate) marks: Vec<MarkId>,
    sentinel: bool,
}

impl Line {
    fn detached() -> Self {
        Self {
            text: String::new(),
            group: None,
            offset: 0,
            prev: None,
            next: None,
            marks: Vec::new(),
            sentinel: false,
        }
    }

    /// The line's text. Empty for the sentinel, and for any line whose
    /// buffer was never materialized.
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Char length of the text.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    /// True when the line holds no text.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// True for the end-of-document sentinel.
    #[inline]
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.sentinel
    }

    /// The owning group, or `None` while detached.
    #[inline]
    #[must_use]
    pub const fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// Marks currently attached to this line.
    #[inline]
    #[must_use]
    pub fn marks(&self) -> &[MarkId] {
        &self.marks
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Line")
            .field("text", &self.text)
            .field("offset", &self.offset)
            .field("marks", &self.marks.len())
            .field("sentinel", &self.sentinel)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A capacity-bounded cluster of consecutive lines.
///
/// Groups are pure bookkeeping — they own no text. `first_line_nr` is the
/// document-wide number of `first_line`, kept consistent across the whole
/// chain by every insert/delete.
#[derive(Debug)]
pub struct Group {
    first_line: LineId,
    nr_lines: u16,
    first_line_nr: u32,
    prev: Option<GroupId>,
    next: Option<GroupId>,
}

impl Group {
    /// Lines currently in this group. Always in `1..=MAX_GROUP_LINES` for a
    /// group that is part of a document.
    #[inline]
    #[must_use]
    pub const fn nr_lines(&self) -> u16 {
        self.nr_lines
    }

    /// Document-wide number of the group's first line.
    #[inline]
    #[must_use]
    pub const fn first_line_nr(&self) -> u32 {
        self.first_line_nr
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A document: a chain of groups, terminated by a sentinel line.
///
/// The frame itself holds only the ends of the group chain plus the sentinel
/// handle; everything else is reached by walking.
#[derive(Debug)]
pub struct Frame {
    first_group: GroupId,
    last_group: GroupId,
    sentinel: LineId,
}

impl Frame {
    /// Create an empty document: one group holding only the sentinel.
    pub fn new(store: &mut TextStore) -> Self {
        let sentinel = store.lines.alloc(Line {
            sentinel: true,
            ..Line::detached()
        });
        let group = store.groups.alloc(Group {
            first_line: sentinel,
            nr_lines: 1,
            first_line_nr: 0,
            prev: None,
            next: None,
        });
        let line = store.lines.get_mut(sentinel);
        line.group = Some(group);
        line.offset = 0;
        Self {
            first_group: group,
            last_group: group,
            sentinel,
        }
    }

    /// The end-of-document sentinel line.
    #[inline]
    #[must_use]
    pub const fn sentinel(&self) -> LineId {
        self.sentinel
    }
}

// ---------------------------------------------------------------------------
// TextStore
// ---------------------------------------------------------------------------

/// The pooled storage behind every frame: line, group, and mark arenas.
///
/// All mutation goes through the operations below; they keep the numbering
/// and ownership invariants intact, and re-check them after every public
/// mutation in debug builds.
#[derive(Debug, Default)]
pub struct TextStore {
    pub(crate) lines: Arena<Line>,
    pub(crate) groups: Arena<Group>,
    pub(crate) marks: Arena<Mark>,
}

impl TextStore {
    /// Create an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Arena::new(),
            groups: Arena::new(),
            marks: Arena::new(),
        }
    }

    // -- Line access --------------------------------------------------------

    /// Borrow a line.
    #[inline]
    #[must_use]
    pub fn line(&self, id: LineId) -> &Line {
        self.lines.get(id)
    }

    /// The line after `id` in its document, if any. `None` past the sentinel
    /// or at the end of a detached run.
    #[inline]
    #[must_use]
    pub fn next_line(&self, id: LineId) -> Option<LineId> {
        self.lines.get(id).next
    }

    /// The line before `id`, if any.
    #[inline]
    #[must_use]
    pub fn prev_line(&self, id: LineId) -> Option<LineId> {
        self.lines.get(id).prev
    }

    /// The first line of a document.
    #[must_use]
    pub fn first_line(&self, frame: &Frame) -> LineId {
        self.groups.get(frame.first_group).first_line
    }

    /// Replace a line's text.
    pub fn set_text(&mut self, id: LineId, text: String) {
        let line = self.lines.get_mut(id);
        debug_assert!(!line.sentinel, "the sentinel carries no text");
        line.text = text;
    }

    /// Take a line's text out, leaving the buffer empty (and allocation-free).
    pub fn take_text(&mut self, id: LineId) -> String {
        std::mem::take(&mut self.lines.get_mut(id).text)
    }

    /// Total lines in a document, sentinel included.
    #[must_use]
    pub fn line_count(&self, frame: &Frame) -> u32 {
        let last = self.groups.get(frame.last_group);
        last.first_line_nr + u32::from(last.nr_lines)
    }

    /// Live lines across every document and detached run — pool accounting
    /// for leak checks.
    #[must_use]
    pub fn live_lines(&self) -> usize {
        self.lines.live()
    }

    /// Total line slots ever pooled. Grows only in whole allocation batches.
    #[must_use]
    pub fn line_slots(&self) -> usize {
        self.lines.slot_count()
    }

    /// Borrow a group (read-only, for invariant inspection).
    #[inline]
    #[must_use]
    pub fn group(&self, id: GroupId) -> &Group {
        self.groups.get(id)
    }

    // -- Create / destroy ---------------------------------------------------

    /// Allocate `count` detached lines, linked to each other in order.
    /// Returns the first and last of the run. Never fails: the pool grows in
    /// batches as needed.
    ///
    /// # Panics
    ///
    /// Debug builds panic when `count == 0`.
    pub fn create_lines(&mut self, count: u32) -> (LineId, LineId) {
        debug_assert!(count > 0, "create_lines needs a positive count");
        let first = self.lines.alloc(Line::detached());
        let mut prev = first;
        for _ in 1..count {
            let id = self.lines.alloc(Line::detached());
            self.lines.get_mut(id).prev = Some(prev);
            self.lines.get_mut(prev).next = Some(id);
            prev = id;
        }
        (first, prev)
    }

    /// Return a detached run to the pool.
    ///
    /// Precondition (debug-checked): every line in the run is detached — no
    /// group, no marks, zero-length text. Callers squeeze marks out and take
    /// the text before destroying.
    pub fn destroy_lines(&mut self, first: LineId, last: LineId) {
        let mut cur = Some(first);
        loop {
            let id = cur.expect("destroy run must be linked first..last");
            let line = self.lines.get(id);
            debug_assert!(line.group.is_none(), "destroying a line still in a document");
            debug_assert!(line.marks.is_empty(), "destroying a line that carries marks");
            debug_assert!(line.text.is_empty(), "destroying a line with live text");
            cur = line.next;
            let _ = self.lines.free(id);
            if id == last {
                break;
            }
        }
    }

    // -- Inject -------------------------------------------------------------

    /// Splice a detached run into a document immediately before `before`.
    ///
    /// The target group absorbs the run when it has room; otherwise the
    /// group's lines plus the run are redistributed over the group and as
    /// many fresh groups as the overflow needs. Either way, only the touched
    /// groups and the group headers after them are visited — line numbering
    /// never walks the document's lines.
    ///
    /// # Panics
    ///
    /// Debug builds panic when the run is not detached or `before` is not in
    /// a document.
    pub fn inject_lines(&mut self, frame: &mut Frame, first: LineId, last: LineId, before: LineId) {
        let n = self.run_len(first, last, true);
        let bg = self
            .lines
            .get(before)
            .group
            .expect("inject target must be in a document");

        // Splice the line chain.
        let before_prev = self.lines.get(before).prev;
        self.lines.get_mut(first).prev = before_prev;
        if let Some(p) = before_prev {
            self.lines.get_mut(p).next = Some(first);
        }
        self.lines.get_mut(last).next = Some(before);
        self.lines.get_mut(before).prev = Some(last);

        let k = usize::from(self.lines.get(before).offset);
        let old = usize::from(self.groups.get(bg).nr_lines);
        let total = old + n;

        if total <= usize::from(MAX_GROUP_LINES) {
            // The run fits: adopt it into `bg` and shift the displaced tail.
            if k == 0 {
                self.groups.get_mut(bg).first_line = first;
            }
            let mut cur = Some(first);
            for off in k..k + n {
                let id = cur.expect("run shorter than counted");
                let line = self.lines.get_mut(id);
                line.group = Some(bg);
                line.offset = off as u16;
                cur = line.next;
            }
            let mut cur = Some(before);
            for _ in 0..old - k {
                let id = cur.expect("group tail shorter than counted");
                let line = self.lines.get_mut(id);
                line.offset += n as u16;
                cur = line.next;
            }
            self.groups.get_mut(bg).nr_lines = total as u16;
            let next = self.groups.get(bg).next;
            self.renumber_from(frame, next);
        } else {
            let seq_start = if k == 0 {
                first
            } else {
                self.groups.get(bg).first_line
            };
            self.rebuild_groups(frame, bg, seq_start, total);
        }

        #[cfg(debug_assertions)]
        self.validate(frame);
    }

    /// Redistribute `total` consecutive lines (starting at `seq_start`,
    /// logically replacing group `bg`'s contents) over `bg` plus freshly
    /// allocated groups, each filled to a near-even share.
    fn rebuild_groups(&mut self, frame: &mut Frame, bg: GroupId, seq_start: LineId, total: usize) {
        let ngroups = total.div_ceil(usize::from(MAX_GROUP_LINES));
        let base = total / ngroups;
        let rem = total % ngroups;
        log::trace!("group split: {total} lines over {ngroups} groups");

        let old_next = self.groups.get(bg).next;
        let mut g = bg;
        let mut first_nr = self.groups.get(bg).first_line_nr;
        let mut cur = Some(seq_start);

        for gi in 0..ngroups {
            let take = base + usize::from(gi < rem);
            let head = cur.expect("line chain shorter than counted");
            if gi == 0 {
                self.groups.get_mut(g).first_line = head;
            } else {
                let ng = self.groups.alloc(Group {
                    first_line: head,
                    nr_lines: 0,
                    first_line_nr: 0,
                    prev: Some(g),
                    next: None,
                });
                self.groups.get_mut(g).next = Some(ng);
                g = ng;
            }
            for off in 0..take {
                let id = cur.expect("line chain shorter than counted");
                let line = self.lines.get_mut(id);
                line.group = Some(g);
                line.offset = off as u16;
                cur = line.next;
            }
            let group = self.groups.get_mut(g);
            group.nr_lines = take as u16;
            group.first_line_nr = first_nr;
            first_nr += take as u32;
        }

        self.groups.get_mut(g).next = old_next;
        match old_next {
            Some(nx) => self.groups.get_mut(nx).prev = Some(g),
            None => frame.last_group = g,
        }
        self.renumber_from(frame, old_next);
    }

    // -- Extract ------------------------------------------------------------

    /// Remove the contiguous in-document run `first..=last`, leaving it
    /// detached (still linked internally, ready for
    /// [`destroy_lines`](Self::destroy_lines) or re-injection elsewhere).
    ///
    /// Affected groups shed the removed lines; emptied groups are destroyed,
    /// and the two survivors at the seam are merged when their remainder
    /// fits in one group.
    ///
    /// # Panics
    ///
    /// Debug builds panic when the run is not contiguous in-document, when
    /// any line in it still carries marks, or when it includes the sentinel.
    pub fn extract_lines(&mut self, frame: &mut Frame, first: LineId, last: LineId) {
        let n = self.run_len(first, last, false);
        let gf = self
            .lines
            .get(first)
            .group
            .expect("extract run must be in a document");
        let gl = self
            .lines
            .get(last)
            .group
            .expect("extract run must be in a document");

        let head = usize::from(self.lines.get(first).offset);
        let tail =
            usize::from(self.groups.get(gl).nr_lines) - usize::from(self.lines.get(last).offset) - 1;
        let before = self.lines.get(first).prev;
        let after = self
            .lines
            .get(last)
            .next
            .expect("the sentinel is never extracted");

        // Unlink and detach the run.
        match before {
            Some(p) => self.lines.get_mut(p).next = Some(after),
            None => {}
        }
        self.lines.get_mut(after).prev = before;
        self.lines.get_mut(first).prev = None;
        self.lines.get_mut(last).next = None;
        let mut cur = Some(first);
        while let Some(id) = cur {
            let line = self.lines.get_mut(id);
            debug_assert!(line.marks.is_empty(), "extracting a line that carries marks");
            line.group = None;
            line.offset = 0;
            cur = line.next;
        }

        if gf == gl {
            let remaining = head + tail;
            if remaining == 0 {
                self.destroy_group(frame, gf);
            } else {
                if head == 0 {
                    self.groups.get_mut(gf).first_line = after;
                }
                self.reoffset(after, gf, head, tail);
                self.groups.get_mut(gf).nr_lines = remaining as u16;
            }
        } else {
            // Groups strictly inside the run vanish wholesale.
            let mut cur = self.groups.get(gf).next;
            while cur != Some(gl) {
                let g = cur.expect("extract run crossed the group chain end");
                cur = self.groups.get(g).next;
                self.destroy_group(frame, g);
            }

            if tail == 0 {
                self.destroy_group(frame, gl);
                if head == 0 {
                    self.destroy_group(frame, gf);
                } else {
                    self.groups.get_mut(gf).nr_lines = head as u16;
                }
            } else if head == 0 {
                self.destroy_group(frame, gf);
                self.groups.get_mut(gl).first_line = after;
                self.reoffset(after, gl, 0, tail);
                self.groups.get_mut(gl).nr_lines = tail as u16;
            } else if head + tail <= usize::from(MAX_GROUP_LINES) {
                // The seam fits in one group: fold the tail into `gf`.
                self.reoffset(after, gf, head, tail);
                self.groups.get_mut(gf).nr_lines = (head + tail) as u16;
                self.destroy_group(frame, gl);
            } else {
                self.groups.get_mut(gf).nr_lines = head as u16;
                self.groups.get_mut(gl).first_line = after;
                self.reoffset(after, gl, 0, tail);
                self.groups.get_mut(gl).nr_lines = tail as u16;
            }
        }

        // Renumber everything after the last untouched group.
        let anchor = match before {
            Some(b) => self
                .groups
                .get(self.lines.get(b).group.expect("preceding line is in the document"))
                .next,
            None => Some(frame.first_group),
        };
        self.renumber_from(frame, anchor);

        let _ = n;
        #[cfg(debug_assertions)]
        self.validate(frame);
    }

    /// Re-home `count` lines starting at `from` into `group`, with offsets
    /// `base..base + count`.
    fn reoffset(&mut self, from: LineId, group: GroupId, base: usize, count: usize) {
        let mut cur = Some(from);
        for i in 0..count {
            let id = cur.expect("group tail shorter than counted");
            let line = self.lines.get_mut(id);
            line.group = Some(group);
            line.offset = (base + i) as u16;
            cur = line.next;
        }
    }

    /// Unlink a group from its chain and return it to the pool. The frame's
    /// chain ends are patched when the group sat at either end.
    fn destroy_group(&mut self, frame: &mut Frame, g: GroupId) {
        let group = self.groups.free(g);
        match group.prev {
            Some(p) => self.groups.get_mut(p).next = group.next,
            None => {
                frame.first_group = group.next.expect("a document always keeps one group");
            }
        }
        match group.next {
            Some(x) => self.groups.get_mut(x).prev = group.prev,
            None => {
                frame.last_group = group.prev.expect("a document always keeps one group");
            }
        }
    }

    /// Recompute `first_line_nr` from `start` to the end of the chain. Each
    /// group's number is its predecessor's number plus size, so a single
    /// forward walk repairs everything downstream of an edit.
    fn renumber_from(&mut self, frame: &Frame, start: Option<GroupId>) {
        let _ = frame;
        let mut cur = start;
        while let Some(g) = cur {
            let nr = match self.groups.get(g).prev {
                Some(p) => {
                    let prev = self.groups.get(p);
                    prev.first_line_nr + u32::from(prev.nr_lines)
                }
                None => 0,
            };
            let group = self.groups.get_mut(g);
            group.first_line_nr = nr;
            cur = group.next;
        }
    }

    // -- Numbering ----------------------------------------------------------

    /// Document-wide number of a line, 0-based. O(1).
    ///
    /// # Panics
    ///
    /// Panics when the line is detached.
    #[must_use]
    pub fn line_to_number(&self, id: LineId) -> u32 {
        let line = self.lines.get(id);
        let group = line.group.expect("a detached line has no number");
        self.groups.get(group).first_line_nr + u32::from(line.offset)
    }

    /// Find the line with document-wide number `nr`, or `None` past the end.
    ///
    /// Walks the group chain backward from the last group until the owning
    /// group is found, then steps forward inside it — O(groups) plus the
    /// offset within one group.
    #[must_use]
    pub fn line_from_number(&self, frame: &Frame, nr: u32) -> Option<LineId> {
        if nr >= self.line_count(frame) {
            return None;
        }
        let mut g = frame.last_group;
        while self.groups.get(g).first_line_nr > nr {
            g = self.groups.get(g).prev.expect("numbering starts at zero");
        }
        let group = self.groups.get(g);
        let mut id = group.first_line;
        for _ in 0..nr - group.first_line_nr {
            id = self.lines.get(id).next.expect("offset stays inside the group");
        }
        Some(id)
    }

    // -- Helpers ------------------------------------------------------------

    /// Walk `first..=last` and return the run length. With `detached`,
    /// debug-checks that every line is detached; otherwise that every line
    /// is in a document and none is the sentinel.
    fn run_len(&self, first: LineId, last: LineId, detached: bool) -> usize {
        let mut n = 0;
        let mut cur = Some(first);
        loop {
            let id = cur.expect("run must be linked first..last");
            let line = self.lines.get(id);
            if detached {
                debug_assert!(line.group.is_none(), "run line is still in a document");
                debug_assert!(line.marks.is_empty(), "run line carries marks");
            } else {
                debug_assert!(line.group.is_some(), "run line is detached");
                debug_assert!(!line.sentinel, "the sentinel is never part of a run");
            }
            n += 1;
            if id == last {
                return n;
            }
            cur = line.next;
        }
    }

    // -- Validation ---------------------------------------------------------

    /// Walk the whole document and assert every structural invariant:
    /// group-chain links, per-group line ownership and offsets, cumulative
    /// numbering, sentinel placement, and mark attachment. Called after
    /// every public mutation in debug builds; tests call it directly.
    ///
    /// # Panics
    ///
    /// Panics on any violated invariant.
    pub fn validate(&self, frame: &Frame) {
        let mut total = 0u32;
        let mut prev_group: Option<GroupId> = None;
        let mut prev_line: Option<LineId> = None;
        let mut cur = Some(frame.first_group);
        let mut last_seen = frame.first_group;

        while let Some(g) = cur {
            let group = self.groups.get(g);
            assert_eq!(group.prev, prev_group, "group back-link broken");
            assert_eq!(group.first_line_nr, total, "group numbering out of step");
            assert!(group.nr_lines >= 1, "empty group left in the chain");
            assert!(group.nr_lines <= MAX_GROUP_LINES, "group over capacity");

            let mut id = group.first_line;
            for off in 0..group.nr_lines {
                let line = self.lines.get(id);
                assert_eq!(line.group, Some(g), "line owned by the wrong group");
                assert_eq!(line.offset, off, "line offset out of step");
                assert_eq!(line.prev, prev_line, "line back-link broken");
                for &m in &line.marks {
                    assert_eq!(self.marks.get(m).line, id, "mark back-reference broken");
                }
                prev_line = Some(id);
                if off + 1 < group.nr_lines {
                    id = line.next.expect("group shorter than nr_lines");
                }
            }

            let last_line = self.lines.get(prev_line.expect("group holds at least one line"));
            match group.next {
                Some(nx) => assert_eq!(
                    last_line.next,
                    Some(self.groups.get(nx).first_line),
                    "line chain does not continue into the next group"
                ),
                None => {
                    assert!(last_line.next.is_none(), "a line follows the sentinel");
                    assert!(last_line.sentinel, "document does not end at the sentinel");
                }
            }

            total += u32::from(group.nr_lines);
            prev_group = Some(g);
            last_seen = g;
            cur = group.next;
        }

        assert_eq!(last_seen, frame.last_group, "frame.last_group out of step");
        assert_eq!(total, self.line_count(frame), "line_count out of step");

        for (mid, mark) in self.marks.iter() {
            let line = self.lines.get(mark.line);
            assert!(line.group.is_some(), "mark points at a detached line");
            assert!(line.marks.contains(&mid), "mark missing from its line's list");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::arena::POOL_BATCH;

    /// Build a document with `n` content lines named "l0".."ln-1".
    fn doc(n: u32) -> (TextStore, Frame) {
        let mut store = TextStore::new();
        let mut frame = Frame::new(&mut store);
        if n > 0 {
            let (first, last) = store.create_lines(n);
            let mut cur = Some(first);
            let mut i = 0;
            while let Some(id) = cur {
                store.set_text(id, format!("l{i}"));
                i += 1;
                cur = store.next_line(id);
            }
            let sentinel = frame.sentinel();
            store.inject_lines(&mut frame, first, last, sentinel);
        }
        (store, frame)
    }

    /// Collect document text in order, excluding the sentinel.
    fn texts(store: &TextStore, frame: &Frame) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = Some(store.first_line(frame));
        while let Some(id) = cur {
            let line = store.line(id);
            if !line.is_sentinel() {
                out.push(line.text().to_string());
            }
            cur = store.next_line(id);
        }
        out
    }

    // -- Frame construction -------------------------------------------------

    #[test]
    fn empty_frame_holds_only_the_sentinel() {
        let (store, frame) = doc(0);
        assert_eq!(store.line_count(&frame), 1);
        let first = store.first_line(&frame);
        assert!(store.line(first).is_sentinel());
        assert!(store.next_line(first).is_none());
        store.validate(&frame);
    }

    #[test]
    fn sentinel_stays_last_after_append() {
        let (store, frame) = doc(3);
        assert_eq!(store.line_count(&frame), 4);
        let last = store.line_from_number(&frame, 3).unwrap();
        assert!(store.line(last).is_sentinel());
        assert_eq!(texts(&store, &frame), vec!["l0", "l1", "l2"]);
    }

    // -- create / destroy ---------------------------------------------------

    #[test]
    fn create_lines_links_the_run() {
        let mut store = TextStore::new();
        let (first, last) = store.create_lines(3);
        assert!(store.prev_line(first).is_none());
        let mid = store.next_line(first).unwrap();
        assert_eq!(store.next_line(mid), Some(last));
        assert_eq!(store.prev_line(last), Some(mid));
        assert!(store.next_line(last).is_none());
    }

    #[test]
    fn create_single_line_run() {
        let mut store = TextStore::new();
        let (first, last) = store.create_lines(1);
        assert_eq!(first, last);
        assert!(store.next_line(first).is_none());
    }

    #[test]
    fn destroy_returns_lines_to_the_pool() {
        let mut store = TextStore::new();
        let (first, last) = store.create_lines(5);
        assert_eq!(store.lines.live(), 5);
        store.destroy_lines(first, last);
        assert_eq!(store.lines.live(), 0);
    }

    #[test]
    fn destroy_create_cycles_never_grow_past_whole_batches() {
        let mut store = TextStore::new();
        let (first, last) = store.create_lines(POOL_BATCH as u32);
        let slots = store.lines.slot_count();
        assert_eq!(slots % POOL_BATCH, 0);
        store.destroy_lines(first, last);
        for _ in 0..20 {
            let (f, l) = store.create_lines(POOL_BATCH as u32);
            store.destroy_lines(f, l);
        }
        assert_eq!(store.lines.slot_count(), slots);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "live text")]
    fn destroy_with_text_panics_in_debug() {
        let mut store = TextStore::new();
        let (first, last) = store.create_lines(1);
        store.set_text(first, "still here".into());
        store.destroy_lines(first, last);
    }

    // -- inject -------------------------------------------------------------

    #[test]
    fn inject_at_start() {
        let (mut store, mut frame) = doc(2);
        let (f, l) = store.create_lines(1);
        store.set_text(f, "new".into());
        let at = store.first_line(&frame);
        store.inject_lines(&mut frame, f, l, at);
        assert_eq!(texts(&store, &frame), vec!["new", "l0", "l1"]);
        assert_eq!(store.line_to_number(f), 0);
    }

    #[test]
    fn inject_in_middle() {
        let (mut store, mut frame) = doc(2);
        let (f, l) = store.create_lines(2);
        store.set_text(f, "a".into());
        store.set_text(l, "b".into());
        let at = store.line_from_number(&frame, 1).unwrap();
        store.inject_lines(&mut frame, f, l, at);
        assert_eq!(texts(&store, &frame), vec!["l0", "a", "b", "l1"]);
    }

    #[test]
    fn inject_before_sentinel_appends() {
        let (mut store, mut frame) = doc(1);
        let (f, l) = store.create_lines(1);
        store.set_text(f, "tail".into());
        let s = frame.sentinel();
        store.inject_lines(&mut frame, f, l, s);
        assert_eq!(texts(&store, &frame), vec!["l0", "tail"]);
        // The sentinel is still last.
        assert_eq!(
            store.line_from_number(&frame, 2).map(|id| store.line(id).is_sentinel()),
            Some(true)
        );
    }

    #[test]
    fn inject_overflow_splits_the_group() {
        let (mut store, mut frame) = doc(u32::from(MAX_GROUP_LINES) - 1);
        // One group holds MAX lines (content + sentinel). One more forces a split.
        let (f, l) = store.create_lines(2);
        store.set_text(f, "x".into());
        store.set_text(l, "y".into());
        let at = store.line_from_number(&frame, 10).unwrap();
        store.inject_lines(&mut frame, f, l, at);
        assert_eq!(store.line_count(&frame), u32::from(MAX_GROUP_LINES) + 2);
        // Numbering survives the split.
        assert_eq!(store.line_to_number(f), 10);
        assert_eq!(store.line_to_number(l), 11);
        store.validate(&frame);
    }

    #[test]
    fn inject_large_run_allocates_groups_for_the_overflow() {
        let (mut store, mut frame) = doc(1);
        let n = u32::from(MAX_GROUP_LINES) * 3;
        let (f, l) = store.create_lines(n);
        let s = frame.sentinel();
        store.inject_lines(&mut frame, f, l, s);
        assert_eq!(store.line_count(&frame), n + 2);
        assert!(store.groups.live() >= 4, "overflow must spread over fresh groups");
        store.validate(&frame);
    }

    // -- extract ------------------------------------------------------------

    #[test]
    fn extract_from_middle() {
        let (mut store, mut frame) = doc(5);
        let f = store.line_from_number(&frame, 1).unwrap();
        let l = store.line_from_number(&frame, 3).unwrap();
        store.extract_lines(&mut frame, f, l);
        assert_eq!(texts(&store, &frame), vec!["l0", "l4"]);
        // The run is detached but still internally linked.
        assert!(store.line(f).group().is_none());
        assert_eq!(store.next_line(f).map(|m| store.next_line(m)), Some(Some(l)));
        assert!(store.next_line(l).is_none());
    }

    #[test]
    fn extract_from_start() {
        let (mut store, mut frame) = doc(3);
        let f = store.line_from_number(&frame, 0).unwrap();
        store.extract_lines(&mut frame, f, f);
        assert_eq!(texts(&store, &frame), vec!["l1", "l2"]);
        assert_eq!(store.line_to_number(store.first_line(&frame)), 0);
    }

    #[test]
    fn extract_everything_leaves_the_sentinel() {
        let (mut store, mut frame) = doc(4);
        let f = store.line_from_number(&frame, 0).unwrap();
        let l = store.line_from_number(&frame, 3).unwrap();
        store.extract_lines(&mut frame, f, l);
        assert_eq!(store.line_count(&frame), 1);
        assert!(store.line(store.first_line(&frame)).is_sentinel());
    }

    #[test]
    fn extract_then_reinject_elsewhere() {
        let (mut store, mut frame) = doc(4);
        let f = store.line_from_number(&frame, 0).unwrap();
        let l = store.line_from_number(&frame, 1).unwrap();
        store.extract_lines(&mut frame, f, l);
        let s = frame.sentinel();
        store.inject_lines(&mut frame, f, l, s);
        assert_eq!(texts(&store, &frame), vec!["l2", "l3", "l0", "l1"]);
    }

    #[test]
    fn extract_across_group_boundary() {
        let per = u32::from(MAX_GROUP_LINES);
        let (mut store, mut frame) = doc(per * 2);
        store.validate(&frame);
        let groups_before = store.groups.live();
        assert!(groups_before >= 2);
        // A run straddling the first group seam.
        let f = store.line_from_number(&frame, 10).unwrap();
        let l = store.line_from_number(&frame, per + 10).unwrap();
        store.extract_lines(&mut frame, f, l);
        assert_eq!(store.line_count(&frame), per * 2 + 1 - (per + 1));
        // Numbering is contiguous after the seam.
        let after = store.line_from_number(&frame, 10).unwrap();
        assert_eq!(store.line(after).text(), format!("l{}", per + 11));
        store.validate(&frame);
    }

    #[test]
    fn extract_whole_groups_destroys_them() {
        let per = u32::from(MAX_GROUP_LINES);
        let (mut store, mut frame) = doc(per * 3);
        let groups_before = store.groups.live();
        let f = store.line_from_number(&frame, 0).unwrap();
        let l = store.line_from_number(&frame, per * 2 - 1).unwrap();
        store.extract_lines(&mut frame, f, l);
        assert!(store.groups.live() < groups_before);
        assert_eq!(store.line_count(&frame), per + 1);
        store.validate(&frame);
        // Clean up the detached run so the arena count is meaningful.
        let mut cur = Some(f);
        while let Some(id) = cur {
            let _ = store.take_text(id);
            cur = store.next_line(id);
        }
        store.destroy_lines(f, l);
        assert_eq!(store.lines.live() as u32, per + 1);
    }

    // -- numbering ----------------------------------------------------------

    #[test]
    fn number_roundtrip_small() {
        let (store, frame) = doc(7);
        for n in 0..store.line_count(&frame) {
            let id = store.line_from_number(&frame, n).unwrap();
            assert_eq!(store.line_to_number(id), n);
        }
    }

    #[test]
    fn number_roundtrip_across_many_groups() {
        let (store, frame) = doc(u32::from(MAX_GROUP_LINES) * 4 + 7);
        for n in (0..store.line_count(&frame)).step_by(13) {
            let id = store.line_from_number(&frame, n).unwrap();
            assert_eq!(store.line_to_number(id), n);
        }
    }

    #[test]
    fn number_past_the_end_is_none() {
        let (store, frame) = doc(2);
        assert!(store.line_from_number(&frame, 3).is_none());
        assert!(store.line_from_number(&frame, 1000).is_none());
    }

    #[test]
    fn numbering_tracks_interleaved_edits() {
        let (mut store, mut frame) = doc(10);
        // Delete 3..6, then insert two lines at 1.
        let f = store.line_from_number(&frame, 3).unwrap();
        let l = store.line_from_number(&frame, 5).unwrap();
        store.extract_lines(&mut frame, f, l);
        let (a, b) = store.create_lines(2);
        store.set_text(a, "a".into());
        store.set_text(b, "b".into());
        let at = store.line_from_number(&frame, 1).unwrap();
        store.inject_lines(&mut frame, a, b, at);
        assert_eq!(
            texts(&store, &frame),
            vec!["l0", "a", "b", "l1", "l2", "l6", "l7", "l8", "l9"]
        );
        for n in 0..store.line_count(&frame) {
            let id = store.line_from_number(&frame, n).unwrap();
            assert_eq!(store.line_to_number(id), n);
        }
    }

    // -- text ---------------------------------------------------------------

    #[test]
    fn take_text_leaves_an_empty_buffer() {
        let (mut store, frame) = doc(1);
        let id = store.first_line(&frame);
        assert_eq!(store.take_text(id), "l0");
        assert!(store.line(id).is_empty());
        assert_eq!(store.line(id).len(), 0);
    }

    #[test]
    fn line_len_counts_chars() {
        let mut store = TextStore::new();
        let (id, _) = store.create_lines(1);
        store.set_text(id, "café".into());
        assert_eq!(store.line(id).len(), 4);
    }
}
