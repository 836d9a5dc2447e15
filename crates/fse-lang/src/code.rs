//! The bytecode model and the shared code store.
//!
//! Every compiled program lives in one contiguous array of [`Code`]
//! instructions owned by the [`Machine`]. A [`RangeHeader`] names a
//! `[start, start + len)` slice of that array, carries a reference count,
//! and sits in the machine's header slab — the list of all currently-live
//! ranges. When a header's count drops to zero its slice is physically
//! removed and every header above it slides down; labels are range-relative,
//! so only header `start` fields move.
//!
//! # Labels and the zero sentinel
//!
//! A label is a 1-based instruction index within its own range. Label 0
//! means "no target": the interpreter treats a program counter of 0 as the
//! signal to unwind a nesting level. Keeping the sentinel in-band makes the
//! fail-target plumbing one `u32` per instruction.
//!
//! # Trailing parameters
//!
//! A [`Trail`] chain holds the delimited string fragments that followed a
//! command. The core duplicates and destroys chains but never reads their
//! meaning — that belongs to the Command Executor. Both duplication and
//! destruction are iterative; a pathological chain must not be able to
//! overflow the stack.

use std::fmt;

use crate::host::CancelFlag;

/// Shared code array capacity. Compilation that would grow past this fails
/// cleanly with `CompileError::CodeOverflow`.
pub const MAX_CODE: usize = 4096;

/// Verify instructions allowed in one compiled range — the size of the
/// range's always-flag array.
pub const MAX_VERIFY: u16 = 64;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Identity of an ordinary command, resolved from the key table.
///
/// The core never performs these — they are dispatched verbatim to the
/// Command Executor, which owns their edit semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cmd {
    UpLine,
    DownLine,
    BackChar,
    FwdChar,
    Page,
    InsertLine,
    KillLine,
    DelChar,
    InsertText,
    Search,
    Replace,
    GotoLine,
    JumpMark,
    AdvWord,
    AdvLine,
    AdvPara,
    SetMark,
    GotoMark,
    ClearMark,
}

// ---------------------------------------------------------------------------
// Leading parameters
// ---------------------------------------------------------------------------

/// The kind of a command's leading parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeadKind {
    /// No prefix written — an implied count of 1.
    #[default]
    None,
    /// A decimal digit run.
    Count,
    /// `+` or `+digits` — forward-relative.
    Plus,
    /// `-` or `-digits` — backward-relative.
    Minus,
    /// `>` or `.` — indefinite forward.
    IndefFwd,
    /// `<` or `,` — indefinite backward.
    IndefBack,
    /// `@n` — marker number n.
    Marker,
    /// `=` — the per-command equals position.
    Equals,
    /// `%` — the whole-document marker.
    Percent,
}

/// A resolved leading parameter: its kind plus a count.
///
/// For `Count`/`Plus`/`Minus` the count is the written number (1 when the
/// sign stood alone); for `Marker` it is the marker number; for the rest it
/// is 1 and carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lead {
    pub kind: LeadKind,
    pub count: u32,
}

impl Lead {
    /// The implied leading parameter: no prefix, count 1.
    pub const NONE: Self = Self {
        kind: LeadKind::None,
        count: 1,
    };

    /// A counted lead.
    #[inline]
    #[must_use]
    pub const fn count(n: u32) -> Self {
        Self {
            kind: LeadKind::Count,
            count: n,
        }
    }
}

impl Default for Lead {
    fn default() -> Self {
        Self::NONE
    }
}

// ---------------------------------------------------------------------------
// Trailing parameters
// ---------------------------------------------------------------------------

/// One fragment of a trailing-parameter chain.
///
/// Opaque to the core: produced by the compiler's delimiter scanner,
/// consumed by the Command Executor.
pub struct Trail {
    text: String,
    next: Option<Box<Trail>>,
}

impl Trail {
    /// Build a chain from fragments, in order. `None` for no fragments.
    #[must_use]
    pub fn chain(fragments: Vec<String>) -> Option<Box<Self>> {
        let mut head: Option<Box<Self>> = None;
        for text in fragments.into_iter().rev() {
            head = Some(Box::new(Self { text, next: head }));
        }
        head
    }

    /// This fragment's text.
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The next fragment, if any.
    #[inline]
    #[must_use]
    pub fn next(&self) -> Option<&Self> {
        self.next.as_deref()
    }

    /// Walk the chain's fragments in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let mut cur = Some(self);
        std::iter::from_fn(move || {
            let here = cur?;
            cur = here.next();
            Some(here.text())
        })
    }

    /// Deep-copy the chain. Iterative: chain length never touches the stack.
    #[must_use]
    pub fn duplicate(&self) -> Box<Self> {
        let mut head = Box::new(Self {
            text: self.text.clone(),
            next: None,
        });
        let mut dst: &mut Box<Self> = &mut head;
        let mut src = self.next.as_deref();
        while let Some(fragment) = src {
            dst.next = Some(Box::new(Self {
                text: fragment.text.clone(),
                next: None,
            }));
            dst = dst.next.as_mut().expect("fragment just linked");
            src = fragment.next.as_deref();
        }
        head
    }
}

impl Clone for Trail {
    fn clone(&self) -> Self {
        *self.duplicate()
    }
}

// A derived drop would recurse once per fragment; unlink iteratively instead.
impl Drop for Trail {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut fragment) = next {
            next = fragment.next.take();
        }
    }
}

impl fmt::Debug for Trail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Operation of one instruction: an ordinary command, or a control
/// pseudo-op the interpreter handles itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Dispatch to the Command Executor.
    Cmd(Cmd),
    /// Unconditional jump to `label`.
    Jump,
    /// Enter a nesting level whose exit target is `label`.
    PushExit,
    /// Set the current level's fail target to `label`.
    PushFail,
    /// Loop head: count this pass against the lead's bound; past the bound,
    /// pop the level and jump to `label`.
    Iterate,
    /// Unwind `lead.count` levels and jump to the last popped level's exit
    /// target.
    ExitSuccess,
    /// Unwind `lead.count` levels and jump to the last popped level's fail
    /// target, with failure status.
    ExitFail,
    /// Tear down every level unconditionally.
    ExitAbort,
    /// Recurse into the nested code range, `lead.count` times.
    Invoke,
    /// Interactive yes/always/no/quit confirmation, keyed by `flag`.
    Verify,
}

/// One compiled instruction.
#[derive(Debug, Clone)]
pub struct Code {
    /// What to do.
    pub op: Op,
    /// The resolved leading parameter.
    pub lead: Lead,
    /// Trailing-parameter chain, if the command took any.
    pub trail: Option<Box<Trail>>,
    /// Jump/fail target: 1-based within the owning range, 0 = none.
    pub label: u32,
    /// Nested code for [`Op::Invoke`].
    pub nested: Option<RangeId>,
    /// Always-flag index for [`Op::Verify`].
    pub flag: u16,
}

impl Code {
    /// A bare instruction: no lead, no trail, no targets.
    #[must_use]
    pub const fn op(op: Op) -> Self {
        Self {
            op,
            lead: Lead::NONE,
            trail: None,
            label: 0,
            nested: None,
            flag: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Ranges and spans
// ---------------------------------------------------------------------------

/// Handle to a live [`RangeHeader`] in the machine's slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeId(pub(crate) u32);

/// Handle to a [`Span`] in the machine's slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub(crate) u32);

/// A reference-counted handle to a slice of the shared code array.
#[derive(Debug)]
pub struct RangeHeader {
    pub(crate) start: u32,
    pub(crate) len: u32,
    pub(crate) refs: u32,
    /// Verify always-flags, one per verify instruction in the range. An
    /// "always" answer sticks for the lifetime of the compiled range.
    pub(crate) always: Vec<bool>,
}

impl RangeHeader {
    /// Start offset in the shared array. Moves when lower ranges compact.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Instruction count.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// A range is never empty — compilation always emits at least the final
    /// exit instruction.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current reference count.
    #[inline]
    #[must_use]
    pub const fn refs(&self) -> u32 {
        self.refs
    }
}

/// A named span: stored text that can carry compiled code.
///
/// The editor proper defines spans (a markable region's text snapshot);
/// the macro core compiles them and invokes their code.
#[derive(Debug)]
pub struct Span {
    name: String,
    text: String,
    code: Option<RangeId>,
}

impl Span {
    /// The span's name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The span's stored text.
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The span's compiled code, if compilation has run and succeeded.
    #[inline]
    #[must_use]
    pub const fn code(&self) -> Option<RangeId> {
        self.code
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// The compiler/interpreter context: the shared code array, the live range
/// slab, the span table, the cancellation flag, and the recursion guard.
///
/// One machine per editing session; tests build as many as they like —
/// nothing here is ambient global state.
#[derive(Debug, Default)]
pub struct Machine {
    pub(crate) code: Vec<Code>,
    pub(crate) ranges: Vec<Option<RangeHeader>>,
    free_ranges: Vec<u32>,
    spans: Vec<Option<Span>>,
    free_spans: Vec<u32>,
    pub(crate) cancel: CancelFlag,
    pub(crate) depth: u32,
}

impl Machine {
    /// A fresh machine with an empty code array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the machine's cancellation flag, for wiring into signal
    /// handlers and executors.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Total instructions currently in the shared array.
    #[must_use]
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Number of live range headers.
    #[must_use]
    pub fn live_ranges(&self) -> usize {
        self.ranges.iter().flatten().count()
    }

    // -- Ranges -------------------------------------------------------------

    /// Borrow a live range header.
    #[must_use]
    pub fn range(&self, id: RangeId) -> &RangeHeader {
        self.ranges[id.0 as usize]
            .as_ref()
            .expect("range handle outlived its header")
    }

    pub(crate) fn range_mut(&mut self, id: RangeId) -> &mut RangeHeader {
        self.ranges[id.0 as usize]
            .as_mut()
            .expect("range handle outlived its header")
    }

    /// Borrow an instruction by range-relative, 1-based program counter.
    ///
    /// # Panics
    ///
    /// Panics when `pc` is 0 or past the range's end.
    #[must_use]
    pub fn instruction(&self, id: RangeId, pc: u32) -> &Code {
        let header = self.range(id);
        assert!(pc >= 1 && pc <= header.len, "pc {pc} outside range");
        &self.code[(header.start + pc - 1) as usize]
    }

    /// Wrap `[start, start + len)` of the code array in a fresh header with
    /// one reference.
    pub(crate) fn alloc_range(&mut self, start: usize, len: usize, verifies: u16) -> RangeId {
        let header = RangeHeader {
            start: u32::try_from(start).expect("code array outgrew u32"),
            len: u32::try_from(len).expect("code array outgrew u32"),
            refs: 1,
            always: vec![false; usize::from(verifies)],
        };
        let id = match self.free_ranges.pop() {
            Some(slot) => {
                self.ranges[slot as usize] = Some(header);
                RangeId(slot)
            }
            None => {
                self.ranges.push(Some(header));
                RangeId(u32::try_from(self.ranges.len() - 1).expect("range slab outgrew u32"))
            }
        };
        log::trace!("range {id:?} allocated: [{start}, {})", start + len);
        id
    }

    /// Add a reference to a range — spans that share code, and running
    /// interpretations, each hold one.
    pub(crate) fn retain(&mut self, id: RangeId) {
        self.range_mut(id).refs += 1;
    }

    /// Drop a reference. At zero, the range's slice is physically removed
    /// from the shared array: every live header above it slides down, and
    /// every range the removed code invoked is released in turn (iteratively,
    /// through a work list — a deep invoke chain must not recurse).
    pub fn release(&mut self, id: RangeId) {
        let mut work = vec![id];
        while let Some(id) = work.pop() {
            let header = self.range_mut(id);
            debug_assert!(header.refs > 0, "releasing a dead range");
            header.refs -= 1;
            if header.refs > 0 {
                continue;
            }

            let header = self.ranges[id.0 as usize]
                .take()
                .expect("range handle outlived its header");
            self.free_ranges.push(id.0);
            let start = header.start as usize;
            let len = header.len as usize;

            for code in &self.code[start..start + len] {
                if let Some(nested) = code.nested {
                    work.push(nested);
                }
            }
            self.code.drain(start..start + len);
            for live in self.ranges.iter_mut().flatten() {
                if live.start as usize > start {
                    live.start -= header.len;
                }
            }
            log::trace!("range {id:?} discarded: {len} instructions compacted");
        }
    }

    // -- Spans --------------------------------------------------------------

    /// Define a span, or redefine an existing one by name. Redefinition
    /// replaces the text and discards any stale compiled code.
    pub fn define_span(&mut self, name: &str, text: &str) -> SpanId {
        if let Some(id) = self.span_by_name(name) {
            self.set_span_text(id, text);
            return id;
        }
        let span = Span {
            name: name.to_string(),
            text: text.to_string(),
            code: None,
        };
        match self.free_spans.pop() {
            Some(slot) => {
                self.spans[slot as usize] = Some(span);
                SpanId(slot)
            }
            None => {
                self.spans.push(Some(span));
                SpanId(u32::try_from(self.spans.len() - 1).expect("span slab outgrew u32"))
            }
        }
    }

    /// Borrow a span.
    #[must_use]
    pub fn span(&self, id: SpanId) -> &Span {
        self.spans[id.0 as usize]
            .as_ref()
            .expect("span handle outlived its span")
    }

    /// Find a span by name.
    #[must_use]
    pub fn span_by_name(&self, name: &str) -> Option<SpanId> {
        self.spans.iter().enumerate().find_map(|(i, slot)| {
            slot.as_ref()
                .filter(|span| span.name == name)
                .map(|_| SpanId(u32::try_from(i).expect("span slab outgrew u32")))
        })
    }

    /// Replace a span's text. Any compiled code is stale and is discarded.
    pub fn set_span_text(&mut self, id: SpanId, text: &str) {
        let span = self.spans[id.0 as usize]
            .as_mut()
            .expect("span handle outlived its span");
        span.text.clear();
        span.text.push_str(text);
        if let Some(range) = span.code.take() {
            self.release(range);
        }
    }

    /// Remove a span entirely, releasing its code.
    pub fn discard_span(&mut self, id: SpanId) {
        let span = self.spans[id.0 as usize]
            .take()
            .expect("span handle outlived its span");
        self.free_spans.push(id.0);
        if let Some(range) = span.code {
            self.release(range);
        }
    }

    /// Attach freshly compiled code to a span, releasing what it held.
    pub(crate) fn attach_span_code(&mut self, id: SpanId, range: RangeId) {
        let span = self.spans[id.0 as usize]
            .as_mut()
            .expect("span handle outlived its span");
        let old = span.code.replace(range);
        if let Some(old) = old {
            self.release(old);
        }
    }

    /// Clear a span's code without attaching a replacement.
    pub(crate) fn clear_span_code(&mut self, id: SpanId) {
        let span = self.spans[id.0 as usize]
            .as_mut()
            .expect("span handle outlived its span");
        if let Some(old) = span.code.take() {
            self.release(old);
        }
    }

    // -- Validation ---------------------------------------------------------

    /// Assert the range bookkeeping: every live header's slice lies inside
    /// the array, the slices are pairwise disjoint, and together they cover
    /// the whole array. Called by tests and debug paths.
    ///
    /// # Panics
    ///
    /// Panics on any violated invariant.
    pub fn validate(&self) {
        let mut slices: Vec<(usize, usize)> = self
            .ranges
            .iter()
            .flatten()
            .map(|h| (h.start as usize, h.len as usize))
            .collect();
        slices.sort_unstable();
        let mut expect = 0;
        for (start, len) in slices {
            assert_eq!(start, expect, "gap or overlap in the code array");
            assert!(len > 0, "empty range header");
            expect = start + len;
        }
        assert_eq!(expect, self.code.len(), "headers do not cover the array");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
