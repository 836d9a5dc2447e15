//! The recursive-descent compiler: keys in, bytecode out.
//!
//! Grammar, informally:
//!
//! ```text
//! program   := command* <end-of-keys>
//! command   := lead? key trail* handler?
//!            | '(' loop-lead? command* ')' handler?
//! lead      := digits | '+'[digits] | '-'[digits] | '>' | '.' | '<' | ','
//!            | '@'digits | '=' | '%'
//! handler   := '[' command* (':' command*)? ']'
//! trail     := <delim> fragment<delim> ...      (count per command table)
//! ```
//!
//! Ordinary commands emit one instruction each. Compounds and handlers emit
//! control pseudo-ops with **backpatched** labels: a jump target inside a
//! construct is not known until the construct's tail has been parsed, so the
//! compiler records the emitting index and overwrites its label field once
//! the target lands. Fail targets resolve the same way — each command's fail
//! label points at the fail part of the nearest lexically enclosing handler,
//! or stays 0 (the unwind sentinel) when there is none.
//!
//! Compilation is transactional against the shared array: instructions are
//! emitted at the array's end and the range header is allocated only when
//! the whole program parsed. Any error truncates back to the starting
//! length and drops the references taken for invoke targets — a failed
//! compile leaves no trace.

use thiserror::Error;

use crate::code::{Code, Lead, LeadKind, Machine, Op, RangeId, SpanId, Trail, MAX_CODE, MAX_VERIFY};
use crate::host::{KeySource, MessageSink, TextKeys};
use crate::table::{self, KeyEntry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a compilation was rejected. Reported through the message sink; the
/// shared array and the target span are left exactly as before the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{0:?} is not a command")]
    UnknownKey(char),
    #[error("prefix {prefix:?} has no {key:?} subcommand")]
    UnknownPrefix { prefix: char, key: char },
    #[error("leading parameter not accepted by {key:?}")]
    BadLead { key: char },
    #[error("trailing parameter is missing its delimiter")]
    MissingDelimiter,
    #[error("unbalanced {0:?}")]
    Unbalanced(char),
    #[error("input ended inside a command")]
    UnexpectedEnd,
    #[error("shared code array is full")]
    CodeOverflow,
    #[error("too many verify commands in one span")]
    TooManyVerifies,
    #[error("span {0:?} is not defined")]
    UnknownSpan(String),
    #[error("span {0:?} has no compiled code")]
    NoCode(String),
    #[error("compilation cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

impl Machine {
    /// Compile a command program from a key stream into a fresh code range.
    ///
    /// On success the returned range holds one reference owned by the
    /// caller. On error the message sink gets one line, the shared array is
    /// unchanged, and `None` comes back.
    pub fn compile(
        &mut self,
        keys: &mut dyn KeySource,
        sink: &mut dyn MessageSink,
    ) -> Option<RangeId> {
        let start = self.code.len();
        let compiler = Compiler {
            machine: self,
            keys,
            pending: None,
            start,
            verifies: 0,
            handlers: Vec::new(),
            loops: 0,
            retained: Vec::new(),
        };
        match compiler.run() {
            Ok((len, verifies)) => {
                let id = self.alloc_range(start, len, verifies);
                log::debug!("compiled {len} instructions into {id:?}");
                Some(id)
            }
            Err(err) => {
                log::debug!("compile failed: {err}");
                sink.message(&format!("compile error: {err}"));
                None
            }
        }
    }

    /// Compile a span's stored text and attach the result to the span.
    ///
    /// On error the span's code is left unset — never partially valid — and
    /// `false` comes back.
    pub fn compile_span(&mut self, id: SpanId, sink: &mut dyn MessageSink) -> bool {
        let mut keys = TextKeys::new(self.span(id).text());
        match self.compile(&mut keys, sink) {
            Some(range) => {
                self.attach_span_code(id, range);
                true
            }
            None => {
                self.clear_span_code(id);
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// An open handler construct: the instruction indices whose fail labels
/// must be patched to the handler's fail part once its position is known,
/// plus the loop depth the handler was opened at. Commands inside a deeper
/// compound never patch to it directly — their failure unwinds through the
/// compound's own level, whose fail target already routes here.
struct Handler {
    fail_sites: Vec<usize>,
    depth: u32,
}

struct Compiler<'m, 'k> {
    machine: &'m mut Machine,
    keys: &'k mut dyn KeySource,
    /// One-key pushback for peeking.
    pending: Option<char>,
    /// Array index where this compilation began; everything from here up is
    /// ours to truncate on error.
    start: usize,
    /// Verify instructions emitted so far — also the next flag index.
    verifies: u16,
    /// Stack of open handlers, innermost last.
    handlers: Vec<Handler>,
    /// Compound constructs currently open around the parse position.
    loops: u32,
    /// Invoke targets retained during this compile, dropped on rollback.
    retained: Vec<RangeId>,
}

impl Compiler<'_, '_> {
    fn run(mut self) -> Result<(usize, u16), CompileError> {
        match self.program() {
            Ok(()) => {
                debug_assert!(self.handlers.is_empty(), "handler left open");
                Ok((self.machine.code.len() - self.start, self.verifies))
            }
            Err(err) => {
                self.machine.code.truncate(self.start);
                for id in std::mem::take(&mut self.retained) {
                    self.machine.release(id);
                }
                Err(err)
            }
        }
    }

    // -- Key plumbing -------------------------------------------------------

    fn next(&mut self) -> Option<char> {
        self.pending.take().or_else(|| self.keys.next_key())
    }

    fn peek(&mut self) -> Option<char> {
        if self.pending.is_none() {
            self.pending = self.keys.next_key();
        }
        self.pending
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            let _ = self.next();
        }
    }

    /// Consume a digit run, saturating.
    fn digits(&mut self) -> u32 {
        let mut n = 0u32;
        while let Some(d) = self.peek().and_then(|c| c.to_digit(10)) {
            let _ = self.next();
            n = n.saturating_mul(10).saturating_add(d);
        }
        n
    }

    /// A digit run, or 1 when the next key is not a digit (`+` alone = 1).
    fn opt_digits(&mut self) -> u32 {
        if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.digits()
        } else {
            1
        }
    }

    // -- Emission -----------------------------------------------------------

    fn emit(&mut self, code: Code) -> Result<usize, CompileError> {
        if self.machine.code.len() >= MAX_CODE {
            return Err(CompileError::CodeOverflow);
        }
        self.machine.code.push(code);
        Ok(self.machine.code.len() - 1)
    }

    /// Point `site`'s label at the instruction index `target` (both
    /// absolute); the stored label is range-relative and 1-based.
    fn patch(&mut self, site: usize, target: usize) {
        self.machine.code[site].label =
            u32::try_from(target - self.start + 1).expect("range outgrew u32");
    }

    /// Register an instruction's fail label with the innermost open handler.
    /// A handler opened outside the current compound is skipped — a command
    /// in a loop body fails with label 0 and unwinds through the loop's own
    /// level. With no handler at this depth the label stays 0.
    fn attach_fail(&mut self, site: usize) {
        if let Some(frame) = self.handlers.last_mut() {
            if frame.depth == self.loops {
                frame.fail_sites.push(site);
            }
        }
    }

    // -- Grammar ------------------------------------------------------------

    fn program(&mut self) -> Result<(), CompileError> {
        let stop = self.seq(&[])?;
        debug_assert!(stop.is_none(), "top-level seq only stops at end of keys");
        // The implicit tail: pop the base level, which ends the repetition.
        let _ = self.emit(Code {
            lead: Lead::count(1),
            ..Code::op(Op::ExitSuccess)
        })?;
        Ok(())
    }

    /// Parse commands until one of `stop` (consumed and returned) or end of
    /// keys (`Ok(None)` — an error instead when a terminator was required).
    fn seq(&mut self, stop: &[char]) -> Result<Option<char>, CompileError> {
        loop {
            if self.machine.cancel.is_raised() {
                return Err(CompileError::Cancelled);
            }
            self.skip_ws();
            let Some(c) = self.peek() else {
                return if stop.is_empty() {
                    Ok(None)
                } else {
                    Err(CompileError::UnexpectedEnd)
                };
            };
            if stop.contains(&c) {
                let _ = self.next();
                return Ok(Some(c));
            }
            if matches!(c, ')' | ']' | ':') {
                return Err(CompileError::Unbalanced(c));
            }
            self.command()?;
        }
    }

    fn command(&mut self) -> Result<(), CompileError> {
        if self.peek() == Some('(') {
            let _ = self.next();
            return self.compound();
        }
        let lead = self.lead()?;
        self.skip_ws();
        let key = self.next().ok_or(CompileError::UnexpectedEnd)?;
        match key {
            ';' => self.exit_op(Op::ExitSuccess, key, lead),
            '?' => self.exit_op(Op::ExitFail, key, lead),
            '!' => {
                if lead.kind != LeadKind::None {
                    return Err(CompileError::BadLead { key });
                }
                self.emit(Code::op(Op::ExitAbort)).map(|_| ())
            }
            'V' => self.verify(key, lead),
            'X' => self.invoke(key, lead),
            _ => self.ordinary(key, lead),
        }
    }

    /// Leading parameter, if one is written. Never consumes the command key.
    fn lead(&mut self) -> Result<Lead, CompileError> {
        let Some(c) = self.peek() else {
            return Ok(Lead::NONE);
        };
        let lead = match c {
            '0'..='9' => Lead::count(self.digits()),
            '+' => {
                let _ = self.next();
                Lead {
                    kind: LeadKind::Plus,
                    count: self.opt_digits(),
                }
            }
            '-' => {
                let _ = self.next();
                Lead {
                    kind: LeadKind::Minus,
                    count: self.opt_digits(),
                }
            }
            '>' | '.' => {
                let _ = self.next();
                Lead {
                    kind: LeadKind::IndefFwd,
                    count: 1,
                }
            }
            '<' | ',' => {
                let _ = self.next();
                Lead {
                    kind: LeadKind::IndefBack,
                    count: 1,
                }
            }
            '@' => {
                let _ = self.next();
                if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    return Err(CompileError::BadLead { key: '@' });
                }
                Lead {
                    kind: LeadKind::Marker,
                    count: self.digits(),
                }
            }
            '=' => {
                let _ = self.next();
                Lead {
                    kind: LeadKind::Equals,
                    count: 1,
                }
            }
            '%' => {
                let _ = self.next();
                Lead {
                    kind: LeadKind::Percent,
                    count: 1,
                }
            }
            _ => Lead::NONE,
        };
        Ok(lead)
    }

    fn exit_op(&mut self, op: Op, key: char, lead: Lead) -> Result<(), CompileError> {
        // The count is how many levels to unwind; nothing else makes sense.
        if !matches!(lead.kind, LeadKind::None | LeadKind::Count) {
            return Err(CompileError::BadLead { key });
        }
        self.emit(Code { lead, ..Code::op(op) }).map(|_| ())
    }

    fn verify(&mut self, key: char, lead: Lead) -> Result<(), CompileError> {
        if lead.kind != LeadKind::None {
            return Err(CompileError::BadLead { key });
        }
        if self.verifies >= MAX_VERIFY {
            return Err(CompileError::TooManyVerifies);
        }
        let flag = self.verifies;
        self.verifies += 1;
        let idx = self.emit(Code {
            flag,
            ..Code::op(Op::Verify)
        })?;
        self.attach_fail(idx);
        self.handler_suffix(idx)
    }

    fn invoke(&mut self, key: char, lead: Lead) -> Result<(), CompileError> {
        if !matches!(lead.kind, LeadKind::None | LeadKind::Count) {
            return Err(CompileError::BadLead { key });
        }
        let trail = self.trails(1)?;
        let name = trail
            .as_ref()
            .expect("invoke reads one fragment")
            .text()
            .to_string();
        let span = self
            .machine
            .span_by_name(&name)
            .ok_or_else(|| CompileError::UnknownSpan(name.clone()))?;
        let range = self
            .machine
            .span(span)
            .code()
            .ok_or(CompileError::NoCode(name))?;
        // The emitted instruction owns a reference; rollback drops it.
        self.machine.retain(range);
        self.retained.push(range);
        let idx = self.emit(Code {
            lead,
            trail,
            nested: Some(range),
            ..Code::op(Op::Invoke)
        })?;
        self.attach_fail(idx);
        self.handler_suffix(idx)
    }

    fn ordinary(&mut self, key: char, lead: Lead) -> Result<(), CompileError> {
        let spec = match table::lookup(key) {
            None => return Err(CompileError::UnknownKey(key)),
            Some(KeyEntry::Command(spec)) => spec,
            Some(KeyEntry::Prefix(sub)) => {
                let second = self.next().ok_or(CompileError::UnexpectedEnd)?;
                table::prefix_lookup(sub, second).ok_or(CompileError::UnknownPrefix {
                    prefix: key,
                    key: second,
                })?
            }
        };
        if !spec.leads.contains(table::lead_bit(lead.kind)) {
            return Err(CompileError::BadLead { key });
        }
        let trail = self.trails(spec.trails)?;
        let idx = self.emit(Code {
            lead,
            trail,
            ..Code::op(Op::Cmd(spec.code))
        })?;
        self.attach_fail(idx);
        self.handler_suffix(idx)
    }

    /// `( loop-lead? commands ) handler?` — a loop with its own level.
    fn compound(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        let bound = match self.peek() {
            Some(c) if c.is_ascii_digit() => Lead::count(self.digits()),
            Some('>' | '.') => {
                let _ = self.next();
                Lead {
                    kind: LeadKind::IndefFwd,
                    count: 1,
                }
            }
            _ => Lead {
                kind: LeadKind::IndefFwd,
                count: 1,
            },
        };
        let push_exit = self.emit(Code::op(Op::PushExit))?;
        let push_fail = self.emit(Code::op(Op::PushFail))?;
        let iterate = self.emit(Code {
            lead: bound,
            ..Code::op(Op::Iterate)
        })?;
        self.loops += 1;
        let stop = self.seq(&[')'])?;
        self.loops -= 1;
        debug_assert_eq!(stop, Some(')'));
        let jump = self.emit(Code::op(Op::Jump))?;
        self.patch(jump, iterate);
        let after = self.machine.code.len();
        self.patch(push_exit, after);
        self.patch(push_fail, after);
        self.patch(iterate, after);
        // The loop's fail side routes like any other command's fail label:
        // to its own handler suffix when one follows, else to the enclosing
        // handler's fail part, else stays at the loop's end.
        self.attach_fail(push_fail);
        self.handler_suffix(push_fail)
    }

    /// `[ exit-commands (: fail-commands)? ]` attached to the instruction
    /// (or compound fail site) at `attached`.
    fn handler_suffix(&mut self, attached: usize) -> Result<(), CompileError> {
        self.skip_ws();
        if self.peek() != Some('[') {
            return Ok(());
        }
        let _ = self.next();
        // The attached command now fails into this handler, not the outer one.
        if let Some(outer) = self.handlers.last_mut() {
            outer.fail_sites.retain(|&site| site != attached);
        }
        self.handlers.push(Handler {
            fail_sites: vec![attached],
            depth: self.loops,
        });
        let stop = self.seq(&[':', ']'])?;
        let frame = self.handlers.pop().expect("handler frame pushed above");
        if stop == Some(':') {
            let jump = self.emit(Code::op(Op::Jump))?;
            let fail_start = self.machine.code.len();
            let stop = self.seq(&[']'])?;
            debug_assert_eq!(stop, Some(']'));
            let end = self.machine.code.len();
            self.patch(jump, end);
            for site in frame.fail_sites {
                self.patch(site, fail_start);
            }
        } else {
            // No fail part: failure skips the exit commands entirely.
            let end = self.machine.code.len();
            for site in frame.fail_sites {
                self.patch(site, end);
            }
        }
        Ok(())
    }

    /// Read `count` delimited fragments. The key right after the command is
    /// the delimiter; each fragment runs to the next occurrence of it.
    fn trails(&mut self, count: u8) -> Result<Option<Box<Trail>>, CompileError> {
        if count == 0 {
            return Ok(None);
        }
        let delim = self.next().ok_or(CompileError::MissingDelimiter)?;
        if delim.is_whitespace() || delim.is_alphanumeric() {
            return Err(CompileError::MissingDelimiter);
        }
        let mut fragments = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let mut text = String::new();
            loop {
                match self.next() {
                    None => return Err(CompileError::MissingDelimiter),
                    Some(c) if c == delim => break,
                    Some(c) => text.push(c),
                }
            }
            fragments.push(text);
        }
        Ok(Trail::chain(fragments))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
