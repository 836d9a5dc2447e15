//! The bytecode interpreter: a bounded stack machine over compiled ranges.
//!
//! Each repetition starts from one base nesting level and a program counter
//! of 1. The loop fetches, advances, then either handles a control pseudo-op
//! itself or dispatches to the Command Executor. Control flow is built from
//! two mechanisms:
//!
//! - **Compile-time fail labels**: an ordinary command that fails jumps to
//!   its own fail label — the fail part of the nearest enclosing handler.
//! - **Run-time unwinding**: a program counter of 0 pops nesting levels,
//!   taking each popped level's fail target, until a real target appears or
//!   the stack empties — which ends the repetition.
//!
//! Compound loops push a level (`PushExit`/`PushFail`), count passes at the
//! `Iterate` head, and jump back from the tail; the final instruction of
//! every program is an `ExitSuccess` that pops the base level, which is the
//! normal return path.
//!
//! Cancellation is polled at the top of every instruction and before any
//! prompt. It empties the stack without honoring fail targets and reports
//! [`Outcome::Aborted`] — deliberately distinct from ordinary failure.
//! Running ranges stay reference-counted for exactly as long as they run, on
//! every exit path, so compaction can never pull code out from under an
//! active interpretation.

use crate::code::{LeadKind, Machine, Op, RangeId};
use crate::host::{CommandExecutor, Confirm, MessageSink, Outcome, Repeat};

/// Maximum nesting depth: compound loops and handlers per repetition.
pub const MAX_LEVELS: usize = 100;

/// Maximum invoke recursion depth across nested interpretations.
pub const MAX_RECURSION: u32 = 50;

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// One nesting level: where to go on success, where on failure, and how
/// many loop passes have run.
#[derive(Debug, Clone, Copy)]
struct Level {
    exit: u32,
    fail: u32,
    iter: u32,
}

impl Level {
    const BASE: Self = Self {
        exit: 0,
        fail: 0,
        iter: 0,
    };
}

/// Pop `count` levels (at least one) and return the last popped level's
/// exit or fail target; 0 when the stack runs out first.
fn unwind(levels: &mut Vec<Level>, count: u32, take_fail: bool) -> u32 {
    let mut target = 0;
    for _ in 0..count.max(1) {
        match levels.pop() {
            Some(level) => target = if take_fail { level.fail } else { level.exit },
            None => return 0,
        }
    }
    target
}

// ---------------------------------------------------------------------------
// Interpretation
// ---------------------------------------------------------------------------

impl Machine {
    /// Run a compiled range.
    ///
    /// The range is retained for the duration and released on every exit
    /// path. `from_span` is forwarded to the executor so it knows whether
    /// prompting for input is possible.
    pub fn interpret(
        &mut self,
        range: RangeId,
        repeat: Repeat,
        from_span: bool,
        exec: &mut dyn CommandExecutor,
        sink: &mut dyn MessageSink,
    ) -> Outcome {
        self.retain(range);
        log::debug!("interpret {range:?} {repeat:?}");
        let outcome = match repeat {
            Repeat::Once => self.run_once(range, from_span, exec, sink),
            Repeat::Count(n) => {
                let mut out = Outcome::Ok;
                for _ in 0..n {
                    match self.run_once(range, from_span, exec, sink) {
                        Outcome::Ok => {}
                        other => {
                            out = other;
                            break;
                        }
                    }
                }
                out
            }
            // Indefinite repetition ends at the first failing repetition —
            // that is its normal completion, not an error.
            Repeat::Indefinite => loop {
                match self.run_once(range, from_span, exec, sink) {
                    Outcome::Ok => {}
                    Outcome::Failed => break Outcome::Ok,
                    Outcome::Aborted => break Outcome::Aborted,
                }
            },
        };
        self.release(range);
        outcome
    }

    /// One repetition: base level, pc 1, run to an empty stack or an abort.
    #[allow(clippy::too_many_lines)]
    fn run_once(
        &mut self,
        range: RangeId,
        from_span: bool,
        exec: &mut dyn CommandExecutor,
        sink: &mut dyn MessageSink,
    ) -> Outcome {
        let mut levels: Vec<Level> = Vec::with_capacity(8);
        levels.push(Level::BASE);
        let mut pc: u32 = 1;
        let mut ok = true;

        loop {
            if self.cancel.take() {
                log::warn!("interpretation cancelled");
                return Outcome::Aborted;
            }

            if pc == 0 {
                match levels.pop() {
                    Some(level) => pc = level.fail,
                    None => return if ok { Outcome::Ok } else { Outcome::Failed },
                }
                continue;
            }

            let header = self.range(range);
            debug_assert!(pc <= header.len(), "pc ran off the range");
            let idx = (header.start() + pc - 1) as usize;
            pc += 1;
            let (op, lead, label, nested, flag) = {
                let code = &self.code[idx];
                (code.op, code.lead, code.label, code.nested, code.flag)
            };

            match op {
                Op::Cmd(cmd) => {
                    let done = {
                        let code = &self.code[idx];
                        exec.execute(cmd, lead, code.trail.as_deref(), from_span)
                    };
                    if done {
                        ok = true;
                    } else {
                        ok = false;
                        pc = label;
                    }
                }

                Op::Jump => pc = label,

                Op::PushExit => {
                    if levels.len() >= MAX_LEVELS {
                        log::warn!("nesting deeper than {MAX_LEVELS} levels");
                        sink.message("nesting too deep");
                        ok = false;
                        pc = 0;
                    } else {
                        levels.push(Level {
                            exit: label,
                            fail: 0,
                            iter: 0,
                        });
                    }
                }

                Op::PushFail => {
                    if let Some(level) = levels.last_mut() {
                        level.fail = label;
                    }
                }

                Op::Iterate => {
                    let level = levels.last_mut().expect("iterate runs inside its level");
                    level.iter += 1;
                    if lead.kind == LeadKind::Count && level.iter > lead.count {
                        levels.pop();
                        pc = label;
                    }
                }

                Op::ExitSuccess => pc = unwind(&mut levels, lead.count, false),

                Op::ExitFail => {
                    pc = unwind(&mut levels, lead.count, true);
                    ok = false;
                }

                Op::ExitAbort => {
                    log::debug!("abort pseudo-op");
                    return Outcome::Aborted;
                }

                Op::Invoke => {
                    let target = nested.expect("invoke carries its nested range");
                    if self.depth >= MAX_RECURSION {
                        log::warn!("invoke recursion deeper than {MAX_RECURSION}");
                        sink.message("recursion too deep");
                        ok = false;
                        pc = label;
                    } else {
                        let reps = if lead.kind == LeadKind::Count { lead.count } else { 1 };
                        self.depth += 1;
                        let sub = self.interpret(target, Repeat::Count(reps), from_span, exec, sink);
                        self.depth -= 1;
                        match sub {
                            Outcome::Ok => ok = true,
                            Outcome::Failed => {
                                ok = false;
                                pc = label;
                            }
                            Outcome::Aborted => return Outcome::Aborted,
                        }
                    }
                }

                Op::Verify => {
                    let answered = self.range(range).always[usize::from(flag)];
                    if !answered {
                        if self.cancel.take() {
                            log::warn!("cancelled at a verify prompt");
                            return Outcome::Aborted;
                        }
                        match exec.confirm() {
                            Confirm::Yes => {}
                            Confirm::Always => {
                                self.range_mut(range).always[usize::from(flag)] = true;
                            }
                            Confirm::No => {
                                ok = false;
                                pc = label;
                            }
                            Confirm::Quit => return Outcome::Aborted,
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
