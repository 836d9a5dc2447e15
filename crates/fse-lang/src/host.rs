//! The seam between the macro core and the rest of the editor.
//!
//! The compiler and interpreter never touch the document, the screen, or the
//! keyboard directly. Everything flows through three injected collaborators:
//!
//! - [`KeySource`] feeds keys into the compiler — live keystrokes or the
//!   stored text of a span.
//! - [`CommandExecutor`] performs each ordinary command's actual edit
//!   semantics, and answers verify prompts.
//! - [`MessageSink`] receives compile errors and runtime warnings. The core
//!   only ever writes to it.
//!
//! Cancellation is a shared [`CancelFlag`] — one atomic bool, raised from a
//! signal handler or by the executor on unrecoverable failure, polled by the
//! interpreter at the top of every instruction and before anything that
//! would block.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::code::{Cmd, Lead, Trail};

// ---------------------------------------------------------------------------
// Key input
// ---------------------------------------------------------------------------

/// A stream of command keys for the compiler.
///
/// `None` means the stream is finished: end of a span's text, or the live
/// input source deciding the command sequence is complete. Running out
/// mid-command is a compile error; running out between commands ends the
/// program normally.
pub trait KeySource {
    /// Produce the next key, or `None` at the end of input.
    fn next_key(&mut self) -> Option<char>;
}

/// A [`KeySource`] over a fixed string — how span text is compiled.
#[derive(Debug, Clone)]
pub struct TextKeys {
    chars: Vec<char>,
    pos: usize,
}

impl TextKeys {
    /// Wrap a string as a key stream.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }
}

impl KeySource for TextKeys {
    fn next_key(&mut self) -> Option<char> {
        let key = self.chars.get(self.pos).copied();
        if key.is_some() {
            self.pos += 1;
        }
        key
    }
}

// ---------------------------------------------------------------------------
// Command executor
// ---------------------------------------------------------------------------

/// The user's answer to a verify prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    /// Proceed this once.
    Yes,
    /// Proceed, and stop asking for this particular verify instruction.
    Always,
    /// Refuse — the verify takes its fail path.
    No,
    /// Abort the whole interpretation.
    Quit,
}

/// The collaborator that performs each command's actual edit semantics.
///
/// The interpreter hands over the resolved leading parameter and the
/// trailing-parameter chain exactly as compiled; `from_span` tells the
/// executor whether it may prompt for input (live) or must run silently
/// (span). Returning `false` is an ordinary failure and drives the fail-label
/// control flow — it is not an error. For unrecoverable conditions the
/// executor raises the shared [`CancelFlag`] instead.
pub trait CommandExecutor {
    /// Perform one command. `true` on success.
    fn execute(&mut self, cmd: Cmd, lead: Lead, trail: Option<&Trail>, from_span: bool) -> bool;

    /// Ask the user to confirm a verify instruction.
    fn confirm(&mut self) -> Confirm;
}

// ---------------------------------------------------------------------------
// Message sink
// ---------------------------------------------------------------------------

/// Where compile errors and runtime warnings go. Write-only from the core's
/// side; the editor proper renders them on the message line.
pub trait MessageSink {
    /// Report one message.
    fn message(&mut self, text: &str);
}

/// A sink that discards everything. Useful for tests and batch callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn message(&mut self, _text: &str) {}
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// The process-wide "user cancel" signal.
///
/// Clones share one flag. Raising is idempotent; the interpreter consumes
/// the flag with [`take`](Self::take) so one cancellation aborts exactly one
/// interpretation rather than poisoning the next.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A fresh, lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Safe to call from a signal handler.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True while the flag is raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consume the flag: returns `true` once per raise.
    #[must_use]
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

// ---------------------------------------------------------------------------
// Interpretation outcome & repetition
// ---------------------------------------------------------------------------

/// How an interpretation ended.
///
/// `Failed` is the ordinary fail-label path reaching the top; `Aborted` is
/// the unconditional unwind (user cancel, quit at a verify prompt, or the
/// abort pseudo-op) and is deliberately distinct — callers report the two
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The program ran to completion with its last command succeeding.
    Ok,
    /// The program unwound through fail targets to the top.
    Failed,
    /// The program was torn down unconditionally.
    Aborted,
}

impl Outcome {
    /// True for [`Outcome::Ok`].
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Top-level repetition of a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// One repetition.
    Once,
    /// A fixed number of repetitions; stops early at the first failure.
    Count(u32),
    /// Repeat until the first failing repetition (or cancellation).
    Indefinite,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_keys_yields_chars_then_none() {
        let mut keys = TextKeys::new("2L");
        assert_eq!(keys.next_key(), Some('2'));
        assert_eq!(keys.next_key(), Some('L'));
        assert_eq!(keys.next_key(), None);
        assert_eq!(keys.next_key(), None);
    }

    #[test]
    fn text_keys_handles_unicode() {
        let mut keys = TextKeys::new("é");
        assert_eq!(keys.next_key(), Some('é'));
        assert_eq!(keys.next_key(), None);
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!flag.is_raised());
        other.raise();
        assert!(flag.is_raised());
    }

    #[test]
    fn cancel_flag_take_consumes_one_raise() {
        let flag = CancelFlag::new();
        flag.raise();
        assert!(flag.take());
        assert!(!flag.take());
        assert!(!flag.is_raised());
    }

    #[test]
    fn outcome_is_ok() {
        assert!(Outcome::Ok.is_ok());
        assert!(!Outcome::Failed.is_ok());
        assert!(!Outcome::Aborted.is_ok());
    }
}
