//! # fse-lang — Macro command language for fse
//!
//! The compiler and interpreter behind the editor's command macros:
//!
//! - **[`table`]** — the command set as static data: key, accepted leading
//!   parameters, trailing-parameter count
//! - **[`code`]** — the bytecode model and the [`Machine`] that owns the
//!   shared code array, reference-counted ranges, and named spans
//! - **[`compile`]** — recursive descent from keys to bytecode, with
//!   backpatched jump labels
//! - **[`interp`]** — the bounded stack machine that runs compiled ranges,
//!   dispatching ordinary commands to an injected [`CommandExecutor`]
//! - **[`host`]** — the collaborator seam: executor, key source, message
//!   sink, cancellation
//!
//! The crate never touches the document directly — every edit goes through
//! the executor the caller injects.

pub mod code;
pub mod compile;
pub mod host;
pub mod interp;
pub mod table;

pub use code::{Cmd, Code, Lead, LeadKind, Machine, Op, RangeId, SpanId, Trail, MAX_CODE, MAX_VERIFY};
pub use compile::CompileError;
pub use host::{
    CancelFlag, CommandExecutor, Confirm, KeySource, MessageSink, NullSink, Outcome, Repeat,
    TextKeys,
};
pub use interp::{MAX_LEVELS, MAX_RECURSION};
