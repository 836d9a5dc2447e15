//! # fse-text — Document core for fse
//!
//! The mutable document representation of the editor:
//!
//! - **[`arena`]** — pooled, generation-checked storage with stable handles
//! - **[`store`]** — lines clustered into numbering groups, chained into a
//!   [`Frame`](store::Frame); insert/delete in O(groups touched)
//! - **[`mark`]** — tracked `(line, column)` positions that never dangle
//!   across edits
//!
//! The crate knows nothing about rendering, files, or the macro language —
//! it is the storage layer those collaborators edit through.

pub mod arena;
pub mod mark;
pub mod store;

pub use arena::{Arena, Id, POOL_BATCH};
pub use mark::Mark;
pub use store::{Frame, Group, GroupId, Line, LineId, MarkId, TextStore, MAX_GROUP_LINES};
