//! # Block program model
//!
//! The compiler's input: an arena of blocks addressed by [`block::BlockId`],
//! scripts rooted at a hat block, the procedures of a target, and the threads
//! the scheduler runs.
//!
//! ## Conventions
//!
//! - Input and field names follow the editor's upper-case slot names
//!   (`TIMES`, `SUBSTACK`, `CONDITION`, `VARIABLE`, ...).
//! - A missing input slot is legal and evaluates to the empty string (or
//!   `false` in a boolean slot).

pub mod block;
pub mod script;
pub mod value;
