//! Builds a control flow graph in SSA form, one structural event at a time.
//!
//! A grammar walker drives a [`Program`]: it declares functions, opens and
//! closes `if` and `while` constructs and inserts instructions, and the
//! builder places phis, resolves identifiers and eliminates common
//! subexpressions as it goes.

pub mod ir;
mod program;

pub use crate::ir::{Options, SsaBuilder};
pub use crate::program::{Function, Program};
