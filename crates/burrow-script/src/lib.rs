//! The charm scripting DSL.
//!
//! Charms are small s-expression programs attached to world entities.
//! A charm declares default data and named event handlers:
//!
//! ```text
//! (charm "snoozy"
//!   (defaults {"num-pets" 0})
//!   (on "pet"
//!     (set-data "num-pets" (+ 1 (get-data "num-pets" 0)))
//!     (if (= 0 (% (get-data "num-pets" 0) 5))
//!       (say "neigh neigh neigh i am horse"))))
//! ```
//!
//! Compilation turns source text into an immutable [`CompiledCharm`]
//! (handler table plus declared defaults) that the runtime shares
//! between entities on the same revision. Handlers run against a
//! [`Host`] that supplies the fixed primitive API.

pub mod ast;
pub mod compile;
pub mod eval;
pub mod parse;

pub use ast::Expr;
pub use compile::{compile, CompiledCharm};
pub use eval::{run_handler, Host};

use thiserror::Error;

/// Any failure to compile or evaluate a charm. Always a diagnostic
/// value handed back to the caller, never a panic.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("malformed charm: {0}")]
    Form(String),

    #[error("runtime error: {0}")]
    Eval(String),

    /// A primitive failed in the hosting world (e.g. a storage error
    /// underneath `set-data`).
    #[error("{0}")]
    Host(String),
}
