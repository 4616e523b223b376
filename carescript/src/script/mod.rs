//! The CareScript engine.
//!
//! A script is a set of labels, each a flat list of `name(args)` lines:
//!
//! - [`lexer`]: rule-driven tokenizer shared by every stage
//! - [`preprocess`]: `@` directives (`const`, `bake`, `pragma`, labels)
//! - [`expr`]: precedence climbing with overloaded operators
//! - [`exec`]: the per-label instruction loop and its state
//! - [`builtins`], [`operators`], [`types`]: the default tables
//! - [`interp`]: the [`Interpreter`] façade that owns all of the above
//!
//! # Quick start
//!
//! ```rust
//! use carescript::script::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! interp.eval("set(x, 6)\necholn($x * 7)").unwrap();
//! assert_eq!(interp.output(), "42\n");
//! ```

pub mod builtins;
pub mod exec;
pub mod expr;
pub mod interp;
pub mod lexer;
pub mod operators;
pub mod preprocess;
pub mod types;
pub mod value;

// Re-exports for convenience.
pub use exec::{ExecState, Label};
pub use interp::{Builtin, Interpreter, Operator, OutputSink};
pub use lexer::Token;
pub use value::{CustomValue, Value};
