//! CareScript: an embeddable, label-oriented scripting engine with
//! operator overloading and pluggable extensions.

pub mod cli;
pub mod config;
pub mod error;
pub mod ext;
pub mod lua;
pub mod script;

pub use error::{ScriptError, ScriptResult};
pub use ext::Extension;
pub use script::{Interpreter, Value};
