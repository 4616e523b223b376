//! Error taxonomy shared by every layer of the engine.
//!
//! Lower layers return the narrow variants (`Type`, `Value`, `Arity`, …) and
//! the execution engine adds line/label context exactly once by wrapping
//! them in [`ScriptError::At`].  Variants that already carry their own
//! position ([`ScriptError::At`], [`ScriptError::Preprocess`],
//! [`ScriptError::Nested`]) are passed through untouched by outer layers.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ScriptResult<T> = Result<T, ScriptError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// Unbalanced capsule, unterminated string or dangling escape.
    #[error("lex error on line {line}: {message}")]
    Lex { line: usize, message: String },

    /// Malformed directive, duplicate label, bad `const`/`bake`/`pragma` body.
    #[error("line {line}: {message}")]
    Preprocess { line: usize, message: String },

    /// Builtin or label called with the wrong number of arguments.
    #[error("{0}")]
    Arity(String),

    /// Wrong value variant for an operator or builtin argument.
    #[error("{0}")]
    Type(String),

    /// Every overload registered for an operator symbol rejected its operands.
    #[error("undefined operator for {}\nOccured errors:\n{}", operand_list(.left, .right.as_deref()), overload_list(.failures))]
    Operator {
        left: String,
        right: Option<String>,
        failures: Vec<String>,
    },

    /// A token stream that does not reduce to exactly one value.
    #[error("invalid expression: \"{0}\"")]
    Expression(String),

    /// Runtime failure: division by zero, bad index, missing label/variable.
    #[error("{0}")]
    Value(String),

    /// The named extension could not be located or installed.
    #[error("bake failed: {name}: {reason}")]
    Bake { name: String, reason: String },

    /// An error raised while executing an instruction, with its position.
    #[error("line {line}: {}{inner} (in label {label})", builtin_prefix(.builtin.as_deref()))]
    At {
        line: usize,
        builtin: Option<String>,
        label: String,
        inner: Box<ScriptError>,
    },

    /// A fully formatted message produced by a nested interpreter.
    #[error("{0}")]
    Nested(String),
}

fn operand_list(left: &str, right: Option<&str>) -> String {
    match right {
        Some(r) => format!("{left} and {r}"),
        None => left.to_owned(),
    }
}

fn overload_list(failures: &[String]) -> String {
    failures
        .iter()
        .enumerate()
        .map(|(i, f)| format!("Overload {}: {f}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn builtin_prefix(builtin: Option<&str>) -> String {
    builtin.map(|b| format!("{b}: ")).unwrap_or_default()
}

impl ScriptError {
    pub fn value(msg: impl Into<String>) -> Self {
        ScriptError::Value(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        ScriptError::Type(msg.into())
    }

    pub fn arity(msg: impl Into<String>) -> Self {
        ScriptError::Arity(msg.into())
    }

    pub fn preprocess(line: usize, msg: impl Into<String>) -> Self {
        ScriptError::Preprocess { line, message: msg.into() }
    }

    pub fn bake(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ScriptError::Bake { name: name.into(), reason: reason.into() }
    }

    /// `true` when the message already carries its own position and must
    /// not be wrapped again.
    pub fn is_formatted(&self) -> bool {
        matches!(
            self,
            ScriptError::At { .. } | ScriptError::Preprocess { .. } | ScriptError::Nested(_)
        )
    }

    /// Attach instruction context unless the error is already formatted.
    pub fn at(self, line: usize, builtin: Option<&str>, label: &str) -> Self {
        if self.is_formatted() {
            return self;
        }
        ScriptError::At {
            line,
            builtin: builtin.map(str::to_owned),
            label: label.to_owned(),
            inner: Box::new(self),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
