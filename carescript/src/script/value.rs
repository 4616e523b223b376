//! Runtime values.
//!
//! The built-in variants are a closed enum; extensions add their own types
//! through [`Value::Ext`], which wraps any [`CustomValue`] implementation.
//! Values are always copied on assignment, never aliased.

use std::any::Any;
use std::fmt;

use crate::error::ScriptError;
use crate::script::lexer::quote;

/// The capability record an extension-provided value type must supply.
pub trait CustomValue: fmt::Debug {
    /// Type name reported by `typeof` and in error messages.
    fn type_name(&self) -> &str;
    /// Structural equality against another value of any extension type.
    fn equals(&self, other: &dyn CustomValue) -> bool;
    /// Human-oriented rendering.
    fn printable(&self) -> String;
    /// Rendering that reads back as an equal value.
    fn string(&self) -> String;
    fn clone_value(&self) -> Box<dyn CustomValue>;
    fn as_any(&self) -> &dyn Any;
}

/// Owned handle to an extension value.  Cloning deep-copies through
/// [`CustomValue::clone_value`].
#[derive(Debug)]
pub struct ExtValue(Box<dyn CustomValue>);

impl Clone for ExtValue {
    fn clone(&self) -> Self {
        ExtValue(self.0.clone_value())
    }
}

impl ExtValue {
    pub fn inner(&self) -> &dyn CustomValue {
        self.0.as_ref()
    }
}

/// A CareScript runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    Number(f64),
    String(String),
    /// An unquoted identifier literal, not a variable lookup.
    Name(String),
    #[default]
    Null,
    Ext(ExtValue),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Name(a), Value::Name(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Ext(a), Value::Ext(b)) => {
                a.0.type_name() == b.0.type_name() && a.0.equals(b.0.as_ref())
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.printable())
    }
}

impl Value {
    pub fn ext(v: impl CustomValue + 'static) -> Self {
        Value::Ext(ExtValue(Box::new(v)))
    }

    /// Number 1 for `true`, 0 for `false`.
    pub fn truth(b: bool) -> Self {
        Value::Number(if b { 1.0 } else { 0.0 })
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Name(_) => "Name",
            Value::Null => "Null",
            Value::Ext(e) => e.0.type_name(),
        }
    }

    pub fn printable(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Name(n) => n.clone(),
            Value::Null => "null".to_owned(),
            Value::Ext(e) => e.0.printable(),
        }
    }

    /// Source form; strings come back quoted.
    pub fn string(&self) -> String {
        match self {
            Value::String(s) => quote(s),
            Value::Ext(e) => e.0.string(),
            other => other.printable(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn same_type(&self, other: &Value) -> bool {
        self.type_name() == other.type_name()
    }

    /// Borrow the payload of an extension value as `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Value::Ext(e) => e.0.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    // ── Typed accessors ───────────────────────────────────────────────────────

    pub fn as_number(&self) -> Result<f64, ScriptError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(expected("Number", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str, ScriptError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(expected("String", other)),
        }
    }

    pub fn as_name(&self) -> Result<&str, ScriptError> {
        match self {
            Value::Name(n) => Ok(n),
            other => Err(expected("Name", other)),
        }
    }

    /// Name or String, for builtins that accept either spelling.
    pub fn as_ident(&self) -> Result<&str, ScriptError> {
        match self {
            Value::Name(s) | Value::String(s) => Ok(s),
            other => Err(expected("Name", other)),
        }
    }

    /// Borrow an extension payload, with a type error naming `type_name`.
    pub fn as_ext<T: 'static>(&self, type_name: &str) -> Result<&T, ScriptError> {
        self.downcast_ref::<T>().ok_or_else(|| expected(type_name, self))
    }

    /// Non-zero numbers are true.
    pub fn is_truthy(&self) -> Result<bool, ScriptError> {
        Ok(self.as_number()? != 0.0)
    }
}

fn expected(what: &str, got: &Value) -> ScriptError {
    ScriptError::type_error(format!("expected {what}, got {}", got.type_name()))
}

/// Shortest decimal form that parses back to the same `f64`.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        // Normalise -0.
        return "0".to_owned();
    }
    format!("{n}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Pair(i32, i32);

    impl CustomValue for Pair {
        fn type_name(&self) -> &str {
            "Pair"
        }
        fn equals(&self, other: &dyn CustomValue) -> bool {
            other
                .as_any()
                .downcast_ref::<Pair>()
                .is_some_and(|o| o.0 == self.0 && o.1 == self.1)
        }
        fn printable(&self) -> String {
            format!("{}/{}", self.0, self.1)
        }
        fn string(&self) -> String {
            self.printable()
        }
        fn clone_value(&self) -> Box<dyn CustomValue> {
            Box::new(self.clone())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn number_formatting() {
        assert_eq!(Value::Number(5.0).printable(), "5");
        assert_eq!(Value::Number(2.5).printable(), "2.5");
        assert_eq!(Value::Number(-0.0).printable(), "0");
        assert_eq!(Value::Number(-3.0).printable(), "-3");
    }

    #[test]
    fn string_forms() {
        let v = Value::String("say \"hi\"".into());
        assert_eq!(v.printable(), "say \"hi\"");
        assert_eq!(v.string(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn equality_is_variant_aware() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Name("x".into()), Value::String("x".into()));
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Number(0.0));
    }

    #[test]
    fn ext_values_compare_and_copy() {
        let a = Value::ext(Pair(1, 2));
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Value::ext(Pair(2, 1)));
        assert_eq!(a.type_name(), "Pair");
        assert_eq!(a.printable(), "1/2");
        assert_eq!(a.downcast_ref::<Pair>().map(|p| p.1), Some(2));
    }

    #[test]
    fn typed_accessors_report_types() {
        let err = Value::String("a".into()).as_number().unwrap_err();
        assert_eq!(err.to_string(), "expected Number, got String");
        assert_eq!(Value::Name("n".into()).as_ident().unwrap(), "n");
        assert!(Value::Null.as_ext::<Pair>("Pair").is_err());
    }

    #[test]
    fn truthiness() {
        assert!(Value::Number(2.0).is_truthy().unwrap());
        assert!(!Value::truth(false).is_truthy().unwrap());
        assert!(Value::Null.is_truthy().is_err());
    }
}
