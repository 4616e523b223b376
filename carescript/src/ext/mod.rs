//! Extensions: named bundles of builtins, operators, type checks, macros
//! and pragma hooks that `bake` merges into a running interpreter.
//!
//! An extension comes from one of two [`ExtensionSource`]s, consulted in
//! order: the [`StaticRegistry`] of factories compiled into the host, then
//! the [`NativeLoader`] which opens dynamic libraries exporting the
//! `carescript_extension` entry point (see [`carescript_extension!`]).
//!
//! ```ignore
//! struct Hello;
//!
//! impl Extension for Hello {
//!     fn name(&self) -> &str { "hello" }
//!     fn builtins(&self) -> Vec<(String, Builtin)> {
//!         vec![("hello".into(), Builtin::new(Some(0), |_, interp, _| {
//!             interp.write_output("hello\n")?;
//!             Ok(Value::Null)
//!         }))]
//!     }
//! }
//!
//! carescript::carescript_extension!(Hello);
//! ```

pub mod list;
pub mod native;
pub mod reference;

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::error::{ScriptError, ScriptResult};
use crate::script::interp::{Builtin, Interpreter, Operator, PragmaFn, RawBuiltinFn, TypeCheckFn};

pub use native::NativeLoader;

/// Everything an extension may contribute.  Every table defaults to empty.
pub trait Extension {
    /// Identifier used in log messages and for [`Interpreter::bake_extension`].
    fn name(&self) -> &str;

    fn builtins(&self) -> Vec<(String, Builtin)> {
        Vec::new()
    }

    fn raw_builtins(&self) -> Vec<(String, RawBuiltinFn)> {
        Vec::new()
    }

    /// Appended to any overloads already registered for the symbol.
    fn operators(&self) -> Vec<(String, Operator)> {
        Vec::new()
    }

    /// Appended after the existing checks.
    fn type_checks(&self) -> Vec<TypeCheckFn> {
        Vec::new()
    }

    fn macros(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn pragmas(&self) -> Vec<(String, PragmaFn)> {
        Vec::new()
    }

    /// One-time setup, run after the tables have been merged.
    fn poke(&self, _interp: &mut Interpreter) -> ScriptResult<()> {
        Ok(())
    }
}

/// Somewhere `bake` can find an extension by name.
pub trait ExtensionSource {
    /// `Ok(None)` when this source does not know `name`.
    fn locate(&mut self, name: &str, base_dir: Option<&Path>) -> ScriptResult<Option<Box<dyn Extension>>>;
}

pub type ExtensionFactory = Rc<dyn Fn() -> Box<dyn Extension>>;

/// Extensions compiled into the host, by name.
#[derive(Clone, Default)]
pub struct StaticRegistry {
    factories: HashMap<String, ExtensionFactory>,
}

impl StaticRegistry {
    pub fn register(&mut self, name: &str, factory: impl Fn() -> Box<dyn Extension> + 'static) {
        self.factories.insert(name.to_owned(), Rc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl ExtensionSource for StaticRegistry {
    fn locate(&mut self, name: &str, _: Option<&Path>) -> ScriptResult<Option<Box<dyn Extension>>> {
        Ok(self.factories.get(name).map(|factory| factory()))
    }
}

/// Per-interpreter extension bookkeeping.
#[derive(Default)]
pub struct ExtensionHost {
    baked: Vec<String>,
    // Extension objects drop before `native` closes the libraries that
    // contain their code.
    loaded: Vec<Box<dyn Extension>>,
    pub registry: StaticRegistry,
    pub native: NativeLoader,
}

impl ExtensionHost {
    /// Register the extensions every interpreter ships with.
    pub fn register_defaults(&mut self) {
        self.registry.register("list", || Box::new(list::ListExtension));
        self.registry.register("ref", || Box::new(reference::ReferenceExtension));
    }

    /// A host for a child interpreter: same sources, same baked ids, and a
    /// share of every open library, since the child's tables were copied
    /// from ours.
    pub fn fork(&self) -> ExtensionHost {
        ExtensionHost {
            baked: self.baked.clone(),
            loaded: Vec::new(),
            registry: self.registry.clone(),
            native: self.native.fork(),
        }
    }

    pub fn is_baked(&self, id: &str) -> bool {
        self.baked.iter().any(|b| b == id)
    }

    pub fn baked_ids(&self) -> Vec<String> {
        self.baked.clone()
    }

    pub fn set_baked_ids(&mut self, ids: Vec<String>) {
        self.baked = ids;
    }

    pub fn mark_baked(&mut self, id: &str, ext: Box<dyn Extension>) {
        tracing::info!(extension = id, name = ext.name(), "extension baked");
        self.baked.push(id.to_owned());
        self.loaded.push(ext);
    }

    /// Find `name` in the static registry, then as a dynamic library.
    pub fn locate(&mut self, name: &str, base_dir: Option<&Path>) -> ScriptResult<Box<dyn Extension>> {
        let mut reasons = Vec::new();
        let sources: [&mut dyn ExtensionSource; 2] = [&mut self.registry, &mut self.native];
        for source in sources {
            match source.locate(name, base_dir) {
                Ok(Some(ext)) => return Ok(ext),
                Ok(None) => {}
                Err(e) => reasons.push(e.to_string()),
            }
        }
        let reason = if reasons.is_empty() { "not found".to_owned() } else { reasons.join("; ") };
        tracing::warn!(extension = name, %reason, "bake failed");
        Err(ScriptError::bake(name, reason))
    }
}

/// Export `$ctor` (an expression of a type implementing [`Extension`]) as
/// the entry point of a dynamic library.
///
/// The library must be built with the same compiler and the same version
/// of this crate as the host, since the trait object crosses the boundary.
#[macro_export]
macro_rules! carescript_extension {
    ($ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn carescript_extension() -> *mut ::std::ffi::c_void {
            let ext: ::std::boxed::Box<dyn $crate::ext::Extension> = ::std::boxed::Box::new($ctor);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(ext)).cast()
        }
    };
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::Value;
    use std::cell::Cell;

    struct Greeter;

    impl Extension for Greeter {
        fn name(&self) -> &str {
            "greeter"
        }

        fn builtins(&self) -> Vec<(String, Builtin)> {
            vec![(
                "greet".into(),
                Builtin::new(Some(1), |args, _, _| Ok(Value::String(format!("hi {}", args[0].printable())))),
            )]
        }

        fn macros(&self) -> Vec<(String, String)> {
            vec![("GREETING".into(), "\"hello\"".into())]
        }
    }

    struct Broken;

    impl Extension for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn macros(&self) -> Vec<(String, String)> {
            vec![("LEAKED".into(), "1".into())]
        }

        fn poke(&self, _: &mut Interpreter) -> ScriptResult<()> {
            Err(ScriptError::value("setup failed"))
        }
    }

    #[test]
    fn registry_bake_merges_tables() {
        let mut interp = Interpreter::new();
        interp.register_extension("greeter", || Box::new(Greeter));
        interp.bake("greeter").unwrap();
        assert_eq!(interp.evaluate("greet(GREETING)").unwrap(), Value::String("hi hello".into()));
    }

    #[test]
    fn bake_twice_is_a_no_op() {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let mut interp = Interpreter::new();
        interp.register_extension("greeter", move || {
            seen.set(seen.get() + 1);
            Box::new(Greeter)
        });
        interp.bake("greeter").unwrap();
        interp.bake("greeter").unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn failed_poke_restores_tables() {
        let mut interp = Interpreter::new();
        let err = interp.bake_extension(Box::new(Broken)).unwrap_err();
        assert_eq!(err.to_string(), "bake failed: broken: setup failed");
        assert!(!interp.tables.macros.contains_key("LEAKED"));
        assert!(!interp.extensions.is_baked("broken"));
    }

    #[test]
    fn unknown_extension_names_the_module() {
        let mut interp = Interpreter::new();
        let err = interp.bake("definitely_missing").unwrap_err().to_string();
        assert!(err.starts_with("bake failed: definitely_missing:"), "{err}");
    }

    #[test]
    fn load_forgets_later_bakes() {
        let mut interp = Interpreter::new();
        interp.register_extension("greeter", || Box::new(Greeter));
        interp.save("clean");
        interp.bake("greeter").unwrap();
        interp.load("clean").unwrap();
        assert!(!interp.tables.builtins.contains_key("greet"));
        interp.bake("greeter").unwrap();
        assert!(interp.tables.builtins.contains_key("greet"));
    }

    #[test]
    fn child_inherits_baked_state() {
        let mut interp = Interpreter::new();
        interp.register_extension("greeter", || Box::new(Greeter));
        interp.bake("greeter").unwrap();
        let child = interp.spawn_child();
        assert!(child.extensions.is_baked("greeter"));
        assert!(child.tables.builtins.contains_key("greet"));
    }
}
