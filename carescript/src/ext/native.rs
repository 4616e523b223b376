//! Dynamic-library extensions.
//!
//! A library is looked up by trying each candidate file name in each search
//! directory, in order:
//!
//! * file names: `name`, `name` + DLL suffix, `lib` + `name` + DLL suffix;
//! * directories: the name as given (if it is a path), the script's base
//!   directory, `.`, configured search paths, and
//!   `<data dir>/carescript/extensions`.
//!
//! The library must export `carescript_extension`, normally generated with
//! [`crate::carescript_extension!`].  Handles are reference counted and
//! closed when the last interpreter sharing them is dropped.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{ScriptError, ScriptResult};
use crate::ext::{Extension, ExtensionSource};

/// Name of the exported factory function.
pub const ENTRY_POINT: &str = "carescript_extension";

/// Default per-user extension directory.
pub fn user_extension_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "carescript").map(|d| d.data_dir().join("extensions"))
}

/// File names tried for extension `name`.
pub fn candidate_names(name: &str) -> Vec<String> {
    let suffix = std::env::consts::DLL_SUFFIX;
    let mut names = vec![name.to_owned()];
    if !name.ends_with(suffix) {
        names.push(format!("{name}{suffix}"));
        names.push(format!("lib{name}{suffix}"));
    }
    names
}

#[derive(Default)]
pub struct NativeLoader {
    search_paths: Vec<PathBuf>,
    libraries: Vec<Rc<Library>>,
}

impl NativeLoader {
    pub fn add_search_path(&mut self, dir: PathBuf) {
        if !self.search_paths.contains(&dir) {
            self.search_paths.push(dir);
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub(crate) fn fork(&self) -> NativeLoader {
        NativeLoader { search_paths: self.search_paths.clone(), libraries: self.libraries.clone() }
    }

    /// Every existing file `bake(name)` could load, in lookup order.
    pub fn candidates(&self, name: &str, base_dir: Option<&Path>) -> Vec<PathBuf> {
        let given = Path::new(name);
        let mut dirs: Vec<PathBuf> = Vec::new();
        if given.components().count() > 1 || given.is_absolute() {
            // An explicit path: relative to the base directory, then as is.
            if let Some(base) = base_dir.filter(|_| given.is_relative()) {
                dirs.push(base.to_path_buf());
            }
            dirs.push(PathBuf::new());
        } else {
            dirs.extend(base_dir.map(Path::to_path_buf));
            dirs.push(PathBuf::from("."));
            dirs.extend(self.search_paths.iter().cloned());
            dirs.extend(user_extension_dir());
        }

        let mut found = Vec::new();
        for dir in &dirs {
            for file in candidate_names(name) {
                let path = dir.join(&file);
                if path.is_file() && !found.contains(&path) {
                    found.push(path);
                }
            }
        }
        found
    }
}

impl ExtensionSource for NativeLoader {
    fn locate(&mut self, name: &str, base_dir: Option<&Path>) -> ScriptResult<Option<Box<dyn Extension>>> {
        let Some(path) = self.candidates(name, base_dir).into_iter().next() else {
            return Ok(None);
        };
        tracing::debug!(extension = name, path = %path.display(), "loading library");
        let lib = Rc::new(Library::open(&path)?);
        let ext = lib.create_extension()?;
        self.libraries.push(lib);
        Ok(Some(ext))
    }
}

// ── Platform layer ────────────────────────────────────────────────────────────

#[cfg(unix)]
pub struct Library {
    handle: *mut libc::c_void,
    path: PathBuf,
}

#[cfg(unix)]
impl Library {
    pub fn open(path: &Path) -> ScriptResult<Library> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| ScriptError::value(format!("invalid library path: {}", path.display())))?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(ScriptError::value(format!("{}: {}", path.display(), last_dl_error())));
        }
        Ok(Library { handle, path: path.to_path_buf() })
    }

    fn create_extension(&self) -> ScriptResult<Box<dyn Extension>> {
        let symbol = std::ffi::CString::new(ENTRY_POINT)
            .map_err(|_| ScriptError::value("invalid entry point name"))?;
        let sym = unsafe { libc::dlsym(self.handle, symbol.as_ptr()) };
        if sym.is_null() {
            return Err(ScriptError::value(format!(
                "{}: missing entry point {ENTRY_POINT}",
                self.path.display()
            )));
        }
        let entry: extern "C" fn() -> *mut std::ffi::c_void = unsafe { std::mem::transmute(sym) };
        let raw = entry();
        if raw.is_null() {
            return Err(ScriptError::value(format!("{}: entry point returned null", self.path.display())));
        }
        // The entry point hands over a `Box<Box<dyn Extension>>`.
        let ext = unsafe { Box::from_raw(raw.cast::<Box<dyn Extension>>()) };
        Ok(*ext)
    }
}

#[cfg(unix)]
impl Drop for Library {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "closing library");
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

#[cfg(unix)]
fn last_dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        return "unknown dlopen error".to_owned();
    }
    unsafe { std::ffi::CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

#[cfg(not(unix))]
pub struct Library;

#[cfg(not(unix))]
impl Library {
    pub fn open(path: &Path) -> ScriptResult<Library> {
        Err(ScriptError::value(format!(
            "{}: dynamic loading not supported on this platform",
            path.display()
        )))
    }

    fn create_extension(&self) -> ScriptResult<Box<dyn Extension>> {
        Err(ScriptError::value("dynamic loading not supported on this platform"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
