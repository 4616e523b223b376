//! Host configuration file parser.
//!
//! | Line | Action |
//! |------|--------|
//! | `ext_path = <dir>` | add an extension search directory |
//! | `bake = <name>` | bake an extension when the interpreter starts |
//! | `macro <NAME> <replacement…>` | define a macro |
//! | `output = stdout` or `output = capture` | choose the output channel |
//! | Lines starting with `#` | comment, ignored |
//!
//! A malformed line is reported with its line number and skipped; it never
//! stops the rest of the file from loading.

use std::path::{Path, PathBuf};

use crate::error::ScriptResult;
use crate::script::interp::{Interpreter, OutputSink};
use crate::script::types::is_identifier;

/// Environment variable holding extra extension directories.
pub const EXT_PATH_ENV: &str = "CARESCRIPT_EXT_PATH";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Settings applied to an interpreter before it runs anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub ext_paths: Vec<PathBuf>,
    pub bakes: Vec<String>,
    pub macros: Vec<(String, String)>,
    pub output: Option<OutputSink>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.  Returns the config and every rejected line.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Err(message) = config.parse_line(line) {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Extension directories listed in `CARESCRIPT_EXT_PATH`.
    pub fn from_env() -> Self {
        let ext_paths = std::env::var_os(EXT_PATH_ENV)
            .map(|v| std::env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or_default();
        Config { ext_paths, ..Config::default() }
    }

    /// `<config dir>/carescript.conf` for the current user.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "carescript").map(|d| d.config_dir().join("carescript.conf"))
    }

    /// Append `other`'s settings; its output choice wins if it has one.
    pub fn merge(&mut self, other: Config) {
        self.ext_paths.extend(other.ext_paths);
        self.bakes.extend(other.bakes);
        self.macros.extend(other.macros);
        if other.output.is_some() {
            self.output = other.output;
        }
    }

    /// Install search paths, macros and output mode, then bake.
    pub fn apply(&self, interp: &mut Interpreter) -> ScriptResult<()> {
        for dir in &self.ext_paths {
            interp.add_search_path(dir.clone());
        }
        for (name, replacement) in &self.macros {
            interp.add_macro(name, replacement);
        }
        if let Some(sink) = &self.output {
            interp.set_output(sink.clone());
        }
        for name in &self.bakes {
            tracing::debug!(extension = %name, "baking from config");
            interp.bake(name)?;
        }
        Ok(())
    }

    // ── Line parser ───────────────────────────────────────────────────────────

    fn parse_line(&mut self, line: &str) -> Result<(), String> {
        if let Some(rest) = line.strip_prefix("macro") {
            if rest.starts_with(|c: char| c.is_ascii_whitespace()) {
                return self.parse_macro(rest.trim());
            }
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("expected <key> = <value>: {line}"));
        };
        let value = unquote(value.trim());
        match key.trim() {
            "ext_path" => {
                if value.is_empty() {
                    return Err("ext_path: expected a directory".into());
                }
                self.ext_paths.push(PathBuf::from(value));
            }
            "bake" => {
                if value.is_empty() {
                    return Err("bake: expected an extension name".into());
                }
                self.bakes.push(value.to_owned());
            }
            "output" => {
                self.output = Some(match value {
                    "stdout" => OutputSink::Stdout,
                    "capture" => OutputSink::Capture(String::new()),
                    other => return Err(format!("output: expected stdout or capture, got {other:?}")),
                });
            }
            other => return Err(format!("unknown setting: {other}")),
        }
        Ok(())
    }

    fn parse_macro(&mut self, rest: &str) -> Result<(), String> {
        let (name, replacement) = rest
            .split_once(|c: char| c.is_ascii_whitespace())
            .ok_or_else(|| "macro: expected <NAME> <replacement>".to_owned())?;
        if !is_identifier(name) {
            return Err(format!("macro: invalid name {name:?}"));
        }
        self.macros.push((name.to_owned(), replacement.trim().to_owned()));
        Ok(())
    }
}

/// Strip one pair of surrounding double quotes.
fn unquote(s: &str) -> &str {
    s.strip_prefix('"').and_then(|t| t.strip_suffix('"')).unwrap_or(s)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::Value;

    #[test]
    fn settings_are_collected() {
        let (cfg, errs) = Config::load_str(
            "# comment\n\next_path = /opt/ext\nbake = \"list\"\nmacro ANSWER 6 * 7\noutput = stdout\n",
        );
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.ext_paths, vec![PathBuf::from("/opt/ext")]);
        assert_eq!(cfg.bakes, vec!["list"]);
        assert_eq!(cfg.macros, vec![("ANSWER".to_owned(), "6 * 7".to_owned())]);
        assert_eq!(cfg.output, Some(OutputSink::Stdout));
    }

    #[test]
    fn bad_lines_are_reported_and_skipped() {
        let (cfg, errs) = Config::load_str("bake = list\ncolour = red\noutput = file\nmacro 9x 1\nbake = ref");
        assert_eq!(cfg.bakes, vec!["list", "ref"]);
        let lines: Vec<usize> = errs.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert_eq!(errs[0].to_string(), "line 2: unknown setting: colour");
    }

    #[test]
    fn macro_without_replacement_is_an_error() {
        let (_, errs) = Config::load_str("macro LONELY");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.starts_with("macro:"));
    }

    #[test]
    fn merge_appends_and_overrides_output() {
        let (mut a, _) = Config::load_str("ext_path = a\noutput = stdout");
        let (b, _) = Config::load_str("ext_path = b\noutput = capture");
        a.merge(b);
        assert_eq!(a.ext_paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(a.output, Some(OutputSink::Capture(String::new())));
    }

    #[test]
    fn apply_installs_macros_and_bakes() {
        let (cfg, _) = Config::load_str("macro ANSWER 6 * 7\nbake = list");
        let mut interp = Interpreter::new();
        cfg.apply(&mut interp).unwrap();
        assert_eq!(interp.evaluate("ANSWER").unwrap(), Value::Number(42.0));
    }

    #[test]
    fn apply_reports_failed_bake() {
        let (cfg, _) = Config::load_str("bake = not_a_real_extension");
        let mut interp = Interpreter::new();
        assert!(cfg.apply(&mut interp).is_err());
    }

    #[test]
    fn load_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carescript.conf");
        std::fs::write(&path, "ext_path = plugins\n").unwrap();
        let (cfg, errs) = Config::load_file(&path).unwrap();
        assert!(errs.is_empty());
        assert_eq!(cfg.ext_paths, vec![PathBuf::from("plugins")]);
    }
}
