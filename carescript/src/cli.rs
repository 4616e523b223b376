//! Command-line argument parsing.
//!
//! Usage:
//!   carescript [-c <config>] [-f] [-q] <file> [<label> [<args>…]]
//!
//! Everything after `<file>` belongs to the script and is never treated as
//! a flag.

use std::path::PathBuf;

pub const USAGE: &str = "Usage: carescript [-c <config>] [-f] [-q] <file> [<label> [<args>...]]";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Which config file to load.
    pub config: ConfigFile,
    /// Do not print the label's return value (`-q`).
    pub quiet: bool,
    /// Script to run.
    pub script: PathBuf,
    /// Label to run; `main` unless given.
    pub label: String,
    /// Arguments passed to the label as Strings.
    pub args: Vec<String>,
}

/// How to choose the config file.
#[derive(Debug, Default, PartialEq)]
pub enum ConfigFile {
    /// Use the per-user default if it exists.
    #[default]
    Search,
    /// `-f`: load no config file.
    Skip,
    /// `-c<file>` or `-c <file>`: load this specific file.
    Explicit(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    // Flags stop at the first non-flag argument.
    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            i += 1;
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            break;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'q' => args.quiet = true,
                'f' => args.config = ConfigFile::Skip,

                // -c<file>
                'c' => {
                    let file = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-c requires a config file argument".to_owned());
                    };
                    args.config = ConfigFile::Explicit(PathBuf::from(file));
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    let mut positional = argv[i.min(argv.len())..].iter().cloned();
    args.script = positional.next().map(PathBuf::from).ok_or("missing script file")?;
    args.label = positional.next().unwrap_or_else(|| "main".to_owned());
    args.args = positional.collect();
    Ok(args)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
