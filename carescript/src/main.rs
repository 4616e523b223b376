use std::process::ExitCode;

use carescript::cli::{self, ConfigFile};
use carescript::config::Config;
use carescript::script::{Interpreter, OutputSink, Value};

/// Log to stderr, filtered by `RUST_LOG` (default: warnings and errors).
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

fn load_config(path: &std::path::Path, config: &mut Config) {
    match Config::load_file(path) {
        Ok((loaded, errors)) => {
            for e in errors {
                eprintln!("carescript: warning: {}: {e}", path.display());
            }
            config.merge(loaded);
        }
        Err(e) => eprintln!("carescript: warning: {}: {e}", path.display()),
    }
}

fn main() -> ExitCode {
    init_tracing();

    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("carescript: {e}");
            eprintln!("{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = Config::new();
    match &args.config {
        ConfigFile::Skip => {}
        ConfigFile::Explicit(path) => load_config(path, &mut config),
        ConfigFile::Search => {
            if let Some(path) = Config::default_path().filter(|p| p.exists()) {
                load_config(&path, &mut config);
            }
        }
    }
    config.merge(Config::from_env());

    let mut interp = Interpreter::new();
    interp.set_output(OutputSink::Stdout);
    if let Err(e) = config.apply(&mut interp) {
        eprintln!("carescript: {e}");
        return ExitCode::FAILURE;
    }

    // ── Run ───────────────────────────────────────────────────────────────────
    if let Err(e) = interp.preprocess_file(&args.script) {
        eprintln!("carescript: {}: {e}", args.script.display());
        return ExitCode::FAILURE;
    }

    let run_args = args.args.into_iter().map(Value::String).collect();
    let result = interp.run(&args.label, run_args);
    let flushed = interp.flush_output();
    match result.and_then(|value| flushed.map(|()| value)) {
        Ok(value) => {
            if !value.is_null() && !args.quiet {
                println!("{}", value.printable());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("carescript: {e}");
            ExitCode::FAILURE
        }
    }
}
