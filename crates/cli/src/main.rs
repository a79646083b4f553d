//! Tarn stand-alone interpreter.
//!
//! Minimal driver: evaluate strings and files in order, run a main
//! program (or standard input), and optionally drop into an interactive
//! session. Host callbacks (module import, output, error reporting)
//! live here.

mod config;
mod repl;

use clap::Parser as ClapParser;
use config::Config;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use tarn_core::error::{Error, Result};
use tarn_core::frame::Frame;
use tarn_core::tbl::Tbl;
use tarn_core::value::Value;
use tarn_runtime::{builtins, sys};

#[derive(ClapParser)]
#[command(name = "tarn")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "The Tarn scripting language", long_about = None)]
struct Cli {
    /// Evaluate a string before any program
    #[arg(short = 'e', value_name = "SCRIPT")]
    evaluate: Vec<String>,

    /// Load and evaluate a file before any program
    #[arg(short = 'l', value_name = "FILE")]
    load: Vec<PathBuf>,

    /// Run interactively after processing the program
    #[arg(short = 'i')]
    interactive: bool,

    /// Main script ('-' reads standard input)
    program: Option<String>,

    /// Arguments exposed to the program as `args`
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TARN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    // root scope over the builtins, with the program's arguments
    let scope_tbl = Tbl::with_tail(0, Some(builtins()));
    let args = Tbl::from_list(cli.args.iter().map(|a| Value::str(a)).collect());
    if scope_tbl.insert(Value::str("args"), Value::Tbl(args)).is_err() {
        return ExitCode::FAILURE;
    }
    let scope = Value::Tbl(Rc::clone(&scope_tbl));

    install_import(&config);

    for src in &cli.evaluate {
        if let Err(e) = run_source(src.as_bytes(), &scope) {
            report(&e);
            return ExitCode::FAILURE;
        }
    }

    for path in &cli.load {
        if let Err(e) = run_file(path, &scope) {
            report(&e);
            return ExitCode::FAILURE;
        }
    }

    let ran_program = cli.program.is_some();
    if let Some(program) = &cli.program {
        let result = if program == "-" {
            run_stdin(&scope)
        } else {
            run_file(Path::new(program), &scope)
        };
        if let Err(e) = result {
            report(&e);
            return ExitCode::FAILURE;
        }
    }

    // interactive when asked, or when nothing else was given on a tty;
    // piped input with no arguments runs as the program
    let bare = !ran_program && cli.evaluate.is_empty() && cli.load.is_empty();
    if cli.interactive || (bare && std::io::stdin().is_terminal()) {
        repl::run(&scope, &config);
    } else if bare {
        if let Err(e) = run_stdin(&scope) {
            report(&e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

fn report(e: &Error) {
    eprintln!("\x1b[31merror: {}\x1b[0m", e);
}

fn run_source(source: &[u8], scope: &Value) -> Result<()> {
    let mut frame = Frame::new();
    tarn_compiler::eval(source, scope, 0, &mut frame)
}

fn run_file(path: &Path, scope: &Value) -> Result<()> {
    let source = std::fs::read(path)
        .map_err(|e| Error::Runtime(format!("io error reading {} ({})", path.display(), e)))?;
    run_source(&source, scope)
}

fn run_stdin(scope: &Value) -> Result<()> {
    let mut source = Vec::new();
    std::io::stdin()
        .read_to_end(&mut source)
        .map_err(|e| Error::Runtime(format!("io error reading stdin ({})", e)))?;
    run_source(&source, scope)
}

/// Wire `import` to the module search path: the working directory, then
/// any configured directories. A module evaluates once in its own scope
/// and exports that scope; the per-process cache lives in the runtime.
fn install_import(config: &Config) {
    let mut paths = vec![PathBuf::from(".")];
    paths.extend(config.module_paths.iter().cloned());

    sys::set_import(move |name| resolve_import(&paths, name));
}

fn resolve_import(paths: &[PathBuf], name: &[u8]) -> Result<Value> {
    let name = String::from_utf8_lossy(name).into_owned();

    for dir in paths {
        let path = dir.join(format!("{}.tn", name));
        let Ok(source) = std::fs::read(&path) else {
            continue;
        };

        tracing::debug!(module = %name, path = %path.display(), "importing");
        let module = Value::Tbl(Tbl::with_tail(0, Some(builtins())));
        let mut frame = Frame::new();
        tarn_compiler::eval(&source, &module, 0, &mut frame)?;
        return Ok(module);
    }

    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn resolves_modules_from_the_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("mathx.tn")).unwrap();
        writeln!(f, "let double = fn(x) x * 2").unwrap();
        drop(f);

        let paths = vec![dir.path().to_path_buf()];
        let module = resolve_import(&paths, b"mathx").unwrap();

        let Value::Tbl(t) = &module else {
            panic!("expected a module table")
        };
        assert!(t.lookup(&Value::str("double")).truthy());

        // unknown modules resolve to nil
        assert_eq!(resolve_import(&paths, b"missing").unwrap(), Value::Nil);
    }

    #[test]
    fn module_exports_are_usable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("inc.tn"), "let inc = fn(x) x + 1").unwrap();

        let paths = vec![dir.path().to_path_buf()];
        sys::set_import(move |name| resolve_import(&paths, name));

        let scope = Value::Tbl(Tbl::with_tail(0, Some(builtins())));
        let got = tarn_compiler::eval_value(b"import('inc')['inc'](41)", &scope).unwrap();
        assert_eq!(got, Value::num(42.0));
    }
}
