//! The interactive session.
//!
//! Line editing and history come from rustyline; evaluation happens in
//! the session scope, so bindings persist between lines. Errors are
//! caught at this boundary and the session continues.

use crate::config::Config;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tarn_core::frame::Frame;
use tarn_core::value::Value;

pub fn run(scope: &Value, config: &Config) {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("\x1b[31merror: {}\x1b[0m", e);
            return;
        }
    };
    let _ = editor.set_max_history_size(config.history_size);

    let history = config.history_path();
    let _ = editor.load_history(&history);

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);

                let mut frame = Frame::new();
                match tarn_compiler::eval(line.as_bytes(), scope, 0xf, &mut frame) {
                    Ok(()) => print_results(frame.take(0)),
                    Err(e) => eprintln!("\x1b[31merror: {}\x1b[0m", e),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1b[31merror: {}\x1b[0m", e);
                break;
            }
        }
    }

    let _ = editor.save_history(&history);
}

/// Echo the result tuple, rendered like a table constructor without its
/// brackets.
fn print_results(results: Value) {
    let Value::Tbl(t) = &results else { return };
    if t.is_empty() {
        return;
    }

    let repr = results.repr(Some(2));
    let bytes = repr.as_bytes();
    let inner = &bytes[1..bytes.len() - 1];
    println!("{}", String::from_utf8_lossy(inner));
}
