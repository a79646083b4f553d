//! Host integration seams.
//!
//! The embedder supplies where informational output goes and how module
//! names resolve. Defaults write to stdout and resolve nothing. Errors
//! need no callback: they propagate as `Result` to the embedding
//! boundary.

use std::cell::RefCell;
use std::io::Write;
use tarn_core::error::Result;
use tarn_core::value::Value;

type PrintHook = Box<dyn FnMut(&[u8])>;
type ImportHook = Box<dyn FnMut(&[u8]) -> Result<Value>>;

thread_local! {
    static PRINT: RefCell<PrintHook> = RefCell::new(Box::new(|s| {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(s);
        let _ = out.write_all(b"\n");
    }));

    static IMPORT: RefCell<ImportHook> = RefCell::new(Box::new(|_| Ok(Value::Nil)));
}

/// Replace where `print` output goes.
pub fn set_print(f: impl FnMut(&[u8]) + 'static) {
    PRINT.with(|p| *p.borrow_mut() = Box::new(f));
}

/// Emit an informational message.
pub fn print(s: &[u8]) {
    PRINT.with(|p| (p.borrow_mut())(s));
}

/// Replace how module names resolve. The resolver returns nil for an
/// unknown module.
pub fn set_import(f: impl FnMut(&[u8]) -> Result<Value> + 'static) {
    IMPORT.with(|i| *i.borrow_mut() = Box::new(f));
}

/// Resolve a module by name.
pub fn import(name: &[u8]) -> Result<Value> {
    IMPORT.with(|i| (i.borrow_mut())(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn print_hook_captures_output() {
        let seen: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        set_print(move |s| sink.borrow_mut().extend_from_slice(s));

        print(b"hello");
        assert_eq!(&*seen.borrow(), b"hello");
    }

    #[test]
    fn default_import_resolves_nothing() {
        set_import(|_| Ok(Value::Nil));
        assert_eq!(import(b"anything").unwrap(), Value::Nil);
    }
}
