//! Tarn compiler: source bytes to executable code objects.
//!
//! `compile` runs the single-pass parser/code generator against a scope
//! chain (used for compile-time declaration checking); `eval` compiles
//! and immediately executes in that scope. Errors carry the kinds of the
//! shared error type: parse and scope errors with line hints, bytecode
//! limits, and whatever the program itself raises at run time.

mod lex;
mod parse;

use std::rc::Rc;
use tarn_core::error::{Error, Result};
use tarn_core::frame::Frame;
use tarn_core::func::Code;
use tarn_core::tbl::Tbl;
use tarn_core::value::Value;

/// Compile a top-level script against a scope chain.
pub fn compile(source: &[u8], scope: &Rc<Tbl>) -> Result<Rc<Code>> {
    let parser = parse::Parser::new(source, Rc::clone(scope))?;
    let code = parser.parse()?;
    tracing::debug!(
        regs = code.regs,
        locals = code.locals,
        imms = code.imms.len(),
        words = code.bcode.len(),
        "compiled"
    );
    Ok(code)
}

/// Compile and execute a top-level script, converting the results to
/// `rets` frame slots.
pub fn eval(source: &[u8], scope: &Value, rets: u8, frame: &mut Frame) -> Result<()> {
    let Value::Tbl(scope_tbl) = scope else {
        return Err(Error::Type("unable to evaluate without a scope".to_string()));
    };

    let code = compile(source, scope_tbl)?;
    let actual = tarn_runtime::exec(code, scope.clone(), frame)?;
    frame.convert(actual, rets)
}

/// Evaluate a script for a single result value.
pub fn eval_value(source: &[u8], scope: &Value) -> Result<Value> {
    let mut frame = Frame::new();
    eval(source, scope, 0x1, &mut frame)?;
    Ok(frame.take(0))
}
