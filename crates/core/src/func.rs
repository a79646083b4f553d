//! Function and code objects.
//!
//! A function is a native entry point, a "scoped" native carrying a
//! captured value, or a compiled `Code` paired with the scope it was
//! defined in. A compiled closure normally owns its scope; functions
//! flagged weak at compile time hold the scope through a `Weak` handle to
//! break the cycle between a named function and the scope that contains
//! it. A weak closure must have at least one other owner at all times.

use crate::error::Result;
use crate::frame::Frame;
use crate::tbl::Tbl;
use crate::value::Value;
use std::rc::{Rc, Weak};

/// Plain native entry point.
pub type Native = fn(&mut Frame) -> Result<u8>;

/// Scoped native entry point: receives its captured closure value.
pub type ScopedNative = fn(&Value, &mut Frame) -> Result<u8>;

/// An immutable compiled unit. Never mutates after compilation
/// completes; dropping it releases the constant pool.
pub struct Code {
    /// Declared argument count nibble (0xf = variadic).
    pub args: u8,
    /// The defining scope is captured weakly (named definitions).
    pub weak: bool,
    /// Register count the VM must provide.
    pub regs: u16,
    /// Declared local-slot count, used to seed the call scope.
    pub locals: usize,
    /// Constant pool. Nested functions appear as scope-less prototype
    /// `Value::Fn` entries that the `FN` opcode pairs with a live scope.
    pub imms: Vec<Value>,
    /// Encoded instructions, one or two 16-bit words each.
    pub bcode: Vec<u16>,
}

pub enum FnKind {
    Native(Native),
    Scoped { f: ScopedNative, closure: Value },
    Code { code: Rc<Code>, closure: ClosureRef },
}

pub enum ClosureRef {
    Strong(Value),
    Weak(Weak<Tbl>),
}

pub struct Func {
    args: u8,
    kind: FnKind,
}

impl Func {
    pub fn from_native(args: u8, f: Native) -> Rc<Func> {
        Rc::new(Func {
            args,
            kind: FnKind::Native(f),
        })
    }

    pub fn from_scoped(args: u8, f: ScopedNative, closure: Value) -> Rc<Func> {
        Rc::new(Func {
            args,
            kind: FnKind::Scoped { f, closure },
        })
    }

    /// Pair compiled code with the scope it closes over.
    pub fn from_code(code: Rc<Code>, scope: Value) -> Rc<Func> {
        let closure = if code.weak {
            match &scope {
                Value::Tbl(t) => ClosureRef::Weak(Rc::downgrade(t)),
                _ => ClosureRef::Strong(scope),
            }
        } else {
            ClosureRef::Strong(scope)
        };

        Rc::new(Func {
            args: code.args,
            kind: FnKind::Code { code, closure },
        })
    }

    pub fn args(&self) -> u8 {
        self.args
    }

    pub fn kind(&self) -> &FnKind {
        &self.kind
    }

    pub fn code(&self) -> Option<Rc<Code>> {
        match &self.kind {
            FnKind::Code { code, .. } => Some(Rc::clone(code)),
            _ => None,
        }
    }

    /// The captured scope. A weak closure whose scope is gone yields
    /// nil; the compile-time contract keeps another owner alive, so this
    /// only happens after teardown.
    pub fn closure(&self) -> Value {
        match &self.kind {
            FnKind::Native(_) => Value::Nil,
            FnKind::Scoped { closure, .. } => closure.clone(),
            FnKind::Code { closure, .. } => match closure {
                ClosureRef::Strong(v) => v.clone(),
                ClosureRef::Weak(w) => match w.upgrade() {
                    Some(t) => Value::Tbl(t),
                    None => Value::Nil,
                },
            },
        }
    }
}

impl std::fmt::Debug for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FnKind::Native(_) => write!(f, "Func(native/{:x})", self.args),
            FnKind::Scoped { .. } => write!(f, "Func(scoped/{:x})", self.args),
            FnKind::Code { .. } => write!(f, "Func(code/{:x})", self.args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::num::Num;

    fn noop(_: &mut Frame) -> Result<u8> {
        Ok(0)
    }

    #[test]
    fn native_functions_have_no_closure() {
        let f = Func::from_native(2, noop);
        assert_eq!(f.args(), 2);
        assert_eq!(f.closure(), Value::Nil);
        assert!(f.code().is_none());
    }

    #[test]
    fn weak_closures_do_not_own_their_scope() {
        let code = Rc::new(Code {
            args: 0,
            weak: true,
            regs: 1,
            locals: 0,
            imms: vec![],
            bcode: vec![],
        });

        let scope = Tbl::new(0);
        let f = Func::from_code(Rc::clone(&code), Value::Tbl(Rc::clone(&scope)));
        assert_eq!(Rc::strong_count(&scope), 1);
        assert_eq!(f.closure(), Value::Tbl(Rc::clone(&scope)));

        drop(scope);
        assert_eq!(f.closure(), Value::Nil);
    }

    #[test]
    fn strong_closures_keep_their_scope() {
        let code = Rc::new(Code {
            args: 0,
            weak: false,
            regs: 1,
            locals: 0,
            imms: vec![Value::Num(Num::from_uint(7))],
            bcode: vec![],
        });

        let scope = Tbl::new(0);
        let f = Func::from_code(code, Value::Tbl(Rc::clone(&scope)));
        assert_eq!(Rc::strong_count(&scope), 2);
        drop(f);
        assert_eq!(Rc::strong_count(&scope), 1);
    }
}
