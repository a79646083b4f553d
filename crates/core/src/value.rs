//! The tagged value handle.
//!
//! One fixed-width handle for everything the language talks about. The
//! source format's 3-bit pointer tag maps to the enum discriminant here;
//! reference counts live in the `Rc` handles. Nil is the only falsy
//! value: the number zero and the empty string are both truthy.

use crate::buf::Buf;
use crate::error::{Error, Result};
use crate::fmt::{self, FmtArg};
use crate::func::Func;
use crate::num::Num;
use crate::str::Str;
use crate::tbl::Tbl;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

#[derive(Clone, Default, Debug)]
pub enum Value {
    #[default]
    Nil,
    Num(Num),
    Str(Str),
    Buf(Rc<RefCell<Buf>>),
    Tbl(Rc<Tbl>),
    Fn(Rc<Func>),
}

impl Value {
    pub fn num(v: f64) -> Value {
        Value::Num(Num::from_f64(v))
    }

    pub fn uint(v: u64) -> Value {
        Value::Num(Num::from_uint(v))
    }

    pub fn int(v: i64) -> Value {
        Value::Num(Num::from_int(v))
    }

    pub fn str(s: &str) -> Value {
        Value::Str(Str::from_str(s))
    }

    pub fn buf(b: Buf) -> Value {
        Value::Buf(Rc::new(RefCell::new(b)))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Nil is the only falsy value.
    pub fn truthy(&self) -> bool {
        !self.is_nil()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Num(_) => "num",
            Value::Str(_) => "str",
            Value::Buf(_) => "cdata",
            Value::Tbl(_) => "tbl",
            Value::Fn(_) => "fn",
        }
    }

    /// Heap address for identity-style rendering; numbers and nil have
    /// none.
    pub fn addr(&self) -> usize {
        match self {
            Value::Nil | Value::Num(_) => 0,
            Value::Str(s) => s.addr(),
            Value::Buf(b) => Rc::as_ptr(b) as usize,
            Value::Tbl(t) => Rc::as_ptr(t) as usize,
            Value::Fn(f) => Rc::as_ptr(f) as usize,
        }
    }

    /// Ordered comparison, defined only for numbers and strings of the
    /// same type.
    pub fn cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => Some(a.cmp(*b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Generic lookup. Tables consult the receiver then the tail chain;
    /// buffers consult only the tail's attribute table; every other
    /// receiver yields nil.
    pub fn lookup(&self, key: &Value) -> Value {
        match self {
            Value::Tbl(t) => t.lookup(key),
            Value::Buf(b) => b.borrow().lookup(key),
            _ => Value::Nil,
        }
    }

    /// Generic insert. Requires a mutable table receiver; every other
    /// receiver, including a read-only table, is a read-only error.
    pub fn insert(&self, key: Value, val: Value) -> Result<()> {
        match self {
            Value::Tbl(t) => t.insert(key, val),
            _ => Err(Error::ReadOnly(fmt::message(
                b"attempted to modify read-only %s",
                &[FmtArg::Bytes(self.type_name().as_bytes())],
            ))),
        }
    }

    /// Generic assign: like insert but reassigns in the first tail-chain
    /// ancestor holding the key.
    pub fn assign(&self, key: Value, val: Value) -> Result<()> {
        match self {
            Value::Tbl(t) => t.assign(key, val),
            _ => Err(Error::ReadOnly(fmt::message(
                b"attempted to modify read-only %s",
                &[FmtArg::Bytes(self.type_name().as_bytes())],
            ))),
        }
    }

    /// Printable representation. `depth` bounds recursion into tables:
    /// at depth zero a composite renders as the `[..]` placeholder;
    /// `None` is unbounded.
    pub fn repr(&self, depth: Option<u32>) -> Str {
        match self {
            Value::Nil => Str::from_str("nil"),
            Value::Num(n) => Str::from_str(&n.repr()),
            Value::Str(s) => s.repr(),
            Value::Tbl(t) => tbl_repr(t, depth),
            Value::Buf(_) | Value::Fn(_) => {
                let mut b = Buf::new();
                let _ = fmt::vpushf(
                    &mut b,
                    b"<%s 0x%wx>",
                    &[
                        FmtArg::Bytes(self.type_name().as_bytes()),
                        FmtArg::Uint(self.addr() as u64),
                    ],
                );
                Str::intern(b)
            }
        }
    }
}

fn tbl_repr(t: &Rc<Tbl>, depth: Option<u32>) -> Str {
    if depth == Some(0) {
        return Str::from_str("[..]");
    }
    let inner = depth.map(|d| d - 1);

    // a pure list renders without its implicit keys
    let mut listlike = true;
    let mut i = 0u64;
    let mut cursor = 0usize;
    while let Some((k, _)) = t.next(&mut cursor) {
        if k != Value::uint(i) {
            listlike = false;
            break;
        }
        i += 1;
    }

    let mut b = Buf::new();
    b.push_byte(b'[');

    let mut cursor = 0usize;
    let mut first = true;
    while let Some((k, v)) = t.next(&mut cursor) {
        if !first {
            b.push_bytes(b", ");
        }
        first = false;
        if !listlike {
            b.push_bytes(k.repr(inner).as_bytes());
            b.push_bytes(b": ");
        }
        b.push_bytes(v.repr(inner).as_bytes());
    }

    b.push_byte(b']');
    Str::intern(b)
}

impl PartialEq for Value {
    /// Handle equality: interned strings compare by pointer (equal bytes
    /// means equal handle), numbers by their cleared bits, aggregates by
    /// identity.
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Buf(a), Value::Buf(b)) => Rc::ptr_eq(a, b),
            (Value::Tbl(a), Value::Tbl(b)) => Rc::ptr_eq(a, b),
            (Value::Fn(a), Value::Fn(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_the_only_falsy_value() {
        assert!(!Value::Nil.truthy());
        assert!(Value::num(0.0).truthy());
        assert!(Value::str("").truthy());
        assert!(Value::Tbl(Tbl::new(0)).truthy());
    }

    #[test]
    fn handle_equality() {
        assert_eq!(Value::str("a"), Value::str("a"));
        assert_ne!(Value::str("a"), Value::str("b"));
        assert_eq!(Value::num(1.5), Value::num(1.5));
        assert_ne!(Value::num(1.0), Value::str("1"));

        let t = Tbl::new(0);
        let a = Value::Tbl(Rc::clone(&t));
        let b = Value::Tbl(t);
        assert_eq!(a, b);
        assert_ne!(a, Value::Tbl(Tbl::new(0)));
    }

    #[test]
    fn ordering_is_num_and_str_only() {
        assert_eq!(
            Value::num(1.0).cmp(&Value::num(2.0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::str("b").cmp(&Value::str("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::num(1.0).cmp(&Value::str("1")), None);
        assert_eq!(Value::Nil.cmp(&Value::Nil), None);
    }

    #[test]
    fn generic_lookup_dispatch() {
        let t = Tbl::new(0);
        t.insert(Value::str("k"), Value::uint(1)).unwrap();
        assert_eq!(Value::Tbl(t).lookup(&Value::str("k")), Value::uint(1));

        assert_eq!(Value::num(3.0).lookup(&Value::str("k")), Value::Nil);
        assert_eq!(Value::Nil.lookup(&Value::str("k")), Value::Nil);
    }

    #[test]
    fn generic_insert_requires_a_mutable_table() {
        let t = Tbl::new(0);
        Value::Tbl(Rc::clone(&t))
            .insert(Value::str("k"), Value::uint(1))
            .unwrap();

        let frozen = Value::Tbl(t.to_const());
        assert!(matches!(
            frozen.insert(Value::str("x"), Value::uint(2)),
            Err(Error::ReadOnly(_))
        ));
        assert!(matches!(
            Value::num(3.0).insert(Value::str("x"), Value::uint(2)),
            Err(Error::ReadOnly(_))
        ));
    }

    #[test]
    fn repr_forms() {
        assert_eq!(Value::Nil.repr(None).as_bytes(), b"nil");
        assert_eq!(Value::num(3.0).repr(None).as_bytes(), b"3");
        assert_eq!(Value::str("hi").repr(None).as_bytes(), b"'hi'");

        let t = Tbl::from_list(vec![Value::uint(1), Value::uint(2)]);
        assert_eq!(Value::Tbl(Rc::clone(&t)).repr(None).as_bytes(), b"[1, 2]");
        assert_eq!(Value::Tbl(t).repr(Some(0)).as_bytes(), b"[..]");

        let t = Tbl::new(0);
        t.insert(Value::str("k"), Value::uint(1)).unwrap();
        assert_eq!(
            Value::Tbl(t).repr(None).as_bytes(),
            b"['k': 1]"
        );
    }

    #[test]
    fn repr_depth_bounds_nesting() {
        let inner = Tbl::from_list(vec![Value::uint(1)]);
        let outer = Tbl::from_list(vec![Value::Tbl(inner)]);
        let v = Value::Tbl(outer);
        assert_eq!(v.repr(None).as_bytes(), b"[[1]]");
        assert_eq!(v.repr(Some(1)).as_bytes(), b"[[..]]");
    }
}
