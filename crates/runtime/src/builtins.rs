//! The builtin library.
//!
//! One read-only table of native functions and constants forms the root
//! of every scope chain. The compiler references several of these by
//! name (the [`keys`] constants); the rest are the standard surface of
//! the language.

use crate::iter;
use crate::sys;
use crate::vm::tcall;
use std::cell::RefCell;
use std::rc::Rc;
use tarn_core::buf::Buf;
use tarn_core::error::{Error, Result};
use tarn_core::fmt::{self, FmtArg};
use tarn_core::frame::Frame;
use tarn_core::func::Func;
use tarn_core::num::Num;
use tarn_core::str::Str;
use tarn_core::tbl::Tbl;
use tarn_core::value::Value;

/// Keys the compiler emits lookups for.
pub mod keys {
    /// Iterator constructor consulted by `for` loops.
    pub const ITER: &str = "iter";
    /// Subset operator.
    pub const SUB: &str = "sub";
    /// Concatenation, consulted by `..` expansion.
    pub const CONCAT: &str = "++";
    /// Element removal, consulted by `..` destructuring.
    pub const POP: &str = "pop";
    /// Partial application, consulted by `->` method sugar.
    pub const BIND: &str = "bind";
    /// Printable representation.
    pub const REPR: &str = "repr";
    /// String padding.
    pub const PAD: &str = "pad";
}

/// The builtin argument-error message, mirroring operator and function
/// spellings.
pub(crate) fn error_args(name: &str, fc: u8, frame: &Frame) -> Error {
    let first = name.as_bytes().first().copied().unwrap_or(b'?');
    let isop = !(first.is_ascii_alphabetic() || first == b'_');

    if isop && fc == 1 {
        Error::Type(fmt::message(
            b"invalid operation %s%r",
            &[FmtArg::Bytes(name.as_bytes()), FmtArg::Value(frame.get(0))],
        ))
    } else if isop && fc == 2 {
        Error::Type(fmt::message(
            b"invalid operation %r %s %r",
            &[
                FmtArg::Value(frame.get(0)),
                FmtArg::Bytes(name.as_bytes()),
                FmtArg::Value(frame.get(1)),
            ],
        ))
    } else {
        let mut b = Buf::new();
        let _ = fmt::vpushf(
            &mut b,
            b"invalid argument in %s(",
            &[FmtArg::Bytes(name.as_bytes())],
        );
        let count = if fc == 0xf { 1 } else { fc as usize };
        for i in 0..count {
            if fc == 0xf {
                b.push_bytes(b"..");
            }
            let _ = fmt::vpushf(
                &mut b,
                b"%nr",
                &[FmtArg::Value(frame.get(i)), FmtArg::Uint(0)],
            );
            if i + 1 != count {
                b.push_bytes(b", ");
            }
        }
        b.push_byte(b')');
        Error::Type(String::from_utf8_lossy(b.as_bytes()).into_owned())
    }
}

// Logic

fn not_bfn(frame: &mut Frame) -> Result<u8> {
    let v = frame.take(0);
    frame.set(0, if v.truthy() { Value::Nil } else { Value::uint(1) });
    Ok(1)
}

fn eq_bfn(frame: &mut Frame) -> Result<u8> {
    let eq = frame.get(0) == frame.get(1);
    frame.set(0, if eq { Value::uint(1) } else { Value::Nil });
    Ok(1)
}

fn neq_bfn(frame: &mut Frame) -> Result<u8> {
    let eq = frame.get(0) == frame.get(1);
    frame.set(0, if eq { Value::Nil } else { Value::uint(1) });
    Ok(1)
}

fn is_bfn(frame: &mut Frame) -> Result<u8> {
    let m = frame.take(0);
    let ty = frame.take(1);

    // a table type checks the tail chain for prototype membership
    if matches!(ty, Value::Tbl(_)) {
        let mut cur = m;
        loop {
            let tail = match &cur {
                Value::Tbl(t) => t.tail().map(Value::Tbl).unwrap_or(Value::Nil),
                Value::Buf(b) => b.borrow().tail().map(Value::Tbl).unwrap_or(Value::Nil),
                _ => Value::Nil,
            };
            if tail.is_nil() {
                return Ok(0);
            }
            if tail == ty {
                frame.set(0, Value::uint(1));
                return Ok(1);
            }
            cur = tail;
        }
    }

    let b = builtins();
    let hit = match m {
        Value::Nil => ty.is_nil(),
        Value::Num(_) => ty == b.lookup(&Value::str("num")),
        Value::Str(_) => ty == b.lookup(&Value::str("str")),
        Value::Tbl(_) => ty == b.lookup(&Value::str("tbl")),
        Value::Fn(_) => ty == b.lookup(&Value::str("fn_")),
        Value::Buf(_) => false,
    };
    if hit {
        frame.set(0, Value::uint(1));
        Ok(1)
    } else {
        Ok(0)
    }
}

// Comparison

fn cmp_values(name: &str, frame: &mut Frame) -> Result<std::cmp::Ordering> {
    match frame.get(0).cmp(frame.get(1)) {
        Some(ord) => Ok(ord),
        None => Err(error_args(name, 0x2, frame)),
    }
}

macro_rules! cmp_bfn {
    ($f:ident, $name:literal, $pat:pat) => {
        fn $f(frame: &mut Frame) -> Result<u8> {
            let ord = cmp_values($name, frame)?;
            frame.set(
                0,
                if matches!(ord, $pat) {
                    Value::uint(1)
                } else {
                    Value::Nil
                },
            );
            Ok(1)
        }
    };
}

use std::cmp::Ordering::{Equal, Greater, Less};
cmp_bfn!(lt_bfn, "<", Less);
cmp_bfn!(lte_bfn, "<=", Less | Equal);
cmp_bfn!(gt_bfn, ">", Greater);
cmp_bfn!(gte_bfn, ">=", Greater | Equal);

// Arithmetic

fn binop(
    frame: &mut Frame,
    name: &str,
    unary: Option<fn(f64) -> f64>,
    apply: fn(f64, f64) -> f64,
) -> Result<u8> {
    match (frame.get(0), frame.get(1)) {
        (Value::Num(a), Value::Num(b)) => {
            let r = apply(a.get(), b.get());
            frame.set(0, Value::num(r));
            Ok(1)
        }
        (Value::Num(a), Value::Nil) => match unary {
            Some(u) => {
                let r = u(a.get());
                frame.set(0, Value::num(r));
                Ok(1)
            }
            None => Err(error_args(name, 0x2, frame)),
        },
        _ => Err(error_args(name, 0x2, frame)),
    }
}

fn add_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "+", Some(|a| a), |a, b| a + b)
}

fn sub_num_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "-", Some(|a| -a), |a, b| a - b)
}

fn mul_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "*", None, |a, b| a * b)
}

fn div_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "/", None, |a, b| a / b)
}

fn idiv_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "//", None, |a, b| (a / b).floor())
}

fn mod_bfn(frame: &mut Frame) -> Result<u8> {
    // floored modulo: the result takes the divisor's sign
    binop(frame, "%", None, |a, b| {
        let r = a % b;
        if r != 0.0 && (a < 0.0) != (b < 0.0) {
            r + b
        } else {
            r
        }
    })
}

fn pow_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "^", None, f64::powf)
}

fn log_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "log", Some(f64::ln), |a, b| a.log(b))
}

fn abs_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "abs", Some(f64::abs), |a, _| a.abs())
}

fn floor_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "floor", Some(f64::floor), |a, _| a.floor())
}

fn ceil_bfn(frame: &mut Frame) -> Result<u8> {
    binop(frame, "ceil", Some(f64::ceil), |a, _| a.ceil())
}

// Type casts

fn num_bfn(frame: &mut Frame) -> Result<u8> {
    match frame.get(0) {
        Value::Nil => {
            frame.set(0, Value::uint(0));
            Ok(1)
        }
        Value::Num(_) => Ok(1),
        Value::Str(s) => {
            let bytes = s.as_bytes().to_vec();
            let mut pos = 0;
            match Num::parse(&bytes, &mut pos) {
                Some(n) if pos == bytes.len() => {
                    frame.set(0, Value::Num(n));
                    Ok(1)
                }
                _ => Err(error_args("num", 0x1, frame)),
            }
        }
        _ => Err(error_args("num", 0x1, frame)),
    }
}

fn str_bfn(frame: &mut Frame) -> Result<u8> {
    match frame.get(0) {
        Value::Nil => {
            frame.set(0, Value::str(""));
            Ok(1)
        }
        Value::Str(_) => Ok(1),
        v => {
            let s = Str::intern(fmt::format(
                b"%nm",
                &[FmtArg::Value(v), FmtArg::Uint(0)],
            )?);
            frame.set(0, Value::Str(s));
            Ok(1)
        }
    }
}

fn tbl_bfn(frame: &mut Frame) -> Result<u8> {
    let m = frame.take(0);
    let tail = frame.take(1);

    let t = match &m {
        Value::Nil => Tbl::new(0),
        Value::Tbl(src) => {
            let t = Tbl::new(src.len());
            let mut cursor = 0;
            while let Some((k, v)) = src.next(&mut cursor) {
                t.insert(k, v)?;
            }
            t
        }
        Value::Fn(_) => {
            let t = Tbl::new(0);
            let mut f = Frame::new();
            let mut i = 0u64;
            while crate::vm::next(&m, 0x1, &mut f)? {
                t.insert(Value::uint(i), f.take(0))?;
                i += 1;
            }
            t
        }
        _ => {
            frame.set(0, m);
            frame.set(1, tail);
            return Err(error_args("tbl", 0x2, frame));
        }
    };

    match tail {
        Value::Nil => {}
        Value::Tbl(tl) => t.set_tail(Some(tl))?,
        _ => {
            frame.set(0, m);
            frame.set(1, tail);
            return Err(error_args("tbl", 0x2, frame));
        }
    }

    frame.set(0, Value::Tbl(t));
    Ok(1)
}

fn id_bfn(frame: &mut Frame) -> Result<u8> {
    let _ = frame;
    Ok(0xf)
}

thread_local! {
    static ID: Rc<Func> = Func::from_native(0xf, id_bfn);
}

fn fn_bfn(frame: &mut Frame) -> Result<u8> {
    match frame.get(0) {
        Value::Nil => {
            frame.set(0, Value::Fn(ID.with(Rc::clone)));
            Ok(1)
        }
        Value::Fn(_) => Ok(1),
        _ => Err(error_args("fn_", 0x1, frame)),
    }
}

// String representation

fn parse_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Str(s) = frame.get(0) else {
        return Err(error_args("parse", 0x1, frame));
    };
    let v = parse_value(s.as_bytes()).unwrap_or(Value::Nil);
    frame.set(0, v);
    Ok(1)
}

fn repr_bfn(frame: &mut Frame) -> Result<u8> {
    let depth = match frame.get(1) {
        Value::Nil => None,
        Value::Num(n) => Some(n.get().max(0.0) as u32),
        _ => return Err(error_args("repr", 0x2, frame)),
    };
    let s = frame.get(0).repr(depth);
    frame.set(0, Value::Str(s));
    Ok(1)
}

fn ord_bfn(frame: &mut Frame) -> Result<u8> {
    match frame.get(0) {
        Value::Str(s) if s.len() == 1 => {
            let c = s.as_bytes()[0];
            frame.set(0, Value::uint(c as u64));
            Ok(1)
        }
        _ => Err(error_args("ord", 0x1, frame)),
    }
}

fn chr_bfn(frame: &mut Frame) -> Result<u8> {
    match frame.get(0) {
        Value::Num(n) if n.as_index().is_some_and(|i| i < 256) => {
            let c = n.as_index().unwrap() as u8;
            frame.set(0, Value::Str(Str::from_byte(c)));
            Ok(1)
        }
        _ => Err(error_args("chr", 0x1, frame)),
    }
}

fn hex_bfn(frame: &mut Frame) -> Result<u8> {
    match frame.get(0) {
        Value::Num(n) if n.as_index().is_some() => {
            let v = n.as_index().unwrap() as u64;
            frame.set(0, Value::str(&format!("0x{:x}", v)));
            Ok(1)
        }
        _ => Err(error_args("hex", 0x1, frame)),
    }
}

// Data structure operations

fn len_bfn(frame: &mut Frame) -> Result<u8> {
    let n = match frame.get(0) {
        Value::Str(s) => s.len(),
        Value::Tbl(t) => t.len(),
        _ => return Err(error_args("len", 0x1, frame)),
    };
    frame.set(0, Value::uint(n as u64));
    Ok(1)
}

fn tail_bfn(frame: &mut Frame) -> Result<u8> {
    let tail = match frame.get(0) {
        Value::Tbl(t) => t.tail(),
        Value::Buf(b) => b.borrow().tail(),
        _ => return Err(error_args("tail", 0x1, frame)),
    };
    frame.set(0, tail.map(Value::Tbl).unwrap_or(Value::Nil));
    match frame.get(0) {
        Value::Nil => Ok(0),
        _ => Ok(1),
    }
}

fn const_bfn(frame: &mut Frame) -> Result<u8> {
    if let Value::Tbl(t) = frame.get(0) {
        let frozen = Value::Tbl(t.to_const());
        frame.set(0, frozen);
    }
    Ok(1)
}

fn index_arg(v: &Value, default: i64) -> Option<i64> {
    match v {
        Value::Nil => Some(default),
        Value::Num(n) => Some(n.get() as i64),
        _ => None,
    }
}

fn push_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(t) = frame.get(0) else {
        return Err(error_args("push", 0x3, frame));
    };
    let Some(i) = index_arg(frame.get(2), t.len() as i64) else {
        return Err(error_args("push", 0x3, frame));
    };
    let t = Rc::clone(t);
    let v = frame.take(1);
    t.push(v, i)?;
    Ok(0)
}

fn pop_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(t) = frame.get(0) else {
        return Err(error_args("pop", 0x2, frame));
    };
    let Some(i) = index_arg(frame.get(1), t.len() as i64 - 1) else {
        return Err(error_args("pop", 0x2, frame));
    };
    let v = t.pop(i)?;
    frame.set(0, v);
    Ok(1)
}

fn concat_bfn(frame: &mut Frame) -> Result<u8> {
    let offset = match frame.get(2) {
        Value::Nil => None,
        Value::Num(n) => n.as_index(),
        _ => return Err(error_args("++", 0x2, frame)),
    };

    match (frame.get(0), frame.get(1)) {
        (Value::Str(a), Value::Str(b)) => {
            let r = Value::Str(a.concat(b));
            frame.set(0, r);
            Ok(1)
        }
        (Value::Tbl(a), Value::Tbl(b)) => {
            let r = Value::Tbl(a.concat(b, offset)?);
            frame.set(0, r);
            Ok(1)
        }
        _ => Err(error_args("++", 0x2, frame)),
    }
}

fn pad_bfn(frame: &mut Frame) -> Result<u8> {
    let (Value::Str(s), Value::Num(n)) = (frame.get(0), frame.get(1)) else {
        return Err(error_args("pad", 0x3, frame));
    };
    let pad = match frame.get(2) {
        Value::Nil => Str::from_str(" "),
        Value::Str(p) if !p.is_empty() => p.clone(),
        _ => return Err(error_args("pad", 0x3, frame)),
    };

    // a negative width pads on the left
    let left = n.get() >= 0.0;
    let want = n.get().abs() as usize;
    let s = s.clone();
    if s.len() >= want {
        frame.set(0, Value::Str(s));
        return Ok(1);
    }

    let mut b = Buf::with_capacity(want);
    let count = (want - s.len()) / pad.len();
    if left {
        b.push_bytes(s.as_bytes());
    }
    for _ in 0..count {
        b.push_bytes(pad.as_bytes());
    }
    if !left {
        b.push_bytes(s.as_bytes());
    }

    frame.set(0, Value::Str(Str::intern(b)));
    Ok(1)
}

fn subset_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Num(lower) = frame.get(1) else {
        return Err(error_args("sub", 0x3, frame));
    };
    let lower = lower.get() as i64;
    let upper = match frame.get(2) {
        Value::Nil => lower + 1,
        Value::Num(n) => n.get() as i64,
        _ => return Err(error_args("sub", 0x3, frame)),
    };

    match frame.get(0) {
        Value::Str(s) => {
            let r = Value::Str(s.subset(lower, upper));
            frame.set(0, r);
            Ok(1)
        }
        Value::Tbl(t) => {
            let r = Value::Tbl(t.subset(lower, upper));
            frame.set(0, r);
            Ok(1)
        }
        _ => Err(error_args("sub", 0x3, frame)),
    }
}

// Function operations

fn bound_step(scope: &Value, frame: &mut Frame) -> Result<u8> {
    let f = scope.lookup(&Value::uint(0));
    let bound = scope.lookup(&Value::uint(1));

    let (Value::Tbl(bound), Value::Tbl(called)) = (&bound, frame.get(0)) else {
        return Ok(0);
    };
    let all = bound.concat(called, None)?;
    frame.set(0, Value::Tbl(all));

    let Value::Fn(f) = f else { return Ok(0) };
    tcall(f, 0xf, frame)
}

fn bind_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(args) = frame.take(0) else {
        return Ok(0);
    };
    let f = args.pop(0)?;
    if !matches!(f, Value::Fn(_)) {
        frame.set(0, f);
        frame.set(1, Value::Tbl(args));
        return Err(error_args("bind", 0x2, frame));
    }

    let scope = Tbl::from_list(vec![f, Value::Tbl(args)]);
    frame.set(
        0,
        Value::Fn(Func::from_scoped(0xf, bound_step, Value::Tbl(scope))),
    );
    Ok(1)
}

// System operations

fn error_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(args) = frame.take(0) else {
        return Err(Error::Runtime(String::new()));
    };

    let mut b = Buf::new();
    let mut cursor = 0;
    while let Some((_, v)) = args.next(&mut cursor) {
        fmt::vpushf(&mut b, b"%m", &[FmtArg::Value(&v)])?;
    }
    Err(Error::Runtime(
        String::from_utf8_lossy(b.as_bytes()).into_owned(),
    ))
}

fn print_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(args) = frame.take(0) else {
        return Ok(0);
    };

    let mut b = Buf::new();
    let mut cursor = 0;
    while let Some((_, v)) = args.next(&mut cursor) {
        fmt::vpushf(&mut b, b"%m", &[FmtArg::Value(&v)])?;
    }
    sys::print(b.as_bytes());
    Ok(0)
}

thread_local! {
    static IMPORTS: RefCell<Option<Rc<Tbl>>> = const { RefCell::new(None) };
}

fn import_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Str(name) = frame.get(0) else {
        return Err(error_args("import", 0x1, frame));
    };
    let name = name.clone();

    let cache = IMPORTS.with(|c| {
        Rc::clone(
            c.borrow_mut()
                .get_or_insert_with(|| Tbl::new(0)),
        )
    });

    let cached = cache.lookup(&Value::Str(name.clone()));
    if cached.truthy() {
        frame.set(0, cached);
        return Ok(1);
    }

    let module = sys::import(name.as_bytes())?;
    tracing::debug!(
        module = %String::from_utf8_lossy(name.as_bytes()),
        resolved = !module.is_nil(),
        "import"
    );
    cache.insert(Value::Str(name), module.clone())?;
    frame.set(0, module);
    Ok(1)
}

// Literal parsing for the `parse` builtin

fn skip_ws(bytes: &[u8], pos: &mut usize) {
    while *pos < bytes.len() {
        match bytes[*pos] {
            b'#' => {
                while *pos < bytes.len() && bytes[*pos] != b'\n' {
                    *pos += 1;
                }
            }
            b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c => *pos += 1,
            _ => break,
        }
    }
}

fn parse_value_at(bytes: &[u8], pos: &mut usize) -> Option<Value> {
    skip_ws(bytes, pos);
    match bytes.get(*pos)? {
        b'\'' | b'"' => Str::parse(bytes, pos).map(Value::Str),
        b'[' => parse_table_at(bytes, pos),
        b'0'..=b'9' | b'.' | b'+' | b'-' => Num::parse(bytes, pos).map(Value::Num),
        _ => None,
    }
}

fn parse_table_at(bytes: &[u8], pos: &mut usize) -> Option<Value> {
    if bytes.get(*pos) != Some(&b'[') {
        return None;
    }
    *pos += 1;

    let t = Tbl::new(0);
    let mut index = 0u64;

    loop {
        skip_ws(bytes, pos);
        if bytes.get(*pos) == Some(&b']') {
            *pos += 1;
            return Some(Value::Tbl(t));
        }

        // bare symbols are only meaningful as keys
        let key = match bytes.get(*pos)? {
            c if c.is_ascii_alphabetic() || *c == b'_' => {
                let start = *pos;
                while bytes
                    .get(*pos)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
                {
                    *pos += 1;
                }
                let sym = Value::Str(Str::from_bytes(&bytes[start..*pos]));
                skip_ws(bytes, pos);
                if bytes.get(*pos) != Some(&b':') {
                    return None;
                }
                *pos += 1;
                Some(sym)
            }
            _ => {
                let v = parse_value_at(bytes, pos)?;
                skip_ws(bytes, pos);
                if bytes.get(*pos) == Some(&b':') {
                    *pos += 1;
                    Some(v)
                } else {
                    t.insert(Value::uint(index), v).ok()?;
                    index += 1;
                    None
                }
            }
        };

        if let Some(k) = key {
            let v = parse_value_at(bytes, pos)?;
            t.insert(k, v).ok()?;
        }

        skip_ws(bytes, pos);
        match bytes.get(*pos) {
            Some(b',') => *pos += 1,
            Some(b']') => {}
            _ => return None,
        }
    }
}

/// Parse a complete literal (number, string, or table constructor).
pub fn parse_value(bytes: &[u8]) -> Option<Value> {
    let mut pos = 0;
    let v = parse_value_at(bytes, &mut pos)?;
    skip_ws(bytes, &mut pos);
    if pos == bytes.len() {
        Some(v)
    } else {
        None
    }
}

// The builtins table

thread_local! {
    static BUILTINS: RefCell<Option<Rc<Tbl>>> = const { RefCell::new(None) };
}

/// The read-only builtins table forming the root of every scope chain.
pub fn builtins() -> Rc<Tbl> {
    BUILTINS.with(|b| {
        if let Some(t) = &*b.borrow() {
            return Rc::clone(t);
        }
        let t = make_builtins();
        *b.borrow_mut() = Some(Rc::clone(&t));
        t
    })
}

fn make_builtins() -> Rc<Tbl> {
    let t = Tbl::new(64);
    let def = |k: &str, v: Value| {
        t.insert(Value::str(k), v).expect("builtins table is mutable");
    };

    // constants
    def("true", Value::uint(1));
    def("inf", Value::num(f64::INFINITY));
    def("e", Value::num(std::f64::consts::E));
    def("pi", Value::num(std::f64::consts::PI));

    // type casts
    def("num", Value::Fn(Func::from_native(0x1, num_bfn)));
    def("str", Value::Fn(Func::from_native(0x1, str_bfn)));
    def("tbl", Value::Fn(Func::from_native(0x2, tbl_bfn)));
    def("fn_", Value::Fn(Func::from_native(0x1, fn_bfn)));

    // logic
    def("!", Value::Fn(Func::from_native(0x1, not_bfn)));
    def("==", Value::Fn(Func::from_native(0x2, eq_bfn)));
    def("!=", Value::Fn(Func::from_native(0x2, neq_bfn)));
    def("is", Value::Fn(Func::from_native(0x2, is_bfn)));
    def("<", Value::Fn(Func::from_native(0x2, lt_bfn)));
    def("<=", Value::Fn(Func::from_native(0x2, lte_bfn)));
    def(">", Value::Fn(Func::from_native(0x2, gt_bfn)));
    def(">=", Value::Fn(Func::from_native(0x2, gte_bfn)));

    // arithmetic
    def("+", Value::Fn(Func::from_native(0x2, add_bfn)));
    def("-", Value::Fn(Func::from_native(0x2, sub_num_bfn)));
    def("*", Value::Fn(Func::from_native(0x2, mul_bfn)));
    def("/", Value::Fn(Func::from_native(0x2, div_bfn)));
    def("//", Value::Fn(Func::from_native(0x2, idiv_bfn)));
    def("%", Value::Fn(Func::from_native(0x2, mod_bfn)));
    def("^", Value::Fn(Func::from_native(0x2, pow_bfn)));
    def("log", Value::Fn(Func::from_native(0x2, log_bfn)));
    def("abs", Value::Fn(Func::from_native(0x1, abs_bfn)));
    def("floor", Value::Fn(Func::from_native(0x1, floor_bfn)));
    def("ceil", Value::Fn(Func::from_native(0x1, ceil_bfn)));

    // string representation
    def("parse", Value::Fn(Func::from_native(0x1, parse_bfn)));
    def(keys::REPR, Value::Fn(Func::from_native(0x2, repr_bfn)));
    def("ord", Value::Fn(Func::from_native(0x1, ord_bfn)));
    def("chr", Value::Fn(Func::from_native(0x1, chr_bfn)));
    def("hex", Value::Fn(Func::from_native(0x1, hex_bfn)));

    // data structure operations
    def("len", Value::Fn(Func::from_native(0x1, len_bfn)));
    def("tail", Value::Fn(Func::from_native(0x1, tail_bfn)));
    def("const", Value::Fn(Func::from_native(0x1, const_bfn)));
    def("push", Value::Fn(Func::from_native(0x3, push_bfn)));
    def(keys::POP, Value::Fn(Func::from_native(0x2, pop_bfn)));
    def(keys::CONCAT, Value::Fn(Func::from_native(0x3, concat_bfn)));
    def(keys::SUB, Value::Fn(Func::from_native(0x3, subset_bfn)));
    def(keys::PAD, Value::Fn(Func::from_native(0x3, pad_bfn)));

    // function operations
    def(keys::BIND, Value::Fn(Func::from_native(0xf, bind_bfn)));
    def("map", Value::Fn(Func::from_native(0x2, iter::map_bfn)));
    def("filter", Value::Fn(Func::from_native(0x2, iter::filter_bfn)));
    def("reduce", Value::Fn(Func::from_native(0xf, iter::reduce_bfn)));
    def("any", Value::Fn(Func::from_native(0x2, iter::any_bfn)));
    def("all", Value::Fn(Func::from_native(0x2, iter::all_bfn)));

    // iterators
    def(keys::ITER, Value::Fn(Func::from_native(0x1, iter::iter_bfn)));
    def("pairs", Value::Fn(Func::from_native(0x1, iter::pairs_bfn)));
    def("range", Value::Fn(Func::from_native(0x3, iter::range_bfn)));
    def("repeat", Value::Fn(Func::from_native(0x2, iter::repeat_bfn)));

    // system operations
    def("error", Value::Fn(Func::from_native(0xf, error_bfn)));
    def("print", Value::Fn(Func::from_native(0xf, print_bfn)));
    def("import", Value::Fn(Func::from_native(0x1, import_bfn)));

    t.to_const()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::call;

    fn bf(name: &str) -> Value {
        builtins().lookup(&Value::str(name))
    }

    fn call2(name: &str, a: Value, b: Value) -> Result<Value> {
        let mut frame = Frame::new();
        frame.set(0, a);
        frame.set(1, b);
        call(&bf(name), 0x21, &mut frame)?;
        Ok(frame.take(0))
    }

    #[test]
    fn table_is_frozen() {
        let b = builtins();
        assert!(b.is_ro());
        assert!(b.insert(Value::str("x"), Value::uint(1)).is_err());
    }

    #[test]
    fn arithmetic() {
        assert_eq!(call2("+", Value::num(1.0), Value::num(2.0)).unwrap(), Value::num(3.0));
        assert_eq!(call2("-", Value::num(1.0), Value::Nil).unwrap(), Value::num(-1.0));
        assert_eq!(call2("//", Value::num(7.0), Value::num(2.0)).unwrap(), Value::num(3.0));
        assert_eq!(call2("%", Value::num(-3.0), Value::num(5.0)).unwrap(), Value::num(2.0));
        assert_eq!(call2("^", Value::num(2.0), Value::num(10.0)).unwrap(), Value::num(1024.0));
    }

    #[test]
    fn arithmetic_type_errors_name_the_operator() {
        let err = call2("+", Value::str("a"), Value::num(1.0)).unwrap_err();
        assert_eq!(err.to_string(), "invalid operation 'a' + 1");

        let err = call2("!", Value::Nil, Value::Nil);
        assert!(err.is_ok());
    }

    #[test]
    fn comparisons() {
        assert_eq!(call2("<", Value::num(1.0), Value::num(2.0)).unwrap(), Value::uint(1));
        assert_eq!(call2("<", Value::num(2.0), Value::num(2.0)).unwrap(), Value::Nil);
        assert_eq!(
            call2("<=", Value::str("ab"), Value::str("ac")).unwrap(),
            Value::uint(1)
        );
        assert!(call2("<", Value::num(1.0), Value::str("a")).is_err());
    }

    #[test]
    fn equality_is_handle_equality() {
        assert_eq!(call2("==", Value::str("a"), Value::str("a")).unwrap(), Value::uint(1));
        let t1 = Value::Tbl(Tbl::new(0));
        let t2 = Value::Tbl(Tbl::new(0));
        assert_eq!(call2("==", t1.clone(), t2).unwrap(), Value::Nil);
        assert_eq!(call2("==", t1.clone(), t1).unwrap(), Value::uint(1));
    }

    #[test]
    fn casts() {
        assert_eq!(call2("num", Value::str("0x10"), Value::Nil).unwrap(), Value::num(16.0));
        assert_eq!(call2("str", Value::num(3.0), Value::Nil).unwrap(), Value::str("3"));
        assert_eq!(call2("str", Value::Nil, Value::Nil).unwrap(), Value::str(""));
    }

    #[test]
    fn is_checks_types_and_prototypes() {
        assert_eq!(
            call2("is", Value::num(1.0), bf("num")).unwrap(),
            Value::uint(1)
        );
        assert_eq!(call2("is", Value::num(1.0), bf("str")).unwrap(), Value::Nil);

        let proto = Tbl::new(0);
        let obj = Tbl::with_tail(0, Some(Rc::clone(&proto)));
        assert_eq!(
            call2("is", Value::Tbl(obj), Value::Tbl(proto)).unwrap(),
            Value::uint(1)
        );
    }

    #[test]
    fn structure_ops() {
        let t = Tbl::from_list(vec![Value::uint(1), Value::uint(2)]);
        assert_eq!(call2("len", Value::Tbl(Rc::clone(&t)), Value::Nil).unwrap(), Value::uint(2));

        let mut frame = Frame::new();
        frame.set(0, Value::Tbl(Rc::clone(&t)));
        frame.set(1, Value::uint(9));
        call(&bf("push"), 0x30, &mut frame).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.lookup(&Value::uint(2)), Value::uint(9));

        let popped = call2("pop", Value::Tbl(t), Value::Nil).unwrap();
        assert_eq!(popped, Value::uint(9));
    }

    #[test]
    fn repr_and_parse_round_trip_literals() {
        for src in ["nil", "3", "'hi'", "[1, 2, 3]", "['k': 'v']"] {
            let v = parse_value(src.as_bytes()).unwrap_or(Value::Nil);
            let mut frame = Frame::new();
            frame.set(0, v.clone());
            call(&bf("repr"), 0x21, &mut frame).unwrap();
            let Value::Str(r) = frame.take(0) else {
                panic!("repr returned a non-string")
            };

            let back = parse_value(r.as_bytes()).unwrap_or(Value::Nil);
            match (&v, &back) {
                (Value::Tbl(a), Value::Tbl(b)) => {
                    assert_eq!(a.len(), b.len());
                    let mut c = 0;
                    while let Some((k, val)) = a.next(&mut c) {
                        assert_eq!(b.lookup(&k), val);
                    }
                }
                _ => assert_eq!(v, back),
            }
        }
    }

    #[test]
    fn error_builtin_carries_its_message() {
        let mut frame = Frame::new();
        frame.set(0, Value::str("boom: "));
        frame.set(1, Value::num(3.0));
        let err = call(&bf("error"), 0x20, &mut frame).unwrap_err();
        assert_eq!(err.to_string(), "boom: 3");
    }

    #[test]
    fn bind_prepends_arguments() {
        // bind(+, 10) then call with 5 -> 15
        let mut frame = Frame::new();
        frame.set(0, bf("+"));
        frame.set(1, Value::uint(10));
        call(&bf("bind"), 0x21, &mut frame).unwrap();
        let bound = frame.take(0);

        frame.set(0, Value::uint(5));
        call(&bound, 0x11, &mut frame).unwrap();
        assert_eq!(frame.take(0), Value::uint(15));
    }

    #[test]
    fn map_and_filter_and_reduce() {
        // map(fn(x) -> x+x over [1,2,3]) via bind(+) is awkward without
        // the compiler; use the builtin `+` partially applied
        let mut frame = Frame::new();
        frame.set(0, bf("+"));
        frame.set(1, Value::uint(1));
        call(&bf("bind"), 0x21, &mut frame).unwrap();
        let inc = frame.take(0);

        let t = Tbl::from_list(vec![Value::uint(1), Value::uint(2)]);
        frame.set(0, inc);
        frame.set(1, Value::Tbl(t));
        call(&bf("map"), 0x21, &mut frame).unwrap();
        let it = frame.take(0);

        let mut got = Vec::new();
        while crate::vm::next(&it, 0x1, &mut frame).unwrap() {
            got.push(frame.take(0));
        }
        assert_eq!(got, vec![Value::uint(2), Value::uint(3)]);
    }

    #[test]
    fn range_yields_a_bounded_run() {
        let mut frame = Frame::new();
        frame.set(0, Value::uint(3));
        call(&bf("range"), 0x11, &mut frame).unwrap();
        let it = frame.take(0);

        let mut got = Vec::new();
        while crate::vm::next(&it, 0x1, &mut frame).unwrap() {
            got.push(frame.take(0));
        }
        assert_eq!(got, vec![Value::uint(0), Value::uint(1), Value::uint(2)]);
    }
}
