//! Iterators and the functions over them.
//!
//! Iterators are first-class functions returning nil (or an empty tuple
//! under the variadic convention) at exhaustion. Each one is a closure
//! over its own progress state kept in a small table; there is no
//! generator machinery.

use crate::builtins::error_args;
use crate::vm::{call, next};
use std::rc::Rc;
use tarn_core::error::Result;
use tarn_core::frame::Frame;
use tarn_core::func::Func;
use tarn_core::str::Str;
use tarn_core::tbl::Tbl;
use tarn_core::value::Value;

/// Wrap any iterable as an iterator function.
pub(crate) fn make_iter(m: Value) -> Result<Value> {
    match m {
        Value::Str(s) => Ok(Value::Fn(str_iter(&s))),
        Value::Tbl(t) => Ok(Value::Fn(t.iter_fn())),
        Value::Fn(_) => Ok(m),
        _ => {
            let mut frame = Frame::new();
            frame.set(0, m);
            Err(error_args("iter", 0x1, &frame))
        }
    }
}

fn str_iter(s: &Str) -> Rc<Func> {
    let scope = Tbl::from_list(vec![Value::Str(s.clone()), Value::uint(0)]);
    Func::from_scoped(0, str_step, Value::Tbl(scope))
}

fn str_step(scope: &Value, frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(s) = scope else { return Ok(0) };
    let Value::Str(text) = s.lookup(&Value::uint(0)) else {
        return Ok(0);
    };
    let mut i = match s.lookup(&Value::uint(1)) {
        Value::Num(n) => n.as_index().unwrap_or(0),
        _ => 0,
    };

    match text.next(&mut i) {
        Some(c) => {
            s.insert(Value::uint(1), Value::uint(i as u64))?;
            frame.set(0, Value::Str(c));
            Ok(1)
        }
        None => Ok(0),
    }
}

pub(crate) fn iter_bfn(frame: &mut Frame) -> Result<u8> {
    let m = frame.take(0);
    let f = make_iter(m)?;
    frame.set(0, f);
    Ok(1)
}

pub(crate) fn pairs_bfn(frame: &mut Frame) -> Result<u8> {
    match frame.get(0) {
        Value::Tbl(t) => {
            let f = Value::Fn(t.pairs_fn());
            frame.set(0, f);
            Ok(1)
        }
        _ => Err(error_args("pairs", 0x1, frame)),
    }
}

fn num_at(scope: &Rc<Tbl>, i: u64) -> f64 {
    match scope.lookup(&Value::uint(i)) {
        Value::Num(n) => n.get(),
        _ => 0.0,
    }
}

fn range_step(scope: &Value, frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(s) = scope else { return Ok(0) };
    let cur = num_at(s, 0);
    let stop = num_at(s, 1);
    let step = num_at(s, 2);

    if (step > 0.0 && cur >= stop) || (step < 0.0 && cur <= stop) {
        return Ok(0);
    }

    frame.set(0, Value::num(cur));
    s.insert(Value::uint(0), Value::num(cur + step))?;
    Ok(1)
}

pub(crate) fn range_bfn(frame: &mut Frame) -> Result<u8> {
    // a single argument is the stop
    if frame.get(1).is_nil() {
        let start = frame.take(0);
        frame.set(1, start);
    }

    let start = match frame.take(0) {
        Value::Nil => Value::uint(0),
        v => v,
    };
    let stop = match frame.take(1) {
        Value::Nil => Value::num(f64::INFINITY),
        v => v,
    };
    let step = frame.take(2);

    let (Value::Num(a), Value::Num(b)) = (&start, &stop) else {
        frame.set(0, start);
        frame.set(1, stop);
        frame.set(2, step);
        return Err(error_args("range", 0x3, frame));
    };

    let step = match step {
        Value::Nil => Value::int(if a.get() < b.get() { 1 } else { -1 }),
        Value::Num(_) => step,
        _ => {
            frame.set(0, start.clone());
            frame.set(1, stop.clone());
            frame.set(2, step);
            return Err(error_args("range", 0x3, frame));
        }
    };

    let scope = Tbl::from_list(vec![start, stop, step]);
    frame.set(0, Value::Fn(Func::from_scoped(0, range_step, Value::Tbl(scope))));
    Ok(1)
}

fn repeat_step(scope: &Value, frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(s) = scope else { return Ok(0) };
    let left = num_at(s, 1);
    if left <= 0.0 {
        return Ok(0);
    }

    frame.set(0, s.lookup(&Value::uint(0)));
    s.insert(Value::uint(1), Value::num(left - 1.0))?;
    Ok(1)
}

pub(crate) fn repeat_bfn(frame: &mut Frame) -> Result<u8> {
    let m = frame.take(0);
    let count = match frame.take(1) {
        Value::Nil => Value::num(f64::INFINITY),
        v => v,
    };
    if !matches!(count, Value::Num(_)) {
        frame.set(0, m);
        frame.set(1, count);
        return Err(error_args("repeat", 0x2, frame));
    }

    let scope = Tbl::from_list(vec![m, count]);
    frame.set(
        0,
        Value::Fn(Func::from_scoped(0, repeat_step, Value::Tbl(scope))),
    );
    Ok(1)
}

fn map_step(scope: &Value, frame: &mut Frame) -> Result<u8> {
    let f = scope.lookup(&Value::uint(0));
    let i = scope.lookup(&Value::uint(1));

    while next(&i, 0xf, frame)? {
        call(&f, 0xff, frame)?;
        let first = frame.get(0).lookup(&Value::uint(0));
        if first.truthy() {
            return Ok(0xf);
        }
        frame.take(0);
    }
    Ok(0)
}

pub(crate) fn map_bfn(frame: &mut Frame) -> Result<u8> {
    if !matches!(frame.get(0), Value::Fn(_)) {
        return Err(error_args("map", 0x2, frame));
    }
    let f = frame.take(0);
    let iter = make_iter(frame.take(1))?;

    let scope = Tbl::from_list(vec![f, iter]);
    frame.set(0, Value::Fn(Func::from_scoped(0, map_step, Value::Tbl(scope))));
    Ok(1)
}

fn filter_step(scope: &Value, frame: &mut Frame) -> Result<u8> {
    let f = scope.lookup(&Value::uint(0));
    let i = scope.lookup(&Value::uint(1));

    while next(&i, 0xf, frame)? {
        let m = frame.get(0).clone();
        call(&f, 0xf1, frame)?;
        if frame.get(0).truthy() {
            frame.set(0, m);
            return Ok(0xf);
        }
    }
    Ok(0)
}

pub(crate) fn filter_bfn(frame: &mut Frame) -> Result<u8> {
    if !matches!(frame.get(0), Value::Fn(_)) {
        return Err(error_args("filter", 0x2, frame));
    }
    let f = frame.take(0);
    let iter = make_iter(frame.take(1))?;

    let scope = Tbl::from_list(vec![f, iter]);
    frame.set(
        0,
        Value::Fn(Func::from_scoped(0, filter_step, Value::Tbl(scope))),
    );
    Ok(1)
}

pub(crate) fn reduce_bfn(frame: &mut Frame) -> Result<u8> {
    let Value::Tbl(args) = frame.take(0) else {
        return Ok(0);
    };
    let f = args.pop(0)?;
    let iterable = args.pop(0)?;

    if !matches!(f, Value::Fn(_)) {
        frame.set(0, f);
        frame.set(1, iterable);
        frame.set(2, Value::Tbl(args));
        return Err(error_args("reduce", 0x3, frame));
    }

    let iter = make_iter(iterable)?;

    // no explicit seed: the first yielded tuple is the accumulator
    let mut acc = args;
    if acc.is_empty() {
        call(&iter, 0x0f, frame)?;
        let Value::Tbl(t) = frame.take(0) else {
            return Ok(0);
        };
        acc = t;
    }

    while next(&iter, 0xf, frame)? {
        let Value::Tbl(stepped) = frame.take(0) else {
            break;
        };
        frame.set(0, Value::Tbl(acc.concat(&stepped, None)?));
        call(&f, 0xff, frame)?;
        let Value::Tbl(t) = frame.take(0) else {
            return Ok(0);
        };
        acc = t;
    }

    frame.set(0, Value::Tbl(acc));
    Ok(0xf)
}

pub(crate) fn any_bfn(frame: &mut Frame) -> Result<u8> {
    if !matches!(frame.get(0), Value::Fn(_)) {
        return Err(error_args("any", 0x2, frame));
    }
    let pred = frame.take(0);
    let iter = make_iter(frame.take(1))?;

    while next(&iter, 0xf, frame)? {
        call(&pred, 0xf1, frame)?;
        if frame.get(0).truthy() {
            frame.set(0, Value::uint(1));
            return Ok(1);
        }
    }
    Ok(0)
}

pub(crate) fn all_bfn(frame: &mut Frame) -> Result<u8> {
    if !matches!(frame.get(0), Value::Fn(_)) {
        return Err(error_args("all", 0x2, frame));
    }
    let pred = frame.take(0);
    let iter = make_iter(frame.take(1))?;

    while next(&iter, 0xf, frame)? {
        call(&pred, 0xf1, frame)?;
        if !frame.get(0).truthy() {
            return Ok(0);
        }
    }
    frame.set(0, Value::uint(1));
    Ok(1)
}
