//! End-to-end evaluation: source in, values out.

use std::rc::Rc;
use tarn_compiler::{compile, eval_value};
use tarn_core::error::Error;
use tarn_core::tbl::Tbl;
use tarn_core::value::Value;
use tarn_runtime::builtins;

fn scope() -> Value {
    Value::Tbl(Tbl::with_tail(0, Some(builtins())))
}

fn eval(src: &str) -> Value {
    eval_value(src.as_bytes(), &scope())
        .unwrap_or_else(|e| panic!("eval({:?}) failed: {}", src, e))
}

fn eval_err(src: &str) -> Error {
    match eval_value(src.as_bytes(), &scope()) {
        Ok(v) => panic!("eval({:?}) unexpectedly produced {:?}", src, v),
        Err(e) => e,
    }
}

#[test]
fn arithmetic() {
    assert_eq!(eval("1 + 2"), Value::num(3.0));
    assert_eq!(eval("2*3 + 4"), Value::num(10.0));
    assert_eq!(eval("10 / 4"), Value::num(2.5));
    assert_eq!(eval("-5 + 2"), Value::num(-3.0));
}

#[test]
fn spacing_breaks_ties_in_binding() {
    // tighter spacing binds tighter
    assert_eq!(eval("1+2 * 3"), Value::num(9.0));
    assert_eq!(eval("1 + 2*3"), Value::num(7.0));
}

#[test]
fn let_and_index() {
    assert_eq!(eval("let t = [1, 2, 3]; t[1]"), Value::num(2.0));
    assert_eq!(eval("let t = ['k': 7]; t['k']"), Value::num(7.0));
    assert_eq!(eval("let t = [x: 1, y: 2]; t.y"), Value::num(2.0));
}

#[test]
fn functions() {
    assert_eq!(eval("let f = fn(x) x*x; f(5)"), Value::num(25.0));
    assert_eq!(eval("let f = fn(x, y) x - y; f(10, 4)"), Value::num(6.0));
    // missing arguments pad with nil; unary minus handles it
    assert_eq!(eval("let f = fn(a, b) a; f(1)"), Value::num(1.0));
}

#[test]
fn closures_capture_their_scope() {
    assert_eq!(
        eval("let make = fn(n) fn(x) x + n; let add3 = make(3); add3(4)"),
        Value::num(7.0)
    );
}

#[test]
fn for_loops_accumulate() {
    assert_eq!(
        eval("let s = 0; for (x = [1,2,3,4]) s = s + x; s"),
        Value::num(10.0)
    );
}

#[test]
fn for_loops_over_pairs() {
    assert_eq!(
        eval("let s = 0; for (k, v = pairs([1,2,3])) s = s + k*v; s"),
        Value::num(8.0)
    );
}

#[test]
fn while_loops_with_break_and_continue() {
    assert_eq!(
        eval("let i = 0\nlet s = 0\nwhile (i < 10) {i = i + 1; if (i % 2) continue; s = s + i}\ns"),
        Value::num(30.0)
    );
    assert_eq!(
        eval("let i = 0; while (true) {i = i + 1; if (i == 5) break}; i"),
        Value::num(5.0)
    );
}

#[test]
fn recursion() {
    assert_eq!(
        eval("let r = fn(n) if (n <= 1) 1 else n * r(n-1); r(6)"),
        Value::num(720.0)
    );
}

#[test]
fn tail_calls_run_in_constant_stack() {
    assert_eq!(
        eval("let f = fn(n, a) if (n == 0) a else f(n-1, a+1); f(100000, 0)"),
        Value::num(100000.0)
    );
}

#[test]
fn named_definitions_recurse() {
    assert_eq!(eval("fn fib(n) if (n < 2) n else fib(n-1) + fib(n-2)\nfib(10)"), Value::num(55.0));
}

#[test]
fn short_circuit_and_or() {
    // and yields the left operand unchanged when it is nil
    assert_eq!(eval("nil and error('not evaluated')"), Value::Nil);
    assert_eq!(eval("1 and 2"), Value::num(2.0));
    // or yields the left operand unchanged when it is non-nil
    assert_eq!(eval("1 or error('not evaluated')"), Value::num(1.0));
    assert_eq!(eval("nil or 2"), Value::num(2.0));
    // zero is truthy
    assert_eq!(eval("0 or 2"), Value::num(0.0));
}

#[test]
fn conditionals() {
    assert_eq!(eval("if (1 < 2) 'yes' else 'no'"), Value::str("yes"));
    assert_eq!(eval("if (2 < 1) 'yes' else 'no'"), Value::str("no"));
    assert_eq!(eval("let x = 5; if (x == 5) x = 6\nx"), Value::num(6.0));
}

#[test]
fn destructuring() {
    assert_eq!(eval("let a, b = 1, 2; a + b"), Value::num(3.0));
    assert_eq!(eval("let a, b = 1, 2; a, b = b, a; a - b"), Value::num(1.0));
    assert_eq!(eval("let [a, b] = [3, 4]; a * b"), Value::num(12.0));
}

#[test]
fn variadic_functions() {
    assert_eq!(
        eval("let f = fn(first, ..rest) first + len(rest); f(10, 1, 2, 3)"),
        Value::num(13.0)
    );
    assert_eq!(
        eval("let t = [1, 2, 3]; let g = fn(a, b, c) a+b+c; g(..t)"),
        Value::num(6.0)
    );
}

#[test]
fn method_arrow_binds_the_receiver() {
    assert_eq!(
        eval("let obj = [val: 3, get: fn(self) self.val]; obj->get()"),
        Value::num(3.0)
    );
}

#[test]
fn strings_and_builtins() {
    assert_eq!(eval("len('hello')"), Value::num(5.0));
    assert_eq!(eval("'ab' ++ 'cd'"), Value::str("abcd"));
    assert_eq!(eval("sub('hello', 1, 3)"), Value::str("el"));
    assert_eq!(eval("ord('A')"), Value::num(65.0));
    assert_eq!(eval("chr(66)"), Value::str("B"));
}

#[test]
fn table_builtins() {
    assert_eq!(eval("let t = [1,2]; push(t, 3); t[2]"), Value::num(3.0));
    assert_eq!(eval("let t = [1,2,3]; pop(t)"), Value::num(3.0));
    assert_eq!(eval("len([1,2] ++ [3])"), Value::num(3.0));
}

#[test]
fn higher_order_builtins() {
    assert_eq!(
        eval("let s = 0; for (x = map(fn(v) v*v, [1,2,3])) s = s + x; s"),
        Value::num(14.0)
    );
    assert_eq!(
        eval("let s = 0; for (x = filter(fn(v) v % 2 == 1, [1,2,3,4,5])) s = s + x; s"),
        Value::num(9.0)
    );
    assert_eq!(eval("reduce(fn(a, b) a + b, [1,2,3,4], 0)"), Value::num(10.0));
}

#[test]
fn range_iteration() {
    assert_eq!(eval("let s = 0; for (i = range(5)) s = s + i; s"), Value::num(10.0));
    assert_eq!(
        eval("let s = 0; for (i = range(10, 0, -2)) s = s + i; s"),
        Value::num(30.0)
    );
}

#[test]
fn repr_round_trips_scalars() {
    assert_eq!(eval("parse(repr(42))"), Value::num(42.0));
    assert_eq!(eval("parse(repr('hi\\n'))"), Value::str("hi\n"));
    assert_eq!(eval("parse(repr(nil))"), Value::Nil);
    assert_eq!(eval("parse(repr([1, 2]))[1]"), Value::num(2.0));
}

#[test]
fn frozen_tables_refuse_writes() {
    let err = eval_err("let t = const([1, 2]); t[0] = 9");
    assert!(matches!(err, Error::ReadOnly(_)));

    // reads still work
    assert_eq!(eval("let t = const([1, 2]); t[0]"), Value::num(1.0));
}

#[test]
fn prototype_chains_through_tail() {
    assert_eq!(
        eval("let proto = ['greet': 'hi']; let t = tbl([], proto); t['greet']"),
        Value::str("hi")
    );
}

#[test]
fn user_errors_propagate() {
    let err = eval_err("error('boom ', 42)");
    assert_eq!(err.to_string(), "boom 42");
}

#[test]
fn type_errors_name_the_values() {
    let err = eval_err("let x = 5; x['k']");
    assert_eq!(err.to_string(), "unable to lookup 'k' in 5");

    let err = eval_err("let x = 5; x()");
    assert_eq!(err.to_string(), "unable to call 5");
}

#[test]
fn scope_errors_are_compile_time() {
    let err = eval_err("undefined_name + 1");
    assert!(matches!(err, Error::Scope { .. }));
    assert!(err.to_string().contains("undefined"));
}

#[test]
fn parse_errors_carry_line_hints() {
    let err = eval_err("let x = 1\nlet y = )");
    let Error::Parse { line, .. } = err else {
        panic!("expected a parse error, got {:?}", err)
    };
    assert_eq!(line, 2);
}

#[test]
fn blocks_by_brace_and_indent() {
    assert_eq!(
        eval("let s = 0\nfor (i = [1,2,3])\n    s = s + i\ns"),
        Value::num(6.0)
    );
    assert_eq!(eval("let s = 0; for (i = [1,2,3]) {s = s + i}; s"), Value::num(6.0));
}

#[test]
fn comments_are_ignored() {
    assert_eq!(eval("# leading comment\n1 + 2 # trailing"), Value::num(3.0));
}

#[test]
fn semicolons_and_newlines_separate() {
    assert_eq!(eval("let a = 1; let b = 2\nlet c = 3; a + b + c"), Value::num(6.0));
}

#[test]
fn literal_bases_and_escapes() {
    assert_eq!(eval("0x10 + 0b101 + 0o7"), Value::num(28.0));
    assert_eq!(eval("'\\x41\\d066\\o103'"), Value::str("ABC"));
}

#[test]
fn multiple_results_and_underscore() {
    assert_eq!(eval("let f = fn() return 1, 2; let _, b = f(); b"), Value::num(2.0));
}

#[test]
fn register_pressure_hits_the_encoded_limit() {
    // deeply nested expressions stress the register allocator up to the
    // encoded field, and past it the compiler reports the limit
    let ok = "1 + (2 + (3 + (4 + (5 + 6))))";
    assert_eq!(eval(ok), Value::num(21.0));

    let mut deep = String::from("1");
    for i in 0..40 {
        deep = format!("{} + ({}", i % 7, deep);
    }
    deep.push_str(&")".repeat(40));
    let err = eval_err(&deep);
    assert!(matches!(err, Error::BytecodeLimit));
}

#[test]
fn constant_pool_deduplicates() {
    let scope = scope();
    let Value::Tbl(scope_tbl) = &scope else { unreachable!() };
    let code = compile(b"1 + 1 + 1 + 1", scope_tbl).unwrap();
    let ones = code
        .imms
        .iter()
        .filter(|v| **v == Value::num(1.0))
        .count();
    assert_eq!(ones, 1);
}

#[test]
fn weak_closures_do_not_leak_their_scope() {
    let root = Tbl::with_tail(0, Some(builtins()));
    let scope = Value::Tbl(Rc::clone(&root));
    eval_value(b"fn f(x) x; f(1)", &scope).unwrap();

    // the named function lives in the scope it captured; the capture is
    // weak, so the scope's only owner is our handle
    drop(scope);
    assert_eq!(Rc::strong_count(&root), 1);
}
