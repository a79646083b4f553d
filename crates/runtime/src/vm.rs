//! The virtual machine and call dispatch.
//!
//! A single-threaded register interpreter. On entry it seeds `r0` with
//! the caller's scope, copies converted arguments into `r1..`, and
//! enters a decode loop (a plain `match`; computed goto is a host
//! C-ism the format does not require). `TCALL` into another compiled
//! function re-enters the loop with replaced code and scope, so
//! tail-recursive chains run in constant host stack.
//!
//! Errors propagate as `Result`; the register array is a scoped `Vec`,
//! so every owning handle on the failing path is released during
//! unwind.

use crate::opcode::Op;
use std::rc::Rc;
use tarn_core::error::{Error, Result};
use tarn_core::fmt::{self, FmtArg};
use tarn_core::frame::{self, Frame};
use tarn_core::func::{Code, FnKind, Func};
use tarn_core::tbl::Tbl;
use tarn_core::value::Value;

fn call_error(v: &Value) -> Error {
    Error::Type(fmt::message(
        b"unable to call %nr",
        &[FmtArg::Value(v), FmtArg::Uint(1)],
    ))
}

fn scope_tbl(closure: Value) -> Option<Rc<Tbl>> {
    match closure {
        Value::Tbl(t) => Some(t),
        _ => None,
    }
}

/// Execute a compiled code object against a scope. Arguments arrive in
/// `frame` already counted by `code.args`; return values leave in
/// `frame` with the returned count.
pub fn exec(code: Rc<Code>, scope: Value, frame: &mut Frame) -> Result<u8> {
    let mut code = code;
    let mut scope = scope;

    'reenter: loop {
        let argc = frame::count(code.args);
        let mut regs: Vec<Value> = vec![Value::Nil; (code.regs as usize).max(argc + 1)];
        regs[0] = std::mem::take(&mut scope);
        for (i, slot) in regs[1..=argc].iter_mut().enumerate() {
            *slot = frame.take(i);
        }

        let mut pc = 0usize;
        loop {
            let ins = *code
                .bcode
                .get(pc)
                .ok_or_else(|| Error::Runtime("bytecode overrun".to_string()))?;
            pc += 1;

            let op = Op::from_u16(ins >> 12);
            let d = ((ins >> 8) & 0xf) as usize;

            match op {
                Op::Imm => {
                    let i = di_payload(&code, &mut pc, ins);
                    regs[d] = code.imms.get(i).cloned().unwrap_or(Value::Nil);
                }

                Op::Fn => {
                    // the pool entry is a scope-less prototype; pair its
                    // code with the executing scope
                    let i = di_payload(&code, &mut pc, ins);
                    let proto = code.imms.get(i).cloned().unwrap_or(Value::Nil);
                    let Value::Fn(proto) = proto else {
                        return Err(Error::Runtime("corrupt constant pool".to_string()));
                    };
                    let Some(sub) = proto.code() else {
                        return Err(Error::Runtime("corrupt constant pool".to_string()));
                    };
                    regs[d] = Value::Fn(Func::from_code(sub, regs[0].clone()));
                }

                Op::Tbl => {
                    let i = di_payload(&code, &mut pc, ins);
                    regs[d] = Value::Tbl(Tbl::new(i));
                }

                Op::Move => {
                    // the source register is dead after a move
                    let a = (ins & 0xff) as usize;
                    regs[d] = std::mem::take(&mut regs[a]);
                }

                Op::Dup => {
                    let a = (ins & 0xff) as usize;
                    regs[d] = regs[a].clone();
                }

                Op::Drop => {
                    regs[d] = Value::Nil;
                }

                Op::Lookup => {
                    let (a, b) = dab_payload(ins);
                    regs[d] = lookup(&regs[a], &regs[b])?;
                }

                Op::Lookdn => {
                    let (a, b) = dab_payload(ins);
                    let v = lookup(&regs[a], &regs[b])?;
                    regs[a] = Value::Nil;
                    regs[d] = v;
                }

                Op::Insert => {
                    let (a, b) = dab_payload(ins);
                    let key = std::mem::take(&mut regs[b]);
                    let val = std::mem::take(&mut regs[d]);
                    insert_check(&regs[a], &key, &val)?;
                    regs[a].insert(key, val)?;
                }

                Op::Assign => {
                    let (a, b) = dab_payload(ins);
                    let key = std::mem::take(&mut regs[b]);
                    let val = std::mem::take(&mut regs[d]);
                    insert_check(&regs[a], &key, &val)?;
                    regs[a].assign(key, val)?;
                }

                Op::Jump => {
                    let j = dj_payload(&code, &mut pc, ins);
                    jump(&mut pc, j)?;
                }

                Op::Jtrue => {
                    let j = dj_payload(&code, &mut pc, ins);
                    if regs[d].truthy() {
                        jump(&mut pc, j)?;
                    }
                }

                Op::Jfalse => {
                    let j = dj_payload(&code, &mut pc, ins);
                    if !regs[d].truthy() {
                        jump(&mut pc, j)?;
                    }
                }

                Op::Call => {
                    let fc = (ins & 0xff) as u8;
                    let fv = std::mem::take(&mut regs[d]);
                    let Value::Fn(func) = fv else {
                        return Err(call_error(&fv));
                    };

                    for i in 0..frame::count(fc >> 4) {
                        frame.set(i, std::mem::take(&mut regs[d + 1 + i]));
                    }
                    fcall(&func, fc, frame)?;
                    for i in 0..frame::count(fc & 0xf) {
                        regs[d + i] = frame.take(i);
                    }
                }

                Op::Tcall => {
                    let fc = (ins & 0xff) as u8;
                    let fv = std::mem::take(&mut regs[d]);
                    for i in 0..frame::count(fc) {
                        frame.set(i, std::mem::take(&mut regs[d + 1 + i]));
                    }
                    drop(regs);

                    let Value::Fn(func) = fv else {
                        return Err(call_error(&fv));
                    };

                    // a compiled callee reuses this interpreter frame
                    let target = match func.kind() {
                        FnKind::Code { code, .. } => Some(Rc::clone(code)),
                        _ => None,
                    };
                    match target {
                        Some(sub) => {
                            frame.convert(fc, sub.args)?;
                            scope =
                                Value::Tbl(Tbl::with_tail(sub.locals, scope_tbl(func.closure())));
                            code = sub;
                            continue 'reenter;
                        }
                        None => return tcall(func, fc, frame),
                    }
                }

                Op::Ret => {
                    let rc = (ins & 0xff) as u8;
                    for i in 0..frame::count(rc) {
                        frame.set(i, std::mem::take(&mut regs[d + i]));
                    }
                    return Ok(rc);
                }
            }
        }
    }
}

fn di_payload(code: &Code, pc: &mut usize, ins: u16) -> usize {
    let i = (ins & 0xff) as usize;
    if i == 0xff {
        let w = code.bcode.get(*pc).copied().unwrap_or(0) as usize;
        *pc += 1;
        w
    } else {
        i
    }
}

fn dab_payload(ins: u16) -> (usize, usize) {
    (((ins >> 4) & 0xf) as usize, (ins & 0xf) as usize)
}

fn dj_payload(code: &Code, pc: &mut usize, ins: u16) -> i32 {
    let j = (ins as u8) as i8 as i32;
    if j == -1 {
        let w = code.bcode.get(*pc).copied().unwrap_or(0) as i16 as i32;
        *pc += 1;
        w
    } else {
        j
    }
}

fn jump(pc: &mut usize, j: i32) -> Result<()> {
    let target = *pc as i64 + j as i64;
    if target < 0 {
        return Err(Error::Runtime("bytecode overrun".to_string()));
    }
    *pc = target as usize;
    Ok(())
}

fn lookup(t: &Value, k: &Value) -> Result<Value> {
    match t {
        Value::Tbl(_) | Value::Buf(_) => Ok(t.lookup(k)),
        _ => Err(Error::Type(fmt::message(
            b"unable to lookup %nr in %nr",
            &[
                FmtArg::Value(k),
                FmtArg::Uint(1),
                FmtArg::Value(t),
                FmtArg::Uint(1),
            ],
        ))),
    }
}

fn insert_check(t: &Value, k: &Value, v: &Value) -> Result<()> {
    match t {
        Value::Tbl(_) => Ok(()),
        _ => Err(Error::Type(fmt::message(
            b"unable to insert %nr to %nr in %nr",
            &[
                FmtArg::Value(v),
                FmtArg::Uint(1),
                FmtArg::Value(k),
                FmtArg::Uint(1),
                FmtArg::Value(t),
                FmtArg::Uint(1),
            ],
        ))),
    }
}

/// Tail-call a function: convert the frame to the callee's declared
/// arity and transfer control, returning the callee's return count.
pub fn tcall(f: Rc<Func>, fc: u8, frame: &mut Frame) -> Result<u8> {
    frame.convert(fc, f.args())?;

    match f.kind() {
        FnKind::Native(bfn) => bfn(frame),
        FnKind::Scoped { f: sbfn, closure } => sbfn(closure, frame),
        FnKind::Code { code, .. } => {
            let code = Rc::clone(code);
            let scope = Tbl::with_tail(code.locals, scope_tbl(f.closure()));
            exec(code, Value::Tbl(scope), frame)
        }
    }
}

/// Call with the arity-byte convention: high nibble argument count in
/// the frame, low nibble the return count the caller expects.
pub fn fcall(f: &Rc<Func>, fc: u8, frame: &mut Frame) -> Result<()> {
    let rets = tcall(Rc::clone(f), fc >> 4, frame)?;
    frame.convert(rets, fc & 0xf)
}

/// Generic call entry point over any value.
pub fn call(v: &Value, fc: u8, frame: &mut Frame) -> Result<()> {
    match v {
        Value::Fn(f) => fcall(f, fc, frame),
        _ => Err(call_error(v)),
    }
}

/// Drive an iterator function one step. Yields false at exhaustion (a
/// nil, or an empty tuple under the variadic convention).
pub fn next(f: &Value, fc: u8, frame: &mut Frame) -> Result<bool> {
    let rc = if fc == 0 { 1 } else { fc };
    call(f, rc & 0xf, frame)?;

    if fc != 0xf {
        if frame.get(0).truthy() {
            if fc == 0 {
                frame.take(0);
            }
            Ok(true)
        } else {
            frame.convert(fc, 0)?;
            Ok(false)
        }
    } else {
        let first = frame.get(0).lookup(&Value::uint(0));
        if first.truthy() {
            Ok(true)
        } else {
            frame.take(0);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{encode, Op};

    fn code(imms: Vec<Value>, build: impl FnOnce(&mut Vec<u16>)) -> Rc<Code> {
        let mut bcode = Vec::new();
        build(&mut bcode);
        Rc::new(Code {
            args: 0,
            weak: false,
            regs: 8,
            locals: 0,
            imms,
            bcode,
        })
    }

    #[test]
    fn imm_and_ret() {
        let c = code(vec![Value::uint(42)], |b| {
            encode(b, Op::Imm, 1, 0, 0).unwrap();
            encode(b, Op::Ret, 1, 1, 0).unwrap();
        });

        let mut frame = Frame::new();
        let rets = exec(c, Value::Tbl(Tbl::new(0)), &mut frame).unwrap();
        assert_eq!(rets, 1);
        assert_eq!(*frame.get(0), Value::uint(42));
    }

    #[test]
    fn lookup_into_a_number_is_a_type_error() {
        let c = code(vec![Value::uint(1)], |b| {
            encode(b, Op::Imm, 1, 0, 0).unwrap();
            encode(b, Op::Imm, 2, 0, 0).unwrap();
            encode(b, Op::Lookup, 1, 1, 2).unwrap();
            encode(b, Op::Ret, 0, 0, 0).unwrap();
        });

        let mut frame = Frame::new();
        let err = exec(c, Value::Tbl(Tbl::new(0)), &mut frame).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
        assert_eq!(err.to_string(), "unable to lookup 1 in 1");
    }

    #[test]
    fn jfalse_skips_and_jump_lands() {
        // r1 = imm0; if r1 false jump +...; r1 = imm1; ret r1
        let c = code(vec![Value::Nil, Value::uint(9), Value::uint(7)], |b| {
            encode(b, Op::Imm, 1, 0, 0).unwrap(); // 1 word
            encode(b, Op::Jfalse, 1, 0, 0).unwrap(); // 2 words, patched below
            encode(b, Op::Imm, 1, 1, 0).unwrap();
            encode(b, Op::Ret, 1, 1, 0).unwrap();
            encode(b, Op::Imm, 1, 2, 0).unwrap();
            encode(b, Op::Ret, 1, 1, 0).unwrap();
            // patch the jfalse at word 1 to land on word 5
            crate::opcode::patch(b, 1, 5).unwrap();
        });

        let mut frame = Frame::new();
        exec(c, Value::Tbl(Tbl::new(0)), &mut frame).unwrap();
        assert_eq!(*frame.get(0), Value::uint(7));
    }

    #[test]
    fn call_into_non_function_errors() {
        let c = code(vec![Value::uint(3)], |b| {
            encode(b, Op::Imm, 1, 0, 0).unwrap();
            encode(b, Op::Call, 1, 0x01, 0).unwrap();
            encode(b, Op::Ret, 0, 0, 0).unwrap();
        });

        let mut frame = Frame::new();
        let err = exec(c, Value::Tbl(Tbl::new(0)), &mut frame).unwrap_err();
        assert_eq!(err.to_string(), "unable to call 3");
    }
}
