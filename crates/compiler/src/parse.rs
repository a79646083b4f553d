//! The parser and code generator.
//!
//! A Pratt-style recursive-descent parser that emits bytecode directly;
//! there is no syntax tree. Expressions move through five states while
//! code is generated (direct, scoped, indirect, called, nil), and
//! `encload`/`encstore` turn any state into a stack value or an
//! assignment target. Argument lists and table constructors are scanned
//! once (`s_frame`) to fix the frame contract, then emitted (`p_frame`).
//!
//! Each function under compilation owns its scope map, immediate pool,
//! byte words, break/continue chains and register bookkeeping in a `Fun`
//! that moves into the finished `Code` on success and drops on error.

use crate::lex::*;
use std::rc::Rc;
use tarn_core::error::{Error, Result};
use tarn_core::fmt::{self, FmtArg};
use tarn_core::frame::FRAME;
use tarn_core::func::{Code, Func};
use tarn_core::tbl::Tbl;
use tarn_core::value::Value;
use tarn_runtime::keys;
use tarn_runtime::opcode::{self, Op};

const PREC_MAX: i32 = i32::MAX;
const NOT_IN_LOOP: i32 = -1;

/// Expression states during code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// The value is in the top register.
    Direct,
    /// The top two registers hold receiver and key.
    Indirect,
    /// The top register holds a symbol for outer-scope lookup.
    Scoped,
    /// The top registers hold a pending call of known arity.
    Called,
    /// No register is occupied; an `imm nil` is emitted on demand.
    Nil,
}

struct Expr {
    prec: i32,
    params: i32,
    state: State,
    insert: bool,
}

impl Expr {
    fn new(insert: bool) -> Expr {
        Expr {
            prec: PREC_MAX,
            params: 0,
            state: State::Direct,
            insert,
        }
    }
}

fn offset(e: &Expr) -> i32 {
    match e.state {
        State::Indirect => 2,
        State::Scoped => 1,
        _ => 0,
    }
}

/// Frame descriptor for argument lists, table constructors, and
/// destructuring patterns.
#[derive(Debug, Default, Clone, Copy)]
struct SFrame {
    target: i32,
    count: i32,
    index: i32,
    depth: i32,

    unpack: bool,
    insert: bool,
    tabled: bool,
    flatten: bool,
    key: bool,
    call: bool,
    expand: bool,
}

/// Per-function compilation state.
struct Fun {
    scope: Rc<Tbl>,
    imms: Rc<Tbl>,
    bcode: Vec<u16>,
    bchain: i32,
    cchain: i32,
    args: u8,
    regs: u16,
    sp: i32,
}

impl Fun {
    fn new(scope: Rc<Tbl>) -> Fun {
        Fun {
            scope,
            imms: Tbl::new(0),
            bcode: Vec::new(),
            bchain: NOT_IN_LOOP,
            cchain: NOT_IN_LOOP,
            args: 0,
            regs: 1,
            sp: 0,
        }
    }

    fn finish(self, weak: bool) -> Rc<Code> {
        let mut imms = vec![Value::Nil; self.imms.len()];
        let mut cursor = 0;
        while let Some((k, v)) = self.imms.next(&mut cursor) {
            if let Value::Num(n) = v {
                if let Some(i) = n.as_index() {
                    imms[i] = if k == nil_sentinel() { Value::Nil } else { k };
                }
            }
        }

        Rc::new(Code {
            args: self.args,
            weak,
            regs: self.regs,
            locals: self.scope.len(),
            imms,
            bcode: self.bcode,
        })
    }
}

thread_local! {
    // nil cannot key the immediate pool directly; a unique function
    // handle stands in for it
    static IMM_NIL: Value = Value::Fn(Func::from_native(0, |_| Ok(0)));
}

fn nil_sentinel() -> Value {
    IMM_NIL.with(Value::clone)
}

pub(crate) struct Parser<'s> {
    l: Lex<'s>,
    m_val: Value,
    m_prec: i32,
    fun: Fun,
}

impl<'s> Parser<'s> {
    pub fn new(source: &'s [u8], scope: Rc<Tbl>) -> Result<Parser<'s>> {
        Ok(Parser {
            l: Lex::new(source)?,
            m_val: Value::Nil,
            m_prec: 0,
            fun: Fun::new(Tbl::with_tail(0, Some(scope))),
        })
    }

    /// Compile a top-level block.
    pub fn parse(mut self) -> Result<Rc<Code>> {
        self.p_block(true)?;
        if self.l.tok != T_END {
            return Err(self.unexpected());
        }
        if self.fun.sp > 0 {
            self.encode(Op::Ret, self.fun.sp, 1, 0, -1)?;
        } else {
            self.encode(Op::Ret, 0, 0, 0, 0)?;
        }
        Ok(self.fun.finish(false))
    }

    // lexing shortcuts

    fn check(&self, tok: Tok) -> bool {
        self.l.tok & tok != 0
    }

    fn consume(&mut self, tok: Tok) -> Result<bool> {
        if self.check(tok) {
            self.m_val = std::mem::take(&mut self.l.val);
            self.m_prec = self.l.prec;
            self.l.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        if self.consume(tok)? {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn lookahead(&mut self, a: Tok, b: Tok) -> Result<bool> {
        if !self.check(a) {
            return Ok(false);
        }

        let saved = self.l.clone();
        if self.consume(a)? && self.check(b) {
            return Ok(true);
        }

        self.l = saved;
        Ok(false)
    }

    fn unexpected(&mut self) -> Error {
        if self.l.tok & T_ANY_VAL != 0 {
            self.l
                .error(fmt::message(b"unexpected %r", &[FmtArg::Value(&self.l.val)]))
        } else {
            let what = if self.l.tok & T_TERM != 0 {
                "terminator"
            } else if self.l.tok & T_SEP != 0 {
                "','"
            } else if self.l.tok & T_LPAREN != 0 {
                "'('"
            } else if self.l.tok & T_RPAREN != 0 {
                "')'"
            } else if self.l.tok & T_LTABLE != 0 {
                "'['"
            } else if self.l.tok & T_RTABLE != 0 {
                "']'"
            } else if self.l.tok & T_LBLOCK != 0 {
                "'{'"
            } else if self.l.tok & T_RBLOCK != 0 {
                "'}'"
            } else {
                "end"
            };
            self.l.error(format!("unexpected {}", what))
        }
    }

    // encoding operations

    fn len(&self) -> i32 {
        self.fun.bcode.len() as i32
    }

    fn encode(&mut self, op: Op, d: i32, a: i32, b: i32, sdiff: i32) -> Result<()> {
        self.fun.sp += sdiff;
        if self.fun.sp + 1 > self.fun.regs as i32 {
            self.fun.regs = (self.fun.sp + 1) as u16;
        }

        if d < 0 || b < 0 {
            return Err(Error::BytecodeLimit);
        }
        opcode::encode(&mut self.fun.bcode, op, d as u32, a, b as u32)
    }

    fn patch(&mut self, site: i32, target: i32) -> Result<()> {
        opcode::patch(&mut self.fun.bcode, site as usize, target)?;
        Ok(())
    }

    /// Walk an unresolved chain, pointing every site at `target`.
    fn patch_all(&mut self, mut chain: i32, target: i32) -> Result<()> {
        let mut current = 0;
        while chain != 0 {
            current += chain;
            chain = opcode::patch(&mut self.fun.bcode, current as usize, target)?;
        }
        Ok(())
    }

    /// Pool an immediate, returning its index. Equal values share an
    /// index; nil is represented by a sentinel so it can be a key.
    fn imm(&mut self, m: Value) -> Result<i32> {
        let m = if m.is_nil() { nil_sentinel() } else { m };

        if let Value::Num(n) = self.fun.imms.lookup(&m) {
            if let Some(i) = n.as_index() {
                return Ok(i as i32);
            }
        }

        let index = self.fun.imms.len();
        self.fun.imms.insert(m, Value::uint(index as u64))?;
        Ok(index as i32)
    }

    /// Declaration checking against the static scope chain. Insertions
    /// record the symbol in the innermost scope; references verify it is
    /// declared somewhere in the chain.
    fn scopecheck(&mut self, sym: &Value, insert: bool) -> Result<()> {
        if insert {
            self.fun.scope.insert(sym.clone(), nil_sentinel())?;
            Ok(())
        } else if self.fun.scope.lookup(sym).truthy() {
            Ok(())
        } else {
            let message = fmt::message(b"undefined %r", &[FmtArg::Value(sym)]);
            match self.l.error(message) {
                Error::Parse { message, line } => Err(Error::Scope { message, line }),
                e => Err(e),
            }
        }
    }

    /// Turn an expression state into a value on the stack, `offset`
    /// registers above the current top.
    fn encload(&mut self, e: &Expr, offset: i32) -> Result<()> {
        match e.state {
            State::Scoped => self.encode(
                Op::Lookup,
                self.fun.sp + offset,
                0,
                self.fun.sp,
                offset,
            ),
            State::Indirect => self.encode(
                Op::Lookdn,
                self.fun.sp + offset - 1,
                self.fun.sp - 1,
                self.fun.sp,
                offset - 1,
            ),
            State::Nil => {
                let idx = self.imm(Value::Nil)?;
                self.encode(Op::Imm, self.fun.sp + offset + 1, idx, 0, offset + 1)
            }
            State::Called | State::Direct => {
                if e.state == State::Called {
                    let cp = if e.params == 0xf { 1 } else { e.params };
                    self.encode(
                        Op::Call,
                        self.fun.sp - cp,
                        (e.params << 4) | 1,
                        0,
                        -cp,
                    )?;
                }
                if offset != 0 {
                    self.encode(Op::Move, self.fun.sp + offset, self.fun.sp, 0, offset)?;
                }
                Ok(())
            }
        }
    }

    /// Turn an expression state into an assignment target consuming the
    /// value `offset` registers below the current top.
    fn encstore(&mut self, e: &Expr, insert: bool, offset: i32) -> Result<()> {
        let op = if insert { Op::Insert } else { Op::Assign };
        match e.state {
            State::Nil => self.encode(Op::Drop, self.fun.sp - offset, 0, 0, 0),
            State::Scoped => self.encode(op, self.fun.sp - offset - 1, 0, self.fun.sp, -1),
            State::Indirect => {
                self.encode(
                    op,
                    self.fun.sp - offset - 2,
                    self.fun.sp - 1,
                    self.fun.sp,
                    0,
                )?;
                self.encode(Op::Drop, self.fun.sp - 1, 0, 0, -2)
            }
            _ => Err(self.l.error("invalid assignment".to_string())),
        }
    }

    // scanning rules: fix frame contracts before emitting

    fn s_block(&mut self) -> Result<()> {
        let depth = self.l.paren;
        loop {
            if self.check(T_STMT & !T_LBLOCK) {
                self.consume(T_STMT & !T_LBLOCK)?;
            } else if self.l.paren > self.l.depth && self.check(T_SEP) {
                self.consume(T_SEP)?;
            } else if self.l.paren > depth && self.check(T_RPAREN | T_RTABLE) {
                self.consume(T_RPAREN | T_RTABLE)?;
            } else {
                break;
            }
        }

        if self.consume(T_LBLOCK)? {
            let block = self.l.block;
            while self.l.block >= block && self.consume(T_ANY)? {}
        }
        Ok(())
    }

    fn s_expr(&mut self, f: &mut SFrame, prec: i32) -> Result<()> {
        while self.consume(T_LPAREN)? {}

        loop {
            if self.consume(T_LPAREN)? {
                let depth = self.l.paren;
                while self.l.paren >= depth && self.consume(T_ANY)? {}
                f.call = true;
            } else if self.consume(T_LTABLE)? {
                let depth = self.l.paren;
                while self.l.paren >= depth && self.consume(T_ANY)? {}
                f.call = false;
            } else if self.consume(T_FN | T_TYPE | T_IF | T_WHILE | T_FOR | T_ELSE)? {
                self.s_block()?;
                f.call = false;
            } else if self.consume(T_SYM | T_NIL | T_IMM | T_DOT | T_ARROW)? {
                f.call = false;
            } else if prec > self.l.prec && self.check(T_ANY_OP) {
                self.consume(T_ANY_OP)?;
                let call = self.check(T_EXPR);
                let mp = self.m_prec;
                self.s_expr(f, mp)?;
                f.call = call;
            } else if prec > self.l.prec && self.check(T_AND | T_OR) {
                self.consume(T_AND | T_OR)?;
                let mp = self.m_prec;
                self.s_expr(f, mp)?;
                f.call = false;
            } else if f.count == 0 && self.l.paren > self.l.depth && self.check(T_RPAREN) {
                self.consume(T_RPAREN)?;
            } else {
                return Ok(());
            }
        }
    }

    fn s_frame(&mut self, f: &mut SFrame, update: bool) -> Result<()> {
        let saved = self.l.clone();
        f.depth = self.l.depth;
        self.l.depth = self.l.paren;

        loop {
            f.call = false;
            if !self.check(T_EXPR & !T_EXPAND) {
                break;
            }

            self.s_expr(f, PREC_MAX)?;
            if self.consume(T_PAIR)? {
                f.tabled = true;
                self.s_expr(f, PREC_MAX)?;
            }

            f.count += 1;
            if !(self.l.paren != f.depth && self.consume(T_SEP)?) {
                break;
            }
        }

        if self.consume(T_EXPAND)? {
            f.expand = true;
            self.s_expr(f, PREC_MAX)?;
        }

        self.l.depth = f.depth;
        if !update {
            self.l = saved;
        }

        f.tabled = f.tabled || f.expand || f.count > FRAME as i32;
        f.target = f.count;
        f.call = f.call && f.count == 1 && !f.tabled;
        Ok(())
    }

    // grammar rules

    fn p_fn(&mut self, weak: bool) -> Result<()> {
        let child_scope = Tbl::with_tail(0, Some(Rc::clone(&self.fun.scope)));
        let outer = std::mem::replace(&mut self.fun, Fun::new(child_scope));

        self.expect(T_LPAREN)?;
        let mut f = SFrame {
            unpack: true,
            insert: true,
            ..Default::default()
        };
        self.s_frame(&mut f, false)?;
        self.fun.sp = if f.tabled { 1 } else { f.count };
        self.fun.args = if f.tabled { 0xf } else { f.count as u8 };
        self.p_frame(&mut f)?;
        self.expect(T_RPAREN)?;

        self.p_body()?;
        self.encode(Op::Ret, 0, 0, 0, 0)?;

        let child = std::mem::replace(&mut self.fun, outer);
        let code = child.finish(weak);

        // nested code pools as a scope-less prototype function
        let idx = self.imm(Value::Fn(Func::from_code(code, Value::Nil)))?;
        self.encode(Op::Fn, self.fun.sp + 1, idx, 0, 1)
    }

    fn p_if(&mut self, expr: bool) -> Result<()> {
        self.expect(T_LPAREN)?;
        self.p_expr()?;
        self.expect(T_RPAREN)?;

        let cond_offset = self.len();
        self.encode(Op::Jfalse, self.fun.sp, 0, 0, 0)?;
        self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;

        if expr {
            self.p_expr()?;
        } else {
            self.p_stmt()?;
        }

        if self.check(T_ELSE) || (!expr && self.lookahead(T_TERM, T_ELSE)?) {
            self.expect(T_ELSE)?;
            let exit_offset = self.len();
            self.encode(Op::Jump, 0, 0, 0, -(expr as i32))?;
            let else_offset = self.len();

            if expr {
                self.p_expr()?;
            } else {
                self.p_stmt()?;
            }

            self.patch(cond_offset, else_offset)?;
            self.patch(exit_offset, self.len())?;
        } else if !expr {
            self.patch(cond_offset, self.len())?;
        } else {
            return Err(self.unexpected());
        }
        Ok(())
    }

    fn p_while(&mut self) -> Result<()> {
        let while_offset = self.len();
        self.expect(T_LPAREN)?;
        self.p_expr()?;
        self.expect(T_RPAREN)?;

        let cond_offset = self.len();
        self.encode(Op::Jfalse, self.fun.sp, 0, 0, 0)?;
        self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;

        let bchain = std::mem::replace(&mut self.fun.bchain, 0);
        let cchain = std::mem::replace(&mut self.fun.cchain, 0);

        self.p_stmt()?;

        self.encode(Op::Jump, 0, while_offset - self.len(), 0, 0)?;
        self.patch(cond_offset, self.len())?;

        let bc = self.fun.bchain;
        let cc = self.fun.cchain;
        self.patch_all(bc, self.len())?;
        self.patch_all(cc, while_offset)?;
        self.fun.bchain = bchain;
        self.fun.cchain = cchain;
        Ok(())
    }

    fn p_for(&mut self) -> Result<()> {
        self.expect(T_LPAREN)?;
        let ll = self.l.clone();
        let mut f = SFrame {
            unpack: true,
            insert: true,
            ..Default::default()
        };
        self.s_frame(&mut f, true)?;

        self.expect(T_ASSIGN)?;
        if !(f.count != 0 || f.tabled) {
            return Err(self.l.error("invalid assignment".to_string()));
        }

        let iter_idx = self.imm(Value::str(keys::ITER))?;
        self.encode(Op::Imm, self.fun.sp + 1, iter_idx, 0, 1)?;
        self.encode(Op::Lookup, self.fun.sp, 0, self.fun.sp, 0)?;
        self.p_expr()?;
        self.encode(Op::Call, self.fun.sp - 1, 0x11, 0, -1)?;

        let for_offset = self.len();
        self.encode(Op::Dup, self.fun.sp + 1, self.fun.sp, 0, 1)?;

        let cond_offset;
        if f.tabled {
            self.encode(Op::Call, self.fun.sp, 0x0f, 0, 0)?;
            let zero_idx = self.imm(Value::uint(0))?;
            self.encode(Op::Imm, self.fun.sp + 1, zero_idx, 0, 1)?;
            self.encode(Op::Lookup, self.fun.sp, self.fun.sp - 1, self.fun.sp, 0)?;
            cond_offset = self.len();
            self.encode(Op::Jfalse, self.fun.sp, 0, 0, 0)?;
            self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;
        } else {
            self.encode(Op::Call, self.fun.sp, f.count, 0, f.count - 1)?;
            cond_offset = self.len();
            self.encode(Op::Jfalse, self.fun.sp - f.count + 1, 0, 0, 0)?;
        }
        let count = if f.tabled { 1 } else { f.count };

        let lr = self.l.clone();
        self.l = ll;

        self.p_frame(&mut f)?;
        self.expect(T_ASSIGN)?;
        self.l = lr;
        self.expect(T_RPAREN)?;

        let bchain = std::mem::replace(&mut self.fun.bchain, 0);
        let cchain = std::mem::replace(&mut self.fun.cchain, 0);

        self.p_stmt()?;

        self.encode(Op::Jump, 0, for_offset - self.len(), 0, 0)?;
        self.patch(cond_offset, self.len())?;
        for i in 0..count {
            self.encode(Op::Drop, self.fun.sp + 1 + i, 0, 0, 0)?;
        }

        let bc = self.fun.bchain;
        let cc = self.fun.cchain;
        self.patch_all(bc, self.len())?;
        self.patch_all(cc, for_offset)?;
        self.fun.bchain = bchain;
        self.fun.cchain = cchain;

        self.encode(Op::Drop, self.fun.sp, 0, 0, -1)
    }

    /// A function body: statements compile as statements, while a bare
    /// expression body returns its value implicitly. The implicit
    /// return distributes through `if` branches so a branch ending in a
    /// direct call still becomes a tail call.
    fn p_body(&mut self) -> Result<()> {
        if self.check(
            T_LBLOCK | T_LET | T_RETURN | T_ARROW | T_BREAK | T_CONTINUE | T_WHILE | T_FOR,
        ) || self.starts_named_fn()?
            || self.starts_assignment()?
        {
            return self.p_stmt();
        }
        self.p_tail()
    }

    /// An expression in tail position.
    fn p_tail(&mut self) -> Result<()> {
        if self.consume(T_IF)? {
            self.expect(T_LPAREN)?;
            self.p_expr()?;
            self.expect(T_RPAREN)?;

            let cond = self.len();
            self.encode(Op::Jfalse, self.fun.sp, 0, 0, 0)?;
            self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;

            self.p_tail()?;

            if self.check(T_ELSE) || self.lookahead(T_TERM, T_ELSE)? {
                self.expect(T_ELSE)?;
                self.patch(cond, self.len())?;
                self.p_tail()?;
            } else {
                self.patch(cond, self.len())?;
                self.encode(Op::Ret, 0, 0, 0, 0)?;
            }
            return Ok(());
        }

        self.p_return()
    }

    fn starts_named_fn(&mut self) -> Result<bool> {
        if !self.check(T_FN) {
            return Ok(false);
        }
        let saved_l = self.l.clone();
        let saved_m = (self.m_val.clone(), self.m_prec);
        self.consume(T_FN)?;
        let named = self.check(T_ANY_SYM | T_ANY_OP);
        self.l = saved_l;
        self.m_val = saved_m.0;
        self.m_prec = saved_m.1;
        Ok(named)
    }

    fn starts_assignment(&mut self) -> Result<bool> {
        if !self.check(T_EXPR) {
            return Ok(false);
        }
        let saved_l = self.l.clone();
        let saved_m = (self.m_val.clone(), self.m_prec);
        let mut f = SFrame::default();
        let scanned = self.s_frame(&mut f, true);
        let is_assign = scanned.is_ok() && self.check(T_ASSIGN);
        self.l = saved_l;
        self.m_val = saved_m.0;
        self.m_prec = saved_m.1;
        Ok(is_assign)
    }

    fn p_expr(&mut self) -> Result<()> {
        let depth = self.l.depth;
        self.l.depth = self.l.paren;
        let mut e = Expr::new(false);
        self.p_subexpr(&mut e)?;
        self.encload(&e, 0)?;
        self.l.depth = depth;
        Ok(())
    }

    fn p_subexpr(&mut self, e: &mut Expr) -> Result<()> {
        if self.consume(T_LPAREN)? {
            let prec = e.prec;
            e.prec = PREC_MAX;
            self.p_subexpr(e)?;
            e.prec = prec;
            self.expect(T_RPAREN)?;
            self.p_postexpr(e)
        } else if self.consume(T_LTABLE)? {
            let mut f = SFrame::default();
            self.s_frame(&mut f, false)?;
            f.tabled = true;
            self.p_frame(&mut f)?;
            self.expect(T_RTABLE)?;
            e.state = State::Direct;
            self.p_postexpr(e)
        } else if self.lookahead(T_ANY_OP, T_EXPR)? {
            // unary operator: lookup and apply
            let sym = self.m_val.clone();
            self.scopecheck(&sym, false)?;
            let idx = self.imm(sym)?;
            self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
            self.encode(Op::Lookup, self.fun.sp, 0, self.fun.sp, 0)?;

            let prec = e.prec;
            e.prec = self.m_prec;
            self.p_subexpr(e)?;
            e.prec = prec;
            self.encload(e, 0)?;
            e.state = State::Called;
            e.params = 1;
            self.p_postexpr(e)
        } else if self.consume(T_FN)? {
            self.p_fn(false)?;
            e.state = State::Direct;
            self.p_postexpr(e)
        } else if self.consume(T_IF)? {
            self.p_if(true)?;
            e.state = State::Direct;
            self.p_postexpr(e)
        } else if self.consume(T_IMM)? {
            let idx = self.imm(self.m_val.clone())?;
            self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
            e.state = State::Direct;
            self.p_postexpr(e)
        } else if self.consume(T_NIL)? {
            e.state = State::Nil;
            self.p_postexpr(e)
        } else if self.consume(T_SYM | T_ANY_OP)? {
            let sym = self.m_val.clone();
            self.scopecheck(&sym, e.insert)?;
            let idx = self.imm(sym)?;
            self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
            e.state = State::Scoped;
            self.p_postexpr(e)
        } else {
            Err(self.unexpected())
        }
    }

    fn p_postexpr(&mut self, e: &mut Expr) -> Result<()> {
        if self.consume(T_LPAREN)? {
            self.encload(e, 0)?;
            let mut f = SFrame::default();
            self.s_frame(&mut f, false)?;
            f.tabled = f.tabled || f.call;
            self.p_frame(&mut f)?;
            self.expect(T_RPAREN)?;
            e.state = State::Called;
            e.params = if f.tabled { 0xf } else { f.count };
            self.p_postexpr(e)
        } else if self.consume(T_LTABLE)? {
            self.encload(e, 0)?;
            self.p_expr()?;
            self.expect(T_RTABLE)?;
            e.state = State::Indirect;
            self.p_postexpr(e)
        } else if self.consume(T_DOT)? {
            self.expect(T_ANY_SYM)?;
            self.encload(e, 0)?;
            let idx = self.imm(self.m_val.clone())?;
            self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
            e.state = State::Indirect;
            self.p_postexpr(e)
        } else if self.consume(T_ARROW)? {
            self.expect(T_ANY_SYM)?;
            let sym = self.m_val.clone();

            if self.check(T_LPAREN) {
                // method call: pass the receiver as the first argument
                // when the frame shape allows it
                let saved = self.l.clone();
                self.expect(T_LPAREN)?;
                let mut f = SFrame::default();
                self.s_frame(&mut f, false)?;

                if !f.tabled && !f.call && f.target != FRAME as i32 {
                    self.encload(e, 1)?;
                    let idx = self.imm(sym)?;
                    self.encode(Op::Imm, self.fun.sp - 1, idx, 0, 0)?;
                    self.encode(
                        Op::Lookup,
                        self.fun.sp - 1,
                        self.fun.sp,
                        self.fun.sp - 1,
                        0,
                    )?;
                    self.p_frame(&mut f)?;
                    self.expect(T_RPAREN)?;
                    e.state = State::Called;
                    e.params = f.count + 1;
                    return self.p_postexpr(e);
                }
                self.l = saved;
            }

            // otherwise bind the receiver
            self.encload(e, 2)?;
            let idx = self.imm(sym)?;
            self.encode(Op::Imm, self.fun.sp - 1, idx, 0, 0)?;
            self.encode(
                Op::Lookup,
                self.fun.sp - 1,
                self.fun.sp,
                self.fun.sp - 1,
                0,
            )?;
            let bind_idx = self.imm(Value::str(keys::BIND))?;
            self.encode(Op::Imm, self.fun.sp - 2, bind_idx, 0, 0)?;
            self.encode(Op::Lookup, self.fun.sp - 2, 0, self.fun.sp - 2, 0)?;
            self.encode(Op::Call, self.fun.sp - 2, 0x21, 0, -2)?;
            e.state = State::Direct;
            self.p_postexpr(e)
        } else if e.prec > self.l.prec && self.check(T_ANY_OP) {
            // binary operator: lookup, evaluate right operand, apply
            self.consume(T_ANY_OP)?;
            self.encload(e, 1)?;
            let sym = self.m_val.clone();
            let mp = self.m_prec;
            self.scopecheck(&sym, false)?;
            let idx = self.imm(sym)?;
            self.encode(Op::Imm, self.fun.sp - 1, idx, 0, 0)?;
            self.encode(Op::Lookup, self.fun.sp - 1, 0, self.fun.sp - 1, 0)?;

            let prec = e.prec;
            e.prec = mp;
            self.p_subexpr(e)?;
            self.encload(e, 0)?;
            e.prec = prec;
            e.state = State::Called;
            e.params = 2;
            self.p_postexpr(e)
        } else if e.prec > self.l.prec && self.check(T_AND) {
            self.consume(T_AND)?;
            self.encload(e, 0)?;
            let site = self.len();
            self.encode(Op::Jfalse, self.fun.sp, 0, 0, 0)?;
            self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;

            let prec = e.prec;
            e.prec = self.m_prec;
            self.p_subexpr(e)?;
            self.encload(e, 0)?;
            e.prec = prec;
            self.patch(site, self.len())?;
            e.state = State::Direct;
            self.p_postexpr(e)
        } else if e.prec > self.l.prec && self.check(T_OR) {
            self.consume(T_OR)?;
            self.encload(e, 0)?;
            let site = self.len();
            self.encode(Op::Jtrue, self.fun.sp, 0, 0, -1)?;

            let prec = e.prec;
            e.prec = self.m_prec;
            self.p_subexpr(e)?;
            self.encload(e, 0)?;
            e.prec = prec;
            self.patch(site, self.len())?;
            e.state = State::Direct;
            self.p_postexpr(e)
        } else {
            Ok(())
        }
    }

    fn p_entry(&mut self, f: &mut SFrame) -> Result<()> {
        let mut e = Expr::new(f.insert);
        f.key = false;
        let mut keysym = Value::Nil;

        if self.lookahead(T_ANY_SYM, T_PAIR)? {
            keysym = self.m_val.clone();
            let idx = self.imm(keysym.clone())?;
            self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
            e.state = State::Direct;
            f.key = true;
        } else if !(f.unpack && self.check(T_LTABLE)) {
            self.p_subexpr(&mut e)?;

            while f.count == 0 && self.l.paren > self.l.depth && self.consume(T_RPAREN)? {
                e.prec = PREC_MAX;
                self.p_postexpr(&mut e)?;
            }
        }

        if self.consume(T_PAIR)? {
            if f.unpack && f.expand {
                self.encload(&e, 1)?;
                let nil_idx = self.imm(Value::Nil)?;
                self.encode(Op::Imm, self.fun.sp + 1, nil_idx, 0, 1)?;
                self.encode(
                    Op::Lookup,
                    self.fun.sp - 2,
                    self.fun.sp - 3,
                    self.fun.sp - 1,
                    0,
                )?;
                self.encode(
                    Op::Insert,
                    self.fun.sp,
                    self.fun.sp - 3,
                    self.fun.sp - 1,
                    -2,
                )?;
            } else if f.unpack {
                self.encload(&e, 0)?;
                let last = f.count == f.target - 1;
                self.encode(
                    if last { Op::Lookdn } else { Op::Lookup },
                    self.fun.sp,
                    self.fun.sp - 1,
                    self.fun.sp,
                    if last { -1 } else { 0 },
                )?;
            } else {
                self.encload(&e, 0)?;
            }

            if f.key && !self.check(T_EXPR) {
                // `[k:]` pulls the key's own binding from scope
                let idx = self.imm(keysym)?;
                self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
                e.state = State::Scoped;
            } else if !(f.unpack && self.check(T_LTABLE)) {
                self.p_subexpr(&mut e)?;
            }

            f.key = true;
        } else if f.tabled {
            if f.unpack && f.expand {
                let pop_idx = self.imm(Value::str(keys::POP))?;
                self.encode(Op::Imm, self.fun.sp + 1, pop_idx, 0, 1)?;
                self.encode(Op::Lookup, self.fun.sp, 0, self.fun.sp, 0)?;
                self.encode(
                    Op::Dup,
                    self.fun.sp + 1,
                    self.fun.sp - 1 - offset(&e),
                    0,
                    1,
                )?;
                let idx = self.imm(Value::uint(f.index as u64))?;
                self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
                self.encode(Op::Call, self.fun.sp - 2, 0x21, 0, -2)?;
            } else if f.unpack {
                let idx = self.imm(Value::uint(f.index as u64))?;
                self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
                let last = f.count == f.target - 1;
                self.encode(
                    if last { Op::Lookdn } else { Op::Lookup },
                    self.fun.sp,
                    self.fun.sp - 1 - offset(&e),
                    self.fun.sp,
                    0,
                )?;
            }
        } else if f.unpack && self.check(T_LTABLE) && f.count < f.target - 1 {
            self.encode(
                Op::Move,
                self.fun.sp + 1,
                self.fun.sp - (f.target - 1 - f.count),
                0,
                1,
            )?;
        }

        if f.unpack && self.consume(T_LTABLE)? {
            // nested destructuring
            let mut nf = SFrame {
                unpack: true,
                insert: f.insert,
                ..Default::default()
            };
            self.s_frame(&mut nf, false)?;
            nf.tabled = true;
            self.p_frame(&mut nf)?;
            self.fun.sp -= (f.tabled || f.count < f.target - 1) as i32;
            f.count -= 1;
            self.expect(T_RTABLE)?;
        } else if f.unpack {
            if f.key {
                self.encstore(&e, f.insert, 0)?;
                self.fun.sp -= 1;
            } else if f.tabled {
                self.fun.sp -= 1;
                self.encstore(&e, f.insert, -(offset(&e) + 1))?;
            } else {
                self.encstore(&e, f.insert, f.target - 1 - f.count)?;
            }
        } else {
            self.encload(&e, 0)?;

            if f.key {
                self.encode(
                    Op::Insert,
                    self.fun.sp,
                    self.fun.sp - 2,
                    self.fun.sp - 1,
                    -2,
                )?;
            } else if f.tabled {
                let idx = self.imm(Value::uint(f.index as u64))?;
                self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
                self.encode(
                    Op::Insert,
                    self.fun.sp - 1,
                    self.fun.sp - 2,
                    self.fun.sp,
                    -2,
                )?;
            } else if f.count >= f.target {
                self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;
            }
        }
        Ok(())
    }

    fn p_frame(&mut self, f: &mut SFrame) -> Result<()> {
        if !f.unpack && f.call {
            let mut e = Expr::new(f.insert);
            self.p_subexpr(&mut e)?;
            let cp = if e.params == 0xf { 1 } else { e.params };
            let rets = if f.tabled { 0xf } else { f.target };
            return self.encode(
                Op::Call,
                self.fun.sp - cp,
                (e.params << 4) | rets,
                0,
                (if f.tabled { 1 } else { f.target }) - cp - 1,
            );
        } else if !f.unpack && f.tabled && !f.call && !(f.expand && f.target == 0) {
            self.encode(Op::Tbl, self.fun.sp + 1, f.count, 0, 1)?;
        }

        f.count = 0;
        f.index = 0;
        f.depth = self.l.depth;
        self.l.depth = self.l.paren;

        while self.consume(T_LPAREN)? {}

        loop {
            if !self.check(T_EXPR) || self.consume(T_EXPAND)? {
                break;
            }

            self.p_entry(f)?;
            if !f.key {
                f.index += 1;
            }
            f.count += 1;

            if !(self.l.paren != f.depth && self.consume(T_SEP)?) {
                break;
            }
        }

        if f.expand {
            if f.unpack {
                // remainder pattern: assign the rest-table
                let mut e = Expr::new(f.insert);
                self.p_subexpr(&mut e)?;
                self.encstore(&e, f.insert, 0)?;
                self.fun.sp -= 1;
            } else if f.count > 0 {
                self.encode(Op::Move, self.fun.sp + 1, self.fun.sp, 0, 1)?;
                let cidx = self.imm(Value::str(keys::CONCAT))?;
                self.encode(Op::Imm, self.fun.sp - 1, cidx, 0, 0)?;
                self.encode(Op::Lookup, self.fun.sp - 1, 0, self.fun.sp - 1, 0)?;
                self.p_expr()?;
                let iidx = self.imm(Value::uint(f.index as u64))?;
                self.encode(Op::Imm, self.fun.sp + 1, iidx, 0, 1)?;
                self.encode(Op::Call, self.fun.sp - 3, 0x31, 0, -3)?;
            } else {
                self.p_expr()?;
            }
        }

        if f.unpack && !f.tabled {
            self.fun.sp -= f.count;
        } else if !f.unpack && f.tabled && f.flatten {
            // unpack the aggregate back into consecutive registers
            self.encode(Op::Move, self.fun.sp + f.target, self.fun.sp, 0, f.target)?;

            for i in 0..f.target {
                let iidx = self.imm(Value::uint(i as u64))?;
                self.encode(Op::Imm, self.fun.sp - 1 - (f.target - 1 - i), iidx, 0, 0)?;
                let last = i == f.target - 1;
                self.encode(
                    if last { Op::Lookdn } else { Op::Lookup },
                    self.fun.sp - 1 - (f.target - 1 - i),
                    self.fun.sp,
                    self.fun.sp - 1 - (f.target - 1 - i),
                    -(last as i32),
                )?;
            }
        } else if !f.unpack && !f.tabled {
            while f.target > f.count {
                let nidx = self.imm(Value::Nil)?;
                self.encode(Op::Imm, self.fun.sp + 1, nidx, 0, 1)?;
                f.count += 1;
            }
        }

        while self.l.paren > self.l.depth {
            self.expect(T_RPAREN)?;
        }

        if self.check(T_EXPR) {
            return Err(self.unexpected());
        }

        self.l.depth = f.depth;
        Ok(())
    }

    /// Record the declaration targets of a `let` pattern by running the
    /// unpacking pass against a scratch byte array. The emitted words
    /// are discarded; only the scope-map insertions persist.
    fn predeclare(&mut self, at: Lex<'s>, fl: SFrame) -> Result<()> {
        let after = std::mem::replace(&mut self.l, at);
        let bcode = std::mem::take(&mut self.fun.bcode);
        let sp = self.fun.sp;
        let regs = self.fun.regs;

        // prime the stack pointer as if the right side had run
        self.fun.sp += if fl.tabled { 1 } else { fl.count };
        let mut fd = fl;
        fd.unpack = true;
        let scanned = self.p_frame(&mut fd);

        self.fun.bcode = bcode;
        self.fun.sp = sp;
        self.fun.regs = regs;
        self.l = after;
        scanned
    }

    fn p_assign(&mut self, insert: bool, keep: bool) -> Result<()> {
        let saved = self.l.clone();
        let mut fl = SFrame {
            insert,
            ..Default::default()
        };
        self.s_frame(&mut fl, true)?;

        if self.consume(T_ASSIGN)? {
            let mut fr = SFrame::default();
            self.s_frame(&mut fr, false)?;

            if !((fr.count != 0 || fr.tabled) && (fl.count != 0 || fl.tabled)) {
                return Err(self.l.error("invalid assignment".to_string()));
            }

            // a let-bound name is visible on its own right side, so the
            // targets declare before the value compiles
            if insert {
                self.predeclare(saved.clone(), fl)?;
            }

            // evaluate the right side shaped by the left, then re-parse
            // the left as an unpacking frame
            fr.tabled = fr.tabled || fl.tabled;
            fr.target = fl.count;
            fr.flatten = !fl.tabled;
            self.p_frame(&mut fr)?;

            let lr = self.l.clone();
            self.l = saved;

            fl.unpack = true;
            self.p_frame(&mut fl)?;
            self.expect(T_ASSIGN)?;
            self.l = lr;
        } else if !insert {
            // bare expression statement; the root block keeps the value
            self.l = saved;
            fl.unpack = false;
            fl.tabled = false;
            fl.target = keep as i32;
            self.p_frame(&mut fl)?;
        } else {
            return Err(self.unexpected());
        }
        Ok(())
    }

    fn p_return(&mut self) -> Result<()> {
        // drop any leftover loop iterators
        let sp = self.fun.sp;
        while self.fun.sp != 0 {
            self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;
        }

        let mut f = SFrame::default();
        self.s_frame(&mut f, false)?;

        if f.call {
            // a returned direct call becomes a tail call
            let mut e = Expr::new(false);
            self.p_subexpr(&mut e)?;
            let cp = if e.params == 0xf { 1 } else { e.params };
            self.encode(Op::Tcall, self.fun.sp - cp, e.params, 0, -cp - 1)?;
        } else {
            self.p_frame(&mut f)?;
            self.encode(
                Op::Ret,
                self.fun.sp - (if f.tabled { 0 } else { f.count - 1 }),
                if f.tabled { 0xf } else { f.count },
                0,
                -(if f.tabled { 1 } else { f.count }),
            )?;
        }

        self.fun.sp = sp;
        Ok(())
    }

    /// A root-block statement: bare expressions keep their value on the
    /// stack so `eval` can yield the trailing result, and an `if` in
    /// this position is an expression whose branches normalise to one
    /// value each.
    fn p_keep_stmt(&mut self) -> Result<()> {
        if self.consume(T_IF)? {
            return self.p_keep_if();
        }

        if self.check(
            T_LBLOCK | T_LET | T_RETURN | T_ARROW | T_BREAK | T_CONTINUE | T_WHILE | T_FOR,
        ) || self.starts_named_fn()?
            || self.starts_assignment()?
        {
            return self.p_stmt();
        }

        self.p_assign(false, true)
    }

    fn p_keep_if(&mut self) -> Result<()> {
        self.expect(T_LPAREN)?;
        self.p_expr()?;
        self.expect(T_RPAREN)?;

        let cond = self.len();
        self.encode(Op::Jfalse, self.fun.sp, 0, 0, 0)?;
        self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;

        let base = self.fun.sp;
        self.p_keep_stmt()?;
        if self.fun.sp == base {
            let idx = self.imm(Value::Nil)?;
            self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
        }

        let exit = self.len();
        self.encode(Op::Jump, 0, 0, 0, -1)?;
        let else_off = self.len();

        if self.check(T_ELSE) || self.lookahead(T_TERM, T_ELSE)? {
            self.expect(T_ELSE)?;
            self.p_keep_stmt()?;
            if self.fun.sp == base {
                let idx = self.imm(Value::Nil)?;
                self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
            }
        } else {
            let idx = self.imm(Value::Nil)?;
            self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
        }

        self.patch(cond, else_off)?;
        self.patch(exit, self.len())?;
        Ok(())
    }

    fn p_stmt(&mut self) -> Result<()> {
        if self.check(T_LBLOCK) {
            self.p_block(false)
        } else if self.lookahead(T_FN, T_ANY_SYM | T_ANY_OP)? {
            // named definition: the closure holds its scope weakly to
            // break the cycle with the scope that contains it
            self.expect(T_ANY_SYM | T_ANY_OP)?;
            let sym = self.m_val.clone();
            self.scopecheck(&sym, true)?;
            self.p_fn(true)?;
            let idx = self.imm(sym)?;
            self.encode(Op::Imm, self.fun.sp + 1, idx, 0, 1)?;
            self.encode(Op::Insert, self.fun.sp - 1, 0, self.fun.sp, -2)
        } else if self.consume(T_IF)? {
            self.p_if(false)
        } else if self.consume(T_WHILE)? {
            self.p_while()
        } else if self.consume(T_FOR)? {
            self.p_for()
        } else if self.consume(T_BREAK)? {
            if self.fun.bchain == NOT_IN_LOOP {
                return Err(self.l.error("break outside of loop".to_string()));
            }

            let site = self.len();
            let link = if self.fun.bchain != 0 {
                self.fun.bchain - site
            } else {
                0
            };
            self.encode(Op::Jump, 0, 2, 0, 0)?;
            opcode::link(&mut self.fun.bcode, site as usize, link);
            self.fun.bchain = site;
            Ok(())
        } else if self.consume(T_CONTINUE)? {
            if self.fun.bchain == NOT_IN_LOOP {
                return Err(self.l.error("continue outside of loop".to_string()));
            }

            let site = self.len();
            let link = if self.fun.cchain != 0 {
                self.fun.cchain - site
            } else {
                0
            };
            self.encode(Op::Jump, 0, 2, 0, 0)?;
            opcode::link(&mut self.fun.bcode, site as usize, link);
            self.fun.cchain = site;
            Ok(())
        } else if self.consume(T_ARROW | T_RETURN)? {
            self.p_return()
        } else if self.consume(T_LET)? {
            self.p_assign(true, false)
        } else {
            self.p_assign(false, false)
        }
    }

    fn p_block(&mut self, root: bool) -> Result<()> {
        let block = self.l.block;
        let paren = std::mem::replace(&mut self.l.paren, 0);
        let depth = std::mem::replace(&mut self.l.depth, -1);

        while self.consume(T_LBLOCK)? {}

        loop {
            // a kept value from an earlier statement dies when another
            // statement follows
            if root && self.fun.sp > 0 && self.check(T_STMT) {
                while self.fun.sp > 0 {
                    self.encode(Op::Drop, self.fun.sp, 0, 0, -1)?;
                }
            }

            if root {
                self.p_keep_stmt()?;
            } else {
                self.p_stmt()?;
            }
            if !((root || self.l.block > block)
                && self.consume(T_TERM | T_LBLOCK | T_RBLOCK)?)
            {
                break;
            }
        }

        if self.l.block > block {
            self.expect(T_RBLOCK)?;
        }

        self.l.paren = paren;
        self.l.depth = depth;
        Ok(())
    }
}
