//! The bytecode format.
//!
//! Sixteen opcodes, each instruction one or two 16-bit words, endian
//! native, in-memory only. Word layout: 4-bit opcode, 4-bit destination
//! register, 8-bit payload. When a constant index would overflow its
//! 8-bit field, a payload of 0xff selects a two-word form whose second
//! word carries the full 16-bit value. Jumps always use the two-word
//! form so patching never changes instruction size; the stored
//! displacement is in words, biased by the instruction's own length.

use tarn_core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Imm = 0x0,
    Fn = 0x1,
    Tbl = 0x2,
    Move = 0x3,
    Dup = 0x4,
    Drop = 0x5,
    Lookup = 0x6,
    Lookdn = 0x7,
    Insert = 0x8,
    Assign = 0x9,
    Jump = 0xa,
    Jtrue = 0xb,
    Jfalse = 0xc,
    Call = 0xd,
    Tcall = 0xe,
    Ret = 0xf,
}

impl Op {
    pub fn from_u16(v: u16) -> Op {
        match v & 0xf {
            0x0 => Op::Imm,
            0x1 => Op::Fn,
            0x2 => Op::Tbl,
            0x3 => Op::Move,
            0x4 => Op::Dup,
            0x5 => Op::Drop,
            0x6 => Op::Lookup,
            0x7 => Op::Lookdn,
            0x8 => Op::Insert,
            0x9 => Op::Assign,
            0xa => Op::Jump,
            0xb => Op::Jtrue,
            0xc => Op::Jfalse,
            0xd => Op::Call,
            0xe => Op::Tcall,
            _ => Op::Ret,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Imm => "imm",
            Op::Fn => "fn",
            Op::Tbl => "tbl",
            Op::Move => "move",
            Op::Dup => "dup",
            Op::Drop => "drop",
            Op::Lookup => "lookup",
            Op::Lookdn => "lookdn",
            Op::Insert => "insert",
            Op::Assign => "assign",
            Op::Jump => "jump",
            Op::Jtrue => "jtrue",
            Op::Jfalse => "jfalse",
            Op::Call => "call",
            Op::Tcall => "tcall",
            Op::Ret => "ret",
        }
    }
}

/// Encode one instruction, appending one or two words.
///
/// Field meanings follow the opcode family: `a` is the 8-bit payload for
/// register/count forms, the constant index for `imm`/`fn`/`tbl`, and
/// the word displacement (relative to the instruction start) for jumps;
/// `b` joins `a` as packed nibbles for the lookup/insert family. Any
/// field that would overflow is a bytecode-limit error.
pub fn encode(bcode: &mut Vec<u16>, op: Op, d: u32, a: i32, b: u32) -> Result<()> {
    if d > 0xf {
        return Err(Error::BytecodeLimit);
    }
    let base = ((op as u16) << 12) | ((d as u16) << 8);

    match op {
        Op::Move | Op::Dup | Op::Drop | Op::Call | Op::Tcall | Op::Ret => {
            if !(0..=0xff).contains(&a) {
                return Err(Error::BytecodeLimit);
            }
            bcode.push(base | a as u16);
        }

        Op::Lookup | Op::Lookdn | Op::Insert | Op::Assign => {
            if !(0..=0xf).contains(&a) || b > 0xf {
                return Err(Error::BytecodeLimit);
            }
            bcode.push(base | ((a as u16) << 4) | b as u16);
        }

        Op::Imm | Op::Fn | Op::Tbl => {
            if !(0..0xffff).contains(&a) {
                return Err(Error::BytecodeLimit);
            }
            if a > 0xfe {
                bcode.push(base | 0xff);
                bcode.push(a as u16);
            } else {
                bcode.push(base | a as u16);
            }
        }

        Op::Jump | Op::Jtrue | Op::Jfalse => {
            let j = a - 2;
            if !(-0x8000..=0x7fff).contains(&j) {
                return Err(Error::BytecodeLimit);
            }
            bcode.push(base | 0xff);
            bcode.push(j as i16 as u16);
        }
    }
    Ok(())
}

/// Rewrite the displacement of the jump at word offset `site` to land on
/// word offset `target`, returning the previously stored (raw, unbiased)
/// field. Unresolved break/continue chains live in this field as raw
/// links until the target is known.
pub fn patch(bcode: &mut [u16], site: usize, target: i32) -> Result<i32> {
    debug_assert!(matches!(
        Op::from_u16(bcode[site] >> 12),
        Op::Jump | Op::Jtrue | Op::Jfalse
    ));

    let old = bcode[site + 1] as i16 as i32;
    let j = target - site as i32 - 2;
    if !(-0x8000..=0x7fff).contains(&j) {
        return Err(Error::BytecodeLimit);
    }
    bcode[site + 1] = j as i16 as u16;
    Ok(old)
}

/// Store a raw chain link in a jump's displacement word.
pub fn link(bcode: &mut [u16], site: usize, raw: i32) {
    bcode[site + 1] = raw as i16 as u16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_forms() {
        let mut b = Vec::new();
        encode(&mut b, Op::Move, 2, 5, 0).unwrap();
        encode(&mut b, Op::Lookup, 1, 0, 3).unwrap();
        encode(&mut b, Op::Ret, 0, 2, 0).unwrap();
        assert_eq!(b, vec![0x3205, 0x6103, 0xf002]);
    }

    #[test]
    fn constant_index_escapes_at_255() {
        let mut b = Vec::new();
        encode(&mut b, Op::Imm, 1, 0xfe, 0).unwrap();
        assert_eq!(b, vec![0x01fe]);

        let mut b = Vec::new();
        encode(&mut b, Op::Imm, 1, 0xff, 0).unwrap();
        assert_eq!(b, vec![0x01ff, 0x00ff]);

        let mut b = Vec::new();
        encode(&mut b, Op::Imm, 1, 300, 0).unwrap();
        assert_eq!(b, vec![0x01ff, 300]);
    }

    #[test]
    fn limits_are_rejected() {
        let mut b = Vec::new();
        assert_eq!(
            encode(&mut b, Op::Imm, 16, 0, 0),
            Err(Error::BytecodeLimit)
        );
        assert_eq!(
            encode(&mut b, Op::Imm, 0, 0xffff, 0),
            Err(Error::BytecodeLimit)
        );
        assert_eq!(
            encode(&mut b, Op::Lookup, 0, 16, 0),
            Err(Error::BytecodeLimit)
        );
        assert_eq!(
            encode(&mut b, Op::Jump, 0, 2 + 0x8000, 0),
            Err(Error::BytecodeLimit)
        );
        assert!(encode(&mut b, Op::Jump, 0, 2 + 0x7fff, 0).is_ok());
    }

    #[test]
    fn jumps_are_biased_and_patchable() {
        let mut b = Vec::new();
        encode(&mut b, Op::Jfalse, 3, 0, 0).unwrap();
        // zero placeholder displacement stores as the raw bias
        assert_eq!(b[1] as i16, -2);

        let old = patch(&mut b, 0, 8).unwrap();
        assert_eq!(old, -2);
        assert_eq!(b[1] as i16, 6);
    }
}
