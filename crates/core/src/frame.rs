//! The calling convention.
//!
//! Arguments and return values travel in a fixed 4-slot scratch frame.
//! Callers describe a call with a single arity byte: high nibble is the
//! argument count, low nibble the expected return count. A nibble of 0xf
//! means the slot holds one table aggregating the true contents (the
//! variadic convention).

use crate::error::Result;
use crate::num::Num;
use crate::tbl::Tbl;
use crate::value::Value;

/// Fixed frame capacity; larger transfers use the variadic convention.
pub const FRAME: usize = 4;

/// Slots a frame count occupies: a variadic count passes one table.
pub fn count(fc: u8) -> usize {
    if fc as usize > FRAME {
        1
    } else {
        fc as usize
    }
}

#[derive(Debug, Default)]
pub struct Frame {
    slots: [Value; FRAME],
}

impl Frame {
    pub fn new() -> Frame {
        Frame::default()
    }

    pub fn get(&self, i: usize) -> &Value {
        &self.slots[i]
    }

    pub fn set(&mut self, i: usize, v: Value) {
        self.slots[i] = v;
    }

    /// Move a slot out, leaving nil.
    pub fn take(&mut self, i: usize) -> Value {
        std::mem::take(&mut self.slots[i])
    }

    /// Convert the frame in place from a source count to a destination
    /// count: pad missing slots with nil, drop excess values, and box or
    /// unbox a table when either side is variadic.
    pub fn convert(&mut self, sc: u8, dc: u8) -> Result<()> {
        let variadic_s = sc as usize > FRAME;
        let variadic_d = dc as usize > FRAME;

        if variadic_s && variadic_d {
            return Ok(());
        }

        if variadic_d {
            let t = Tbl::new(sc as usize);
            for i in 0..sc as usize {
                t.insert(Value::Num(Num::from_uint(i as u64)), self.take(i))?;
            }
            self.set(0, Value::Tbl(t));
            return Ok(());
        }

        if variadic_s {
            let t = match self.take(0) {
                Value::Tbl(t) => t,
                // a variadic frame always carries a table by
                // construction; anything else converts as empty
                _ => Tbl::new(0),
            };
            for i in 0..dc as usize {
                let v = t.lookup(&Value::Num(Num::from_uint(i as u64)));
                self.set(i, v);
            }
            return Ok(());
        }

        // drop excess, pad missing
        for i in dc..sc {
            self.take(i as usize);
        }
        for i in sc..dc {
            self.set(i as usize, Value::Nil);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(v: u64) -> Value {
        Value::Num(Num::from_uint(v))
    }

    #[test]
    fn count_saturates_at_one_table() {
        assert_eq!(count(0), 0);
        assert_eq!(count(3), 3);
        assert_eq!(count(4), 4);
        assert_eq!(count(0xf), 1);
    }

    #[test]
    fn pads_and_drops() {
        let mut f = Frame::new();
        f.set(0, num(1));
        f.set(1, num(2));
        f.convert(2, 3).unwrap();
        assert_eq!(*f.get(0), num(1));
        assert_eq!(*f.get(1), num(2));
        assert_eq!(*f.get(2), Value::Nil);

        f.convert(3, 1).unwrap();
        assert_eq!(*f.get(0), num(1));
        assert_eq!(*f.get(1), Value::Nil);
    }

    #[test]
    fn boxes_into_a_table() {
        let mut f = Frame::new();
        f.set(0, num(10));
        f.set(1, num(20));
        f.convert(2, 0xf).unwrap();

        let Value::Tbl(t) = f.get(0) else {
            panic!("expected boxed table")
        };
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup(&num(1)), num(20));
    }

    #[test]
    fn unboxes_from_a_table() {
        let mut f = Frame::new();
        let t = Tbl::from_list(vec![num(10), num(20), num(30)]);
        f.set(0, Value::Tbl(t));
        f.convert(0xf, 2).unwrap();
        assert_eq!(*f.get(0), num(10));
        assert_eq!(*f.get(1), num(20));
    }

    #[test]
    fn round_trips_through_the_variadic_form() {
        let mut f = Frame::new();
        f.set(0, num(1));
        f.convert(1, 0xf).unwrap();
        f.convert(0xf, 1).unwrap();
        assert_eq!(*f.get(0), num(1));
    }
}
