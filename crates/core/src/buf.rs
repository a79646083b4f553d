//! Mutable byte buffers.
//!
//! A buffer is raw bytes plus two optional attachments: a destructor run
//! once when the buffer is deallocated (for resources the bytes point
//! at), and a tail table consulted for read-only attribute lookup (cdata
//! objects with methods). Growth is amortised doubling via `Vec`.

use crate::tbl::Tbl;
use crate::value::Value;
use std::rc::Rc;

/// Destructor invoked on deallocation. Responsible only for resources
/// the buffer owns; the runtime still frees the storage.
pub type Dtor = fn(&mut Buf);

pub struct Buf {
    data: Vec<u8>,
    dtor: Option<Dtor>,
    tail: Option<Rc<Tbl>>,
}

impl Buf {
    pub fn new() -> Buf {
        Buf {
            data: Vec::new(),
            dtor: None,
            tail: None,
        }
    }

    pub fn with_capacity(n: usize) -> Buf {
        Buf {
            data: Vec::with_capacity(n),
            dtor: None,
            tail: None,
        }
    }

    pub fn from_bytes(s: &[u8]) -> Buf {
        Buf {
            data: s.to_vec(),
            dtor: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Take the raw storage, leaving the buffer empty. Drops any
    /// attached destructor and tail (interning path).
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.dtor = None;
        self.tail = None;
        std::mem::take(&mut self.data)
    }

    /// Resize, zero-filling new space.
    pub fn resize(&mut self, n: usize) {
        self.data.resize(n, 0);
    }

    pub fn push_byte(&mut self, c: u8) {
        self.data.push(c);
    }

    pub fn push_bytes(&mut self, s: &[u8]) {
        self.data.extend_from_slice(s);
    }

    /// Attach or replace the destructor.
    pub fn set_dtor(&mut self, dtor: Option<Dtor>) {
        self.dtor = dtor;
    }

    /// Attach or replace the tail.
    pub fn set_tail(&mut self, tail: Option<Rc<Tbl>>) {
        self.tail = tail;
    }

    pub fn tail(&self) -> Option<Rc<Tbl>> {
        self.tail.clone()
    }

    /// Attribute access: consult only the tail's table chain.
    pub fn lookup(&self, key: &Value) -> Value {
        match &self.tail {
            Some(t) => t.lookup(key),
            None => Value::Nil,
        }
    }
}

impl Default for Buf {
    fn default() -> Buf {
        Buf::new()
    }
}

impl Drop for Buf {
    fn drop(&mut self) {
        if let Some(dtor) = self.dtor.take() {
            dtor(self);
        }
    }
}

impl std::fmt::Debug for Buf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buf({} bytes)", self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn push_and_resize() {
        let mut b = Buf::new();
        b.push_bytes(b"abc");
        b.push_byte(b'd');
        assert_eq!(b.as_bytes(), b"abcd");
        b.resize(6);
        assert_eq!(b.as_bytes(), b"abcd\0\0");
        b.resize(2);
        assert_eq!(b.as_bytes(), b"ab");
    }

    thread_local! {
        static DTOR_RAN: Cell<usize> = const { Cell::new(0) };
    }

    fn counting_dtor(_: &mut Buf) {
        DTOR_RAN.with(|c| c.set(c.get() + 1));
    }

    #[test]
    fn dtor_runs_once_on_drop() {
        DTOR_RAN.with(|c| c.set(0));
        {
            let mut b = Buf::from_bytes(b"payload");
            b.set_dtor(Some(counting_dtor));
        }
        assert_eq!(DTOR_RAN.with(|c| c.get()), 1);
    }

    #[test]
    fn into_bytes_skips_dtor() {
        DTOR_RAN.with(|c| c.set(0));
        let mut b = Buf::from_bytes(b"payload");
        b.set_dtor(Some(counting_dtor));
        let v = b.into_bytes();
        assert_eq!(v, b"payload");
        assert_eq!(DTOR_RAN.with(|c| c.get()), 0);
    }

    #[test]
    fn tail_supplies_attributes() {
        let t = Tbl::new(0);
        t.insert(
            Value::Str(crate::str::Str::from_str("kind")),
            Value::Str(crate::str::Str::from_str("cdata")),
        )
        .unwrap();

        let mut b = Buf::new();
        b.set_tail(Some(t));
        let got = b.lookup(&Value::Str(crate::str::Str::from_str("kind")));
        assert_eq!(got, Value::Str(crate::str::Str::from_str("cdata")));
        assert_eq!(b.lookup(&Value::Num(crate::num::Num::from_uint(0))), Value::Nil);
    }
}
