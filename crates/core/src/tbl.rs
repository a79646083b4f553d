//! The ordered table.
//!
//! One keyed container with three internal stores, promoted on demand:
//!
//! - *Range*: `len` consecutive integers starting at `offset`, no storage
//!   beyond the header. `[1, 2, 3]` never allocates an element array.
//! - *List*: dense array indexed by `[0, len)`, keys implicit.
//! - *Hash*: open addressing with the `i <- 5*i + 1` probe recurrence
//!   over a power-of-two index, plus a dense entry vector so iteration
//!   stays in insertion order. A deleted pair leaves a tombstone (nil
//!   value, key kept for probe continuity) that is only reclaimed on
//!   rehash. `len` never counts tombstones and
//!   `len + tombstones <= capacity * 2/3`.
//!
//! Every table may carry a tail used for prototype-style lookup chains.
//! A table is either mutable or read-only; mutating a read-only table is
//! an error.

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::func::Func;
use crate::num::Num;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

const EMPTY: u32 = u32::MAX;

pub struct Tbl {
    ro: bool,
    data: RefCell<TblData>,
}

#[derive(Clone)]
struct TblData {
    tail: Option<Rc<Tbl>>,
    len: usize,
    nils: usize,
    store: Store,
}

#[derive(Clone)]
enum Store {
    Range { offset: i64 },
    List(Vec<Value>),
    Hash(HashStore),
}

#[derive(Clone)]
struct HashStore {
    index: Box<[u32]>,
    entries: Vec<(Value, Value)>,
}

/// Capacity needed for `s` occupants at a 2/3 load factor.
fn ncap(s: usize) -> usize {
    s + (s >> 1)
}

fn key_hash(k: &Value) -> u64 {
    match k {
        Value::Nil => 0,
        Value::Num(n) => n.hash(),
        Value::Str(s) => {
            // FNV-1a over the bytes; interned strings make this stable
            // for the life of the handle.
            let mut h: u64 = 0xcbf29ce484222325;
            for &b in s.as_bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            h
        }
        Value::Buf(b) => Rc::as_ptr(b) as u64,
        Value::Tbl(t) => Rc::as_ptr(t) as u64,
        Value::Fn(f) => Rc::as_ptr(f) as u64,
    }
}

/// Key usable as an implicit list index.
fn as_index(k: &Value) -> Option<usize> {
    match k {
        Value::Num(n) => n.as_index(),
        _ => None,
    }
}

enum Probe {
    Found(usize),
    Vacant(usize),
}

impl HashStore {
    fn with_capacity(cap: usize) -> HashStore {
        let cap = cap.next_power_of_two().max(4);
        HashStore {
            index: vec![EMPTY; cap].into_boxed_slice(),
            entries: Vec::new(),
        }
    }

    fn probe(&self, key: &Value, hash: u64) -> Probe {
        let mask = self.index.len() as u64 - 1;
        let mut i = hash;
        loop {
            let mi = (i & mask) as usize;
            match self.index[mi] {
                EMPTY => return Probe::Vacant(mi),
                e => {
                    if self.entries[e as usize].0 == *key {
                        return Probe::Found(e as usize);
                    }
                }
            }
            i = i.wrapping_mul(5).wrapping_add(1);
        }
    }
}

impl Tbl {
    pub fn new(size: usize) -> Rc<Tbl> {
        Tbl::with_tail(size, None)
    }

    pub fn with_tail(_size: usize, tail: Option<Rc<Tbl>>) -> Rc<Tbl> {
        Rc::new(Tbl {
            ro: false,
            data: RefCell::new(TblData {
                tail,
                len: 0,
                nils: 0,
                store: Store::Range { offset: 0 },
            }),
        })
    }

    pub fn from_list(vals: Vec<Value>) -> Rc<Tbl> {
        let len = vals.len();
        Rc::new(Tbl {
            ro: false,
            data: RefCell::new(TblData {
                tail: None,
                len,
                nils: 0,
                store: Store::List(vals),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ro(&self) -> bool {
        self.ro
    }

    pub fn tail(&self) -> Option<Rc<Tbl>> {
        self.data.borrow().tail.clone()
    }

    pub fn set_tail(&self, tail: Option<Rc<Tbl>>) -> Result<()> {
        if self.ro {
            return Err(Error::ReadOnly(
                "attempted to modify read-only table".to_string(),
            ));
        }
        self.data.borrow_mut().tail = tail;
        Ok(())
    }

    /// Freeze: a read-only copy sharing no mutable state. Freezing a
    /// frozen table returns the same handle.
    pub fn to_const(self: &Rc<Tbl>) -> Rc<Tbl> {
        if self.ro {
            return Rc::clone(self);
        }
        Rc::new(Tbl {
            ro: true,
            data: RefCell::new(self.data.borrow().clone()),
        })
    }

    /// Look up a key, recursing into the tail chain when absent.
    pub fn lookup(&self, key: &Value) -> Value {
        if key.is_nil() {
            return Value::Nil;
        }

        if let Some(v) = self.get_local(key) {
            return v;
        }

        let mut t = self.tail();
        while let Some(tbl) = t {
            if let Some(v) = tbl.get_local(key) {
                return v;
            }
            t = tbl.tail();
        }

        Value::Nil
    }

    fn get_local(&self, key: &Value) -> Option<Value> {
        let d = self.data.borrow();
        match &d.store {
            Store::Range { offset } => {
                let i = as_index(key)?;
                if i < d.len {
                    Some(Value::Num(Num::from_int(offset + i as i64)))
                } else {
                    None
                }
            }
            Store::List(vals) => {
                let i = as_index(key)?;
                vals.get(i).cloned()
            }
            Store::Hash(h) => match h.probe(key, key_hash(key)) {
                Probe::Found(e) if !h.entries[e].1.is_nil() => Some(h.entries[e].1.clone()),
                _ => None,
            },
        }
    }

    /// Insert into this table only (no tail recursion). A nil key is
    /// ignored; a nil value removes the binding.
    pub fn insert(&self, key: Value, val: Value) -> Result<()> {
        if self.ro {
            return Err(Error::ReadOnly(
                "attempted to modify read-only table".to_string(),
            ));
        }
        if key.is_nil() {
            return Ok(());
        }

        let mut d = self.data.borrow_mut();
        if val.is_nil() {
            d.remove(&key);
        } else {
            d.set(key, val);
        }
        Ok(())
    }

    /// Assign: reassign in the first chain ancestor that holds the key,
    /// insert into this table otherwise. Read-only ancestors end the
    /// search.
    pub fn assign(&self, key: Value, val: Value) -> Result<()> {
        if key.is_nil() {
            return Ok(());
        }

        if val.is_nil() {
            if self.ro {
                return Ok(());
            }
            if self.data.borrow_mut().remove(&key) {
                return Ok(());
            }
            let mut t = self.tail();
            while let Some(tbl) = t {
                if tbl.ro {
                    break;
                }
                if tbl.data.borrow_mut().remove(&key) {
                    return Ok(());
                }
                t = tbl.tail();
            }
            return Ok(());
        }

        // a read-only receiver ends the search immediately; the insert
        // below reports the error
        if !self.ro {
            if let Some(v) = self.try_update(&key, &val) {
                return v;
            }
            let mut t = self.tail();
            while let Some(tbl) = t {
                if tbl.ro {
                    break;
                }
                if let Some(v) = tbl.try_update(&key, &val) {
                    return v;
                }
                t = tbl.tail();
            }
        }

        self.insert(key, val)
    }

    /// Update an existing live binding in this table alone. `None` when
    /// the key is absent.
    fn try_update(&self, key: &Value, val: &Value) -> Option<Result<()>> {
        let mut d = self.data.borrow_mut();
        if d.contains_live(key) {
            d.set(key.clone(), val.clone());
            Some(Ok(()))
        } else {
            None
        }
    }

    /// Insert `val` before index `i`, shifting later entries up.
    pub fn push(&self, val: Value, i: i64) -> Result<()> {
        if self.ro {
            return Err(Error::ReadOnly(
                "attempted to modify read-only table".to_string(),
            ));
        }

        let mut d = self.data.borrow_mut();
        let len = d.len as i64;
        let i = (if i < 0 { i + len } else { i }).clamp(0, len) as usize;

        if let Store::Range { .. } = d.store {
            d.realize_vars();
        }

        if matches!(d.store, Store::List(_)) {
            let Store::List(vals) = &mut d.store else {
                unreachable!()
            };
            vals.insert(i, val);
            d.len += 1;
            return Ok(());
        }

        // hash store: shift the integer-keyed run up through ordinary ops
        let top = d.max_index_key();
        let mut j = top;
        while j + 1 > i {
            if let Some(v) = d.take_index(j) {
                d.set(Value::Num(Num::from_uint((j + 1) as u64)), v);
            }
            if j == 0 {
                break;
            }
            j -= 1;
        }
        d.set(Value::Num(Num::from_uint(i as u64)), val);
        Ok(())
    }

    /// Remove and return the value at index `i`, shifting later entries
    /// down.
    pub fn pop(&self, i: i64) -> Result<Value> {
        if self.ro {
            return Err(Error::ReadOnly(
                "attempted to modify read-only table".to_string(),
            ));
        }

        let mut d = self.data.borrow_mut();
        let len = d.len as i64;
        let i = if i < 0 { i + len } else { i };
        if i < 0 {
            return Ok(Value::Nil);
        }
        let i = i as usize;

        if let Store::Range { offset } = &d.store {
            let offset = *offset;
            if i >= d.len {
                return Ok(Value::Nil);
            }
            let v = Value::Num(Num::from_int(offset + i as i64));
            if i == d.len - 1 {
                d.len -= 1;
            } else {
                d.realize_vars();
                if let Store::List(vals) = &mut d.store {
                    vals.remove(i);
                }
                d.len -= 1;
            }
            return Ok(v);
        }

        if matches!(d.store, Store::List(_)) {
            let Store::List(vals) = &mut d.store else {
                unreachable!()
            };
            if i >= vals.len() {
                return Ok(Value::Nil);
            }
            let v = vals.remove(i);
            d.len -= 1;
            return Ok(v);
        }

        // hash store: shift the integer-keyed run back down
        let v = d.take_index(i).unwrap_or(Value::Nil);
        let top = d.max_index_key();
        let mut j = i + 1;
        while j <= top {
            if let Some(moved) = d.take_index(j) {
                d.set(Value::Num(Num::from_uint((j - 1) as u64)), moved);
            }
            j += 1;
        }
        Ok(v)
    }

    /// Concatenate: a fresh table holding this table's entries followed
    /// by `other`'s, with `other`'s integer keys rebased to `offset`
    /// (this table's length by default).
    pub fn concat(&self, other: &Tbl, offset: Option<usize>) -> Result<Rc<Tbl>> {
        let out = Tbl::new(self.len() + other.len());
        let mut cursor = 0;
        while let Some((k, v)) = self.next(&mut cursor) {
            out.insert(k, v)?;
        }

        let off = offset.unwrap_or_else(|| self.len());
        let mut cursor = 0;
        while let Some((k, v)) = other.next(&mut cursor) {
            match as_index(&k) {
                Some(i) => out.insert(Value::Num(Num::from_uint((off + i) as u64)), v)?,
                None => out.insert(k, v)?,
            }
        }
        Ok(out)
    }

    /// Integer-keyed subrange `[lower, upper)` rebased to zero, with
    /// negative indices wrapping.
    pub fn subset(&self, lower: i64, upper: i64) -> Rc<Tbl> {
        let len = self.len() as i64;
        let lower = if lower < 0 { lower + len } else { lower }.max(0);
        let upper = if upper < 0 { upper + len } else { upper }.min(len);

        let mut vals = Vec::new();
        let mut i = lower;
        while i < upper {
            vals.push(self.lookup(&Value::Num(Num::from_int(i))));
            i += 1;
        }
        Tbl::from_list(vals)
    }

    /// Step the iteration cursor, yielding pairs in insertion order.
    ///
    /// Iteration over a mutating table is not required to be consistent,
    /// but it never panics and never exposes uninitialised slots: the
    /// cursor is bounds-checked on every step.
    pub fn next(&self, cursor: &mut usize) -> Option<(Value, Value)> {
        let d = self.data.borrow();
        match &d.store {
            Store::Range { offset } => {
                if *cursor >= d.len {
                    return None;
                }
                let i = *cursor;
                *cursor += 1;
                Some((
                    Value::Num(Num::from_uint(i as u64)),
                    Value::Num(Num::from_int(offset + i as i64)),
                ))
            }
            Store::List(vals) => {
                let i = *cursor;
                let v = vals.get(i)?.clone();
                *cursor += 1;
                Some((Value::Num(Num::from_uint(i as u64)), v))
            }
            Store::Hash(h) => {
                while let Some((k, v)) = h.entries.get(*cursor) {
                    *cursor += 1;
                    if !v.is_nil() {
                        return Some((k.clone(), v.clone()));
                    }
                }
                None
            }
        }
    }

    /// First-class iterator over the values.
    pub fn iter_fn(self: &Rc<Tbl>) -> Rc<Func> {
        let scope = Tbl::from_list(vec![
            Value::Tbl(Rc::clone(self)),
            Value::Num(Num::from_uint(0)),
        ]);
        Func::from_scoped(0, tbl_values_step, Value::Tbl(scope))
    }

    /// First-class iterator over (key, value) pairs.
    pub fn pairs_fn(self: &Rc<Tbl>) -> Rc<Func> {
        let scope = Tbl::from_list(vec![
            Value::Tbl(Rc::clone(self)),
            Value::Num(Num::from_uint(0)),
        ]);
        Func::from_scoped(0, tbl_pairs_step, Value::Tbl(scope))
    }

    #[cfg(test)]
    fn store_kind(&self) -> &'static str {
        match self.data.borrow().store {
            Store::Range { .. } => "range",
            Store::List(_) => "list",
            Store::Hash(_) => "hash",
        }
    }

    #[cfg(test)]
    fn tombstones(&self) -> usize {
        self.data.borrow().nils
    }
}

fn iter_scope(scope: &Value) -> Option<(Rc<Tbl>, usize)> {
    let Value::Tbl(s) = scope else { return None };
    let t = match s.lookup(&Value::Num(Num::from_uint(0))) {
        Value::Tbl(t) => t,
        _ => return None,
    };
    let i = match s.lookup(&Value::Num(Num::from_uint(1))) {
        Value::Num(n) => n.as_index()?,
        _ => return None,
    };
    Some((t, i))
}

fn tbl_values_step(scope: &Value, frame: &mut Frame) -> Result<u8> {
    let Some((t, mut i)) = iter_scope(scope) else {
        return Ok(0);
    };
    match t.next(&mut i) {
        Some((_, v)) => {
            if let Value::Tbl(s) = scope {
                s.insert(
                    Value::Num(Num::from_uint(1)),
                    Value::Num(Num::from_uint(i as u64)),
                )?;
            }
            frame.set(0, v);
            Ok(1)
        }
        None => Ok(0),
    }
}

fn tbl_pairs_step(scope: &Value, frame: &mut Frame) -> Result<u8> {
    let Some((t, mut i)) = iter_scope(scope) else {
        return Ok(0);
    };
    match t.next(&mut i) {
        Some((k, v)) => {
            if let Value::Tbl(s) = scope {
                s.insert(
                    Value::Num(Num::from_uint(1)),
                    Value::Num(Num::from_uint(i as u64)),
                )?;
            }
            frame.set(0, k);
            frame.set(1, v);
            Ok(2)
        }
        None => Ok(0),
    }
}

impl TblData {
    fn contains_live(&self, key: &Value) -> bool {
        match &self.store {
            Store::Range { .. } | Store::List(_) => {
                as_index(key).is_some_and(|i| i < self.len)
            }
            Store::Hash(h) => match h.probe(key, key_hash(key)) {
                Probe::Found(e) => !h.entries[e].1.is_nil(),
                Probe::Vacant(_) => false,
            },
        }
    }

    /// Remove a live binding; true when something was removed.
    fn remove(&mut self, key: &Value) -> bool {
        if !matches!(self.store, Store::Hash(_)) {
            let Some(i) = as_index(key) else { return false };
            if i >= self.len {
                return false;
            }
            if i == self.len - 1 {
                if let Store::List(vals) = &mut self.store {
                    vals.pop();
                }
                self.len -= 1;
                return true;
            }
            // removal from the middle needs explicit keys
            self.realize_keys();
            return self.remove(key);
        }

        let Store::Hash(h) = &mut self.store else {
            unreachable!()
        };
        match h.probe(key, key_hash(key)) {
            Probe::Found(e) if !h.entries[e].1.is_nil() => {
                h.entries[e].1 = Value::Nil;
                self.nils += 1;
                self.len -= 1;
                true
            }
            _ => false,
        }
    }

    /// Set a (non-nil) binding, promoting the store as needed.
    fn set(&mut self, key: Value, val: Value) {
        match &mut self.store {
            Store::Range { offset } => {
                if let Some(i) = as_index(&key) {
                    if i == self.len {
                        if let Value::Num(n) = &val {
                            if self.len == 0 {
                                if let Some(o) = n.as_index() {
                                    *offset = o as i64;
                                    self.len = 1;
                                    return;
                                }
                            } else if n.get() == (*offset + i as i64) as f64 {
                                self.len += 1;
                                return;
                            }
                        }
                        self.realize_vars();
                        self.set(key, val);
                        return;
                    } else if i < self.len {
                        if let Value::Num(n) = &val {
                            if n.get() == (*offset + i as i64) as f64 {
                                return;
                            }
                        }
                        self.realize_vars();
                        self.set(key, val);
                        return;
                    }
                }
                self.realize_keys();
                self.set(key, val);
            }
            Store::List(vals) => {
                if let Some(i) = as_index(&key) {
                    if i == self.len {
                        vals.push(val);
                        self.len += 1;
                        return;
                    } else if i < self.len {
                        vals[i] = val;
                        return;
                    }
                }
                self.realize_keys();
                self.set(key, val);
            }
            Store::Hash(_) => self.hash_set(key, val),
        }
    }

    fn hash_set(&mut self, key: Value, val: Value) {
        let hash = key_hash(&key);
        let Store::Hash(h) = &mut self.store else {
            unreachable!()
        };

        if let Probe::Found(e) = h.probe(&key, hash) {
            if h.entries[e].1.is_nil() {
                self.nils -= 1;
                self.len += 1;
            }
            h.entries[e].1 = val;
            return;
        }

        if ncap(self.len + self.nils + 1) > h.index.len() {
            self.rehash(ncap(self.len + 1));
            return self.hash_set(key, val);
        }

        let Store::Hash(h) = &mut self.store else {
            unreachable!()
        };
        if let Probe::Vacant(mi) = h.probe(&key, hash) {
            h.entries.push((key, val));
            h.index[mi] = (h.entries.len() - 1) as u32;
            self.len += 1;
        }
    }

    /// Range -> List: materialise the implicit values.
    fn realize_vars(&mut self) {
        if let Store::Range { offset } = self.store {
            let vals = (0..self.len)
                .map(|i| Value::Num(Num::from_int(offset + i as i64)))
                .collect();
            self.store = Store::List(vals);
        }
    }

    /// Range/List -> Hash: materialise the implicit integer keys.
    fn realize_keys(&mut self) {
        self.realize_vars();
        if let Store::List(vals) = &mut self.store {
            let vals = std::mem::take(vals);
            let mut h = HashStore::with_capacity(ncap(vals.len() + 1));
            for (i, v) in vals.into_iter().enumerate() {
                let k = Value::Num(Num::from_uint(i as u64));
                if let Probe::Vacant(mi) = h.probe(&k, key_hash(&k)) {
                    h.entries.push((k, v));
                    h.index[mi] = (h.entries.len() - 1) as u32;
                }
            }
            self.nils = 0;
            self.store = Store::Hash(h);
        }
    }

    /// Rebuild the hash store with at least `min_cap` slots, dropping
    /// tombstones.
    fn rehash(&mut self, min_cap: usize) {
        let Store::Hash(old) = &mut self.store else {
            return;
        };
        let entries = std::mem::take(&mut old.entries);
        let mut h = HashStore::with_capacity(min_cap);
        for (k, v) in entries {
            if v.is_nil() {
                continue;
            }
            if let Probe::Vacant(mi) = h.probe(&k, key_hash(&k)) {
                h.entries.push((k, v));
                h.index[mi] = (h.entries.len() - 1) as u32;
            }
        }
        self.nils = 0;
        self.store = Store::Hash(h);
    }

    /// Largest live integer key in a hash store (0 when none).
    fn max_index_key(&self) -> usize {
        let Store::Hash(h) = &self.store else {
            return 0;
        };
        let mut top = 0;
        for (k, v) in &h.entries {
            if v.is_nil() {
                continue;
            }
            if let Some(i) = as_index(k) {
                top = top.max(i);
            }
        }
        top
    }

    /// Take the value at integer key `i` out of a hash store.
    fn take_index(&mut self, i: usize) -> Option<Value> {
        let key = Value::Num(Num::from_uint(i as u64));
        let Store::Hash(h) = &mut self.store else {
            return None;
        };
        match h.probe(&key, key_hash(&key)) {
            Probe::Found(e) if !h.entries[e].1.is_nil() => {
                let v = std::mem::replace(&mut h.entries[e].1, Value::Nil);
                self.nils += 1;
                self.len -= 1;
                Some(v)
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Tbl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tbl(len {})", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::str::Str;

    fn num(v: i64) -> Value {
        Value::Num(Num::from_int(v))
    }

    fn s(v: &str) -> Value {
        Value::Str(Str::from_str(v))
    }

    #[test]
    fn consecutive_integers_stay_a_range() {
        let t = Tbl::new(0);
        for i in 0..3 {
            t.insert(num(i), num(i)).unwrap();
        }
        assert_eq!(t.store_kind(), "range");
        assert_eq!(t.len(), 3);

        // extending the run keeps the range representation
        t.insert(num(3), num(3)).unwrap();
        assert_eq!(t.store_kind(), "range");
        assert_eq!(t.len(), 4);
        assert_eq!(t.lookup(&num(2)), num(2));

        // a sparse write promotes to hash and inserts
        t.insert(num(6), num(6)).unwrap();
        assert_eq!(t.store_kind(), "hash");
        assert_eq!(t.len(), 5);
        assert_eq!(t.lookup(&num(6)), num(6));
        assert_eq!(t.lookup(&num(5)), Value::Nil);
    }

    #[test]
    fn offset_ranges() {
        let t = Tbl::new(0);
        t.insert(num(0), num(5)).unwrap();
        t.insert(num(1), num(6)).unwrap();
        assert_eq!(t.store_kind(), "range");
        assert_eq!(t.lookup(&num(1)), num(6));

        // a non-consecutive value forces a real element array
        t.insert(num(2), num(9)).unwrap();
        assert_eq!(t.store_kind(), "list");
        assert_eq!(t.lookup(&num(2)), num(9));
        assert_eq!(t.lookup(&num(0)), num(5));
    }

    #[test]
    fn non_integer_key_promotes_to_hash() {
        let t = Tbl::new(0);
        t.insert(num(0), num(1)).unwrap();
        t.insert(s("k"), num(2)).unwrap();
        assert_eq!(t.store_kind(), "hash");
        assert_eq!(t.lookup(&s("k")), num(2));
        assert_eq!(t.lookup(&num(0)), num(1));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn insert_then_lookup_and_len() {
        let t = Tbl::new(0);
        t.insert(s("a"), num(1)).unwrap();
        assert_eq!(t.lookup(&s("a")), num(1));
        assert_eq!(t.len(), 1);

        // overwrite does not change len
        t.insert(s("a"), num(2)).unwrap();
        assert_eq!(t.lookup(&s("a")), num(2));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn nil_value_removes_and_leaves_tombstone() {
        let t = Tbl::new(0);
        t.insert(s("a"), num(1)).unwrap();
        t.insert(s("b"), num(2)).unwrap();
        t.insert(s("a"), Value::Nil).unwrap();
        assert_eq!(t.lookup(&s("a")), Value::Nil);
        assert_eq!(t.len(), 1);
        assert_eq!(t.tombstones(), 1);

        // reinsertion revives the slot
        t.insert(s("a"), num(3)).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.tombstones(), 0);
    }

    #[test]
    fn load_factor_bound_holds_under_churn() {
        let t = Tbl::new(0);
        for i in 0..200 {
            t.insert(s(&format!("k{}", i)), num(i)).unwrap();
        }
        for i in 0..100 {
            t.insert(s(&format!("k{}", i)), Value::Nil).unwrap();
        }
        for i in 200..400 {
            t.insert(s(&format!("k{}", i)), num(i)).unwrap();
        }
        for i in 100..400 {
            assert_eq!(t.lookup(&s(&format!("k{}", i))), num(i));
        }
        let d = t.data.borrow();
        if let Store::Hash(h) = &d.store {
            assert!(ncap(d.len + d.nils) <= h.index.len());
        } else {
            panic!("expected hash store");
        }
    }

    #[test]
    fn iteration_is_insertion_ordered() {
        let t = Tbl::new(0);
        t.insert(s("x"), num(1)).unwrap();
        t.insert(s("y"), num(2)).unwrap();
        t.insert(num(0), num(3)).unwrap();
        t.insert(s("x"), Value::Nil).unwrap();

        let mut cursor = 0;
        let mut got = Vec::new();
        while let Some((k, v)) = t.next(&mut cursor) {
            got.push((k, v));
        }
        assert_eq!(got, vec![(s("y"), num(2)), (num(0), num(3))]);
    }

    #[test]
    fn tail_chain_lookup_and_assign() {
        let proto = Tbl::new(0);
        proto.insert(s("shared"), num(1)).unwrap();
        let t = Tbl::with_tail(0, Some(Rc::clone(&proto)));

        assert_eq!(t.lookup(&s("shared")), num(1));

        // assign updates the ancestor that holds the key
        t.assign(s("shared"), num(2)).unwrap();
        assert_eq!(proto.lookup(&s("shared")), num(2));
        assert_eq!(t.data.borrow().len, 0);

        // assign of a fresh key lands in the receiver
        t.assign(s("own"), num(3)).unwrap();
        assert_eq!(t.lookup(&s("own")), num(3));
        assert_eq!(proto.lookup(&s("own")), Value::Nil);
    }

    #[test]
    fn frozen_tables_reject_mutation() {
        let t = Tbl::new(0);
        t.insert(s("a"), num(1)).unwrap();
        let frozen = t.to_const();

        assert_eq!(frozen.lookup(&s("a")), num(1));
        assert!(matches!(
            frozen.insert(s("b"), num(2)),
            Err(Error::ReadOnly(_))
        ));
        assert!(matches!(frozen.pop(0), Err(Error::ReadOnly(_))));

        // the original stays mutable
        t.insert(s("b"), num(2)).unwrap();
        assert_eq!(frozen.lookup(&s("b")), Value::Nil);
    }

    #[test]
    fn read_only_ancestor_ends_assign_search() {
        let proto = Tbl::new(0);
        proto.insert(s("shared"), num(1)).unwrap();
        let frozen = proto.to_const();
        let t = Tbl::with_tail(0, Some(frozen));

        t.assign(s("shared"), num(2)).unwrap();
        // the frozen ancestor is untouched; the binding shadows it
        assert_eq!(proto.lookup(&s("shared")), num(1));
        assert_eq!(t.get_local(&s("shared")), Some(num(2)));
    }

    #[test]
    fn push_pop_shift() {
        let t = Tbl::new(0);
        for i in 1..=3 {
            t.insert(num(i - 1), num(i)).unwrap();
        }
        t.push(num(10), 1).unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.lookup(&num(0)), num(1));
        assert_eq!(t.lookup(&num(1)), num(10));
        assert_eq!(t.lookup(&num(2)), num(2));

        assert_eq!(t.pop(1).unwrap(), num(10));
        assert_eq!(t.pop(-1).unwrap(), num(3));
        assert_eq!(t.len(), 2);
        assert_eq!(t.pop(10).unwrap(), Value::Nil);
    }

    #[test]
    fn concat_and_subset() {
        let a = Tbl::from_list(vec![num(1), num(2)]);
        let b = Tbl::from_list(vec![num(3)]);
        let c = a.concat(&b, None).unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!(c.lookup(&num(2)), num(3));

        let sub = c.subset(1, 3);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.lookup(&num(0)), num(2));
        assert_eq!(sub.lookup(&num(1)), num(3));
    }

    #[test]
    fn masked_numbers_are_one_key() {
        let t = Tbl::new(0);
        let a = Num::from_f64(0.1);
        let b = Num::from_f64(f64::from_bits(0.1f64.to_bits() | 7));
        t.insert(Value::Num(a), num(1)).unwrap();
        assert_eq!(t.lookup(&Value::Num(b)), num(1));
        assert_eq!(t.len(), 1);
    }
}
