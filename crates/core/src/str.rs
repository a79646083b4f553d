//! Interned immutable byte strings.
//!
//! Interning is a sorted vector probed by binary search, ordered first by
//! length and then lexicographically. This was chosen over a hash or tree
//! structure because the table's own implementation relies on interned
//! strings, the memory overhead is minimal, and length-first ordering
//! means most probes never scan the bytes at all.
//!
//! The table is process-wide state; the runtime is single-threaded by
//! contract, so it lives in a thread local. Two strings compare equal iff
//! their handles are identical.

use crate::buf::Buf;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

pub struct StrData {
    bytes: Box<[u8]>,
}

/// Handle to an interned string. `Clone` bumps the count; dropping the
/// last outside handle removes the string from the intern table.
pub struct Str {
    inner: Rc<StrData>,
}

thread_local! {
    static INTERN: RefCell<Vec<Rc<StrData>>> = const { RefCell::new(Vec::new()) };
}

fn probe(table: &[Rc<StrData>], s: &[u8]) -> std::result::Result<usize, usize> {
    table.binary_search_by(|e| {
        e.bytes
            .len()
            .cmp(&s.len())
            .then_with(|| e.bytes.as_ref().cmp(s))
    })
}

impl Str {
    /// Intern raw bytes: return the existing handle or insert a new one.
    pub fn from_bytes(s: &[u8]) -> Str {
        INTERN.with(|t| {
            let mut t = t.borrow_mut();
            match probe(&t, s) {
                Ok(i) => Str {
                    inner: Rc::clone(&t[i]),
                },
                Err(i) => {
                    let data = Rc::new(StrData { bytes: s.into() });
                    t.insert(i, Rc::clone(&data));
                    Str { inner: data }
                }
            }
        })
    }

    pub fn from_str(s: &str) -> Str {
        Str::from_bytes(s.as_bytes())
    }

    pub fn from_byte(c: u8) -> Str {
        Str::from_bytes(&[c])
    }

    /// Convert an owned buffer to a string, reusing its allocation when
    /// the content is new. Any destructor or tail on the buffer is
    /// dropped. This is the fast path used by the format-string builder.
    pub fn intern(buf: Buf) -> Str {
        INTERN.with(|t| {
            let mut t = t.borrow_mut();
            match probe(&t, buf.as_bytes()) {
                Ok(i) => Str {
                    inner: Rc::clone(&t[i]),
                },
                Err(i) => {
                    let data = Rc::new(StrData {
                        bytes: buf.into_bytes().into_boxed_slice(),
                    });
                    t.insert(i, Rc::clone(&data));
                    Str { inner: data }
                }
            }
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// Identity of the underlying allocation, used for handle equality
    /// and address-based rendering.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// Lexicographic comparison by content. Identical handles are equal
    /// without scanning.
    pub fn cmp(&self, other: &Str) -> Ordering {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return Ordering::Equal;
        }
        self.as_bytes().cmp(other.as_bytes())
    }

    pub fn concat(&self, other: &Str) -> Str {
        let mut b = Buf::with_capacity(self.len() + other.len());
        b.push_bytes(self.as_bytes());
        b.push_bytes(other.as_bytes());
        Str::intern(b)
    }

    /// Byte subrange with python-style negative indices, clamped.
    pub fn subset(&self, lower: i64, upper: i64) -> Str {
        let len = self.len() as i64;
        let lower = if lower < 0 { lower + len } else { lower }.max(0);
        let upper = if upper < 0 { upper + len } else { upper }.min(len);

        if lower >= upper {
            return Str::from_bytes(b"");
        }

        Str::from_bytes(&self.as_bytes()[lower as usize..upper as usize])
    }

    /// Step a byte cursor, producing the one-byte string at `*i`.
    pub fn next(&self, i: &mut usize) -> Option<Str> {
        let c = *self.as_bytes().get(*i)?;
        *i += 1;
        Some(Str::from_byte(c))
    }

    /// Parse a quoted string literal starting at `*pos`, advancing past
    /// it. Recognises single and double quotes with the escape set
    /// `\\ \' \" \f \n \r \t \v \0 \xHH \oOOO \dDDD \bBBBBBBBB`.
    /// Returns `None` on a missing or mismatched closing quote.
    pub fn parse(bytes: &[u8], pos: &mut usize) -> Option<Str> {
        let mut p = *pos;
        let quote = *bytes.get(p)?;
        if quote != b'\'' && quote != b'"' {
            return None;
        }
        p += 1;

        let mut b = Buf::new();
        while p < bytes.len() && bytes[p] != quote {
            if bytes[p] == b'\\' {
                let rest = &bytes[p + 1..];
                match rest.first() {
                    Some(b'b') if rest.len() >= 9 && radix_run(&rest[1..9], 2).is_some() => {
                        b.push_byte(radix_run(&rest[1..9], 2).unwrap());
                        p += 10;
                    }
                    Some(b'o') if rest.len() >= 4 && radix_run(&rest[1..4], 8).is_some() => {
                        b.push_byte(radix_run(&rest[1..4], 8).unwrap());
                        p += 5;
                    }
                    Some(b'd') if rest.len() >= 4 && radix_run(&rest[1..4], 10).is_some() => {
                        b.push_byte(radix_run(&rest[1..4], 10).unwrap());
                        p += 5;
                    }
                    Some(b'x') if rest.len() >= 3 && radix_run(&rest[1..3], 16).is_some() => {
                        b.push_byte(radix_run(&rest[1..3], 16).unwrap());
                        p += 4;
                    }
                    Some(b'\\') => {
                        b.push_byte(b'\\');
                        p += 2;
                    }
                    Some(b'\'') => {
                        b.push_byte(b'\'');
                        p += 2;
                    }
                    Some(b'"') => {
                        b.push_byte(b'"');
                        p += 2;
                    }
                    Some(b'f') => {
                        b.push_byte(0x0c);
                        p += 2;
                    }
                    Some(b'n') => {
                        b.push_byte(b'\n');
                        p += 2;
                    }
                    Some(b'r') => {
                        b.push_byte(b'\r');
                        p += 2;
                    }
                    Some(b't') => {
                        b.push_byte(b'\t');
                        p += 2;
                    }
                    Some(b'v') => {
                        b.push_byte(0x0b);
                        p += 2;
                    }
                    Some(b'0') => {
                        b.push_byte(0);
                        p += 2;
                    }
                    _ => {
                        b.push_byte(b'\\');
                        p += 1;
                    }
                }
            } else {
                b.push_byte(bytes[p]);
                p += 1;
            }
        }

        if p >= bytes.len() || bytes[p] != quote {
            return None;
        }

        *pos = p + 1;
        Some(Str::intern(b))
    }

    /// Printable representation: single-quoted with non-printable bytes
    /// escaped in canonical form.
    pub fn repr(&self) -> Str {
        let mut b = Buf::with_capacity(2 + self.len());
        b.push_byte(b'\'');

        for &c in self.as_bytes() {
            match c {
                b'\\' => b.push_bytes(b"\\\\"),
                b'\'' => b.push_bytes(b"\\'"),
                0x0c => b.push_bytes(b"\\f"),
                b'\n' => b.push_bytes(b"\\n"),
                b'\r' => b.push_bytes(b"\\r"),
                b'\t' => b.push_bytes(b"\\t"),
                0x0b => b.push_bytes(b"\\v"),
                0 => b.push_bytes(b"\\0"),
                c if !(b' '..=b'~').contains(&c) => {
                    b.push_bytes(format!("\\x{:02x}", c).as_bytes());
                }
                c => b.push_byte(c),
            }
        }

        b.push_byte(b'\'');
        Str::intern(b)
    }
}

/// Parse `digits` as a fixed-width run in the given radix, producing a
/// byte. `None` if any digit is out of range.
fn radix_run(digits: &[u8], radix: u32) -> Option<u8> {
    let mut acc: u32 = 0;
    for &d in digits {
        let v = (d as char).to_digit(16)?;
        if v >= radix {
            return None;
        }
        acc = acc * radix + v;
    }
    u8::try_from(acc & 0xff).ok()
}

impl Clone for Str {
    fn clone(&self) -> Str {
        Str {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Drop for Str {
    fn drop(&mut self) {
        // Last outside handle: only this handle and the intern table
        // still own the data, so unlink it.
        if Rc::strong_count(&self.inner) == 2 {
            let _ = INTERN.try_with(|t| {
                let mut t = t.borrow_mut();
                if let Ok(i) = probe(&t, &self.inner.bytes) {
                    t.remove(i);
                }
            });
        }
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Str) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
pub(crate) fn intern_count() -> usize {
    INTERN.with(|t| t.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_share_handles() {
        let a = Str::from_str("hello");
        let b = Str::from_str("hello");
        let c = Str::from_str("world");
        assert_eq!(a, b);
        assert_eq!(a.addr(), b.addr());
        assert!(a != c);
    }

    #[test]
    fn dropping_last_handle_unlinks() {
        let before = intern_count();
        {
            let a = Str::from_str("transient-string");
            let b = a.clone();
            assert_eq!(intern_count(), before + 1);
            drop(a);
            assert_eq!(intern_count(), before + 1);
            drop(b);
        }
        assert_eq!(intern_count(), before);
    }

    #[test]
    fn intern_reuses_existing() {
        let a = Str::from_str("shared");
        let mut b = Buf::new();
        b.push_bytes(b"shared");
        let c = Str::intern(b);
        assert_eq!(a, c);
    }

    #[test]
    fn ordering_is_length_first_in_table_only() {
        // cmp is content comparison, independent of table order
        let a = Str::from_str("ab");
        let b = Str::from_str("b");
        assert_eq!(a.cmp(&b), Ordering::Less);
    }

    #[test]
    fn parses_escapes() {
        let mut pos = 0;
        let s = Str::parse(b"'a\\n\\x41\\o101\\d065\\b01000001'", &mut pos).unwrap();
        assert_eq!(s.as_bytes(), b"a\nAAAA");

        let mut pos = 0;
        assert!(Str::parse(b"'unterminated", &mut pos).is_none());

        let mut pos = 0;
        let s = Str::parse(b"\"both 'quotes'\"", &mut pos).unwrap();
        assert_eq!(s.as_bytes(), b"both 'quotes'");
    }

    #[test]
    fn repr_quotes_and_escapes() {
        assert_eq!(Str::from_str("hi").repr().as_bytes(), b"'hi'");
        assert_eq!(Str::from_bytes(b"a\nb").repr().as_bytes(), b"'a\\nb'");
        assert_eq!(Str::from_bytes(&[0x01]).repr().as_bytes(), b"'\\x01'");
    }

    #[test]
    fn repr_parse_round_trip() {
        for raw in [&b"simple"[..], b"with 'quote'", b"\x00\x01\xff", b"\\"] {
            let s = Str::from_bytes(raw);
            let r = s.repr();
            let mut pos = 0;
            let back = Str::parse(r.as_bytes(), &mut pos).unwrap();
            assert_eq!(pos, r.len());
            assert_eq!(back, s);
        }
    }

    #[test]
    fn subset_wraps_and_clamps() {
        let s = Str::from_str("abcdef");
        assert_eq!(s.subset(1, 3).as_bytes(), b"bc");
        assert_eq!(s.subset(-2, 6).as_bytes(), b"ef");
        assert_eq!(s.subset(4, 2).as_bytes(), b"");
        assert_eq!(s.subset(0, 100).as_bytes(), b"abcdef");
    }
}
