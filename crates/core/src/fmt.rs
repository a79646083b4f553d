//! The format engine.
//!
//! One `printf`-style consumer used for every message the runtime
//! builds, from error text to the REPL echo. C varargs become an
//! explicit argument slice.
//!
//! Directives:
//!
//! | directive | meaning |
//! |-----------|---------|
//! | `%%`      | literal percent |
//! | `%c`      | single byte |
//! | `%s`      | byte string |
//! | `%u`/`%d` | unsigned/signed integer |
//! | `%x`      | lowercase hex |
//! | `%n<x>`   | the next directive takes a width argument |
//! | `%m`      | a value via its default conversion (strings raw) |
//! | `%r`      | a value via its printable representation |
//! | `%w`/`%h`/`%q`/`%b` | width modifier: word/half/quarter/byte |
//!
//! For `%r` and `%m` the width argument is the repr depth: zero renders
//! composites as `[..]`, absent means unbounded.

use crate::buf::Buf;
use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Clone, Copy)]
pub enum FmtArg<'a> {
    Byte(u8),
    Bytes(&'a [u8]),
    Uint(u64),
    Int(i64),
    Value(&'a Value),
}

// width modifier sizes, in bytes
const SIZE_DEFAULT: i32 = -1;
const SIZE_NEXT_ARG: i32 = -2;

struct Args<'a, 'b> {
    args: &'b [FmtArg<'a>],
    at: usize,
}

impl<'a, 'b> Args<'a, 'b> {
    fn next(&mut self) -> Result<FmtArg<'a>> {
        let a = self
            .args
            .get(self.at)
            .copied()
            .ok_or_else(|| Error::Runtime("missing format argument".to_string()))?;
        self.at += 1;
        Ok(a)
    }

    fn uint(&mut self) -> Result<u64> {
        match self.next()? {
            FmtArg::Uint(u) => Ok(u),
            FmtArg::Int(i) => Ok(i as u64),
            FmtArg::Byte(c) => Ok(c as u64),
            _ => Err(Error::Runtime("invalid format argument".to_string())),
        }
    }

    fn int(&mut self) -> Result<i64> {
        match self.next()? {
            FmtArg::Int(i) => Ok(i),
            FmtArg::Uint(u) => Ok(u as i64),
            FmtArg::Byte(c) => Ok(c as i64),
            _ => Err(Error::Runtime("invalid format argument".to_string())),
        }
    }

    /// Resolve an optional width: consumes an argument only under `%n`.
    fn width(&mut self, size: i32) -> Result<i32> {
        if size == SIZE_NEXT_ARG {
            Ok(self.uint()? as i32)
        } else {
            Ok(size)
        }
    }
}

/// Append formatted output to a buffer.
pub fn vpushf(b: &mut Buf, f: &[u8], args: &[FmtArg]) -> Result<()> {
    let mut args = Args { args, at: 0 };
    let mut i = 0;

    while i < f.len() {
        if f[i] != b'%' {
            b.push_byte(f[i]);
            i += 1;
            continue;
        }
        i += 1;

        let mut size = SIZE_DEFAULT;
        match f.get(i) {
            Some(b'n') => {
                size = SIZE_NEXT_ARG;
                i += 1;
            }
            Some(b'w') => {
                size = 8;
                i += 1;
            }
            Some(b'h') => {
                size = 4;
                i += 1;
            }
            Some(b'q') => {
                size = 2;
                i += 1;
            }
            Some(b'b') => {
                size = 1;
                i += 1;
            }
            _ => {}
        }

        let d = *f
            .get(i)
            .ok_or_else(|| Error::Runtime("invalid format argument".to_string()))?;
        i += 1;

        match d {
            b'%' => {
                args.width(size)?;
                b.push_byte(b'%');
            }
            b'c' => {
                let c = args.uint()?;
                args.width(size)?;
                b.push_byte(c as u8);
            }
            b's' => {
                let s = match args.next()? {
                    FmtArg::Bytes(s) => s,
                    _ => return Err(Error::Runtime("invalid format argument".to_string())),
                };
                let n = args.width(size)?;
                let n = if n < 0 { s.len() } else { (n as usize).min(s.len()) };
                b.push_bytes(&s[..n]);
            }
            b'u' => {
                let u = args.uint()?;
                args.width(size)?;
                b.push_bytes(u.to_string().as_bytes());
            }
            b'd' => {
                let v = args.int()?;
                args.width(size)?;
                b.push_bytes(v.to_string().as_bytes());
            }
            b'x' => {
                let u = args.uint()?;
                let n = args.width(size)?;
                let digits = if n < 0 { 8 } else { 2 * n as usize };
                b.push_bytes(format!("{:0width$x}", u, width = digits).as_bytes());
            }
            b'm' => {
                let v = match args.next()? {
                    FmtArg::Value(v) => v,
                    _ => return Err(Error::Runtime("invalid format argument".to_string())),
                };
                let n = args.width(size)?;
                match v {
                    Value::Str(s) => b.push_bytes(s.as_bytes()),
                    Value::Buf(buf) => b.push_bytes(buf.borrow().as_bytes()),
                    v => {
                        let depth = if n < 0 { None } else { Some(n as u32) };
                        b.push_bytes(v.repr(depth).as_bytes());
                    }
                }
            }
            b'r' => {
                let v = match args.next()? {
                    FmtArg::Value(v) => v,
                    _ => return Err(Error::Runtime("invalid format argument".to_string())),
                };
                let n = args.width(size)?;
                let depth = if n < 0 { None } else { Some(n as u32) };
                b.push_bytes(v.repr(depth).as_bytes());
            }
            _ => return Err(Error::Runtime("invalid format argument".to_string())),
        }
    }

    Ok(())
}

/// Format into a fresh buffer.
pub fn format(f: &[u8], args: &[FmtArg]) -> Result<Buf> {
    let mut b = Buf::new();
    vpushf(&mut b, f, args)?;
    Ok(b)
}

/// Format a message string. Internal format strings are literals, so a
/// directive failure falls back to the raw text rather than erroring.
pub fn message(f: &[u8], args: &[FmtArg]) -> String {
    match format(f, args) {
        Ok(b) => String::from_utf8_lossy(b.as_bytes()).into_owned(),
        Err(_) => String::from_utf8_lossy(f).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(f: &[u8], args: &[FmtArg]) -> String {
        String::from_utf8_lossy(format(f, args).unwrap().as_bytes()).into_owned()
    }

    #[test]
    fn literal_and_percent() {
        assert_eq!(fmt(b"plain 100%%", &[]), "plain 100%");
    }

    #[test]
    fn bytes_and_chars() {
        assert_eq!(
            fmt(b"<%s|%c>", &[FmtArg::Bytes(b"abc"), FmtArg::Byte(b'x')]),
            "<abc|x>"
        );
        // %ns takes an explicit length
        assert_eq!(
            fmt(b"%ns", &[FmtArg::Bytes(b"abcdef"), FmtArg::Uint(2)]),
            "ab"
        );
    }

    #[test]
    fn integers() {
        assert_eq!(
            fmt(b"%u %d", &[FmtArg::Uint(42), FmtArg::Int(-7)]),
            "42 -7"
        );
        assert_eq!(fmt(b"%x", &[FmtArg::Uint(0xbeef)]), "0000beef");
        assert_eq!(fmt(b"%bx", &[FmtArg::Uint(0xbeef)]), "ef");
        assert_eq!(fmt(b"%wx", &[FmtArg::Uint(1)]), "0000000000000001");
    }

    #[test]
    fn values_default_and_repr() {
        let s = Value::str("hi");
        assert_eq!(fmt(b"%m", &[FmtArg::Value(&s)]), "hi");
        assert_eq!(fmt(b"%r", &[FmtArg::Value(&s)]), "'hi'");

        let n = Value::num(3.0);
        assert_eq!(fmt(b"%m", &[FmtArg::Value(&n)]), "3");
    }

    #[test]
    fn repr_depth_via_width() {
        use crate::tbl::Tbl;
        let inner = Tbl::from_list(vec![Value::uint(1)]);
        let t = Value::Tbl(Tbl::from_list(vec![Value::Tbl(inner)]));
        assert_eq!(fmt(b"%r", &[FmtArg::Value(&t)]), "[[1]]");
        assert_eq!(
            fmt(b"%nr", &[FmtArg::Value(&t), FmtArg::Uint(0)]),
            "[..]"
        );
    }

    #[test]
    fn bad_directive_is_an_error() {
        assert!(format(b"%z", &[]).is_err());
        assert!(format(b"%u", &[]).is_err());
        assert_eq!(message(b"%z", &[]), "%z");
    }
}
