//! Tarn core: the value model shared by the compiler and the VM
//!
//! Key design principles:
//! - `Value`: one tagged handle for everything the language talks about
//!   (nil, number, string, buffer, table, function)
//! - Reference counting is `Rc`/`Weak`; producers return owning handles,
//!   consumers take them
//! - Strings are interned: equal bytes means equal handle
//! - The table is the only aggregate; it carries range/list/hash stores
//!   behind one interface and an optional tail for prototype chains
//!
//! # Modules
//!
//! - `error`: the shared error type (type, read-only, length, parse,
//!   bytecode-limit, scope, runtime kinds)
//! - `num`: low-bit-cleared float numbers, parsing and formatting
//! - `str`: interned immutable byte strings
//! - `buf`: mutable byte buffers with optional destructor and tail
//! - `fmt`: the `%`-directive format engine used for every message
//! - `tbl`: the ordered table
//! - `func`: function and code objects
//! - `frame`: the 4-slot calling convention
//! - `value`: the `Value` handle and generic dispatch

pub mod buf;
pub mod error;
pub mod fmt;
pub mod frame;
pub mod func;
pub mod num;
pub mod str;
pub mod tbl;
pub mod value;

pub use buf::Buf;
pub use error::{Error, Result};
pub use fmt::FmtArg;
pub use frame::{Frame, FRAME};
pub use func::{Code, Func};
pub use num::Num;
pub use str::Str;
pub use tbl::Tbl;
pub use value::Value;
