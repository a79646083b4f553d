//! Tarn runtime: the bytecode format, the register VM, and the builtin
//! library.
//!
//! The compiler emits instructions through [`opcode::encode`]; the VM in
//! [`vm`] interprets them. Call dispatch over the three function kinds
//! (native, scoped native, compiled) lives beside the interpreter so
//! tail calls can re-enter its loop. Host integration points (print,
//! import) are the seams in [`sys`].

pub mod builtins;
pub mod iter;
pub mod opcode;
pub mod sys;
pub mod vm;

pub use builtins::{builtins, keys};
pub use opcode::Op;
pub use vm::{call, exec, fcall, next, tcall};
