//! Shared error type.
//!
//! Every failure in the core, the VM, and the compiler funnels into this
//! one enum and propagates outward with `?`. There is no local recovery:
//! nested evaluation contexts (the REPL, the embedder's call boundary)
//! catch the error and continue. Owning handles held on the failing path
//! are released by drop during unwind.

use std::fmt;

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Operation applied to a value of incompatible type.
    Type(String),
    /// Attempted mutation of a frozen table (or a non-table receiver).
    ReadOnly(String),
    /// A container would exceed its maximum addressable length.
    Length(String),
    /// Lexical or syntactic error. The line is counted over non-comment
    /// newlines up to the error position, starting at 1.
    Parse { message: String, line: usize },
    /// A register index, constant-pool index, or jump displacement would
    /// exceed its encoded field.
    BytecodeLimit,
    /// Reference to an undeclared symbol at compile time.
    Scope { message: String, line: usize },
    /// Raised by the `error` builtin, failed imports, and host I/O.
    Runtime(String),
}

impl Error {
    /// The message as shown to the user, without any prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Type(m) | Error::ReadOnly(m) | Error::Length(m) | Error::Runtime(m) => {
                m.clone()
            }
            Error::Parse { message, line } | Error::Scope { message, line } => {
                if *line > 1 {
                    format!("{} on line {}", message, line)
                } else {
                    message.clone()
                }
            }
            Error::BytecodeLimit => "exceeded bytecode limits".to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_carries_line_hint() {
        let e = Error::Parse {
            message: "unexpected ')'".to_string(),
            line: 3,
        };
        assert_eq!(e.to_string(), "unexpected ')' on line 3");

        let e = Error::Parse {
            message: "unexpected ')'".to_string(),
            line: 1,
        };
        assert_eq!(e.to_string(), "unexpected ')'");
    }

    #[test]
    fn bytecode_limit_message() {
        assert_eq!(Error::BytecodeLimit.to_string(), "exceeded bytecode limits");
    }
}
