//! Error taxonomy (C6).
//!
//! A single `Error` enum carries every failure mode a command primitive can
//! return. The dispatcher turns each variant into a fixed RESP error line;
//! nothing here formats a message that a client is meant to parse beyond
//! that fixed prefix.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// Extended-SET token grammar violated: unrecognized token, duplicate
    /// category, or a non-numeric operand to EX/PX/EXAT/PXAT.
    WrongSyntax,
    /// Generic numeric-parse syntax error (kept distinct from `WrongSyntax`
    /// so `SET`'s grammar and, e.g., `INCRBY`'s argument parsing can each
    /// render their own RESP prefix).
    SyntaxError,
    /// Wrong number of arguments for `<cmd>`.
    WrongArity(String),
    /// Value is not an integer, or integer arithmetic overflowed.
    NotInteger,
    /// Value is not a valid float (reserved for future float ops; unused by
    /// the current command set but kept so C6 is represented in full).
    NotFloat,
    /// Row holds a value whose `type` isn't the one the command expects.
    WrongType,
    /// Network or filesystem I/O failure.
    Io(io::Error),
    /// Unrecognized/propagated error from the embedded SQL engine.
    Sql(rusqlite::Error),
    /// Connection-pool exhaustion or setup failure.
    Pool(r2d2::Error),
}

impl Error {
    /// Render as a RESP error line body, without the leading `-` or
    /// trailing `\r\n` (the protocol writer adds those).
    pub fn to_resp_line(&self) -> String {
        match self {
            Error::WrongSyntax => "ERR wrong command syntax".to_string(),
            Error::SyntaxError => "ERR syntax error".to_string(),
            Error::WrongArity(cmd) => {
                format!("ERR wrong number of arguments for '{}' command", cmd)
            }
            Error::NotInteger => "ERR value is not an integer or out of range".to_string(),
            Error::NotFloat => "ERR value is not a valid float".to_string(),
            Error::WrongType => {
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string()
            }
            Error::Io(e) => format!("ERR {}", e),
            Error::Sql(e) => format!("ERR {}", e),
            Error::Pool(e) => format!("ERR {}", e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_resp_line())
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Sql(e)
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
