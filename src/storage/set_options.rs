//! Extended SET grammar.
//!
//! A linear options parser: walk the trailing tokens once, accumulate a
//! parsed-options record, then issue a single write.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Nx,
    Xx,
}

#[derive(Debug, Clone, Copy)]
pub enum Expiration {
    /// Relative seconds from now.
    Ex(i64),
    /// Relative milliseconds from now.
    Px(i64),
    /// Absolute Unix seconds.
    ExAt(i64),
    /// Absolute Unix milliseconds.
    PxAt(i64),
    /// Carry forward whatever `exp` the row already had.
    KeepTtl,
}

#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub existence: Option<Existence>,
    pub expiration: Option<Expiration>,
    pub get: bool,
}

/// Parses the trailing tokens of a `SET key value [tokens...]` command.
/// `tokens` excludes `key` and `value`. Each category (existence,
/// expiration, get) may appear at most once; an unrecognized token, a
/// repeated category, or a missing/non-integer numeric operand is a syntax
/// error.
pub fn parse(tokens: &[Vec<u8>]) -> Result<SetOptions> {
    let mut opts = SetOptions::default();
    let mut i = 0;
    while i < tokens.len() {
        let word = std::str::from_utf8(&tokens[i])
            .map_err(|_| Error::WrongSyntax)?
            .to_ascii_uppercase();
        match word.as_str() {
            "NX" => {
                set_once(&mut opts.existence, Existence::Nx)?;
                i += 1;
            }
            "XX" => {
                set_once(&mut opts.existence, Existence::Xx)?;
                i += 1;
            }
            "KEEPTTL" => {
                set_once(&mut opts.expiration, Expiration::KeepTtl)?;
                i += 1;
            }
            "GET" => {
                if opts.get {
                    return Err(Error::WrongSyntax);
                }
                opts.get = true;
                i += 1;
            }
            "EX" | "PX" | "EXAT" | "PXAT" => {
                let operand = tokens.get(i + 1).ok_or(Error::SyntaxError)?;
                let n: i64 = std::str::from_utf8(operand)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(Error::SyntaxError)?;
                let expiration = match word.as_str() {
                    "EX" => Expiration::Ex(n),
                    "PX" => Expiration::Px(n),
                    "EXAT" => Expiration::ExAt(n),
                    _ => Expiration::PxAt(n),
                };
                set_once(&mut opts.expiration, expiration)?;
                i += 2;
            }
            _ => return Err(Error::WrongSyntax),
        }
    }
    Ok(opts)
}

fn set_once<T>(slot: &mut Option<T>, value: T) -> Result<()> {
    if slot.is_some() {
        return Err(Error::WrongSyntax);
    }
    *slot = Some(value);
    Ok(())
}
