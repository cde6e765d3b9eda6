//! RESP request framing: inline and multi-bulk requests.
//!
//! A first line of `*<argc>\r\n` starts a multi-bulk request, each argument
//! framed as `$<len>\r\n<bytes>\r\n`; anything else is an inline request, a
//! single line split on spaces.

use crate::error::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Reads one request's argument vector off `r`. Returns `Ok(None)` on a
/// clean EOF before any bytes of a new request arrive (orderly client
/// disconnect); a partial frame at EOF is `Err`.
pub async fn read_request<R: AsyncBufRead + Unpin>(
    r: &mut R,
) -> Result<Option<Vec<Vec<u8>>>> {
    let mut line = String::new();
    let n = r.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        // Blank inline request (bare CRLF): treat as a no-op empty command.
        return Ok(Some(Vec::new()));
    }

    if let Some(rest) = trimmed.strip_prefix('*') {
        let argc: i64 = rest.parse().map_err(|_| Error::WrongSyntax)?;
        if argc < 0 {
            return Ok(Some(Vec::new()));
        }
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(read_bulk_argument(r).await?);
        }
        Ok(Some(args))
    } else {
        let args = trimmed
            .split(' ')
            .filter(|s| !s.is_empty())
            .map(|s| s.as_bytes().to_vec())
            .collect();
        Ok(Some(args))
    }
}

async fn read_bulk_argument<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<Vec<u8>> {
    let mut len_line = String::new();
    let n = r.read_line(&mut len_line).await?;
    if n == 0 {
        return Err(Error::WrongSyntax);
    }
    let trimmed = len_line.trim_end_matches(['\r', '\n']);
    let len: usize = trimmed
        .strip_prefix('$')
        .ok_or(Error::WrongSyntax)?
        .parse()
        .map_err(|_| Error::WrongSyntax)?;

    let mut data = vec![0u8; len];
    r.read_exact(&mut data).await?;

    let mut crlf = [0u8; 2];
    r.read_exact(&mut crlf).await?;
    if &crlf != b"\r\n" {
        return Err(Error::WrongSyntax);
    }

    Ok(data)
}
