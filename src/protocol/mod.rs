//! RESP wire protocol: reply model, serialization, and request framing.
//!
//! Line-oriented, identical framing to the well-known in-memory cache
//! family this server's clients already speak.

pub mod parser;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A RESP reply value: a tagged variant serialized directly to the wire
/// format, rather than threading `Option`/error codes through each caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    /// `None` serializes as the null bulk string `$-1\r\n`.
    Bulk(Option<Vec<u8>>),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn nil() -> Self {
        Reply::Bulk(None)
    }

    pub fn bulk(value: Vec<u8>) -> Self {
        Reply::Bulk(Some(value))
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                buf.push(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            Reply::Bulk(Some(data)) => {
                buf.push(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Array(items) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }
}

impl From<&crate::error::Error> for Reply {
    fn from(e: &crate::error::Error) -> Self {
        Reply::Error(e.to_resp_line())
    }
}

pub async fn write_reply<W: AsyncWrite + Unpin>(w: &mut W, reply: &Reply) -> std::io::Result<()> {
    let mut buf = Vec::new();
    reply.encode(&mut buf);
    w.write_all(&buf).await
}
