//! # RESP: Redis Serialization Protocol
//!
//! Unlike a general-purpose RESP value tree, this codec is shaped directly
//! around what the proxy actually needs: a [`Command`] (a verb plus its
//! argument bulk strings) on the way in, and a [`Reply`] (the five RESP
//! reply kinds) on the way out. There is no nested `Message`/`Value` tree —
//! a client request is always exactly one array-of-bulk-strings (or, in the
//! legacy inline form, one line), never an arbitrary RESP value.
//!
//! [Protocol spec](https://redis.io/docs/latest/develop/reference/protocol-spec/)

use crate::errors::ProtocolError;
use bytes::Bytes;
use memchr::memchr;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A parsed client command: an upper-cased verb plus its raw argument bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Bytes>,
}

/// One of the five RESP reply kinds the proxy ever emits.
///
/// `BulkString(None)` and `Array(None)` are the null bulk string and null
/// array sentinels; they are never conflated with an empty string or an
/// empty array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    SimpleString(Bytes),
    Error(Bytes),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::SimpleString(Bytes::from_static(b"OK"))
    }

    pub fn empty_simple_string() -> Reply {
        Reply::SimpleString(Bytes::new())
    }

    pub fn null_bulk() -> Reply {
        Reply::BulkString(None)
    }

    pub fn error(msg: impl Into<String>) -> Reply {
        Reply::Error(Bytes::from(msg.into()))
    }

    pub fn bulk(value: impl Into<Bytes>) -> Reply {
        Reply::BulkString(Some(value.into()))
    }
}

/// Failure modes of [`parse_command`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame bytes were malformed; fatal for this frame, but the
    /// handler decides whether to reply with `-ERR` and keep going, or to
    /// drop the connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Clean end of stream between frames.
    #[error("connection closed")]
    Eof,

    /// Any lower-level transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Decodes the next [`Command`] from a buffered, readable byte stream.
///
/// Recognizes two framings: the canonical array-of-bulk-strings form
/// (`*<n>\r\n$<len>\r\n<bytes>\r\n...`) and the legacy single-line inline
/// form (any first byte other than `*`).
pub async fn parse_command<R>(reader: &mut R) -> Result<Command, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let line = match read_crlf_line(reader, true).await? {
        Some(line) => line,
        None => return Err(DecodeError::Eof),
    };

    if line.is_empty() {
        return Err(ProtocolError::BadPrefix(0).into());
    }

    if line[0] != b'*' {
        let name = ascii_upper(&line)?;
        return Ok(Command {
            name,
            args: Vec::new(),
        });
    }

    let count = parse_unsigned(&line[1..]).map_err(|_| {
        ProtocolError::BadArrayCount(String::from_utf8_lossy(&line[1..]).into_owned())
    })?;
    if count < 1 {
        return Err(ProtocolError::EmptyArray.into());
    }

    let mut bulks = Vec::with_capacity(count);
    for _ in 0..count {
        bulks.push(read_bulk_string(reader).await?);
    }

    let name = ascii_upper(&bulks[0])?;
    let args = bulks.into_iter().skip(1).map(Bytes::from).collect();

    Ok(Command { name, args })
}

async fn read_bulk_string<R>(reader: &mut R) -> Result<Vec<u8>, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_crlf_line(reader, false)
        .await?
        .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;

    if line.is_empty() || line[0] != b'$' {
        let got = line.first().copied().unwrap_or(0);
        return Err(ProtocolError::MissingBulkMarker(got).into());
    }

    let len = parse_unsigned(&line[1..])
        .map_err(|_| ProtocolError::BadBulkLength(String::from_utf8_lossy(&line[1..]).into_owned()))?;

    let mut buf = vec![0u8; len + 2];
    reader.read_exact(&mut buf).await?;
    if &buf[len..] != b"\r\n" {
        return Err(ProtocolError::MissingCrlf.into());
    }
    buf.truncate(len);
    Ok(buf)
}

/// Reads one CRLF-terminated line, stripping the terminator.
///
/// `allow_eof` controls whether a zero-byte read (no bytes at all before
/// EOF) is reported as `Ok(None)` — true only between frames — or as an
/// I/O error, since hitting EOF mid-frame is never clean.
async fn read_crlf_line<R>(reader: &mut R, allow_eof: bool) -> Result<Option<Vec<u8>>, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return if allow_eof {
            Ok(None)
        } else {
            Err(io::Error::from(io::ErrorKind::UnexpectedEof).into())
        };
    }
    if buf.last() != Some(&b'\n') || buf.len() < 2 || memchr(b'\r', &buf) != Some(buf.len() - 2) {
        return Err(ProtocolError::MissingCrlf.into());
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(buf))
}

fn parse_unsigned(digits: &[u8]) -> Result<usize, ()> {
    if digits.is_empty() {
        return Err(());
    }
    let mut value: usize = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(());
        }
        value = value.checked_mul(10).ok_or(())?;
        value = value.checked_add((b - b'0') as usize).ok_or(())?;
    }
    Ok(value)
}

fn ascii_upper(bytes: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_ascii_uppercase())
        .map_err(|_| ProtocolError::InvalidUtf8)
}

/// Encodes a command as the canonical array-of-bulk-strings request frame
/// and writes it — the shape [`TcpBackendSession`](crate::backend::tcp::TcpBackendSession)
/// uses to issue a command to a real backend.
pub async fn write_command<W>(writer: &mut W, name: &str, args: &[&[u8]]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    buf.push(b'*');
    buf.extend_from_slice((1 + args.len()).to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    write_bulk(&mut buf, name.as_bytes());
    for arg in args {
        write_bulk(&mut buf, arg);
    }
    writer.write_all(&buf).await
}

fn write_bulk(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(bytes);
    buf.extend_from_slice(b"\r\n");
}

/// Decodes one [`Reply`] from a buffered byte stream — the client-side
/// counterpart to [`parse_command`], used to read a real backend's answer.
pub async fn parse_reply<R>(reader: &mut R) -> Result<Reply, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut prefix = [0u8; 1];
    reader.read_exact(&mut prefix).await?;
    match prefix[0] {
        b'+' => {
            let line = read_crlf_line(reader, false).await?.unwrap();
            Ok(Reply::SimpleString(Bytes::from(line)))
        }
        b'-' => {
            let line = read_crlf_line(reader, false).await?.unwrap();
            Ok(Reply::Error(Bytes::from(line)))
        }
        b':' => {
            let line = read_crlf_line(reader, false).await?.unwrap();
            let text = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
            let value: i64 = text
                .parse()
                .map_err(|_| ProtocolError::BadArrayCount(text.to_string()))?;
            Ok(Reply::Integer(value))
        }
        b'$' => {
            let line = read_crlf_line(reader, false).await?.unwrap();
            let text = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
            let len: i64 = text
                .parse()
                .map_err(|_| ProtocolError::BadBulkLength(text.to_string()))?;
            if len < 0 {
                return Ok(Reply::BulkString(None));
            }
            let mut buf = vec![0u8; len as usize + 2];
            reader.read_exact(&mut buf).await?;
            buf.truncate(len as usize);
            Ok(Reply::BulkString(Some(Bytes::from(buf))))
        }
        b'*' => {
            let line = read_crlf_line(reader, false).await?.unwrap();
            let text = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
            let count: i64 = text
                .parse()
                .map_err(|_| ProtocolError::BadArrayCount(text.to_string()))?;
            if count < 0 {
                return Ok(Reply::Array(None));
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(Box::pin(parse_reply(reader)).await?);
            }
            Ok(Reply::Array(Some(items)))
        }
        other => Err(ProtocolError::BadPrefix(other).into()),
    }
}

/// Serializes a [`Reply`] and writes it to `writer`.
///
/// The reply is first flattened into a single buffer so that one logical
/// reply corresponds to (at most) one underlying write call; the codec
/// never reorders or merges distinct replies.
pub async fn write_reply<W>(writer: &mut W, reply: &Reply) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    encode_reply(&mut buf, reply);
    writer.write_all(&buf).await
}

/// Appends the RESP encoding of `reply` to `buf`.
pub fn encode_reply(buf: &mut Vec<u8>, reply: &Reply) {
    match reply {
        Reply::SimpleString(s) => {
            buf.push(b'+');
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Error(s) => {
            buf.extend_from_slice(b"-ERR ");
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Integer(i) => {
            buf.push(b':');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
        Reply::BulkString(Some(s)) => {
            buf.push(b'$');
            buf.extend_from_slice(s.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
        Reply::Array(Some(items)) => {
            buf.push(b'*');
            buf.extend_from_slice(items.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            for item in items {
                encode_reply(buf, item);
            }
        }
    }
}

/// Builds an `Array` reply of bulk strings from plain strings — the shape
/// `KEYS` and similar multi-value replies use.
pub fn bulk_array(values: impl IntoIterator<Item = impl Into<Bytes>>) -> Reply {
    Reply::Array(Some(
        values
            .into_iter()
            .map(|v| Reply::BulkString(Some(v.into())))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn parse(input: &'static [u8]) -> Command {
        let mut reader = BufReader::new(Cursor::new(input));
        parse_command(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn parses_get() {
        let cmd = parse(b"*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n").await;
        assert_eq!(cmd.name, "GET");
        assert_eq!(cmd.args, vec![Bytes::from_static(b"k1")]);
    }

    #[tokio::test]
    async fn parses_set() {
        let cmd = parse(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").await;
        assert_eq!(cmd.name, "SET");
        assert_eq!(
            cmd.args,
            vec![Bytes::from_static(b"foo"), Bytes::from_static(b"bar")]
        );
    }

    #[tokio::test]
    async fn upper_cases_verb() {
        let cmd = parse(b"*1\r\n$3\r\nget\r\n").await;
        assert_eq!(cmd.name, "GET");
    }

    #[tokio::test]
    async fn inline_form_has_no_args() {
        let cmd = parse(b"PING\r\n").await;
        assert_eq!(cmd.name, "PING");
        assert!(cmd.args.is_empty());
    }

    #[tokio::test]
    async fn eof_between_frames() {
        let mut reader = BufReader::new(Cursor::new(&b""[..]));
        let err = parse_command(&mut reader).await.unwrap_err();
        assert!(matches!(err, DecodeError::Eof));
    }

    #[tokio::test]
    async fn rejects_zero_array_count() {
        let mut reader = BufReader::new(Cursor::new(&b"*0\r\n"[..]));
        let err = parse_command(&mut reader).await.unwrap_err();
        assert!(matches!(err, DecodeError::Protocol(ProtocolError::EmptyArray)));
    }

    #[tokio::test]
    async fn rejects_missing_bulk_marker() {
        let mut reader = BufReader::new(Cursor::new(&b"*1\r\nGET\r\n"[..]));
        let err = parse_command(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Protocol(ProtocolError::MissingBulkMarker(_))
        ));
    }

    fn encode(reply: &Reply) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_reply(&mut buf, reply);
        buf
    }

    #[test]
    fn encodes_error() {
        assert_eq!(
            encode(&Reply::error("Not found")),
            b"-ERR Not found\r\n".to_vec()
        );
    }

    #[test]
    fn encodes_negative_integer() {
        assert_eq!(encode(&Reply::Integer(-123)), b":-123\r\n".to_vec());
    }

    #[test]
    fn encodes_empty_simple_string() {
        assert_eq!(encode(&Reply::empty_simple_string()), b"+\r\n".to_vec());
    }

    #[test]
    fn encodes_null_bulk() {
        assert_eq!(encode(&Reply::null_bulk()), b"$-1\r\n".to_vec());
    }

    #[test]
    fn encodes_string_array() {
        let reply = bulk_array(vec!["v1", "v2", "3"]);
        assert_eq!(
            encode(&reply),
            b"*3\r\n$2\r\nv1\r\n$2\r\nv2\r\n$1\r\n3\r\n".to_vec()
        );
    }

    #[test]
    fn encodes_empty_array() {
        assert_eq!(encode(&Reply::Array(Some(Vec::new()))), b"*0\r\n".to_vec());
    }

    #[tokio::test]
    async fn round_trips_through_writer() {
        let mut out = Vec::new();
        write_reply(&mut out, &Reply::bulk("hello")).await.unwrap();
        assert_eq!(out, b"$5\r\nhello\r\n".to_vec());
    }
}
