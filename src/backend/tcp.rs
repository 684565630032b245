//! Concrete [`BackendSession`] wrapping a real RESP-speaking backend.
//!
//! Round-trips commands over a plain `tokio::net::TcpStream`, reusing the
//! same codec (`resp::write_command`/`resp::parse_reply`) the proxy itself
//! is built on — the backend and the client the proxy serves speak the same
//! wire protocol.

use super::{BackendSession, CallContext};
use crate::errors::BackendError;
use crate::resp::{self, Reply};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// One TCP connection to a backend instance, serialized behind a mutex: a
/// single backend connection never has more than one in-flight command at
/// a time, matching the proxy's own no-pipelining rule one layer down.
pub struct TcpBackendSession {
    conn: Mutex<BufReader<TcpStream>>,
}

impl TcpBackendSession {
    pub async fn connect(addr: &str) -> Result<TcpBackendSession, BackendError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(TcpBackendSession {
            conn: Mutex::new(BufReader::new(stream)),
        })
    }

    async fn roundtrip(&self, name: &str, args: &[&[u8]]) -> Result<Reply, BackendError> {
        let mut conn = self.conn.lock().await;
        resp::write_command(conn.get_mut(), name, args).await?;
        let reply = resp::parse_reply(&mut *conn).await.map_err(|e| match e {
            resp::DecodeError::Protocol(p) => BackendError::Protocol(p),
            resp::DecodeError::Io(e) => BackendError::Io(e),
            resp::DecodeError::Eof => {
                BackendError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
            }
        })?;
        Ok(reply)
    }

    fn expect_integer(reply: Reply) -> Result<i64, BackendError> {
        match reply {
            Reply::Integer(i) => Ok(i),
            Reply::Error(e) => Err(BackendError::Remote(String::from_utf8_lossy(&e).into_owned())),
            other => Err(BackendError::Remote(format!("unexpected reply {other:?}"))),
        }
    }

    fn expect_bulk(reply: Reply) -> Result<String, BackendError> {
        match reply {
            Reply::BulkString(Some(b)) => {
                String::from_utf8(b.to_vec()).map_err(|_| BackendError::NotFound)
            }
            Reply::SimpleString(b) if !b.is_empty() => {
                String::from_utf8(b.to_vec()).map_err(|_| BackendError::NotFound)
            }
            Reply::BulkString(None) => Err(BackendError::NotFound),
            Reply::Error(e) => Err(BackendError::Remote(String::from_utf8_lossy(&e).into_owned())),
            other => Err(BackendError::Remote(format!("unexpected reply {other:?}"))),
        }
    }

    fn expect_ok(reply: Reply) -> Result<(), BackendError> {
        match reply {
            Reply::SimpleString(s) if s.as_ref() == b"OK" => Ok(()),
            Reply::Error(e) => Err(BackendError::Remote(String::from_utf8_lossy(&e).into_owned())),
            other => Err(BackendError::Remote(format!("unexpected reply {other:?}"))),
        }
    }
}

impl BackendSession for TcpBackendSession {
    async fn ping(&self, _ctx: &CallContext) -> Result<(), BackendError> {
        let reply = self.roundtrip("PING", &[]).await?;
        match reply {
            Reply::SimpleString(_) => Ok(()),
            other => Err(BackendError::Remote(format!("unexpected reply {other:?}"))),
        }
    }

    async fn get(&self, _ctx: &CallContext, key: &str) -> Result<String, BackendError> {
        let reply = self.roundtrip("GET", &[key.as_bytes()]).await?;
        Self::expect_bulk(reply)
    }

    async fn set(
        &self,
        _ctx: &CallContext,
        key: &str,
        value: &str,
        expire: Option<Duration>,
    ) -> Result<(), BackendError> {
        let reply = match expire {
            Some(d) => {
                let secs = d.as_secs().to_string();
                self.roundtrip(
                    "SET",
                    &[key.as_bytes(), value.as_bytes(), b"EX", secs.as_bytes()],
                )
                .await?
            }
            None => self.roundtrip("SET", &[key.as_bytes(), value.as_bytes()]).await?,
        };
        Self::expect_ok(reply)
    }

    async fn hget(&self, _ctx: &CallContext, key: &str, field: &str) -> Result<String, BackendError> {
        let reply = self
            .roundtrip("HGET", &[key.as_bytes(), field.as_bytes()])
            .await?;
        Self::expect_bulk(reply)
    }

    async fn hset(
        &self,
        _ctx: &CallContext,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        let reply = self
            .roundtrip("HSET", &[key.as_bytes(), field.as_bytes(), value.as_bytes()])
            .await?;
        match reply {
            Reply::SimpleString(_) | Reply::Integer(_) => Ok(()),
            Reply::Error(e) => Err(BackendError::Remote(String::from_utf8_lossy(&e).into_owned())),
            other => Err(BackendError::Remote(format!("unexpected reply {other:?}"))),
        }
    }

    async fn del(&self, _ctx: &CallContext, keys: &[String]) -> Result<i64, BackendError> {
        let args: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
        let reply = self.roundtrip("DEL", &args).await?;
        Self::expect_integer(reply)
    }

    async fn exists(&self, _ctx: &CallContext, keys: &[String]) -> Result<i64, BackendError> {
        let args: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
        let reply = self.roundtrip("EXISTS", &args).await?;
        Self::expect_integer(reply)
    }

    async fn keys(&self, _ctx: &CallContext, pattern: &str) -> Result<Vec<String>, BackendError> {
        let reply = self.roundtrip("KEYS", &[pattern.as_bytes()]).await?;
        match reply {
            Reply::Array(Some(items)) => items
                .into_iter()
                .map(Self::expect_bulk)
                .collect::<Result<Vec<_>, _>>(),
            Reply::Array(None) => Ok(Vec::new()),
            Reply::Error(e) => Err(BackendError::Remote(String::from_utf8_lossy(&e).into_owned())),
            other => Err(BackendError::Remote(format!("unexpected reply {other:?}"))),
        }
    }

    async fn append(&self, _ctx: &CallContext, key: &str, value: &str) -> Result<i64, BackendError> {
        let reply = self
            .roundtrip("APPEND", &[key.as_bytes(), value.as_bytes()])
            .await?;
        Self::expect_integer(reply)
    }

    async fn incr_by(&self, _ctx: &CallContext, key: &str, delta: i64) -> Result<i64, BackendError> {
        let delta_s = delta.to_string();
        let reply = self
            .roundtrip("INCRBY", &[key.as_bytes(), delta_s.as_bytes()])
            .await?;
        Self::expect_integer(reply)
    }

    async fn decr_by(&self, _ctx: &CallContext, key: &str, delta: i64) -> Result<i64, BackendError> {
        let delta_s = delta.to_string();
        let reply = self
            .roundtrip("DECRBY", &[key.as_bytes(), delta_s.as_bytes()])
            .await?;
        Self::expect_integer(reply)
    }

    async fn ttl(&self, _ctx: &CallContext, key: &str) -> Result<i64, BackendError> {
        let reply = self.roundtrip("TTL", &[key.as_bytes()]).await?;
        Self::expect_integer(reply)
    }

    async fn expire(&self, _ctx: &CallContext, key: &str, seconds: u64) -> Result<i64, BackendError> {
        let seconds_s = seconds.to_string();
        let reply = self
            .roundtrip("EXPIRE", &[key.as_bytes(), seconds_s.as_bytes()])
            .await?;
        Self::expect_integer(reply)
    }
}
