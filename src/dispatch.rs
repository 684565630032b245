//! # Dispatcher
//!
//! Turns one parsed [`Command`] into zero or more backend calls and exactly
//! one [`Reply`]. A static match on the upper-cased verb — no registered
//! handler table — since the verb set is small and closed (§9: "avoid
//! dynamic command dispatch tables on the hot path").
//!
//! Grounded on the original `pkg/proto/proto.go`'s `HandleRequest` switch
//! for the verb-to-reply shape, and `pkg/proto/proxy.go`'s `getNode`/
//! `getNodes` for the routing policy — generalized here to group DEL/EXISTS
//! by backend instead of the original's per-key duplicate-counting form
//! (see DESIGN.md, Open Question 1).

use crate::backend::{BackendSession, CallContext};
use crate::errors::DispatchError;
use crate::resp::{bulk_array, Command, Reply};
use crate::ring::Ring;
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;

/// Routes commands over a fixed set of backend sessions, keyed by the
/// address the ring assigns them.
pub struct Dispatcher<S: BackendSession + 'static> {
    ring: Ring,
    sessions: HashMap<String, S>,
}

impl<S: BackendSession + 'static> Dispatcher<S> {
    pub fn new(ring: Ring, sessions: HashMap<String, S>) -> Dispatcher<S> {
        Dispatcher { ring, sessions }
    }

    fn session_for(&self, key: &str) -> &S {
        let addr = self.ring.node_for(key);
        self.sessions
            .get(addr)
            .expect("ring only names backends present in the session registry")
    }

    fn group_by_backend<'a>(&self, keys: &'a [String]) -> HashMap<&str, Vec<&'a String>> {
        let mut groups: HashMap<&str, Vec<&String>> = HashMap::new();
        for key in keys {
            let addr = self.ring.node_for(key);
            groups.entry(addr).or_default().push(key);
        }
        groups
    }

    pub async fn dispatch(&self, cmd: Command, ctx: &CallContext) -> Reply {
        let args = &cmd.args;
        match cmd.name.as_str() {
            "PING" => Reply::SimpleString(bytes::Bytes::from_static(b"PONG")),
            "HELLO" => Reply::Array(Some(Vec::new())),
            "GET" => match arg_str(args, 0) {
                Ok(key) => match self.session_for(key).get(ctx, key).await {
                    Ok(value) => Reply::bulk(value),
                    Err(e) => {
                        log::debug!("GET {key} missed: {e}");
                        Reply::null_bulk()
                    }
                },
                Err(e) => Reply::error(e.to_string()),
            },
            "SET" => self.dispatch_set(args, ctx).await,
            "HGET" => match (arg_str(args, 0), arg_str(args, 1)) {
                (Ok(key), Ok(field)) => match self.session_for(key).hget(ctx, key, field).await {
                    Ok(value) => Reply::bulk(value),
                    Err(e) => {
                        log::debug!("HGET {key} {field} missed: {e}");
                        Reply::null_bulk()
                    }
                },
                (Err(e), _) | (_, Err(e)) => Reply::error(e.to_string()),
            },
            "HSET" => match (arg_str(args, 0), arg_str(args, 1), arg_str(args, 2)) {
                (Ok(key), Ok(field), Ok(value)) => {
                    match self.session_for(key).hset(ctx, key, field, value).await {
                        Ok(()) => Reply::ok(),
                        Err(e) => {
                            log::warn!("HSET {key} {field} failed: {e}");
                            Reply::empty_simple_string()
                        }
                    }
                }
                _ => Reply::error(DispatchError::WrongArity("HSET".to_string()).to_string()),
            },
            "DEL" => self.dispatch_grouped_count(args, ctx, "DEL").await,
            "EXISTS" => self.dispatch_grouped_count(args, ctx, "EXISTS").await,
            "KEYS" => match arg_str(args, 0) {
                Ok(pattern) => self.dispatch_keys(pattern, ctx).await,
                Err(e) => Reply::error(e.to_string()),
            },
            "APPEND" => match (arg_str(args, 0), arg_str(args, 1)) {
                (Ok(key), Ok(value)) => match self.session_for(key).append(ctx, key, value).await {
                    Ok(len) => Reply::Integer(len),
                    Err(e) => {
                        log::warn!("APPEND {key} failed: {e}");
                        Reply::Integer(0)
                    }
                },
                (Err(e), _) | (_, Err(e)) => Reply::error(e.to_string()),
            },
            "INCR" => self.dispatch_delta(args, ctx, 1).await,
            "INCRBY" => match (arg_str(args, 0), arg_int(args, 1)) {
                (Ok(key), Ok(delta)) => self.apply_delta(key, ctx, delta).await,
                (Err(e), _) => Reply::error(e.to_string()),
                (_, Err(e)) => Reply::error(e.to_string()),
            },
            "DECR" => self.dispatch_delta(args, ctx, -1).await,
            "DECRBY" => match (arg_str(args, 0), arg_int(args, 1)) {
                (Ok(key), Ok(delta)) => self.apply_delta(key, ctx, -delta).await,
                (Err(e), _) => Reply::error(e.to_string()),
                (_, Err(e)) => Reply::error(e.to_string()),
            },
            "TTL" => match arg_str(args, 0) {
                Ok(key) => match self.session_for(key).ttl(ctx, key).await {
                    Ok(seconds) => Reply::Integer(seconds),
                    Err(e) => {
                        log::warn!("TTL {key} failed: {e}");
                        Reply::Integer(-2)
                    }
                },
                Err(e) => Reply::error(e.to_string()),
            },
            "EXPIRE" => match (arg_str(args, 0), arg_uint(args, 1)) {
                (Ok(key), Ok(seconds)) => match self.session_for(key).expire(ctx, key, seconds).await {
                    Ok(applied) => Reply::Integer(applied),
                    Err(e) => {
                        log::warn!("EXPIRE {key} failed: {e}");
                        Reply::Integer(0)
                    }
                },
                (Err(e), _) => Reply::error(e.to_string()),
                (_, Err(e)) => Reply::error(e.to_string()),
            },
            other => Reply::error(DispatchError::UnsupportedCommand(other.to_string()).to_string()),
        }
    }

    async fn dispatch_set(&self, args: &[bytes::Bytes], ctx: &CallContext) -> Reply {
        let (key, value) = match (arg_str(args, 0), arg_str(args, 1)) {
            (Ok(key), Ok(value)) => (key, value),
            _ => return Reply::error(DispatchError::WrongArity("SET".to_string()).to_string()),
        };

        let expire = if args.len() == 2 {
            None
        } else if args.len() == 4 {
            let option = match arg_str(args, 2) {
                Ok(o) => o.to_ascii_uppercase(),
                Err(e) => return Reply::error(e.to_string()),
            };
            let amount = match arg_uint(args, 3) {
                Ok(n) => n,
                Err(e) => return Reply::error(e.to_string()),
            };
            match option.as_str() {
                "EX" => Some(Duration::from_secs(amount)),
                "PX" => Some(Duration::from_millis(amount)),
                _ => return Reply::error(DispatchError::InvalidOption(option).to_string()),
            }
        } else {
            return Reply::error(DispatchError::WrongArity("SET".to_string()).to_string());
        };

        match self.session_for(key).set(ctx, key, value, expire).await {
            Ok(()) => Reply::ok(),
            Err(e) => {
                log::warn!("SET {key} failed: {e}");
                Reply::empty_simple_string()
            }
        }
    }

    async fn dispatch_grouped_count(&self, args: &[bytes::Bytes], ctx: &CallContext, verb: &str) -> Reply {
        if args.is_empty() {
            return Reply::error(DispatchError::WrongArity(verb.to_string()).to_string());
        }
        let keys: Vec<String> = match args.iter().map(|a| std::str::from_utf8(a)).collect::<Result<Vec<_>, _>>() {
            Ok(strs) => strs.into_iter().map(str::to_string).collect(),
            Err(_) => return Reply::error(DispatchError::InvalidOption("key is not utf-8".to_string()).to_string()),
        };

        let groups = self.group_by_backend(&keys);
        let mut total = 0i64;
        for (addr, group_keys) in groups {
            let owned: Vec<String> = group_keys.into_iter().cloned().collect();
            let session = self.sessions.get(addr).expect("ring-named backend is registered");
            let result = if verb == "DEL" {
                session.del(ctx, &owned).await
            } else {
                session.exists(ctx, &owned).await
            };
            match result {
                Ok(count) => total += count,
                Err(e) => log::warn!("{verb} on {addr} failed, excluding its shard from the count: {e}"),
            }
        }
        Reply::Integer(total)
    }

    async fn dispatch_keys(&self, pattern: &str, ctx: &CallContext) -> Reply {
        // Fan out to every backend concurrently (§5: join_all over one
        // future per backend) and fail-closed: a single backend error
        // discards the whole result rather than returning a partial list.
        let calls = self.ring.backends().iter().map(|addr| {
            let session = self.sessions.get(addr.as_str()).expect("ring-named backend is registered");
            session.keys(ctx, pattern)
        });

        let mut combined = Vec::new();
        for result in join_all(calls).await {
            match result {
                Ok(mut batch) => combined.append(&mut batch),
                Err(e) => return Reply::error(e.to_string()),
            }
        }
        bulk_array(combined)
    }

    async fn dispatch_delta(&self, args: &[bytes::Bytes], ctx: &CallContext, delta: i64) -> Reply {
        match arg_str(args, 0) {
            Ok(key) => self.apply_delta(key, ctx, delta).await,
            Err(e) => Reply::error(e.to_string()),
        }
    }

    async fn apply_delta(&self, key: &str, ctx: &CallContext, delta: i64) -> Reply {
        let result = if delta >= 0 {
            self.session_for(key).incr_by(ctx, key, delta).await
        } else {
            self.session_for(key).decr_by(ctx, key, -delta).await
        };
        match result {
            Ok(value) => Reply::Integer(value),
            Err(e) => {
                log::warn!("INCR/DECR {key} failed: {e}");
                Reply::Integer(0)
            }
        }
    }
}

fn arg_str(args: &[bytes::Bytes], idx: usize) -> Result<&str, DispatchError> {
    args.get(idx)
        .ok_or_else(|| DispatchError::WrongArity(format!("argument {idx}")))
        .and_then(|b| std::str::from_utf8(b).map_err(|_| DispatchError::InvalidOption("not utf-8".to_string())))
}

fn arg_uint(args: &[bytes::Bytes], idx: usize) -> Result<u64, DispatchError> {
    arg_str(args, idx)?
        .parse()
        .map_err(|_| DispatchError::InvalidOption(format!("argument {idx} is not a non-negative integer")))
}

fn arg_int(args: &[bytes::Bytes], idx: usize) -> Result<i64, DispatchError> {
    arg_str(args, idx)?
        .parse()
        .map_err(|_| DispatchError::InvalidOption(format!("argument {idx} is not an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackendSession;

    fn cmd(name: &str, args: &[&str]) -> Command {
        Command {
            name: name.to_string(),
            args: args.iter().map(|a| bytes::Bytes::from(a.to_string())).collect(),
        }
    }

    /// Three backends, with `key_0..key_19` → `value_0..value_19` seeded on
    /// whichever backend the ring actually assigns each key to — the §8
    /// end-to-end fixture.
    fn seeded_dispatcher() -> Dispatcher<MockBackendSession> {
        let backends = vec!["b0".to_string(), "b1".to_string(), "b2".to_string()];
        let ring = Ring::new(backends.clone(), 10);

        let mut grouped: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for i in 0..20 {
            let key = format!("key_{i}");
            let value = format!("value_{i}");
            let addr = ring.node_for(&key).to_string();
            grouped.entry(addr).or_default().push((key, value));
        }

        let sessions = backends
            .into_iter()
            .map(|addr| {
                let entries = grouped.remove(&addr).unwrap_or_default();
                (addr, MockBackendSession::seeded(entries))
            })
            .collect();

        Dispatcher::new(ring, sessions)
    }

    #[tokio::test]
    async fn get_hit_and_miss() {
        let dispatcher = seeded_dispatcher();
        let ctx = CallContext::background();
        assert_eq!(
            dispatcher.dispatch(cmd("GET", &["key_7"]), &ctx).await,
            Reply::bulk("value_7")
        );
        assert_eq!(dispatcher.dispatch(cmd("GET", &["foo"]), &ctx).await, Reply::null_bulk());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dispatcher = seeded_dispatcher();
        let ctx = CallContext::background();
        assert_eq!(
            dispatcher.dispatch(cmd("SET", &["new_key", "new value"]), &ctx).await,
            Reply::ok()
        );
        assert_eq!(
            dispatcher.dispatch(cmd("GET", &["new_key"]), &ctx).await,
            Reply::bulk("new value")
        );
    }

    #[tokio::test]
    async fn del_removes_across_backends_and_sums() {
        let dispatcher = seeded_dispatcher();
        let ctx = CallContext::background();
        let reply = dispatcher
            .dispatch(cmd("DEL", &["key_0", "key_1", "key_2", "key_3", "key_4"]), &ctx)
            .await;
        assert_eq!(reply, Reply::Integer(5));
        assert_eq!(dispatcher.dispatch(cmd("GET", &["key_0"]), &ctx).await, Reply::null_bulk());
        assert_eq!(
            dispatcher.dispatch(cmd("GET", &["key_5"]), &ctx).await,
            Reply::bulk("value_5")
        );
    }

    #[tokio::test]
    async fn keys_star_fans_out_and_concatenates() {
        let dispatcher = seeded_dispatcher();
        let ctx = CallContext::background();
        let reply = dispatcher.dispatch(cmd("KEYS", &["*"]), &ctx).await;
        let Reply::Array(Some(items)) = reply else {
            panic!("expected array reply");
        };
        let mut keys: Vec<String> = items
            .into_iter()
            .map(|r| match r {
                Reply::BulkString(Some(b)) => String::from_utf8(b.to_vec()).unwrap(),
                other => panic!("expected bulk string, got {other:?}"),
            })
            .collect();
        keys.sort();
        let expected: Vec<String> = (0..20).map(|i| format!("key_{i}")).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn incr_decr_chain_matches_reference() {
        let dispatcher = seeded_dispatcher();
        let ctx = CallContext::background();
        dispatcher.dispatch(cmd("SET", &["counter", "1"]), &ctx).await;
        dispatcher.dispatch(cmd("INCR", &["counter"]), &ctx).await;
        dispatcher.dispatch(cmd("INCRBY", &["counter", "8"]), &ctx).await;
        dispatcher.dispatch(cmd("DECR", &["counter"]), &ctx).await;
        dispatcher.dispatch(cmd("DECRBY", &["counter", "4"]), &ctx).await;
        assert_eq!(
            dispatcher.dispatch(cmd("GET", &["counter"]), &ctx).await,
            Reply::bulk("5")
        );
    }

    #[tokio::test]
    async fn ttl_and_expire() {
        let dispatcher = seeded_dispatcher();
        let ctx = CallContext::background();
        dispatcher.dispatch(cmd("SET", &["k", "v"]), &ctx).await;
        assert_eq!(dispatcher.dispatch(cmd("TTL", &["k"]), &ctx).await, Reply::Integer(0));
        dispatcher.dispatch(cmd("EXPIRE", &["k", "10"]), &ctx).await;
        let Reply::Integer(seconds) = dispatcher.dispatch(cmd("TTL", &["k"]), &ctx).await else {
            panic!("expected integer reply");
        };
        assert!(seconds >= 9);
    }

    #[tokio::test]
    async fn unsupported_command_is_an_error_reply() {
        let dispatcher = seeded_dispatcher();
        let ctx = CallContext::background();
        let reply = dispatcher.dispatch(cmd("MGET", &["key_0"]), &ctx).await;
        assert!(matches!(reply, Reply::Error(_)));
    }
}
