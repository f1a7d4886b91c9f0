//! Redis-backed [`KvStore`].
//!
//! Batches run as `MULTI`/`EXEC` pipelines, and the check-and-revoke and
//! window-admit steps run as Lua scripts, so each is a single atomic step on
//! the server. `take` uses `GETDEL` and needs Redis 6.2 or later. Every call
//! is bounded by the configured timeout.

use super::errors::{StoreError, StoreResult};
use super::timeouts::with_timeout;
use super::{KvStore, RevokeOutcome, WriteOp, ensure_positive_ttl};
use async_trait::async_trait;
use redis::Client;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::info;

/// KEYS[1] = target, KEYS[2] = marker, ARGV[1] = fallback TTL in ms
const REVOKE_ONCE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then
    return {'revoked'}
end
local value = redis.call('GET', KEYS[1])
if not value then
    return {'missing'}
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl <= 0 then
    ttl = tonumber(ARGV[1])
end
redis.call('SET', KEYS[2], '1', 'PX', ttl)
return {'claimed', value}
"#;

/// KEYS[1] = window, ARGV = since ms, max, score ms, member, ttl ms
const WINDOW_ADMIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
if count < tonumber(ARGV[2]) then
    redis.call('ZADD', KEYS[1], ARGV[3], ARGV[4])
    redis.call('PEXPIRE', KEYS[1], ARGV[5])
end
return count
"#;

/// Redis store over a multiplexed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    timeout: Duration,
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisStore {
    /// Connect to `redis_url`
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Connection string, e.g. `redis://127.0.0.1:6379/0`
    /// * `timeout` - Budget for each store call, including this connect
    ///
    /// # Errors
    ///
    /// * `StoreError::Unavailable` - URL invalid or server unreachable
    /// * `StoreError::Timeout` - Connect did not finish in time
    pub async fn connect(redis_url: &str, timeout: Duration) -> StoreResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = with_timeout(timeout, ConnectionManager::new(client)).await?;
        info!(timeout_ms = timeout.as_millis() as u64, "Redis store connected");
        Ok(Self { manager, timeout })
    }

    /// Wrap an existing connection manager
    pub fn from_manager(manager: ConnectionManager, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    /// Round-trip `PING`
    pub async fn health_check(&self) -> StoreResult<()> {
        let mut con = self.manager.clone();
        let _: String = with_timeout(self.timeout, redis::cmd("PING").query_async(&mut con)).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut con = self.manager.clone();
        with_timeout(self.timeout, redis::cmd("GET").arg(key).query_async(&mut con)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut con = self.manager.clone();
        with_timeout(self.timeout, redis::cmd("EXISTS").arg(key).query_async(&mut con)).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut con = self.manager.clone();
        let ms: i64 =
            with_timeout(self.timeout, redis::cmd("PTTL").arg(key).query_async(&mut con)).await?;
        // -2 missing, -1 no expiry
        Ok((ms > 0).then(|| Duration::from_millis(ms as u64)))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut con = self.manager.clone();
        let removed: i64 =
            with_timeout(self.timeout, redis::cmd("DEL").arg(key).query_async(&mut con)).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut con = self.manager.clone();
        with_timeout(self.timeout, redis::cmd("SMEMBERS").arg(key).query_async(&mut con)).await
    }

    async fn execute(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                WriteOp::SetEx { key, value, ttl } => {
                    ensure_positive_ttl(key, *ttl)?;
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("PX")
                        .arg(millis(*ttl))
                        .ignore();
                }
                WriteOp::SetAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                WriteOp::SetRemove { key, member } => {
                    pipe.cmd("SREM").arg(key).arg(member).ignore();
                }
                WriteOp::Expire { key, ttl } => {
                    ensure_positive_ttl(key, *ttl)?;
                    pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl)).ignore();
                }
                WriteOp::WindowAdd {
                    key,
                    score_ms,
                    member,
                } => {
                    pipe.cmd("ZADD").arg(key).arg(*score_ms).arg(member).ignore();
                }
            }
        }

        let mut con = self.manager.clone();
        with_timeout(self.timeout, pipe.query_async::<_, ()>(&mut con)).await
    }

    async fn revoke_once(
        &self,
        target: &str,
        marker: &str,
        fallback_ttl: Duration,
    ) -> StoreResult<RevokeOutcome> {
        ensure_positive_ttl(marker, fallback_ttl)?;
        let script = redis::Script::new(REVOKE_ONCE_SCRIPT);
        let mut invocation = script.key(target);
        invocation.key(marker).arg(millis(fallback_ttl));

        let mut con = self.manager.clone();
        let reply: Vec<String> =
            with_timeout(self.timeout, invocation.invoke_async(&mut con)).await?;

        match reply.as_slice() {
            [status] if status == "revoked" => Ok(RevokeOutcome::AlreadyRevoked),
            [status] if status == "missing" => Ok(RevokeOutcome::Missing),
            [status, value] if status == "claimed" => Ok(RevokeOutcome::Revoked(value.clone())),
            _ => Err(StoreError::Corrupt {
                key: target.to_string(),
                reason: format!("unexpected script reply: {reply:?}"),
            }),
        }
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut con = self.manager.clone();
        with_timeout(self.timeout, redis::cmd("GETDEL").arg(key).query_async(&mut con)).await
    }

    async fn window_admit(
        &self,
        key: &str,
        since_ms: i64,
        max: u64,
        score_ms: i64,
        member: &str,
        ttl: Duration,
    ) -> StoreResult<u64> {
        ensure_positive_ttl(key, ttl)?;
        let script = redis::Script::new(WINDOW_ADMIT_SCRIPT);
        let mut invocation = script.key(key);
        invocation
            .arg(since_ms)
            .arg(max)
            .arg(score_ms)
            .arg(member)
            .arg(millis(ttl));

        let mut con = self.manager.clone();
        with_timeout(self.timeout, invocation.invoke_async(&mut con)).await
    }

    async fn window_count(&self, key: &str, since_ms: i64) -> StoreResult<u64> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({since_ms}"))
            .ignore()
            .cmd("ZCARD")
            .arg(key);

        let mut con = self.manager.clone();
        let (count,): (u64,) = with_timeout(self.timeout, pipe.query_async(&mut con)).await?;
        Ok(count)
    }
}
