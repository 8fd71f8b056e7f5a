//! Redis-backed shared store.
//!
//! Transactions run as Lua scripts on the server, so the read-modify-write
//! of a bucket is never interleaved with another client's.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};
use tracing::{debug, info};

use super::{SharedStore, Transaction};
use crate::config::StoreConfig;
use crate::error::{Result, TokenHiveError, TransactionError};

/// KEYS[1] holds the token count, KEYS[2] the last refresh timestamp.
/// Keys are not copied into locals so the script stays compatible with
/// proxies that rewrite KEYS.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local ttl = math.max(1, math.floor(2 * capacity / rate))

local last_tokens = tonumber(redis.call("GET", KEYS[1]))
if last_tokens == nil then
    last_tokens = capacity
end

local last_refreshed = tonumber(redis.call("GET", KEYS[2]))
if last_refreshed == nil then
    last_refreshed = 0
end

local delta = math.max(0, now - last_refreshed)
local filled = math.min(capacity, last_tokens + (delta * rate))
local new_tokens = filled
local allowed = 0
if filled >= requested then
    new_tokens = filled - requested
    allowed = 1
end

redis.call("SETEX", KEYS[1], ttl, new_tokens)
redis.call("SETEX", KEYS[2], ttl, now)

return allowed
"#;

const PERIOD_WINDOW_SCRIPT: &str = r#"
local quota = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local current = redis.call("INCRBY", KEYS[1], 1)
if current == 1 then
    redis.call("PEXPIRE", KEYS[1], window)
    return 1
elseif current < quota then
    return 1
elseif current == quota then
    return 2
else
    return 3
end
"#;

/// A [`SharedStore`] talking to a single Redis endpoint.
///
/// The connection is multiplexed and reconnects on its own after a failure;
/// clones share it.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    token_script: Script,
    period_script: Script,
    response_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| TokenHiveError::Config(format!("Invalid store url: {}", e)))?;

        let connect_timeout = config.connect_timeout();
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                TransactionError::Timeout(format!("no connection within {:?}", connect_timeout))
            })?
            .map_err(TransactionError::from)?;

        info!(url = %config.url, "Connected to shared store");

        Ok(Self {
            conn,
            token_script: Script::new(TOKEN_BUCKET_SCRIPT),
            period_script: Script::new(PERIOD_WINDOW_SCRIPT),
            response_timeout: config.response_timeout(),
        })
    }

    /// Bound a store call by the response timeout.
    async fn bounded<T, F>(&self, call: F) -> std::result::Result<T, TransactionError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.response_timeout, call).await {
            Ok(result) => result.map_err(TransactionError::from),
            Err(_) => Err(TransactionError::Timeout(format!(
                "no reply within {:?}",
                self.response_timeout
            ))),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn evaluate(&self, transaction: &Transaction) -> std::result::Result<i64, TransactionError> {
        let mut conn = self.conn.clone();

        let invocation = match transaction {
            Transaction::TokenBucket {
                keys,
                params,
                now,
                requested,
            } => {
                let mut invocation = self.token_script.prepare_invoke();
                invocation
                    .key(&keys.tokens)
                    .key(&keys.timestamp)
                    .arg(params.rate())
                    .arg(params.capacity())
                    .arg(*now)
                    .arg(*requested);
                invocation
            }
            Transaction::PeriodWindow {
                key,
                quota,
                period_ms,
            } => {
                let mut invocation = self.period_script.prepare_invoke();
                invocation.key(key).arg(*quota).arg(*period_ms);
                invocation
            }
        };

        let reply: Value = self.bounded(invocation.invoke_async(&mut conn)).await?;
        match reply {
            Value::Int(code) => Ok(code),
            other => {
                debug!(reply = ?other, "Store script returned a non-integer reply");
                Err(TransactionError::UnexpectedReply(format!("{:?}", other)))
            }
        }
    }

    async fn ping(&self) -> std::result::Result<(), TransactionError> {
        let mut conn = self.conn.clone();
        let _: Value = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
