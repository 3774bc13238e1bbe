use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::error::JudgeError;

/// Builder for every broker key. Nothing outside this type concatenates key
/// strings, so the namespace prefix is enforced in one place.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Keys {
            prefix: prefix.into(),
        }
    }

    /// FIFO list of queued submissions.
    pub fn submissions(&self) -> String {
        format!("{}:submissions", self.prefix)
    }

    /// Hash tracking one in-flight task: `status`, `submitted_at`, `data`,
    /// optionally `running_at`.
    pub fn task(&self, task_id: &str) -> String {
        format!("{}:tasks:{}", self.prefix, task_id)
    }

    /// Single-use list the worker publishes the verdict on.
    pub fn results(&self, task_id: &str) -> String {
        format!("{}:results:{}", self.prefix, task_id)
    }

    pub fn submitted(&self) -> String {
        format!("{}:submitted", self.prefix)
    }

    pub fn fetched(&self) -> String {
        format!("{}:fetched", self.prefix)
    }

    pub fn processed(&self) -> String {
        format!("{}:processed", self.prefix)
    }

    /// Operator-consulted rolling-restart flag ("True"/"False").
    pub fn restart(&self) -> String {
        format!("{}:restart", self.prefix)
    }

    pub fn task_pattern(&self) -> String {
        format!("{}:tasks:*", self.prefix)
    }

    pub fn results_pattern(&self) -> String {
        format!("{}:results:*", self.prefix)
    }

    /// Extract the task id from a full task-hash key.
    pub fn task_id_of(&self, key: &str) -> Option<String> {
        key.strip_prefix(&format!("{}:tasks:", self.prefix))
            .map(|s| s.to_string())
    }

    /// Extract the task id from a full results-list key.
    pub fn result_task_id_of(&self, key: &str) -> Option<String> {
        key.strip_prefix(&format!("{}:results:", self.prefix))
            .map(|s| s.to_string())
    }
}

/// Narrow typed surface over the key/value broker.
///
/// Values are returned as raw bytes; callers decode UTF-8 where the field's
/// semantics require it. One `Broker` per scheduling domain: the supervisor
/// shares a single clone between the HTTP handlers and its loops, each
/// worker process connects on its own. Non-blocking commands ride the
/// multiplexed manager; BLPOP gets a dedicated connection per call, since a
/// blocking command would stall everything multiplexed behind it.
#[derive(Clone)]
pub struct Broker {
    client: redis::Client,
    conn: ConnectionManager,
    pub keys: Keys,
}

impl Broker {
    pub async fn connect(config: &Config) -> Result<Self, JudgeError> {
        let client = redis::Client::open(config.redis_url())?;
        let conn = client.get_connection_manager().await?;
        Ok(Broker {
            client,
            conn,
            keys: Keys::new(config.redis_prefix.clone()),
        })
    }

    pub async fn ping(&self) -> Result<(), JudgeError> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// RPUSH a payload onto a list.
    pub async fn push(&self, list: &str, payload: &[u8]) -> Result<(), JudgeError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(list, payload).await?;
        Ok(())
    }

    /// BLPOP with a timeout, on its own connection. `None` on timeout.
    pub async fn blocking_pop(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, JudgeError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let hit: Option<(String, Vec<u8>)> = conn.blpop(list, timeout.as_secs_f64()).await?;
        Ok(hit.map(|(_, payload)| payload))
    }

    pub async fn length(&self, list: &str) -> Result<u64, JudgeError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(list).await?)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, JudgeError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), JudgeError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    /// Atomic increment; the only mutation counters ever see.
    pub async fn incr(&self, key: &str) -> Result<i64, JudgeError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    pub async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), JudgeError> {
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
        Ok(())
    }

    /// HMGET: one `Option` per requested field, in request order.
    pub async fn hget_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<Vec<u8>>>, JudgeError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field);
        }
        Ok(cmd.query_async(&mut conn).await?)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), JudgeError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    pub async fn delete(&self, keys: &[String]) -> Result<(), JudgeError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, JudgeError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    /// One SCAN step. Returns the next cursor (0 when the iteration is
    /// complete) and the keys produced by this step.
    pub async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), JudgeError> {
        let mut conn = self.conn.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    /// Collect every key matching a pattern by driving SCAN to completion.
    pub async fn scan_all(&self, pattern: &str, count: usize) -> Result<Vec<String>, JudgeError> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, batch) = self.scan(cursor, pattern, count).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}
