use crate::error::StoreError;
use crate::store::{ConfigurationSource, ResultStore, RunMutation, RunSubmitter};
use crate::types::{CaseResult, Run, RunConfiguration};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};
use tracing::debug;
use uuid::Uuid;

/// Redis key semantics - defines only naming and encoding, not orchestration
/// Ensures API, worker and CLI never drift and keys stay deterministic

pub const QUEUE_KEY: &str = "sentinel:queue";
pub const RUN_PREFIX: &str = "sentinel:run";
pub const CONFIG_PREFIX: &str = "sentinel:config";
pub const RESULTS_PREFIX: &str = "sentinel:results";
pub const CANCEL_PREFIX: &str = "sentinel:cancel";

/// Default retention for every run-scoped key: 7 days
pub const DEFAULT_TTL_SECONDS: u64 = 7 * 24 * 3600;

/// Retries for a run update that keeps losing the compare-and-set
pub const MAX_UPDATE_ATTEMPTS: u32 = 16;

// Overwrite KEYS[1] only while it still holds the payload the caller read.
// ARGV: expected payload, new payload, ttl seconds.
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
"#;

pub fn run_key(run_id: &Uuid) -> String {
    format!("{}:{}", RUN_PREFIX, run_id)
}

pub fn config_key(run_id: &Uuid) -> String {
    format!("{}:{}", CONFIG_PREFIX, run_id)
}

pub fn results_key(run_id: &Uuid) -> String {
    format!("{}:{}", RESULTS_PREFIX, run_id)
}

pub fn cancel_key(run_id: &Uuid) -> String {
    format!("{}:{}", CANCEL_PREFIX, run_id)
}

/// Push a run id onto the shared queue
/// Uses RPUSH for FIFO semantics
pub async fn push_run(conn: &mut ConnectionManager, run_id: &Uuid) -> RedisResult<()> {
    conn.rpush(QUEUE_KEY, run_id.to_string()).await
}

/// Pop the next run id from the queue
/// Uses BLPOP with timeout so the worker loop can observe shutdown
pub async fn pop_run(
    conn: &mut ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<Uuid>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let run_id = Uuid::parse_str(&payload).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "invalid run id on queue",
                    e.to_string(),
                ))
            })?;
            Ok(Some(run_id))
        }
        None => Ok(None),
    }
}

/// Redis-backed result store and configuration source
///
/// Runs and configurations are JSON strings, results an append-only list so
/// persisted order equals execution order. Every key carries the store TTL.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
    compare_and_set: Script,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, ttl_seconds: u64) -> Self {
        Self {
            conn,
            ttl_seconds,
            compare_and_set: Script::new(COMPARE_AND_SET),
        }
    }

    pub async fn connect(redis_url: &str, ttl_seconds: u64) -> RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, ttl_seconds))
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn put_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RunSubmitter for RedisStore {
    /// Configuration first, then the run, then the queue entry: a worker that
    /// pops the id always finds both records.
    async fn submit(&self, run: &Run, configuration: &RunConfiguration) -> Result<(), StoreError> {
        self.put_json(&config_key(&run.id), configuration).await?;
        self.create_run(run).await?;
        let mut conn = self.conn.clone();
        push_run(&mut conn, &run.id).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for RedisStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        self.put_json(&run_key(&run.id), run).await
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        self.get_json(&run_key(&run_id)).await
    }

    // Optimistic compare-and-set: the Lua script only writes when the key
    // still holds the exact payload the mutation was applied to. A lost race
    // re-reads and re-applies, so the state machine is always checked against
    // the latest stored run.
    async fn update_run(&self, run_id: Uuid, mutation: RunMutation) -> Result<Run, StoreError> {
        let key = run_key(&run_id);
        let mut conn = self.conn.clone();

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current: Option<String> = conn.get(&key).await?;
            let current = current.ok_or(StoreError::RunNotFound(run_id))?;

            let mut run: Run = serde_json::from_str(&current)?;
            mutation(&mut run)?;
            let next = serde_json::to_string(&run)?;

            let swapped: i32 = self
                .compare_and_set
                .key(&key)
                .arg(&current)
                .arg(&next)
                .arg(self.ttl_seconds)
                .invoke_async(&mut conn)
                .await?;
            if swapped == 1 {
                return Ok(run);
            }
            debug!(run_id = %run_id, attempt, "Run changed during update, retrying");
        }

        Err(StoreError::UpdateConflict {
            run_id,
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    async fn append_result(&self, result: &CaseResult) -> Result<(), StoreError> {
        let key = results_key(&result.run_id);
        let payload = serde_json::to_string(result)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .rpush(&key, payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn results(&self, run_id: Uuid) -> Result<Vec<CaseResult>, StoreError> {
        let mut conn = self.conn.clone();
        let payloads: Vec<String> = conn.lrange(results_key(&run_id), 0, -1).await?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StoreError::from))
            .collect()
    }

    async fn signal_cancel(&self, run_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(cancel_key(&run_id))
            .arg(1)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_cancel_signalled(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(cancel_key(&run_id)).await?;
        Ok(exists)
    }
}

#[async_trait]
impl ConfigurationSource for RedisStore {
    async fn resolve(&self, run_id: Uuid) -> Result<RunConfiguration, StoreError> {
        self.get_json(&config_key(&run_id))
            .await?
            .ok_or(StoreError::ConfigurationNotFound(run_id))
    }
}
