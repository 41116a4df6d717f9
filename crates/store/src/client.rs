//! Redis-backed journey and run persistence.
//!
//! Journeys are JSON strings indexed by a sorted set; runs are hashes with
//! one sorted-set index per status, scored by a shared insertion sequence.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};
use uuid::Uuid;

use carepath_core::config::StoreConfig;
use carepath_core::error::{StoreError, StoreResult};
use carepath_core::types::{Journey, JourneyDraft, JourneyRun, PatientContext, RunPatch, RunStatus};
use carepath_journey::store::{JourneyStore, RunStore};

use crate::codec::{decode_run, encode_patch, encode_run};

/// Applies a run patch only while the run is `in_progress`, moving it between
/// status indexes when the status changes.
///
/// KEYS: run hash, in_progress index, completed index, failed index.
/// ARGV: run id, target status (or ""), number of set pairs, set pairs...,
/// fields to delete...
/// Returns 1 on success, 0 when the run is unknown, -1 when it is finalized.
const UPDATE_RUN_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return 0
end
if current ~= 'in_progress' then
  return -1
end
local pairs_count = tonumber(ARGV[3])
local i = 4
for _ = 1, pairs_count do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
  i = i + 2
end
while i <= #ARGV do
  redis.call('HDEL', KEYS[1], ARGV[i])
  i = i + 1
end
local target = ARGV[2]
if target ~= '' and target ~= current then
  local indexes = { in_progress = KEYS[2], completed = KEYS[3], failed = KEYS[4] }
  local seq = redis.call('HGET', KEYS[1], 'seq')
  redis.call('ZREM', KEYS[2], ARGV[1])
  redis.call('ZADD', indexes[target], seq, ARGV[1])
end
return 1
";

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Journey and run store over a single managed Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    update_run: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisStore {
    /// Connects and verifies with `PING`, retrying `connect_retries` times.
    /// Exhausting the retries is an error; callers treat it as fatal.
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let attempts = config.connect_retries.max(1);
        let delay = Duration::from_millis(config.retry_delay_ms);

        for attempt in 1..=attempts {
            info!(url = %config.redis_url, attempt, attempts, "Connecting to Redis");
            match Self::open(&client).await {
                Ok(conn) => {
                    info!("Redis connection established");
                    return Ok(Self::with_connection(conn, &config.key_prefix));
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Redis connection attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(anyhow!(
            "could not connect to Redis at {} after {} attempts",
            config.redis_url,
            attempts
        ))
    }

    async fn open(client: &redis::Client) -> redis::RedisResult<ConnectionManager> {
        let mut conn = ConnectionManager::new(client.clone()).await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(response = %pong, "Redis PING");
        Ok(conn)
    }

    pub fn with_connection(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
            update_run: Script::new(UPDATE_RUN_SCRIPT),
        }
    }

    fn seq_key(&self) -> String {
        format!("{}seq", self.prefix)
    }

    fn journey_key(&self, id: Uuid) -> String {
        format!("{}journey:{id}", self.prefix)
    }

    fn journeys_index(&self) -> String {
        format!("{}journeys", self.prefix)
    }

    fn run_key(&self, id: Uuid) -> String {
        format!("{}run:{id}", self.prefix)
    }

    fn runs_index(&self, status: RunStatus) -> String {
        format!("{}runs:{}", self.prefix, status.as_str())
    }

    async fn next_seq(&self) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        conn.incr(self.seq_key(), 1u64).await.map_err(backend)
    }
}

#[async_trait]
impl JourneyStore for RedisStore {
    async fn create_journey(&self, draft: JourneyDraft) -> StoreResult<Journey> {
        let journey = draft.into_journey(Uuid::new_v4(), Utc::now());
        let json = serde_json::to_string(&journey)?;
        let seq = self.next_seq().await?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .set(self.journey_key(journey.id), json)
            .ignore()
            .zadd(self.journeys_index(), journey.id.to_string(), seq)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend)?;

        metrics::counter!("store.redis.writes", "kind" => "journey").increment(1);
        Ok(journey)
    }

    async fn get_journey(&self, id: Uuid) -> StoreResult<Option<Journey>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(self.journey_key(id)).await.map_err(backend)?;
        data.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn list_journeys(&self) -> StoreResult<Vec<Journey>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrevrange(self.journeys_index(), 0, -1)
            .await
            .map_err(backend)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}journey:{id}", self.prefix))
            .collect();
        let rows: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        rows.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl RunStore for RedisStore {
    async fn create_run(
        &self,
        journey_id: Uuid,
        patient_context: PatientContext,
        start_node_id: String,
    ) -> StoreResult<JourneyRun> {
        let run = JourneyRun::new(journey_id, patient_context, start_node_id);
        let seq = self.next_seq().await?;
        let fields = encode_run(&run, seq)?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(self.run_key(run.id), &fields)
            .ignore()
            .zadd(self.runs_index(run.status), run.id.to_string(), seq)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend)?;

        metrics::counter!("store.redis.writes", "kind" => "run").increment(1);
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<JourneyRun>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(self.run_key(id)).await.map_err(backend)?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_run(id, fields).map(Some)
    }

    async fn update_run(&self, id: Uuid, patch: RunPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let fields = encode_patch(&patch, Utc::now());
        let mut invocation = self.update_run.prepare_invoke();
        invocation
            .key(self.run_key(id))
            .key(self.runs_index(RunStatus::InProgress))
            .key(self.runs_index(RunStatus::Completed))
            .key(self.runs_index(RunStatus::Failed))
            .arg(id.to_string())
            .arg(fields.target_status.map(|s| s.as_str()).unwrap_or(""))
            .arg(fields.set.len());
        for (field, value) in &fields.set {
            invocation.arg(*field).arg(value);
        }
        for field in &fields.delete {
            invocation.arg(*field);
        }

        let mut conn = self.conn.clone();
        let outcome: i64 = invocation.invoke_async(&mut conn).await.map_err(backend)?;
        match outcome {
            1 => Ok(()),
            0 => Err(StoreError::RunNotFound(id)),
            _ => Err(StoreError::RunFinalized(id)),
        }
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> StoreResult<Vec<JourneyRun>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrange(self.runs_index(status), 0, -1)
            .await
            .map_err(backend)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = ids
            .iter()
            .map(|raw| {
                Uuid::parse_str(raw)
                    .map_err(|e| StoreError::Backend(format!("malformed run id {raw}: {e}")))
            })
            .collect::<StoreResult<Vec<Uuid>>>()?;

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.run_key(*id));
        }
        let rows: Vec<HashMap<String, String>> =
            pipe.query_async(&mut conn).await.map_err(backend)?;

        ids.into_iter()
            .zip(rows)
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(id, fields)| decode_run(id, fields))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carepath_core::types::{CareCondition, Language, MessageNode, Node};

    fn config() -> StoreConfig {
        StoreConfig {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: format!("carepath-test-{}:", Uuid::new_v4()),
            connect_retries: 1,
            retry_delay_ms: 10,
            ..StoreConfig::default()
        }
    }

    fn draft() -> JourneyDraft {
        JourneyDraft {
            name: "Redis".to_string(),
            start_node_id: "only".to_string(),
            nodes: vec![Node::Message(MessageNode {
                id: "only".to_string(),
                message: "hi".to_string(),
                next_node_id: None,
            })],
        }
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis server
    async fn test_redis_round_trip() {
        let store = RedisStore::connect(&config()).await.unwrap();

        let first = store.create_journey(draft()).await.unwrap();
        let second = store.create_journey(draft()).await.unwrap();
        let listed: Vec<Uuid> = store
            .list_journeys()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(listed, vec![second.id, first.id]);
        assert_eq!(store.get_journey(first.id).await.unwrap().unwrap(), first);

        let context = PatientContext::new("p-1", 70u32, Language::En, CareCondition::LiverReplacement);
        let run = store
            .create_run(first.id, context, "only".to_string())
            .await
            .unwrap();
        store.update_run(run.id, RunPatch::advance("only")).await.unwrap();

        let active = store.list_runs_by_status(RunStatus::InProgress).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].current_node_id.as_deref(), Some("only"));

        store.update_run(run.id, RunPatch::completed(Utc::now())).await.unwrap();
        let done = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.current_node_id.is_none());
        assert!(store
            .list_runs_by_status(RunStatus::InProgress)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.list_runs_by_status(RunStatus::Completed).await.unwrap().len(),
            1
        );

        let err = store
            .update_run(run.id, RunPatch::failed(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RunFinalized(_)));

        let err = store
            .update_run(Uuid::new_v4(), RunPatch::advance("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound(_)));
    }
}
