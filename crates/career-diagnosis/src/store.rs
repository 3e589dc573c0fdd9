use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use diagnosis_common::error::CommonError;
use diagnosis_common::redis::RedisCache;

use crate::model::{AnswerSet, ClickEvent, DiagnosisRecord, DiagnosisResult};
use crate::questionnaire::Version;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

const INDEX_KEY: &str = "career_diagnosis:records";
const CLICKS_KEY: &str = "career_diagnosis:clicks";
const EVENTS_KEY: &str = "career_diagnosis:events";

pub type SessionId = String;

/// One JSON document per session plus a capped recency index.
#[derive(Clone)]
pub struct RecordStore {
    redis: RedisCache,
    ttl_secs: u64,
    index_max: usize,
}

impl RecordStore {
    pub fn new(redis: RedisCache, ttl_secs: u64, index_max: usize) -> Self {
        Self {
            redis,
            ttl_secs,
            index_max,
        }
    }

    pub async fn is_available(&self) -> bool {
        self.redis.is_available().await
    }

    pub async fn create(&self, version: Version) -> Result<DiagnosisRecord, CommonError> {
        let now = now_ms();
        let record = DiagnosisRecord {
            session_id: new_session_id(),
            version,
            answers: AnswerSet::new(),
            result: None,
            clicks: Vec::new(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.save(&record).await?;
        if !self
            .redis
            .push_capped(INDEX_KEY, &record.session_id, self.index_max)
            .await
        {
            warn!(session_id = %record.session_id, "record saved but not indexed");
        }
        Ok(record)
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<DiagnosisRecord>, CommonError> {
        let Some(raw) = self.redis.try_get(&record_key(session_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub async fn save(&self, record: &DiagnosisRecord) -> Result<(), CommonError> {
        let raw = serde_json::to_string(record)?;
        self.redis
            .try_set_with_ttl(&record_key(&record.session_id), &raw, self.ttl_secs)
            .await
    }

    /// Merges synced answers into the stored record.
    pub async fn update_answers(
        &self,
        session_id: &str,
        answers: AnswerSet,
    ) -> Result<Option<DiagnosisRecord>, CommonError> {
        let Some(mut record) = self.load(session_id).await? else {
            return Ok(None);
        };
        record.answers.merge(answers);
        record.updated_at_ms = now_ms();
        self.save(&record).await?;
        Ok(Some(record))
    }

    pub async fn attach_result(
        &self,
        session_id: &str,
        answers: &AnswerSet,
        result: &DiagnosisResult,
    ) -> Result<Option<DiagnosisRecord>, CommonError> {
        let Some(mut record) = self.load(session_id).await? else {
            return Ok(None);
        };
        record.answers.merge(answers.clone());
        record.result = Some(result.clone());
        record.updated_at_ms = now_ms();
        self.save(&record).await?;
        Ok(Some(record))
    }

    pub async fn record_click(
        &self,
        session_id: &str,
        service_id: &str,
    ) -> Result<Option<DiagnosisRecord>, CommonError> {
        let Some(mut record) = self.load(session_id).await? else {
            return Ok(None);
        };
        let now = now_ms();
        record.clicks.push(ClickEvent {
            service_id: service_id.to_string(),
            clicked_at_ms: now,
        });
        record.updated_at_ms = now;
        self.save(&record).await?;
        self.count_click(service_id).await;
        Ok(Some(record))
    }

    /// Bumps the per-service click counter. Best-effort.
    pub async fn count_click(&self, service_id: &str) {
        let _ = self.redis.hincr_by(CLICKS_KEY, service_id, 1).await;
    }

    /// Bumps the per-event counter. Best-effort.
    pub async fn count_event(&self, name: &str) {
        let _ = self.redis.hincr_by(EVENTS_KEY, name, 1).await;
    }

    /// Most recent records first. Expired entries still in the index are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<DiagnosisRecord>, CommonError> {
        let ids = self
            .redis
            .list_head(INDEX_KEY, limit)
            .await
            .ok_or(CommonError::RedisUnavailable)?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(&id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(CommonError::Serialize(e)) => {
                    warn!(session_id = %id, error = %e, "skipping unreadable record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    pub async fn stats(&self) -> Stats {
        let redis_available = self.redis.is_available().await;
        Stats {
            clicks: counters(self.redis.hgetall(CLICKS_KEY).await),
            events: counters(self.redis.hgetall(EVENTS_KEY).await),
            redis_available,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub clicks: BTreeMap<String, u64>,
    pub events: BTreeMap<String, u64>,
    pub redis_available: bool,
}

fn counters(entries: Option<std::collections::HashMap<String, String>>) -> BTreeMap<String, u64> {
    entries
        .unwrap_or_default()
        .into_iter()
        .map(|(field, value)| (field, value.parse::<u64>().unwrap_or(0)))
        .collect()
}

fn record_key(session_id: &str) -> String {
    format!("career_diagnosis:record:{session_id}")
}

/// Session ids are 32 lowercase hex characters.
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

fn new_session_id() -> SessionId {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();

    let mut h = Sha256::new();
    h.update(now.as_nanos().to_le_bytes());
    h.update(pid.to_le_bytes());
    h.update(counter.to_le_bytes());
    let digest = h.finalize();
    hex_lower(&digest[..16])
}

fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_store() -> RecordStore {
        RecordStore::new(RedisCache::disabled(), 60, 10)
    }

    #[test]
    fn session_ids_are_unique_and_valid() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert!(is_valid_session_id(&a));
        assert!(!is_valid_session_id("../../etc/passwd"));
        assert!(!is_valid_session_id(&a.to_uppercase()));
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = offline_store();
        assert!(matches!(
            store.create(Version::V1).await,
            Err(CommonError::RedisUnavailable)
        ));
        assert!(matches!(
            store.load("0123456789abcdef0123456789abcdef").await,
            Err(CommonError::RedisUnavailable)
        ));
        assert!(matches!(store.recent(10).await, Err(CommonError::RedisUnavailable)));
    }

    #[tokio::test]
    async fn offline_stats_are_empty() {
        let stats = offline_store().stats().await;
        assert!(!stats.redis_available);
        assert!(stats.clicks.is_empty());
        assert!(stats.events.is_empty());
    }

    #[test]
    fn counters_ignore_garbage_values() {
        let mut raw = std::collections::HashMap::new();
        raw.insert("agent-it".to_string(), "4".to_string());
        raw.insert("broken".to_string(), "x".to_string());
        let parsed = counters(Some(raw));
        assert_eq!(parsed["agent-it"], 4);
        assert_eq!(parsed["broken"], 0);
    }
}
