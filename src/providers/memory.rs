//! Process-local backend. Records live in a hash map and vanish with the
//! process; useful for tests, single-node deployments and the CLI's dry runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::traits::{GcPolicy, SessionProvider, SessionStore};
use crate::session::error::Result;
use crate::session::id::validate_session_id;
use crate::session::state::SessionValues;

#[derive(Debug, Clone)]
struct Record {
    data: Vec<u8>,
    touched: Instant,
}

type RecordMap = Arc<RwLock<HashMap<String, Record>>>;

/// In-memory provider; expiry tracked with a monotonic last-touch instant.
pub struct MemoryProvider {
    records: RecordMap,
    max_lifetime: Duration,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            max_lifetime: Duration::ZERO,
        }
    }

    fn is_expired(&self, record: &Record) -> bool {
        record.touched.elapsed() > self.max_lifetime
    }

    fn store(&self, sid: &str, data: &[u8]) -> Result<Arc<dyn SessionStore>> {
        Ok(Arc::new(MemoryStore {
            values: SessionValues::decode(sid, data)?,
            records: Arc::clone(&self.records),
        }))
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for MemoryProvider {
    async fn init(&mut self, max_lifetime: u64, _config: &str) -> Result<()> {
        self.max_lifetime = Duration::from_secs(max_lifetime);
        Ok(())
    }

    async fn exists(&self, sid: &str) -> Result<bool> {
        validate_session_id(sid)?;
        Ok(self
            .records
            .read()
            .get(sid)
            .is_some_and(|r| !self.is_expired(r)))
    }

    async fn read(&self, sid: &str) -> Result<Arc<dyn SessionStore>> {
        validate_session_id(sid)?;
        let data = {
            let mut records = self.records.write();
            let record = records.entry(sid.to_string()).or_insert_with(|| Record {
                data: Vec::new(),
                touched: Instant::now(),
            });
            record.touched = Instant::now();
            record.data.clone()
        };
        self.store(sid, &data)
    }

    async fn regenerate(&self, old_sid: &str, sid: &str) -> Result<Arc<dyn SessionStore>> {
        validate_session_id(old_sid)?;
        validate_session_id(sid)?;
        let data = {
            let mut records = self.records.write();
            let data = records
                .remove(old_sid)
                .map(|r| r.data)
                .unwrap_or_default();
            records.insert(
                sid.to_string(),
                Record {
                    data: data.clone(),
                    touched: Instant::now(),
                },
            );
            data
        };
        self.store(sid, &data)
    }

    async fn destroy(&self, sid: &str) -> Result<()> {
        validate_session_id(sid)?;
        self.records.write().remove(sid);
        Ok(())
    }

    async fn gc(&self) -> Result<()> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| !self.is_expired(r));
        let removed = before - records.len();
        if removed > 0 {
            tracing::debug!(provider = "memory", removed, "Expired sessions removed");
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }

    fn gc_policy(&self) -> GcPolicy {
        GcPolicy::Sweep
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryStore {
    values: SessionValues,
    records: RecordMap,
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn values(&self) -> &SessionValues {
        &self.values
    }

    async fn release(&self) -> Result<()> {
        let data = self.values.encode()?;
        self.records.write().insert(
            self.values.sid().to_string(),
            Record {
                data,
                touched: Instant::now(),
            },
        );
        Ok(())
    }
}
