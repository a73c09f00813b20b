//! Provider and store contracts every session backend implements.
//!
//! A [`SessionProvider`] owns one backend (its directory, connection or pool)
//! and hands out [`SessionStore`]s, each the in-memory view of a single
//! session record. Stores never touch the backend until
//! [`release`](SessionStore::release) is called.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::session::codec::SessionMap;
use crate::session::error::Result;
use crate::session::state::SessionValues;
use crate::session::value::{SessionKey, SessionValue};

/// How a backend enforces the maximum lifetime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GcPolicy {
    /// `gc` enumerates records and removes the stale ones.
    Sweep,
    /// The backend expires records itself; `gc` is a no-op and `count` is
    /// not supported (always `0`).
    ServerTtl,
}

/// Live handle on one session's key/value state.
///
/// All in-memory operations go through the store's [`SessionValues`], which
/// holds a reader/writer lock for the duration of each call, so a store can be
/// shared across tasks behind an `Arc`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The lock-protected record this store wraps.
    fn values(&self) -> &SessionValues;

    /// Persist the current record to the backend under this store's id,
    /// resetting its expiry. Safe to call repeatedly.
    async fn release(&self) -> Result<()>;

    /// Insert or overwrite a value. Memory only; see [`release`](Self::release).
    fn set(&self, key: SessionKey, value: SessionValue) -> Result<()> {
        self.values().set(key, value);
        Ok(())
    }

    /// Value for `key`, or `None` when unset.
    fn get(&self, key: &SessionKey) -> Option<SessionValue> {
        self.values().get(key)
    }

    /// Remove `key` if present.
    fn delete(&self, key: &SessionKey) -> Result<()> {
        self.values().delete(key);
        Ok(())
    }

    /// Replace the record with an empty one.
    fn flush(&self) -> Result<()> {
        self.values().flush();
        Ok(())
    }

    /// The identifier this store was created for.
    fn session_id(&self) -> &str {
        self.values().sid()
    }

    /// Copy of the current record.
    fn snapshot(&self) -> SessionMap {
        self.values().snapshot()
    }
}

/// Backend adapter: factory and catalog of session records.
///
/// Every id-taking operation rejects identifiers that fail
/// [`validate_session_id`](crate::session::id::validate_session_id) with
/// `SessionError::InvalidSessionId`; absence of a record is never an error.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Parse `config`, open backend resources and remember `max_lifetime`
    /// (seconds). Called once, before the provider is shared.
    async fn init(&mut self, max_lifetime: u64, config: &str) -> Result<()>;

    /// Whether an unexpired record exists for `sid`.
    async fn exists(&self, sid: &str) -> Result<bool>;

    /// Store over the record for `sid`, creating an empty record if absent.
    async fn read(&self, sid: &str) -> Result<Arc<dyn SessionStore>>;

    /// Move the record at `old_sid` to `sid` and reset its expiry. An absent
    /// `old_sid` yields an empty record at `sid`.
    async fn regenerate(&self, old_sid: &str, sid: &str) -> Result<Arc<dyn SessionStore>>;

    /// Remove the record for `sid`. Succeeds when nothing is stored.
    async fn destroy(&self, sid: &str) -> Result<()>;

    /// Remove records idle for longer than the maximum lifetime.
    async fn gc(&self) -> Result<()>;

    /// Number of records currently held (best effort).
    async fn count(&self) -> Result<usize>;

    fn gc_policy(&self) -> GcPolicy;

    /// Registry name of this backend.
    fn name(&self) -> &str;
}
