//! Lock-protected in-memory view of one session record.
//!
//! Every backend store embeds a [`SessionValues`] and adds only its own
//! `release` logic on top.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::codec::{self, SessionMap};
use super::error::Result;
use super::value::{SessionKey, SessionValue};

/// Session id plus its key/value map behind a reader/writer lock.
#[derive(Debug)]
pub struct SessionValues {
    sid: String,
    values: RwLock<SessionMap>,
}

impl SessionValues {
    pub fn new(sid: impl Into<String>, values: SessionMap) -> Self {
        Self {
            sid: sid.into(),
            values: RwLock::new(values),
        }
    }

    pub fn empty(sid: impl Into<String>) -> Self {
        Self::new(sid, HashMap::new())
    }

    /// Build from stored bytes; empty bytes yield an empty record.
    pub fn decode(sid: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(sid, codec::decode(bytes)?))
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn set(&self, key: SessionKey, value: SessionValue) {
        self.values.write().insert(key, value);
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionValue> {
        self.values.read().get(key).cloned()
    }

    pub fn delete(&self, key: &SessionKey) {
        self.values.write().remove(key);
    }

    pub fn flush(&self) {
        *self.values.write() = HashMap::new();
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub fn snapshot(&self) -> SessionMap {
        self.values.read().clone()
    }

    /// Encode the current map while holding the read lock.
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(&self.values.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn get_returns_none_for_unset_key() {
        let values = SessionValues::empty("sid-1");
        assert_eq!(values.get(&"missing".into()), None);
    }

    #[test]
    fn set_overwrites_existing_value() {
        let values = SessionValues::empty("sid-1");
        values.set("k".into(), 1.into());
        values.set("k".into(), 2.into());
        assert_eq!(values.get(&"k".into()), Some(SessionValue::Int(2)));
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let values = SessionValues::empty("sid-1");
        values.set("a".into(), 1.into());
        values.delete(&"b".into());
        values.delete(&"b".into());
        assert_eq!(values.len(), 1);
        values.delete(&"a".into());
        assert!(values.is_empty());
    }

    #[test]
    fn flush_twice_leaves_empty_record() {
        let values = SessionValues::empty("sid-1");
        for i in 0..10 {
            values.set(i.into(), i.into());
        }
        values.flush();
        assert!(values.is_empty());
        values.flush();
        assert!(values.is_empty());
    }

    #[test]
    fn encode_then_decode_preserves_contents() {
        let values = SessionValues::empty("sid-1");
        values.set("user".into(), "alice".into());
        let bytes = values.encode().unwrap();
        let restored = SessionValues::decode("sid-1", &bytes).unwrap();
        assert_eq!(restored.snapshot(), values.snapshot());
    }

    #[test]
    fn concurrent_writers_on_distinct_keys() {
        let values = Arc::new(SessionValues::empty("sid-1"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let values = Arc::clone(&values);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        values.set((t * 100 + i).into(), i.into());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(values.len(), 400);
    }
}
