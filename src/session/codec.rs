//! Byte codec for session records.
//!
//! Backends that can only hold bytes store a record as a small versioned
//! JSON document: `{"v":1,"entries":[[key,value],...]}`. Entries are a list of
//! pairs rather than an object so that integer and composite keys survive the
//! round trip.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::{Result, SessionError};
use super::value::{SessionKey, SessionValue};

const PAYLOAD_VERSION: u32 = 1;

pub type SessionMap = HashMap<SessionKey, SessionValue>;

#[derive(Serialize)]
struct PayloadRef<'a> {
    v: u32,
    entries: Vec<(&'a SessionKey, &'a SessionValue)>,
}

#[derive(Deserialize)]
struct Payload {
    v: u32,
    entries: Vec<(SessionKey, SessionValue)>,
}

/// Serialize a record into bytes.
pub fn encode(values: &SessionMap) -> Result<Vec<u8>> {
    let payload = PayloadRef {
        v: PAYLOAD_VERSION,
        entries: values.iter().collect(),
    };
    serde_json::to_vec(&payload)
        .map_err(|e| SessionError::CorruptPayload(format!("failed to encode session: {e}")))
}

/// Deserialize bytes produced by [`encode`]. Empty input is an empty record.
pub fn decode(bytes: &[u8]) -> Result<SessionMap> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(HashMap::new());
    }

    let payload: Payload = serde_json::from_slice(bytes)
        .map_err(|e| SessionError::CorruptPayload(e.to_string()))?;
    if payload.v != PAYLOAD_VERSION {
        return Err(SessionError::CorruptPayload(format!(
            "unsupported payload version {}",
            payload.v
        )));
    }

    Ok(payload.entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_record() -> SessionMap {
        let mut m = HashMap::new();
        m.insert(SessionKey::from("user"), SessionValue::from("alice"));
        m.insert(SessionKey::from(18975), SessionValue::from(18975));
        m.insert(
            SessionKey::Composite(vec!["cart".into(), 3.into()]),
            SessionValue::List(vec![
                SessionValue::from(1.5),
                SessionValue::Null,
                SessionValue::Bytes(vec![0, 255, 7]),
                SessionValue::Map(vec![(SessionKey::from(1), SessionValue::from(false))]),
            ]),
        );
        m
    }

    #[test]
    fn roundtrip_preserves_mixed_keys_and_nested_values() {
        let original = mixed_record();
        let bytes = encode(&original).unwrap();
        assert_eq!(decode(&bytes).unwrap(), original);
    }

    #[test]
    fn non_finite_floats_survive_roundtrip() {
        let mut m = HashMap::new();
        m.insert(SessionKey::from("ratio"), SessionValue::from(f64::INFINITY));
        m.insert(SessionKey::from("low"), SessionValue::from(f64::NEG_INFINITY));
        m.insert(
            SessionKey::from("nested"),
            SessionValue::List(vec![SessionValue::from(f64::NAN)]),
        );

        let decoded = decode(&encode(&m).unwrap()).unwrap();
        assert_eq!(decoded[&SessionKey::from("ratio")], SessionValue::Float(f64::INFINITY));
        assert_eq!(decoded[&SessionKey::from("low")], SessionValue::Float(f64::NEG_INFINITY));
        match &decoded[&SessionKey::from("nested")] {
            SessionValue::List(items) => {
                assert!(items[0].as_f64().is_some_and(f64::is_nan));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn empty_bytes_decode_to_empty_record() {
        assert!(decode(&[]).unwrap().is_empty());
        assert!(decode(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn empty_record_roundtrips() {
        let bytes = encode(&HashMap::new()).unwrap();
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn malformed_bytes_are_corrupt_payload() {
        let err = decode(b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, SessionError::CorruptPayload(_)));
    }

    #[test]
    fn unknown_version_is_corrupt_payload() {
        let err = decode(br#"{"v":99,"entries":[]}"#).unwrap_err();
        assert!(matches!(err, SessionError::CorruptPayload(msg) if msg.contains("99")));
    }

    #[test]
    fn bad_base64_is_corrupt_payload() {
        let err = decode(br#"{"v":1,"entries":[[{"Str":"k"},{"Bytes":"!!!"}]]}"#).unwrap_err();
        assert!(matches!(err, SessionError::CorruptPayload(_)));
    }
}
