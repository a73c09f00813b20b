//! Key and value types held by a session record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminated key of a session record, compared structurally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionKey {
    Str(String),
    Int(i64),
    Composite(Vec<SessionKey>),
}

/// Tagged value stored under a [`SessionKey`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Str(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    List(Vec<SessionValue>),
    Map(Vec<(SessionKey, SessionValue)>),
}

impl SessionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Composite(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for SessionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for SessionKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SessionKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<Vec<SessionKey>> for SessionKey {
    fn from(value: Vec<SessionKey>) -> Self {
        Self::Composite(value)
    }
}

impl From<&str> for SessionValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for SessionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SessionValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for SessionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for SessionValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<u8>> for SessionValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<SessionValue>> for SessionValue {
    fn from(value: Vec<SessionValue>) -> Self {
        Self::List(value)
    }
}

/// JSON has no literal for NaN or the infinities, so those are written as
/// strings and parsed back on read.
mod float_repr {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(n),
            Repr::Text(t) => match t.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::custom(format!("invalid float {other:?}"))),
            },
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_compare_structurally() {
        let a = SessionKey::Composite(vec!["user".into(), 7.into()]);
        let b = SessionKey::Composite(vec![SessionKey::Str("user".into()), SessionKey::Int(7)]);
        assert_eq!(a, b);

        let set: HashSet<SessionKey> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn string_and_int_keys_are_distinct() {
        assert_ne!(SessionKey::from("1"), SessionKey::from(1));
    }

    #[test]
    fn accessors_match_variant() {
        assert_eq!(SessionValue::from("alice").as_str(), Some("alice"));
        assert_eq!(SessionValue::from(42).as_i64(), Some(42));
        assert_eq!(SessionValue::from(42).as_f64(), Some(42.0));
        assert_eq!(SessionValue::from(true).as_bool(), Some(true));
        assert_eq!(SessionValue::from(vec![1u8, 2]).as_bytes(), Some(&[1u8, 2][..]));
        assert!(SessionValue::Null.is_null());
        assert_eq!(SessionValue::from("x").as_i64(), None);
    }

    #[test]
    fn bytes_serialize_as_base64() {
        let json = serde_json::to_string(&SessionValue::Bytes(b"hi".to_vec())).unwrap();
        assert_eq!(json, r#"{"Bytes":"aGk="}"#);
    }

    #[test]
    fn non_finite_floats_serialize_as_strings() {
        let json = serde_json::to_string(&SessionValue::Float(f64::NEG_INFINITY)).unwrap();
        assert_eq!(json, r#"{"Float":"-inf"}"#);
        let json = serde_json::to_string(&SessionValue::Float(0.25)).unwrap();
        assert_eq!(json, r#"{"Float":0.25}"#);
    }

    #[test]
    fn unknown_float_text_is_rejected() {
        assert!(serde_json::from_str::<SessionValue>(r#"{"Float":"lots"}"#).is_err());
    }

    #[test]
    fn display_renders_nested_values() {
        let v = SessionValue::Map(vec![(
            SessionKey::from("tags"),
            SessionValue::List(vec!["a".into(), 1.into()]),
        )]);
        assert_eq!(v.to_string(), r#"{"tags": ["a", 1]}"#);
    }
}
