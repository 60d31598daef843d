//! Property values.
//!
//! A property is a named, typed scalar describing one aspect of a device
//! (power state, selected input, volume, ...). Values are deliberately
//! opaque to the runtime: translation handlers produce them from wire text
//! and consume them to build commands, and the rest of the system only
//! compares and forwards them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A flat property-name to value map.
///
/// This is the shape of a component's property cache, of a shadow delta,
/// and of a consolidated state report.
pub type PropertyMap = HashMap<String, PropertyValue>;

/// A single property value.
///
/// `Unknown` is the lifecycle sentinel: every property starts as `Unknown`
/// when its translation table is built and stays that way until the first
/// successful decode from the device. Serialization is untagged, so a map
/// of values round-trips as plain JSON (`{"powerState": "ON", "volume": 83}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Not yet reported by the device.
    Unknown,
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this value is still the startup sentinel.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{}", v),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(PropertyValue::Int(42).as_i64(), Some(42));
        assert_eq!(PropertyValue::Int(42).as_f64(), Some(42.0));
        assert_eq!(PropertyValue::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(PropertyValue::Str("ON".into()).as_str(), Some("ON"));
        assert_eq!(PropertyValue::Bool(true).as_bool(), Some(true));
        assert!(PropertyValue::Unknown.is_unknown());
        assert_eq!(PropertyValue::Str("ON".into()).as_i64(), None);
    }

    #[test]
    fn test_untagged_serde() {
        let mut map = PropertyMap::new();
        map.insert("powerState".to_string(), PropertyValue::from("ON"));
        map.insert("volume".to_string(), PropertyValue::from(83i64));
        map.insert("muted".to_string(), PropertyValue::from(false));

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["powerState"], "ON");
        assert_eq!(json["volume"], 83);
        assert_eq!(json["muted"], false);

        let back: PropertyMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_unknown_round_trips_as_null() {
        let json = serde_json::to_string(&PropertyValue::Unknown).unwrap();
        assert_eq!(json, "null");
        let back: PropertyValue = serde_json::from_str(&json).unwrap();
        assert!(back.is_unknown());
    }
}
