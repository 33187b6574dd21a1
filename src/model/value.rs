//! Recursive, JSON-shaped property value plus a canonical serializer used
//! for state hashing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An arbitrary JSON-like value. Property values are not schema-validated
/// beyond being serializable as one of these variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "bool")]
    Bool(bool),
    #[serde(rename = "int")]
    Int(i64),
    #[serde(rename = "float")]
    Float(f64),
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "bytes")]
    Bytes(Vec<u8>),
    #[serde(rename = "list")]
    List(Vec<PropertyValue>),
    #[serde(rename = "map")]
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Renders the value into a canonical byte string suitable for hashing.
    /// Map keys are already sorted by `BTreeMap`'s iteration order; floats
    /// are rendered via their bit pattern so `NaN`/`-0.0` hash consistently.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            PropertyValue::Null => out.push(0),
            PropertyValue::Bool(b) => {
                out.push(1);
                out.push(*b as u8);
            }
            PropertyValue::Int(i) => {
                out.push(2);
                out.extend_from_slice(&i.to_be_bytes());
            }
            PropertyValue::Float(f) => {
                out.push(3);
                out.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            PropertyValue::String(s) => {
                out.push(4);
                out.extend_from_slice(&(s.len() as u64).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            PropertyValue::Bytes(b) => {
                out.push(5);
                out.extend_from_slice(&(b.len() as u64).to_be_bytes());
                out.extend_from_slice(b);
            }
            PropertyValue::List(items) => {
                out.push(6);
                out.extend_from_slice(&(items.len() as u64).to_be_bytes());
                for item in items {
                    item.write_canonical(out);
                }
            }
            PropertyValue::Map(entries) => {
                out.push(7);
                out.extend_from_slice(&(entries.len() as u64).to_be_bytes());
                for (k, v) in entries {
                    out.extend_from_slice(&(k.len() as u64).to_be_bytes());
                    out.extend_from_slice(k.as_bytes());
                    v.write_canonical(out);
                }
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_differ_across_types() {
        let a = PropertyValue::Int(1).canonical_bytes();
        let b = PropertyValue::Float(1.0).canonical_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn map_canonicalization_is_order_independent() {
        let mut m1 = BTreeMap::new();
        m1.insert("a".to_string(), PropertyValue::Int(1));
        m1.insert("b".to_string(), PropertyValue::Int(2));
        let mut m2 = BTreeMap::new();
        m2.insert("b".to_string(), PropertyValue::Int(2));
        m2.insert("a".to_string(), PropertyValue::Int(1));
        assert_eq!(
            PropertyValue::Map(m1).canonical_bytes(),
            PropertyValue::Map(m2).canonical_bytes()
        );
    }
}
