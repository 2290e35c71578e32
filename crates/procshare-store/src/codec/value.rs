//! Typed scalar values and their fixed byte encodings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type tag stored in each slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ValueType {
    /// 32-bit signed integer.
    Int = 1,
    /// 64-bit signed integer.
    Long = 2,
    /// 32-bit IEEE float.
    Float = 3,
    /// Boolean stored as one byte.
    Boolean = 4,
    /// UTF-8 string.
    String = 5,
    /// Array of 32-bit signed integers.
    IntArray = 6,
}

impl ValueType {
    /// Get the on-disk tag.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parse an on-disk tag.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Int),
            2 => Some(Self::Long),
            3 => Some(Self::Float),
            4 => Some(Self::Boolean),
            5 => Some(Self::String),
            6 => Some(Self::IntArray),
            _ => None,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Boolean => "bool",
            Self::String => "string",
            Self::IntArray => "int_array",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "i32" => Ok(Self::Int),
            "long" | "i64" => Ok(Self::Long),
            "float" | "f32" => Ok(Self::Float),
            "bool" | "boolean" => Ok(Self::Boolean),
            "string" | "str" => Ok(Self::String),
            "int_array" | "int-array" => Ok(Self::IntArray),
            other => Err(format!("unknown value type: {other}")),
        }
    }
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit IEEE float.
    Float(f32),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 string.
    String(String),
    /// Array of 32-bit signed integers.
    IntArray(Vec<i32>),
}

impl Value {
    /// Get the type tag of this value.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int,
            Self::Long(_) => ValueType::Long,
            Self::Float(_) => ValueType::Float,
            Self::Boolean(_) => ValueType::Boolean,
            Self::String(_) => ValueType::String,
            Self::IntArray(_) => ValueType::IntArray,
        }
    }

    /// Size of the encoded value in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Int(_) | Self::Float(_) => 4,
            Self::Long(_) => 8,
            Self::Boolean(_) => 1,
            Self::String(s) => s.len(),
            Self::IntArray(v) => v.len() * 4,
        }
    }

    /// Append the little-endian encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Long(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Boolean(v) => out.push(u8::from(*v)),
            Self::String(s) => out.extend_from_slice(s.as_bytes()),
            Self::IntArray(values) => {
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
    }

    /// Decode a value of type `ty` from exactly `data`.
    ///
    /// Returns `None` when the length does not match the type or a string
    /// is not valid UTF-8.
    pub fn decode(ty: ValueType, data: &[u8]) -> Option<Self> {
        match ty {
            ValueType::Int => Some(Self::Int(i32::from_le_bytes(data.try_into().ok()?))),
            ValueType::Long => Some(Self::Long(i64::from_le_bytes(data.try_into().ok()?))),
            ValueType::Float => Some(Self::Float(f32::from_le_bytes(data.try_into().ok()?))),
            ValueType::Boolean => match data {
                [0] => Some(Self::Boolean(false)),
                [1] => Some(Self::Boolean(true)),
                _ => None,
            },
            ValueType::String => std::str::from_utf8(data)
                .ok()
                .map(|s| Self::String(s.to_string())),
            ValueType::IntArray => {
                if data.len() % 4 != 0 {
                    return None;
                }
                Some(Self::IntArray(
                    data.chunks_exact(4)
                        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                ))
            }
        }
    }

    /// Parse a value of type `ty` from its textual form.
    ///
    /// Integer arrays are comma separated; an empty string is an empty array.
    pub fn parse(ty: ValueType, text: &str) -> Result<Self, String> {
        let err = |e: &dyn fmt::Display| format!("invalid {ty} value {text:?}: {e}");
        match ty {
            ValueType::Int => text.trim().parse().map(Self::Int).map_err(|e| err(&e)),
            ValueType::Long => text.trim().parse().map(Self::Long).map_err(|e| err(&e)),
            ValueType::Float => text.trim().parse().map(Self::Float).map_err(|e| err(&e)),
            ValueType::Boolean => text.trim().parse().map(Self::Boolean).map_err(|e| err(&e)),
            ValueType::String => Ok(Self::String(text.to_string())),
            ValueType::IntArray => {
                if text.trim().is_empty() {
                    return Ok(Self::IntArray(Vec::new()));
                }
                text.split(',')
                    .map(|part| part.trim().parse::<i32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::IntArray)
                    .map_err(|e| err(&e))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::IntArray(values) => {
                let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// One named, typed value in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique key.
    pub key: String,
    /// Stored value.
    pub value: Value,
}

impl Entry {
    /// Create a new entry.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_match_legacy_numbering() {
        assert_eq!(ValueType::Int.tag(), 1);
        assert_eq!(ValueType::Long.tag(), 2);
        assert_eq!(ValueType::Float.tag(), 3);
        assert_eq!(ValueType::Boolean.tag(), 4);
        assert_eq!(ValueType::String.tag(), 5);
        assert_eq!(ValueType::IntArray.tag(), 6);
        assert_eq!(ValueType::from_tag(0), None);
        assert_eq!(ValueType::from_tag(7), None);
    }

    #[test]
    fn test_decode_rejects_wrong_lengths() {
        assert!(Value::decode(ValueType::Int, &[1, 2, 3]).is_none());
        assert!(Value::decode(ValueType::Long, &[0; 4]).is_none());
        assert!(Value::decode(ValueType::Boolean, &[2]).is_none());
        assert!(Value::decode(ValueType::Boolean, &[]).is_none());
        assert!(Value::decode(ValueType::IntArray, &[0; 6]).is_none());
        assert!(Value::decode(ValueType::String, &[0xFF, 0xFE]).is_none());
    }

    #[test]
    fn test_encoding_is_little_endian() {
        let mut out = Vec::new();
        Value::Long(0x0102_0304_0506_0708).encode_into(&mut out);
        assert_eq!(out, [8, 7, 6, 5, 4, 3, 2, 1]);

        let mut out = Vec::new();
        Value::IntArray(vec![1, -1]).encode_into(&mut out);
        assert_eq!(out, [1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_float_bits_preserved() {
        let mut out = Vec::new();
        Value::Float(1_245_434.5).encode_into(&mut out);
        assert_eq!(
            Value::decode(ValueType::Float, &out),
            Some(Value::Float(1_245_434.5))
        );
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(Value::parse(ValueType::Int, " 42 "), Ok(Value::Int(42)));
        assert_eq!(Value::parse(ValueType::Boolean, "true"), Ok(Value::Boolean(true)));
        assert_eq!(
            Value::parse(ValueType::IntArray, "1, 2,3"),
            Ok(Value::IntArray(vec![1, 2, 3]))
        );
        assert_eq!(Value::parse(ValueType::IntArray, ""), Ok(Value::IntArray(vec![])));
        assert!(Value::parse(ValueType::Long, "abc").is_err());
        assert_eq!("long".parse::<ValueType>(), Ok(ValueType::Long));
        assert!("blob".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let value = Value::IntArray(vec![4, 5, 6]);
        assert_eq!(Value::parse(ValueType::IntArray, &value.to_string()), Ok(value));
    }
}
