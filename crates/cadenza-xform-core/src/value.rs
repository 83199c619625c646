use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed scalar carried by metadata facts, auxdata hotspots and stream types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    String(String),
    Bin(Vec<u8>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bin(&self) -> Option<&[u8]> {
        match self {
            Self::Bin(value) => Some(value),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::String(_) => "string",
            Self::Bin(_) => "bin",
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bin(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Bin(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn accessors_only_match_their_own_variant() {
        let int = Value::from(42_i64);
        let text = Value::from("Two");
        let bin = Value::from(vec![1_u8, 2, 3]);

        assert_eq!(int.as_int(), Some(42));
        assert_eq!(int.as_str(), None);
        assert_eq!(text.as_str(), Some("Two"));
        assert_eq!(text.as_int(), None);
        assert_eq!(bin.as_bin(), Some(&[1_u8, 2, 3][..]));
        assert_eq!(bin.to_string(), "<3 bytes>");
    }
}
