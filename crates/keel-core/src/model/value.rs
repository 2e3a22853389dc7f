use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Primitive types a tag value or a structure attribute may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Boolean,
    Long,
}

impl ValueType {
    /// Stable lowercase name, also used as the persisted type discriminator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a type name or a raw value cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseValueError {
    #[error("unknown value type '{0}': expected string, integer, boolean, or long")]
    UnknownType(String),

    #[error("'{raw}' is not a valid {expected} value")]
    InvalidLiteral { raw: String, expected: ValueType },
}

impl FromStr for ValueType {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(Self::String),
            "integer" | "int" => Ok(Self::Integer),
            "boolean" | "bool" => Ok(Self::Boolean),
            "long" => Ok(Self::Long),
            other => Err(ParseValueError::UnknownType(other.to_string())),
        }
    }
}

/// A typed scalar.
///
/// The variant is the type: a string `"1"` and an integer `1` never compare
/// equal, in memory or in either storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Integer(i32),
    Boolean(bool),
    Long(i64),
}

impl Value {
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Integer(_) => ValueType::Integer,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Long(_) => ValueType::Long,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Parse `raw` as a literal of type `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseValueError::InvalidLiteral`] if `raw` does not parse.
    pub fn parse(ty: ValueType, raw: &str) -> Result<Self, ParseValueError> {
        let invalid = || ParseValueError::InvalidLiteral {
            raw: raw.to_string(),
            expected: ty,
        };
        match ty {
            ValueType::String => Ok(Self::String(raw.to_string())),
            ValueType::Integer => raw.trim().parse().map(Self::Integer).map_err(|_| invalid()),
            ValueType::Long => raw.trim().parse().map(Self::Long).map_err(|_| invalid()),
            ValueType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Self::Boolean(true)),
                "false" => Ok(Self::Boolean(false)),
                _ => Err(invalid()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
        }
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

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_and_integer_never_compare_equal() {
        assert_ne!(Value::from("1"), Value::from(1));
        assert_ne!(Value::Integer(1), Value::Long(1));
    }

    #[test]
    fn parse_respects_declared_type() {
        assert_eq!(Value::parse(ValueType::Integer, "42"), Ok(Value::Integer(42)));
        assert_eq!(Value::parse(ValueType::Boolean, "TRUE"), Ok(Value::Boolean(true)));
        assert_eq!(
            Value::parse(ValueType::String, "42"),
            Ok(Value::String("42".to_string()))
        );
        assert!(matches!(
            Value::parse(ValueType::Long, "forty"),
            Err(ParseValueError::InvalidLiteral { .. })
        ));
    }

    #[test]
    fn type_names_round_trip() {
        for ty in [
            ValueType::String,
            ValueType::Integer,
            ValueType::Boolean,
            ValueType::Long,
        ] {
            assert_eq!(ty.as_str().parse::<ValueType>(), Ok(ty));
        }
        assert!("float".parse::<ValueType>().is_err());
    }

    #[test]
    fn serde_shape_is_tagged() {
        let json = serde_json::to_string(&Value::Integer(7)).expect("serialize");
        assert_eq!(json, r#"{"type":"integer","value":7}"#);
    }
}
