//! Attribute values carried by entities.

use serde::{Deserialize, Serialize};

use crate::entity::SurrogateId;

/// A single field value.
///
/// # Examples
///
/// ```
/// use kyrosync::Value;
///
/// let industry = Value::from("Tech");
/// assert_eq!(industry.as_string(), Some("Tech"));
/// assert!(Value::Null.is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    String(String),
    /// Reference to another record, e.g. a child's parent.
    Id(SurrogateId),
    /// Absent value; treated as missing by required-field checks.
    #[default]
    Null,
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the text of a [`Value::String`].
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the record reference of a [`Value::Id`].
    #[must_use]
    pub const fn as_id(&self) -> Option<SurrogateId> {
        match self {
            Self::Id(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as text, e.g. to derive a parent's natural key.
    ///
    /// Only strings and ids have a text form.
    #[must_use]
    pub fn lookup_text(&self) -> Option<String> {
        match self {
            Self::String(v) => Some(v.clone()),
            Self::Id(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Id(v) => write!(f, "id:{v}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<SurrogateId> for Value {
    fn from(v: SurrogateId) -> Self {
        Self::Id(v)
    }
}
