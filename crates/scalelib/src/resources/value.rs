use crate::common::Map;
use crate::resources::Size;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub type ResourceMap = Map<String, ResourceValue>;

/// Typed value of a node or job resource.
///
/// Durations are stored as [`ResourceValue::Int`] seconds.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Size(Size),
    Str(String),
    StrArray(Vec<String>),
}

impl ResourceValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResourceValue::Int(v) => Some(*v as f64),
            ResourceValue::Float(v) => Some(*v),
            ResourceValue::Size(v) => Some(v.bytes()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResourceValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResourceValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Returns true if `self` (what a node or pool offers) is enough for `required`.
    pub fn satisfies(&self, required: &ResourceValue) -> bool {
        match (self, required) {
            (ResourceValue::Bool(a), ResourceValue::Bool(b)) => a == b,
            (ResourceValue::Str(a), ResourceValue::Str(b)) => a == b,
            (ResourceValue::StrArray(a), ResourceValue::Str(b)) => a.contains(b),
            (ResourceValue::StrArray(a), ResourceValue::StrArray(b)) => {
                b.iter().all(|item| a.contains(item))
            }
            // PBS accepts "True"/"1" style strings for booleans that were not typed
            (ResourceValue::Bool(a), ResourceValue::Str(b))
            | (ResourceValue::Str(b), ResourceValue::Bool(a)) => {
                b.eq_ignore_ascii_case(&a.to_string())
            }
            (available, required) => match (available.as_f64(), required.as_f64()) {
                (Some(available), Some(required)) => available >= required,
                _ => false,
            },
        }
    }

    /// Subtracts a consumed amount. Returns [`None`] when the values are not numeric.
    pub fn minus(&self, amount: &ResourceValue) -> Option<ResourceValue> {
        let value = match (self, amount) {
            (ResourceValue::Int(a), ResourceValue::Int(b)) => ResourceValue::Int(a - b),
            (ResourceValue::Size(a), ResourceValue::Size(b)) => ResourceValue::Size(a.sub(b)),
            (ResourceValue::Size(a), other) => {
                ResourceValue::Size(a.sub(&Size::from_bytes(other.as_f64()?)))
            }
            (a, b) => ResourceValue::Float(a.as_f64()? - b.as_f64()?),
        };
        Some(value)
    }

    /// Multiplies a numeric value, non-numeric values are returned unchanged.
    pub fn multiply(&self, factor: i64) -> ResourceValue {
        match self {
            ResourceValue::Int(v) => ResourceValue::Int(v * factor),
            ResourceValue::Float(v) => ResourceValue::Float(v * factor as f64),
            ResourceValue::Size(v) => ResourceValue::Size(v.scale(factor as f64)),
            other => other.clone(),
        }
    }

    /// Divides a numeric value, integers are converted to floats when needed.
    pub fn divide(&self, divisor: i64) -> ResourceValue {
        let divisor = divisor.max(1);
        match self {
            ResourceValue::Int(v) if v % divisor == 0 => ResourceValue::Int(v / divisor),
            ResourceValue::Int(v) => ResourceValue::Float(*v as f64 / divisor as f64),
            ResourceValue::Float(v) => ResourceValue::Float(v / divisor as f64),
            ResourceValue::Size(v) => ResourceValue::Size(v.scale(1.0 / divisor as f64)),
            other => other.clone(),
        }
    }

    pub fn is_negative(&self) -> bool {
        self.as_f64().map(|v| v < 0.0).unwrap_or(false)
    }
}

impl fmt::Display for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceValue::Bool(v) => write!(f, "{v}"),
            ResourceValue::Int(v) => write!(f, "{v}"),
            ResourceValue::Float(v) => write!(f, "{v}"),
            ResourceValue::Size(v) => write!(f, "{v}"),
            ResourceValue::Str(v) => f.write_str(v),
            ResourceValue::StrArray(v) => f.write_str(&v.join(",")),
        }
    }
}

impl From<i64> for ResourceValue {
    fn from(value: i64) -> Self {
        ResourceValue::Int(value)
    }
}

impl From<i32> for ResourceValue {
    fn from(value: i32) -> Self {
        ResourceValue::Int(value as i64)
    }
}

impl From<bool> for ResourceValue {
    fn from(value: bool) -> Self {
        ResourceValue::Bool(value)
    }
}

impl From<&str> for ResourceValue {
    fn from(value: &str) -> Self {
        ResourceValue::Str(value.to_string())
    }
}

impl From<Size> for ResourceValue {
    fn from(value: Size) -> Self {
        ResourceValue::Size(value)
    }
}

impl Serialize for ResourceValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResourceValue::Bool(v) => serializer.serialize_bool(*v),
            ResourceValue::Int(v) => serializer.serialize_i64(*v),
            ResourceValue::Float(v) => serializer.serialize_f64(*v),
            ResourceValue::Size(v) => v.serialize(serializer),
            ResourceValue::Str(v) => serializer.serialize_str(v),
            ResourceValue::StrArray(v) => v.serialize(serializer),
        }
    }
}

/// Untyped form used while deserializing, sizes arrive as strings and are typed later
/// by the owner of the resource definitions.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrArray(Vec<String>),
}

impl<'de> Deserialize<'de> for ResourceValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawValue::deserialize(deserializer)? {
            RawValue::Bool(v) => ResourceValue::Bool(v),
            RawValue::Int(v) => ResourceValue::Int(v),
            RawValue::Float(v) => ResourceValue::Float(v),
            RawValue::Str(v) => ResourceValue::Str(v),
            RawValue::StrArray(v) => ResourceValue::StrArray(v),
        })
    }
}
