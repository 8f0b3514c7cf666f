//! Dynamic host values
//!
//! Kernel arguments arrive from callers that think in terms of "a number",
//! not in terms of native widths. `Value` is that number: the type registry
//! decides how wide it becomes on the device.

use std::fmt;

/// A single host-side scalar
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// Absent element (placeholder for data the device will produce)
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// Unsigned values that do not fit in `i64`
    UInt(u64),
    Float(f64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value, truncating floats toward zero
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Null => None,
            Value::Bool(b) => Some(b as i64),
            Value::Int(i) => Some(i),
            Value::UInt(u) => Some(u as i64),
            Value::Float(f) => Some(f as i64),
        }
    }

    /// Unsigned integer view of the value (C cast semantics)
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Null => None,
            Value::Bool(b) => Some(b as u64),
            Value::Int(i) => Some(i as u64),
            Value::UInt(u) => Some(u),
            Value::Float(f) => Some(f as u64),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Null => None,
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(i as f64),
            Value::UInt(u) => Some(u as f64),
            Value::Float(f) => Some(f),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Null => None,
            Value::Bool(b) => Some(b),
            Value::Int(i) => Some(i != 0),
            Value::UInt(u) => Some(u != 0),
            Value::Float(f) => Some(f != 0.0),
        }
    }

    /// Builds an integer value, keeping it signed whenever it fits
    pub fn from_unsigned(u: u64) -> Self {
        match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::UInt(u),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(x) => write!(f, "{x:?}"),
        }
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::from_unsigned(v as u64)
                }
            }
        )*
    };
}

impl_from_signed!(i8, i16, i32, i64, isize);
impl_from_unsigned!(u8, u16, u32, u64, usize);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<half::f16> for Value {
    fn from(v: half::f16) -> Self {
        Value::Float(v.to_f64())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Converts a slice of host numbers into values
pub fn values_of<T: Copy + Into<Value>>(items: &[T]) -> Vec<Value> {
    items.iter().map(|&v| v.into()).collect()
}
