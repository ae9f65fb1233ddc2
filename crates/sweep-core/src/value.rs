use serde_json::Value;
use std::fmt;

pub const DEFINED_MARKER: &str = "@defined";
pub const UNDEFINED_MARKER: &str = "@undefined";

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn render(&self) -> String {
        match self {
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => format!("{:?}", v),
            Scalar::Str(s) => s.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Int(v) => Value::from(*v),
            Scalar::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AxisValue {
    Concrete(Scalar),
    Included,
    Omitted,
}

impl AxisValue {
    pub fn is_toggle(&self) -> bool {
        matches!(self, AxisValue::Included | AxisValue::Omitted)
    }

    pub fn to_json(&self) -> Value {
        match self {
            AxisValue::Concrete(s) => s.to_json(),
            AxisValue::Included => Value::String(DEFINED_MARKER.to_string()),
            AxisValue::Omitted => Value::String(UNDEFINED_MARKER.to_string()),
        }
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Concrete(s) => write!(f, "{}", s),
            AxisValue::Included => f.write_str(DEFINED_MARKER),
            AxisValue::Omitted => f.write_str(UNDEFINED_MARKER),
        }
    }
}
