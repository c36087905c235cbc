//! Size constraints of partitions and logical volumes

use serde_json::{Map, Value, json};

use crate::common::parse_size;

/// Size window of a device to create
///
/// `max == None` means unlimited. `default` marks sizes the config did not
/// set; their bounds come from the product volume templates.
#[derive(Debug, Clone)]
pub struct SizeConfig {
    pub min: u64,
    pub max: Option<u64>,
    pub default: bool,
    /// JSON the size was read from, written back while the bounds still match
    literal: Option<Value>,
}

impl Default for SizeConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: None,
            default: true,
            literal: None,
        }
    }
}

/// Equal bounds are equal sizes, however they were written
impl PartialEq for SizeConfig {
    fn eq(&self, other: &Self) -> bool {
        self.min == other.min && self.max == other.max && self.default == other.default
    }
}

impl Eq for SizeConfig {}

impl SizeConfig {
    pub fn fixed(bytes: u64) -> Self {
        Self {
            min: bytes,
            max: Some(bytes),
            default: false,
            literal: None,
        }
    }

    pub fn range(min: u64, max: Option<u64>) -> Self {
        Self {
            min,
            max,
            default: false,
            literal: None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.max == Some(self.min)
    }

    pub fn contains(&self, bytes: u64) -> bool {
        bytes >= self.min && self.max.is_none_or(|max| bytes <= max)
    }

    /// Parses `"10 GiB"`, `1024`, `{min, max}` or `[min, max]`
    pub fn from_json(value: &Value) -> Option<Self> {
        let size = Self::bounds_from_json(value)?;
        Some(Self {
            literal: Some(value.clone()),
            ..size
        })
    }

    fn bounds_from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => {
                let min = size_value(items.first()?)?;
                let max = match items.get(1) {
                    Some(max) => max_value(max)?,
                    None => None,
                };
                Some(Self::range(min, max))
            }
            Value::Object(map) => {
                let min = match map.get("min") {
                    Some(min) => size_value(min)?,
                    None => 0,
                };
                let max = match map.get("max") {
                    Some(max) => max_value(max)?,
                    None => None,
                };
                Some(Self::range(min, max))
            }
            other => size_value(other).map(Self::fixed),
        }
    }

    /// JSON form of an explicit size; default sizes have none
    pub fn to_json(&self) -> Option<Value> {
        if self.default {
            return None;
        }
        if let Some(literal) = &self.literal
            && Self::bounds_from_json(literal).as_ref() == Some(self)
        {
            return Some(literal.clone());
        }
        if self.is_fixed() {
            return Some(json!(self.min));
        }

        let mut map = Map::new();
        map.insert("min".to_string(), json!(self.min));
        if let Some(max) = self.max {
            map.insert("max".to_string(), json!(max));
        }
        Some(Value::Object(map))
    }
}

fn size_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(text) => parse_size(text),
        _ => None,
    }
}

/// `Some(None)` for an unlimited bound
fn max_value(value: &Value) -> Option<Option<u64>> {
    match value {
        Value::Null => Some(None),
        Value::String(text) if text.trim() == "unlimited" => Some(None),
        other => size_value(other).map(Some),
    }
}
