//! Schema-free tool payloads.
//!
//! Tool inputs and outputs are whatever the assistant hands us. They are
//! kept as the raw JSON text they arrived in, so a record written back out
//! is byte-identical to what was captured, and decoded lazily only when
//! something needs to look inside.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use serde_json::value::RawValue;
use std::fmt;

#[derive(Clone)]
pub struct Payload(Box<RawValue>);

impl Payload {
    pub fn null() -> Self {
        Payload(RawValue::NULL.to_owned())
    }

    pub fn from_value(value: &Value) -> Self {
        // A `Value` always serializes; the fallback only satisfies the type.
        serde_json::value::to_raw_value(value)
            .map(Payload)
            .unwrap_or_else(|_| Payload::null())
    }

    /// Wrap raw JSON text without re-encoding it.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.to_string()).map(Payload)
    }

    pub fn as_raw_str(&self) -> &str {
        self.0.get()
    }

    /// Best-effort decode into a `Value`.
    pub fn decode(&self) -> Option<Value> {
        serde_json::from_str(self.0.get()).ok()
    }

    /// Field lookup on an object payload.
    pub fn field(&self, name: &str) -> Option<Value> {
        match self.decode()? {
            Value::Object(mut map) => map.remove(name),
            _ => None,
        }
    }

    /// `null`, `""`, `{}` and `[]` carry no information.
    pub fn is_empty(&self) -> bool {
        match self.decode() {
            Some(Value::Null) | None => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.0.get().len()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::null()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.0.get())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::from_value(&value)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Box::<RawValue>::deserialize(deserializer).map(Payload)
    }
}
