use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An opaque JSON payload: the value of a typed property, or a whole
/// passthrough document of unknown schema.
///
/// The verbatim text is kept (modulo newline stripping, so a payload can
/// always be embedded in newline-delimited output), which lets payloads
/// nobody in this crate understands survive round-trips. Two payloads are
/// equal iff their canonical forms are: key order and insignificant
/// whitespace do not participate in identity.
///
/// Payloads capture their text through serde_json; YAML documents must be
/// transcoded to JSON text before a payload can be deserialized from them.
#[derive(Serialize, Clone)]
pub struct Payload(Box<serde_json::value::RawValue>);

impl Payload {
    /// Wrap a JSON text verbatim, stripping newlines.
    pub fn from_json(text: impl Into<String>) -> serde_json::Result<Self> {
        let mut text = text.into();
        text.retain(|c| c != '\n');
        serde_json::value::RawValue::from_string(text).map(Self)
    }

    pub fn from_value(value: &Value) -> Self {
        Self::from_json(value.to_string()).expect("serialized values are valid JSON")
    }

    pub fn to_value(&self) -> Value {
        serde_json::from_str(self.0.get()).expect("payload text is valid JSON")
    }

    /// The canonical form of this payload: key-sorted maps, compact
    /// whitespace. Canonical forms are byte-comparable.
    pub fn canonical(&self) -> String {
        self.to_value().to_string()
    }

    /// The payload's verbatim JSON text.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::from_json("null").expect("null is valid JSON")
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}
impl Eq for Payload {}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<serde_json::value::RawValue>::deserialize(deserializer)?;
        if raw.get().contains('\n') {
            let text: Box<str> = raw.into();
            Payload::from_json(String::from(text)).map_err(serde::de::Error::custom)
        } else {
            Ok(Payload(raw))
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Payload({})", self.0.get())
    }
}
