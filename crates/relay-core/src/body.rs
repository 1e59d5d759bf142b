use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Identifier fields looked up in decoded bodies, in priority order.
/// The trailing entries are legacy aliases still present on old messages.
const IDENTIFIER_ALIASES: &[&str] = &["identifier", "card_pid", "clover_id"];

/// The JSON body of every published packet:
/// `{"identifier": <string|null>, "kwargs": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PacketBody {
    pub identifier: Option<String>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,

    /// Legacy fields occasionally found at the top level instead of the
    /// identifier. Kept so old producers keep dispatching correctly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PacketBody {
    pub fn new(identifier: impl Into<String>, kwargs: Map<String, Value>) -> Self {
        PacketBody {
            identifier: Some(identifier.into()),
            kwargs,
            extra: Map::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Resolve the identifier handlers are dispatched with: the
    /// `identifier` field when present, else the first legacy alias found
    /// at the top level of the body.
    pub fn dispatch_identifier(&self) -> Option<String> {
        if let Some(id) = &self.identifier {
            return Some(id.clone());
        }
        for alias in &IDENTIFIER_ALIASES[1..] {
            if let Some(Value::String(id)) = self.extra.get(*alias) {
                return Some(id.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let mut kwargs = Map::new();
        kwargs.insert("timestamp".to_string(), json!(1700000000));

        let body = PacketBody::new("X", kwargs);
        let bytes = body.encode().unwrap();
        let decoded = PacketBody::decode(&bytes).unwrap();

        assert_eq!(decoded.identifier.as_deref(), Some("X"));
        assert_eq!(decoded.kwargs["timestamp"], json!(1700000000));
    }

    #[test]
    fn test_wire_shape() {
        let body = PacketBody::new("X", Map::new());
        let value: Value = serde_json::from_slice(&body.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"identifier": "X", "kwargs": {}}));
    }

    #[test]
    fn test_dispatch_identifier_priority() {
        let body: PacketBody =
            serde_json::from_value(json!({"identifier": "a", "card_pid": "b", "kwargs": {}}))
                .unwrap();
        assert_eq!(body.dispatch_identifier().as_deref(), Some("a"));
    }

    #[test]
    fn test_dispatch_identifier_legacy_aliases() {
        let body: PacketBody =
            serde_json::from_value(json!({"card_pid": "card_1", "kwargs": {}})).unwrap();
        assert_eq!(body.dispatch_identifier().as_deref(), Some("card_1"));

        let body: PacketBody =
            serde_json::from_value(json!({"clover_id": "clv_1", "kwargs": {}})).unwrap();
        assert_eq!(body.dispatch_identifier().as_deref(), Some("clv_1"));
    }

    #[test]
    fn test_dispatch_identifier_missing() {
        let body: PacketBody = serde_json::from_value(json!({"kwargs": {}})).unwrap();
        assert_eq!(body.dispatch_identifier(), None);
    }
}
