//! Node configuration codecs.
//!
//! Each [`NodeType`] resolves to one [`NodeConfigCodec`] through a
//! [`NodeCodecRegistry`] that is built once at startup and handed to the
//! storage layer. Lookups go through the enum tag, never through string
//! matching at call time.
//!
//! Configuration payloads are opaque: the standard codecs only require a JSON
//! object (a missing payload normalizes to `{}`). Domain schemas are validated
//! elsewhere.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::CoreError;
use crate::node::NodeType;

/// Validation and (de)serialization for one node type's configuration.
pub trait NodeConfigCodec: Send + Sync {
    /// The node type this codec handles.
    fn node_type(&self) -> NodeType;

    /// Checks a configuration payload.
    fn validate(&self, config: &Value) -> Result<(), CoreError>;

    /// Produces the persisted form of a configuration payload.
    fn serialize(&self, config: &Value) -> Result<Value, CoreError>;

    /// Restores a configuration payload from its persisted form.
    fn deserialize(&self, stored: Value) -> Result<Value, CoreError>;
}

/// Codec treating the configuration as an opaque JSON object.
#[derive(Debug, Clone, Copy)]
pub struct OpaqueConfigCodec {
    node_type: NodeType,
}

impl OpaqueConfigCodec {
    pub fn new(node_type: NodeType) -> Self {
        OpaqueConfigCodec { node_type }
    }

    fn normalize(&self, config: Value) -> Result<Value, CoreError> {
        match config {
            Value::Null => Ok(Value::Object(serde_json::Map::new())),
            Value::Object(_) => Ok(config),
            other => Err(CoreError::InvalidConfig {
                node_type: self.node_type,
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }
}

impl NodeConfigCodec for OpaqueConfigCodec {
    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn validate(&self, config: &Value) -> Result<(), CoreError> {
        self.normalize(config.clone()).map(|_| ())
    }

    fn serialize(&self, config: &Value) -> Result<Value, CoreError> {
        self.normalize(config.clone())
    }

    fn deserialize(&self, stored: Value) -> Result<Value, CoreError> {
        self.normalize(stored)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Registration table from node type to codec.
pub struct NodeCodecRegistry {
    codecs: HashMap<NodeType, Box<dyn NodeConfigCodec>>,
}

impl NodeCodecRegistry {
    /// An empty registry. Every type must be registered before use.
    pub fn empty() -> Self {
        NodeCodecRegistry {
            codecs: HashMap::new(),
        }
    }

    /// A registry with the opaque codec registered for every node type.
    pub fn standard() -> Self {
        let mut registry = NodeCodecRegistry::empty();
        for node_type in NodeType::ALL {
            registry.register(Box::new(OpaqueConfigCodec::new(node_type)));
        }
        registry
    }

    /// Registers a codec, replacing any previous codec for the same type.
    pub fn register(&mut self, codec: Box<dyn NodeConfigCodec>) {
        self.codecs.insert(codec.node_type(), codec);
    }

    /// Resolves the codec for a node type.
    pub fn codec(&self, node_type: NodeType) -> Result<&dyn NodeConfigCodec, CoreError> {
        self.codecs
            .get(&node_type)
            .map(|c| c.as_ref())
            .ok_or(CoreError::UnregisteredNodeType(node_type))
    }
}

impl Default for NodeCodecRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for NodeCodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&NodeType> = self.codecs.keys().collect();
        types.sort();
        f.debug_struct("NodeCodecRegistry")
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Requires a `table_name` key, like a stricter deployment would.
    struct TableCodec;

    impl NodeConfigCodec for TableCodec {
        fn node_type(&self) -> NodeType {
            NodeType::StorageTable
        }

        fn validate(&self, config: &Value) -> Result<(), CoreError> {
            if config.get("table_name").and_then(Value::as_str).is_some() {
                Ok(())
            } else {
                Err(CoreError::InvalidConfig {
                    node_type: NodeType::StorageTable,
                    reason: "table_name is required".into(),
                })
            }
        }

        fn serialize(&self, config: &Value) -> Result<Value, CoreError> {
            self.validate(config)?;
            Ok(config.clone())
        }

        fn deserialize(&self, stored: Value) -> Result<Value, CoreError> {
            Ok(stored)
        }
    }

    #[test]
    fn standard_registry_covers_every_type() {
        let registry = NodeCodecRegistry::standard();
        for node_type in NodeType::ALL {
            assert_eq!(registry.codec(node_type).unwrap().node_type(), node_type);
        }
    }

    #[test]
    fn empty_registry_rejects_lookup() {
        let registry = NodeCodecRegistry::empty();
        assert!(matches!(
            registry.codec(NodeType::Orchestrator),
            Err(CoreError::UnregisteredNodeType(NodeType::Orchestrator))
        ));
    }

    #[test]
    fn opaque_codec_accepts_objects_only() {
        let codec = OpaqueConfigCodec::new(NodeType::ApiEndpoint);
        assert!(codec.validate(&json!({"route": "/orders"})).is_ok());
        assert_eq!(codec.serialize(&Value::Null).unwrap(), json!({}));
        assert!(matches!(
            codec.validate(&json!([1, 2])),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn register_replaces_codec() {
        let mut registry = NodeCodecRegistry::standard();
        registry.register(Box::new(TableCodec));

        let codec = registry.codec(NodeType::StorageTable).unwrap();
        assert!(codec.validate(&json!({})).is_err());
        assert!(codec.validate(&json!({"table_name": "orders"})).is_ok());
        // Other types keep the opaque codec.
        assert!(registry.codec(NodeType::DataModel).unwrap().validate(&json!({})).is_ok());
    }
}
