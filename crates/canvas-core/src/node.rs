//! Canvas node types.
//!
//! A [`Node`] is one architectural component on a canvas. Its configuration
//! payload is opaque to this crate; the [`NodeType`] tag selects the codec that
//! validates and (de)serializes it (see [`crate::codec`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::NodeId;

/// The closed set of component kinds a node can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    StorageTable,
    ObjectBucket,
    DataModel,
    ApplicationLogic,
    ApiEndpoint,
    Orchestrator,
}

impl NodeType {
    /// Every node type, in declaration order.
    pub const ALL: [NodeType; 6] = [
        NodeType::StorageTable,
        NodeType::ObjectBucket,
        NodeType::DataModel,
        NodeType::ApplicationLogic,
        NodeType::ApiEndpoint,
        NodeType::Orchestrator,
    ];

    /// The wire tag of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::StorageTable => "storage-table",
            NodeType::ObjectBucket => "object-bucket",
            NodeType::DataModel => "data-model",
            NodeType::ApplicationLogic => "application-logic",
            NodeType::ApiEndpoint => "api-endpoint",
            NodeType::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownNodeType(s.to_string()))
    }
}

/// Position of a node on the 2D canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Language of a generated code artifact.
///
/// Tags are normalized to lowercase and common aliases are folded into one
/// canonical name (`"py"` becomes `"python"`), so each language maps to a
/// single code blob per node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

/// Canonical language name, aliases, and code file extension.
const LANGUAGES: &[(&str, &[&str], &str)] = &[
    ("python", &["py", "python3"], "py"),
    ("typescript", &["ts"], "ts"),
    ("javascript", &["js", "node"], "js"),
    ("rust", &["rs"], "rs"),
    ("go", &["golang"], "go"),
    ("java", &[], "java"),
    ("kotlin", &["kt"], "kt"),
    ("csharp", &["c#", "cs"], "cs"),
    ("sql", &[], "sql"),
    ("yaml", &["yml"], "yaml"),
    ("json", &[], "json"),
    ("terraform", &["tf", "hcl"], "tf"),
    ("shell", &["sh", "bash"], "sh"),
    ("markdown", &["md"], "md"),
];

impl Language {
    /// Normalizes a language tag.
    pub fn new(tag: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = tag.as_ref().trim().to_ascii_lowercase();
        if raw.is_empty()
            || !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '#' | '-' | '_'))
        {
            return Err(CoreError::InvalidLanguage(tag.as_ref().to_string()));
        }
        let canonical = LANGUAGES
            .iter()
            .find(|(name, aliases, _)| *name == raw || aliases.contains(&raw.as_str()))
            .map(|(name, _, _)| name.to_string())
            .unwrap_or(raw);
        Ok(Language(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension used for this language's code blob.
    ///
    /// Unknown languages use their own name with non-alphanumeric characters
    /// dropped, falling back to `txt`.
    pub fn extension(&self) -> String {
        if let Some((_, _, ext)) = LANGUAGES.iter().find(|(name, _, _)| *name == self.0) {
            return ext.to_string();
        }
        let ext: String = self.0.chars().filter(char::is_ascii_alphanumeric).collect();
        if ext.is_empty() {
            "txt".to_string()
        } else {
            ext
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Language {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::new(s)
    }
}

impl TryFrom<String> for Language {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Language::new(value)
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        lang.0
    }
}

/// A component node on a canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    #[serde(default)]
    pub position: Position,
    /// Type-specific configuration, opaque to the storage layer.
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    /// Generated code per language.
    #[serde(default)]
    pub code: BTreeMap<Language, String>,
    /// Free-form key/values.
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
    /// Parent nodes this node depends on.
    #[serde(default)]
    pub depends_on: SmallVec<[NodeId; 4]>,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Node {
    /// Creates a node with an empty configuration at the origin.
    pub fn new(id: NodeId, node_type: NodeType) -> Self {
        Node {
            id,
            node_type,
            position: Position::default(),
            config: empty_config(),
            code: BTreeMap::new(),
            metadata: IndexMap::new(),
            depends_on: SmallVec::new(),
        }
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_code(mut self, language: Language, code: impl Into<String>) -> Self {
        self.code.insert(language, code.into());
        self
    }

    pub fn with_dependency(mut self, parent: NodeId) -> Self {
        if !self.depends_on.contains(&parent) {
            self.depends_on.push(parent);
        }
        self
    }

    /// Checks the parts of a node that do not depend on its type's codec.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.position.is_finite() {
            return Err(CoreError::InvalidPosition {
                node: self.id.clone(),
                x: self.position.x,
                y: self.position.y,
            });
        }
        Ok(())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
