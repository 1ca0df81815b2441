//! Data model for versioned architecture canvases.
//!
//! # Modules
//!
//! - [`id`]: validated identifier newtypes and the `draft` version
//! - [`scope`]: the (customer, canvas, version) scope of every entity
//! - [`node`], [`edge`], [`thread`], [`canvas`]: the canvas document
//! - [`codec`]: node configuration codecs keyed by node type
//! - [`resolver`]: deterministic dependency ordering
//! - [`error`]: CoreError enum

pub mod canvas;
pub mod codec;
pub mod edge;
pub mod error;
pub mod id;
pub mod node;
pub mod resolver;
pub mod scope;
pub mod thread;

// Re-export commonly used types
pub use canvas::Canvas;
pub use codec::{NodeCodecRegistry, NodeConfigCodec, OpaqueConfigCodec};
pub use edge::{Edge, EdgeKind};
pub use error::CoreError;
pub use id::{CanvasId, CustomerId, EdgeId, NodeId, ThreadId, VersionId, DRAFT};
pub use node::{Language, Node, NodeType, Position};
pub use resolver::DependencyResolver;
pub use scope::CanvasScope;
pub use thread::{ChatThread, Message, Role, ThreadSummary};
