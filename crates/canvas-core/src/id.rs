//! Identifier newtypes for canvas entities.
//!
//! All IDs are distinct newtype wrappers over `String`, providing type safety
//! so that a `NodeId` cannot be accidentally used where an `EdgeId` is expected.
//!
//! Identifiers are embedded verbatim in metadata sort keys (`{version}#{id}`)
//! and blob keys (`{customer}/{canvas}/{version}/{node}/...`), so construction
//! rejects empty values, control characters and the `#` and `/` separators.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Characters reserved by the key conventions.
const RESERVED: [char; 2] = ['#', '/'];

/// The only mutable version identifier.
pub const DRAFT: &str = "draft";

fn validate(kind: &'static str, value: &str) -> Result<(), CoreError> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.contains(RESERVED) {
        "must not contain '#' or '/'"
    } else if value.chars().any(char::is_control) {
        "must not contain control characters"
    } else if value == "." || value == ".." {
        "must not be a relative path segment"
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidIdentifier {
        kind,
        value: value.to_string(),
        reason,
    })
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps `value`.
            pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
                let value = value.into();
                validate($kind, &value)?;
                Ok($name(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $name::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Tenant that owns a canvas. Scoping by customer is trusted from the caller.
    CustomerId,
    "customer"
);

string_id!(
    /// Canvas identity, unique within a customer.
    CanvasId,
    "canvas"
);

string_id!(
    /// Version of a canvas: either `"draft"` or an immutable snapshot id.
    VersionId,
    "version"
);

string_id!(
    /// Node identity, unique within one canvas version.
    NodeId,
    "node"
);

string_id!(
    /// Edge identity, unique within one canvas version.
    EdgeId,
    "edge"
);

string_id!(
    /// Chat thread identity, unique within one node.
    ThreadId,
    "thread"
);

impl VersionId {
    /// The single mutable version.
    pub fn draft() -> Self {
        VersionId(DRAFT.to_string())
    }

    pub fn is_draft(&self) -> bool {
        self.0 == DRAFT
    }
}
