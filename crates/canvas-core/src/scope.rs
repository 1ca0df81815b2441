//! The (customer, canvas, version) triple that scopes every entity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{CanvasId, CustomerId, VersionId};

/// Identifies one canvas snapshot. Entity ids are unique only within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanvasScope {
    pub customer: CustomerId,
    pub canvas: CanvasId,
    pub version: VersionId,
}

impl CanvasScope {
    pub fn new(customer: CustomerId, canvas: CanvasId, version: VersionId) -> Self {
        CanvasScope {
            customer,
            canvas,
            version,
        }
    }

    /// Scope of the mutable draft.
    pub fn draft(customer: CustomerId, canvas: CanvasId) -> Self {
        CanvasScope::new(customer, canvas, VersionId::draft())
    }

    /// Same canvas, different version.
    pub fn at_version(&self, version: VersionId) -> Self {
        CanvasScope::new(self.customer.clone(), self.canvas.clone(), version)
    }

    pub fn is_draft(&self) -> bool {
        self.version.is_draft()
    }
}

impl fmt::Display for CanvasScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.customer, self.canvas, self.version)
    }
}
