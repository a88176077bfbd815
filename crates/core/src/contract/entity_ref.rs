//! Universal entity reference type
//!
//! This type expresses Invariant 1: Everything is Addressable.
//! Every entity in the database can be referenced by an EntityRef.
//!
//! ## The Problem EntityRef Solves
//!
//! Different primitives have different key structures:
//! - KV: namespace + user_key
//! - EventLog: namespace + sequence
//! - StateCell: namespace + cell_name
//! - etc.
//!
//! EntityRef provides a **uniform way to reference any entity**.
//!
//! ## Structure
//!
//! Every EntityRef has:
//! - `branch_id`: The branch this entity belongs to (Invariant 5: Branch-scoped)
//! - Primitive-specific fields
//!
//! ## Usage
//!
//! ```
//! use meridian_core::{EntityRef, BranchId, PrimitiveType};
//!
//! let branch_id = BranchId::new();
//!
//! // Reference a KV entry
//! let kv_ref = EntityRef::kv(branch_id, "my-key");
//!
//! // Reference an event
//! let event_ref = EntityRef::event(branch_id, 42);
//!
//! // Get the primitive type
//! assert_eq!(kv_ref.primitive_type(), PrimitiveType::Kv);
//! ```

use super::PrimitiveType;
use crate::types::BranchId;
use serde::{Deserialize, Serialize};

/// Universal reference to any entity in the database
///
/// EntityRef is the canonical way to identify any piece of data.
/// It combines branch_id (scope) with primitive-specific addressing.
///
/// ## Invariants
///
/// - Every EntityRef has exactly one variant (primitive type)
/// - Every EntityRef has a branch_id
/// - EntityRef variants match PrimitiveType variants 1:1
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    /// Reference to a KV entry
    Kv {
        /// Branch scope
        branch_id: BranchId,
        /// Key (user-defined)
        key: String,
    },

    /// Reference to an event in the log
    Event {
        /// Branch scope
        branch_id: BranchId,
        /// Sequence number in the event log
        sequence: u64,
    },

    /// Reference to a state cell
    State {
        /// Branch scope
        branch_id: BranchId,
        /// Cell name (user-defined)
        name: String,
    },

    /// Reference to a branch's metadata
    Branch {
        /// The branch being referenced (also the scope)
        branch_id: BranchId,
    },

    /// Reference to a JSON document
    Json {
        /// Branch scope
        branch_id: BranchId,
        /// Document ID (user-provided string key)
        doc_id: String,
    },

    /// Reference to a vector entry
    Vector {
        /// Branch scope
        branch_id: BranchId,
        /// Collection name
        collection: String,
        /// Key within collection
        key: String,
    },
}

impl EntityRef {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a KV entity reference
    pub fn kv(branch_id: BranchId, key: impl Into<String>) -> Self {
        EntityRef::Kv {
            branch_id,
            key: key.into(),
        }
    }

    /// Create an event entity reference
    pub fn event(branch_id: BranchId, sequence: u64) -> Self {
        EntityRef::Event { branch_id, sequence }
    }

    /// Create a state cell entity reference
    pub fn state(branch_id: BranchId, name: impl Into<String>) -> Self {
        EntityRef::State {
            branch_id,
            name: name.into(),
        }
    }

    /// Create a branch entity reference
    pub fn branch(branch_id: BranchId) -> Self {
        EntityRef::Branch { branch_id }
    }

    /// Create a JSON document entity reference
    pub fn json(branch_id: BranchId, doc_id: impl Into<String>) -> Self {
        EntityRef::Json { branch_id, doc_id: doc_id.into() }
    }

    /// Create a vector entity reference
    pub fn vector(branch_id: BranchId, collection: impl Into<String>, key: impl Into<String>) -> Self {
        EntityRef::Vector {
            branch_id,
            collection: collection.into(),
            key: key.into(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the branch_id this entity belongs to
    ///
    /// All entities are branch-scoped (Invariant 5).
    pub fn branch_id(&self) -> BranchId {
        match self {
            EntityRef::Kv { branch_id, .. } => *branch_id,
            EntityRef::Event { branch_id, .. } => *branch_id,
            EntityRef::State { branch_id, .. } => *branch_id,
            EntityRef::Branch { branch_id } => *branch_id,
            EntityRef::Json { branch_id, .. } => *branch_id,
            EntityRef::Vector { branch_id, .. } => *branch_id,
        }
    }

    /// Get the primitive type of this entity
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            EntityRef::Kv { .. } => PrimitiveType::Kv,
            EntityRef::Event { .. } => PrimitiveType::Event,
            EntityRef::State { .. } => PrimitiveType::State,
            EntityRef::Branch { .. } => PrimitiveType::Branch,
            EntityRef::Json { .. } => PrimitiveType::Json,
            EntityRef::Vector { .. } => PrimitiveType::Vector,
        }
    }

    // =========================================================================
    // Type Checks
    // =========================================================================

    /// Check if this is a KV reference
    pub fn is_kv(&self) -> bool {
        matches!(self, EntityRef::Kv { .. })
    }

    /// Check if this is an event reference
    pub fn is_event(&self) -> bool {
        matches!(self, EntityRef::Event { .. })
    }

    /// Check if this is a state reference
    pub fn is_state(&self) -> bool {
        matches!(self, EntityRef::State { .. })
    }

    /// Check if this is a branch reference
    pub fn is_branch(&self) -> bool {
        matches!(self, EntityRef::Branch { .. })
    }

    /// Check if this is a JSON reference
    pub fn is_json(&self) -> bool {
        matches!(self, EntityRef::Json { .. })
    }

    /// Check if this is a vector reference
    pub fn is_vector(&self) -> bool {
        matches!(self, EntityRef::Vector { .. })
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// Get the KV key if this is a KV reference
    pub fn kv_key(&self) -> Option<&str> {
        match self {
            EntityRef::Kv { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Get the event sequence if this is an event reference
    pub fn event_sequence(&self) -> Option<u64> {
        match self {
            EntityRef::Event { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }

    /// Get the state cell name if this is a state reference
    pub fn state_name(&self) -> Option<&str> {
        match self {
            EntityRef::State { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Get the JSON doc ID if this is a JSON reference
    pub fn json_doc_id(&self) -> Option<&str> {
        match self {
            EntityRef::Json { doc_id, .. } => Some(doc_id),
            _ => None,
        }
    }

    /// Get the vector collection and key if this is a vector reference
    pub fn vector_location(&self) -> Option<(&str, &str)> {
        match self {
            EntityRef::Vector {
                collection, key, ..
            } => Some((collection, key)),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Kv { branch_id, key } => {
                write!(f, "kv://{}/{}", branch_id, key)
            }
            EntityRef::Event { branch_id, sequence } => {
                write!(f, "event://{}/{}", branch_id, sequence)
            }
            EntityRef::State { branch_id, name } => {
                write!(f, "state://{}/{}", branch_id, name)
            }
            EntityRef::Branch { branch_id } => {
                write!(f, "branch://{}", branch_id)
            }
            EntityRef::Json { branch_id, doc_id } => {
                write!(f, "json://{}/{}", branch_id, doc_id)
            }
            EntityRef::Vector {
                branch_id,
                collection,
                key,
            } => {
                write!(f, "vector://{}/{}/{}", branch_id, collection, key)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
