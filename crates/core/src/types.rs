//! Core types for Meridian database
//!
//! This module defines the foundational types:
//! - BranchId: Unique identifier for agent branches
//! - Namespace: Hierarchical namespace (tenant/app/agent/branch)
//! - TypeTag: Type discriminator for unified storage
//! - Key: Composite key (namespace + type_tag + user_key)

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an agent branch
///
/// A BranchId is a wrapper around a UUID v4, providing unique identification
/// for each agent execution branch. BranchIds are used throughout the system
/// to scope data and enable branch-specific queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchId(Uuid);

impl BranchId {
    /// Create a new random BranchId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a BranchId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse a BranchId from a string representation
    ///
    /// Accepts standard UUID format (with or without hyphens).
    ///
    /// # Errors
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw bytes of this BranchId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hierarchical namespace: tenant → app → agent → branch
///
/// Namespaces provide multi-tenant isolation and hierarchical organization
/// of data. The hierarchy enables efficient querying and access control.
///
/// Format: "tenant/app/agent/branch_id"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Tenant identifier (top-level isolation)
    pub tenant: String,
    /// Application identifier
    pub app: String,
    /// Agent identifier
    pub agent: String,
    /// Branch identifier
    pub branch_id: BranchId,
}

impl Namespace {
    /// Create a new namespace
    pub fn new(tenant: String, app: String, agent: String, branch_id: BranchId) -> Self {
        Self {
            tenant,
            app,
            agent,
            branch_id,
        }
    }

    /// Create a namespace for a branch with default tenant/app/agent
    ///
    /// This is a convenience method for primitives that only need
    /// branch-level isolation. Uses "default" for tenant, app, and agent.
    pub fn for_branch(branch_id: BranchId) -> Self {
        Self {
            tenant: "default".to_string(),
            app: "default".to_string(),
            agent: "default".to_string(),
            branch_id,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.tenant, self.app, self.agent, self.branch_id
        )
    }
}

// Ord implementation for BTreeMap key ordering
// Orders by: tenant → app → agent → branch_id
impl Ord for Namespace {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.tenant
            .cmp(&other.tenant)
            .then(self.app.cmp(&other.app))
            .then(self.agent.cmp(&other.agent))
            .then(self.branch_id.0.cmp(&other.branch_id.0))
    }
}

impl PartialOrd for Namespace {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Type tag for discriminating primitive types in unified storage
///
/// The unified storage design uses a single BTreeMap with type-tagged keys
/// instead of separate stores per primitive. This TypeTag enum enables
/// type discrimination and defines the sort order in BTreeMap.
///
/// ## TypeTag Values
///
/// These values are part of the on-disk format and MUST NOT change:
/// - KV = 0x01
/// - Event = 0x02
/// - State = 0x03
/// - Branch = 0x05
/// - Vector = 0x10 (vector metadata)
/// - Json = 0x11 (JSON primitive)
/// - VectorConfig = 0x12 (vector collection config)
///
/// Note: 0x04 was formerly Trace (TraceStore was removed in 0.12.0)
///
/// Ordering: KV < Event < State < Branch < Vector < Json < VectorConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[repr(u8)]
pub enum TypeTag {
    /// Key-Value primitive data
    KV = 0x01,
    /// Event log entries
    Event = 0x02,
    /// State cell records (renamed from StateMachine )
    State = 0x03,
    /// Reserved for backwards compatibility (TraceStore was removed)
    #[deprecated(since = "0.12.0", note = "TraceStore primitive was removed")]
    Trace = 0x04,
    /// Branch index entries
    Branch = 0x05,
    /// Vector store entries
    Vector = 0x10,
    /// JSON document store entries
    Json = 0x11,
    /// Vector collection configuration
    VectorConfig = 0x12,
}

impl TypeTag {
    /// Convert to byte representation
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Try to create from byte
    #[allow(deprecated)]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(TypeTag::KV),
            0x02 => Some(TypeTag::Event),
            0x03 => Some(TypeTag::State),
            0x04 => Some(TypeTag::Trace), // Deprecated but needed for backwards compatibility
            0x05 => Some(TypeTag::Branch),
            0x10 => Some(TypeTag::Vector),
            0x11 => Some(TypeTag::Json),
            0x12 => Some(TypeTag::VectorConfig),
            _ => None,
        }
    }
}

/// Unified key for all storage types
///
/// A Key combines namespace, type tag, and user-defined key bytes to create
/// a composite key that enables efficient prefix scans and type discrimination
/// in the unified BTreeMap storage.
///
/// # Ordering
///
/// Keys are ordered by: namespace → type_tag → user_key
///
/// This ordering is critical for BTreeMap efficiency:
/// - All keys for a namespace are grouped together
/// - Within a namespace, keys are grouped by type
/// - Within a type, keys are ordered by user_key (enabling prefix scans)
///
/// # Examples
///
/// ```
/// use meridian_core::{Key, Namespace, TypeTag, BranchId};
///
/// let branch_id = BranchId::new();
/// let ns = Namespace::new("tenant".to_string(), "app".to_string(),
///                         "agent".to_string(), branch_id);
///
/// // Create a KV key
/// let key = Key::new_kv(ns.clone(), "session_state");
///
/// // Create an event key with sequence number
/// let event_key = Key::new_event(ns.clone(), 42);
///
/// // Create a prefix for scanning
/// let prefix = Key::new_kv(ns.clone(), "user:");
/// let user_key = Key::new_kv(ns.clone(), "user:alice");
/// assert!(user_key.starts_with(&prefix));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Namespace (tenant/app/agent/branch hierarchy)
    pub namespace: Namespace,
    /// Type discriminator (KV, Event, State, Trace, Branch, etc.)
    pub type_tag: TypeTag,
    /// User-defined key bytes (supports arbitrary binary keys)
    pub user_key: Vec<u8>,
}

impl Key {
    /// Create a new key with the given namespace, type tag, and user key
    pub fn new(namespace: Namespace, type_tag: TypeTag, user_key: Vec<u8>) -> Self {
        Self {
            namespace,
            type_tag,
            user_key,
        }
    }

    /// Create a KV key
    ///
    /// Helper that automatically sets type_tag to TypeTag::KV
    pub fn new_kv(namespace: Namespace, key: impl AsRef<[u8]>) -> Self {
        Self::new(namespace, TypeTag::KV, key.as_ref().to_vec())
    }

    /// Create an event key with sequence number
    ///
    /// Helper that automatically sets type_tag to TypeTag::Event and
    /// encodes the sequence number as big-endian bytes
    pub fn new_event(namespace: Namespace, seq: u64) -> Self {
        Self::new(namespace, TypeTag::Event, seq.to_be_bytes().to_vec())
    }

    /// Create an event log metadata key
    ///
    /// The metadata key stores: { next_sequence: u64, head_hash: [u8; 32] }
    pub fn new_event_meta(namespace: Namespace) -> Self {
        Self::new(namespace, TypeTag::Event, b"__meta__".to_vec())
    }

    /// Create an event type index key
    ///
    /// Stores a per-type sequence index entry for efficient `read_by_type` lookups.
    /// Key format: `__tidx__{event_type}\0{sequence_be_bytes}`
    ///
    /// The null byte separator ensures correct prefix scanning: scanning
    /// `__tidx__{event_type}\0` matches only that exact type. Big-endian
    /// sequence bytes ensure results are returned in sequence order.
    pub fn new_event_type_idx(namespace: Namespace, event_type: &str, sequence: u64) -> Self {
        let mut user_key = Vec::with_capacity(8 + event_type.len() + 1 + 8);
        user_key.extend_from_slice(b"__tidx__");
        user_key.extend_from_slice(event_type.as_bytes());
        user_key.push(0); // null separator
        user_key.extend_from_slice(&sequence.to_be_bytes());
        Self::new(namespace, TypeTag::Event, user_key)
    }

    /// Create a prefix key for scanning all type index entries of a given event type
    ///
    /// Used by `read_by_type` to find all sequence numbers for a specific event type.
    pub fn new_event_type_idx_prefix(namespace: Namespace, event_type: &str) -> Self {
        let mut user_key = Vec::with_capacity(8 + event_type.len() + 1);
        user_key.extend_from_slice(b"__tidx__");
        user_key.extend_from_slice(event_type.as_bytes());
        user_key.push(0); // null separator
        Self::new(namespace, TypeTag::Event, user_key)
    }

    /// Create a state cell key
    ///
    /// Helper that automatically sets type_tag to TypeTag::State
    pub fn new_state(namespace: Namespace, key: impl AsRef<[u8]>) -> Self {
        Self::new(namespace, TypeTag::State, key.as_ref().to_vec())
    }

    /// Create a branch index key
    ///
    /// Helper that automatically sets type_tag to TypeTag::Branch and
    /// uses the branch_id as the key
    pub fn new_branch(namespace: Namespace, branch_id: BranchId) -> Self {
        Self::new(namespace, TypeTag::Branch, branch_id.as_bytes().to_vec())
    }

    /// Create a branch index key from string branch_id
    ///
    /// Alternative helper that accepts string branch_id for index keys
    pub fn new_branch_with_id(namespace: Namespace, branch_id: &str) -> Self {
        Self::new(namespace, TypeTag::Branch, branch_id.as_bytes().to_vec())
    }

    /// Create a branch index secondary index key
    ///
    /// Index keys enable efficient queries by status, tag, or parent.
    /// Format: `__idx_{index_type}__{index_value}__{branch_id}`
    ///
    /// Example index types:
    /// - by-status: `__idx_status__Active__branch123`
    /// - by-tag: `__idx_tag__experiment__branch123`
    /// - by-parent: `__idx_parent__parent123__branch123`
    pub fn new_branch_index(
        namespace: Namespace,
        index_type: &str,
        index_value: &str,
        branch_id: &str,
    ) -> Self {
        let key_data = format!("__idx_{}__{}__{}", index_type, index_value, branch_id);
        Self::new(namespace, TypeTag::Branch, key_data.into_bytes())
    }

    /// Create key for JSON document storage
    ///
    /// Helper that automatically sets type_tag to TypeTag::Json and
    /// uses the document ID string as the key (consistent with KV, State).
    ///
    /// # Example
    ///
    /// ```
    /// use meridian_core::{Key, Namespace, TypeTag, BranchId};
    ///
    /// let branch_id = BranchId::new();
    /// let namespace = Namespace::for_branch(branch_id);
    /// let key = Key::new_json(namespace, "my-document");
    /// assert_eq!(key.type_tag, TypeTag::Json);
    /// ```
    pub fn new_json(namespace: Namespace, doc_id: &str) -> Self {
        Self::new(namespace, TypeTag::Json, doc_id.as_bytes().to_vec())
    }

    /// Create prefix for scanning all JSON docs in namespace
    ///
    /// This key can be used with starts_with() to match all JSON
    /// documents in a namespace.
    pub fn new_json_prefix(namespace: Namespace) -> Self {
        Self::new(namespace, TypeTag::Json, vec![])
    }

    /// Create key for vector metadata
    ///
    /// Format: namespace + TypeTag::Vector + collection_name + "/" + vector_key
    pub fn new_vector(namespace: Namespace, collection: &str, key: &str) -> Self {
        let user_key = format!("{}/{}", collection, key);
        Self::new(namespace, TypeTag::Vector, user_key.into_bytes())
    }

    /// Create key for collection configuration
    ///
    /// Format: namespace + TypeTag::VectorConfig + collection_name
    pub fn new_vector_config(namespace: Namespace, collection: &str) -> Self {
        Self::new(
            namespace,
            TypeTag::VectorConfig,
            collection.as_bytes().to_vec(),
        )
    }

    /// Create prefix for scanning all vectors in a collection
    pub fn vector_collection_prefix(namespace: Namespace, collection: &str) -> Self {
        let user_key = format!("{}/", collection);
        Self::new(namespace, TypeTag::Vector, user_key.into_bytes())
    }

    /// Create prefix for scanning all vector collections
    pub fn new_vector_config_prefix(namespace: Namespace) -> Self {
        Self::new(namespace, TypeTag::VectorConfig, vec![])
    }

    /// Extract user key as string (if valid UTF-8)
    ///
    /// Returns None if the user_key is not valid UTF-8
    pub fn user_key_string(&self) -> Option<String> {
        String::from_utf8(self.user_key.clone()).ok()
    }

    /// Check if this key starts with the given prefix
    ///
    /// For a key to match a prefix:
    /// - namespace must be equal
    /// - type_tag must be equal
    /// - user_key must start with prefix.user_key
    ///
    /// This enables efficient prefix scans in BTreeMap:
    /// ```
    /// # use meridian_core::{Key, Namespace, BranchId};
    /// # let branch_id = BranchId::new();
    /// # let ns = Namespace::new("t".to_string(), "a".to_string(), "ag".to_string(), branch_id);
    /// let prefix = Key::new_kv(ns.clone(), "user:");
    /// let key = Key::new_kv(ns.clone(), "user:alice");
    /// assert!(key.starts_with(&prefix));
    /// ```
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.namespace == prefix.namespace
            && self.type_tag == prefix.type_tag
            && self.user_key.starts_with(&prefix.user_key)
    }
}

/// Ordering implementation for BTreeMap
///
/// Keys are ordered by: namespace → type_tag → user_key
/// This ordering is critical for efficient prefix scans
impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.namespace
            .cmp(&other.namespace)
            .then(self.type_tag.cmp(&other.type_tag))
            .then(self.user_key.cmp(&other.user_key))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
