//! API-key CRUD, request authentication, and scoped-key verification.
//!
//! Grounded on `auth_manager.h`/`auth_manager.cpp`: a single in-memory key
//! trie keyed by the key's own `value` (so the scoped-key path can do a
//! prefix range scan), persisted to the KV store under `$KP_<id>` with a
//! shared counter at `$KN`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use meridian_storage::kv_store::{KvError, KvStore};
use meridian_wire::{decode_scoped_key, hmac_digest_b64, verify_digest, ScopedKeyError};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Length of the lookup prefix carved off the front of an API key's value.
pub const PREFIX_LEN: usize = 4;
/// Length, in characters, of a generated (non-custom) key value.
pub const GENERATED_KEY_LEN: usize = 32;
/// Default `expires_at`: an arbitrary point in the year 4020, matching the
/// source's "effectively never" sentinel.
pub const FAR_FUTURE_TIMESTAMP: u64 = 64_723_363_199;

const KEY_COUNTER_KEY: &[u8] = b"$KN";

fn key_record_key(id: u32) -> Vec<u8> {
    format!("$KP_{id}").into_bytes()
}

/// Errors from key CRUD or authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The underlying KV store failed.
    #[error("key store error: {0}")]
    Store(#[from] KvError),
    /// A stored key record failed to deserialize.
    #[error("corrupt key record: {0}")]
    Corrupt(String),
    /// `create_key` was given an explicit value already in use.
    #[error("key value already exists")]
    DuplicateValue,
    /// No key exists with the given id.
    #[error("no such key id {0}")]
    NotFound(u32),
}

/// A persisted API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Dense, monotonically assigned id.
    pub id: u32,
    /// The opaque secret value; its first [`PREFIX_LEN`] chars are the
    /// scoped-key lookup prefix.
    pub value: String,
    /// Human-readable description.
    pub description: String,
    /// Allowed actions: exact (`documents:search`), wildcard (`*`), or a
    /// resource prefix (`collections:*`).
    pub actions: Vec<String>,
    /// Allowed collections: exact name, `*`, or a regex.
    pub collections: Vec<String>,
    /// Unix-seconds expiry.
    pub expires_at: u64,
    /// Whether housekeeping should delete this key once expired.
    pub autodelete: bool,
}

impl ApiKey {
    /// The scoped-key lookup prefix: the key's first [`PREFIX_LEN`] chars.
    pub fn prefix(&self) -> &str {
        let end = self.value.char_indices().nth(PREFIX_LEN).map(|(i, _)| i).unwrap_or(self.value.len());
        &self.value[..end]
    }

    fn is_search_only(&self) -> bool {
        self.actions.len() == 1 && self.actions[0] == "documents:search"
    }
}

struct KeyIndex {
    by_value: BTreeMap<String, ApiKey>,
    by_id: HashMap<u32, String>,
}

impl KeyIndex {
    fn new() -> Self {
        KeyIndex {
            by_value: BTreeMap::new(),
            by_id: HashMap::new(),
        }
    }

    fn insert(&mut self, key: ApiKey) {
        self.by_id.insert(key.id, key.value.clone());
        self.by_value.insert(key.value.clone(), key);
    }

    fn remove_by_id(&mut self, id: u32) -> Option<ApiKey> {
        let value = self.by_id.remove(&id)?;
        self.by_value.remove(&value)
    }
}

/// One authenticated `(collection, key)` pair's outcome: whether the pair
/// carried embedded scoped-key parameters to merge into the request.
pub type EmbeddedParams = Option<Map<String, Value>>;

/// The result of [`AuthManager::authenticate`].
pub struct AuthOutcome {
    /// `true` only if every presented pair authenticated successfully.
    pub authenticated: bool,
    /// Per-pair embedded parameters recovered from a scoped key, in the
    /// same order as the input pairs. `None` for bootstrap/direct keys.
    pub embedded_params: Vec<EmbeddedParams>,
}

/// Persists and authenticates API keys.
pub struct AuthManager {
    kv: Arc<dyn KvStore>,
    index: RwLock<KeyIndex>,
    bootstrap_key: Option<String>,
}

impl AuthManager {
    /// Load the key trie from the KV store. `bootstrap_key`, if set, always
    /// authenticates with no further checks.
    pub fn new(kv: Arc<dyn KvStore>, bootstrap_key: Option<String>) -> Result<Self, AuthError> {
        let mut index = KeyIndex::new();
        let entries = kv.scan(b"$KP_", b"$KP`")?; // '`' = '_' + 1, bounds the $KP_ prefix
        for (_, value) in entries {
            let key: ApiKey = serde_json::from_slice(&value).map_err(|e| AuthError::Corrupt(e.to_string()))?;
            index.insert(key);
        }
        Ok(AuthManager {
            kv,
            index: RwLock::new(index),
            bootstrap_key,
        })
    }

    /// Create and persist a new key. `value` overrides the generated
    /// secret (used for deterministic test fixtures and admin-supplied
    /// keys); when `None`, a random [`GENERATED_KEY_LEN`]-char value is
    /// generated.
    pub fn create_key(
        &self,
        description: String,
        actions: Vec<String>,
        collections: Vec<String>,
        expires_at: Option<u64>,
        autodelete: bool,
        value: Option<String>,
    ) -> Result<ApiKey, AuthError> {
        let value = value.unwrap_or_else(generate_key_value);
        {
            let index = self.index.read();
            if index.by_value.contains_key(&value) {
                return Err(AuthError::DuplicateValue);
            }
        }
        let id = self.kv.increment(KEY_COUNTER_KEY, 1)? as u32;
        let key = ApiKey {
            id,
            value,
            description,
            actions,
            collections,
            expires_at: expires_at.unwrap_or(FAR_FUTURE_TIMESTAMP),
            autodelete,
        };
        let bytes = serde_json::to_vec(&key).map_err(|e| AuthError::Corrupt(e.to_string()))?;
        self.kv.insert(&key_record_key(id), &bytes)?;
        self.index.write().insert(key.clone());
        Ok(key)
    }

    /// Fetch a key by id.
    pub fn get_key(&self, id: u32) -> Option<ApiKey> {
        let index = self.index.read();
        index.by_id.get(&id).and_then(|v| index.by_value.get(v)).cloned()
    }

    /// List every key, ordered by `value`.
    pub fn list_keys(&self) -> Vec<ApiKey> {
        self.index.read().by_value.values().cloned().collect()
    }

    /// Remove a key by id. Returns `true` if it existed.
    pub fn remove_key(&self, id: u32) -> Result<bool, AuthError> {
        self.kv.remove(&key_record_key(id))?;
        Ok(self.index.write().remove_by_id(id).is_some())
    }

    /// Delete every key with `autodelete` set whose `expires_at` has
    /// passed. Returns the number removed.
    pub fn do_housekeeping(&self, now: u64) -> Result<usize, AuthError> {
        let expired: Vec<u32> = {
            let index = self.index.read();
            index
                .by_value
                .values()
                .filter(|k| k.autodelete && now > k.expires_at)
                .map(|k| k.id)
                .collect()
        };
        for id in &expired {
            self.remove_key(*id)?;
        }
        Ok(expired.len())
    }

    /// Authenticate every `(collection, presented_key)` pair for `action`.
    /// All pairs must pass for the overall result to be `authenticated`.
    pub fn authenticate(&self, action: &str, pairs: &[(String, String)], now: u64) -> AuthOutcome {
        let mut embedded_params = Vec::with_capacity(pairs.len());
        for (collection, presented) in pairs {
            if self.bootstrap_key.as_deref() == Some(presented.as_str()) {
                embedded_params.push(None);
                continue;
            }
            match self.authenticate_one(action, collection, presented, now) {
                Some(params) => embedded_params.push(params),
                None => {
                    return AuthOutcome {
                        authenticated: false,
                        embedded_params,
                    }
                }
            }
        }
        AuthOutcome {
            authenticated: true,
            embedded_params,
        }
    }

    fn authenticate_one(&self, action: &str, collection: &str, presented: &str, now: u64) -> Option<EmbeddedParams> {
        let direct = self.index.read().by_value.get(presented).cloned();
        if let Some(key) = direct {
            return auth_against_key(&key, collection, action, now, false).then_some(None);
        }
        self.authenticate_scoped(action, collection, presented, now)
    }

    fn authenticate_scoped(&self, action: &str, collection: &str, presented: &str, now: u64) -> Option<EmbeddedParams> {
        if action != "documents:search" {
            return None;
        }
        let decoded = match decode_scoped_key(presented) {
            Ok(d) => d,
            Err(ScopedKeyError::InvalidBase64 | ScopedKeyError::Malformed | ScopedKeyError::InvalidParamsEncoding) => return None,
        };

        let candidates: Vec<ApiKey> = {
            let index = self.index.read();
            index
                .by_value
                .range(decoded.prefix.clone()..)
                .take_while(|(value, _)| value.starts_with(&decoded.prefix))
                .map(|(_, key)| key.clone())
                .collect()
        };

        for parent in candidates {
            if !parent.is_search_only() {
                continue;
            }
            if !collection_allowed(&parent.collections, collection) {
                continue;
            }
            if !verify_digest(&decoded, &parent.value) {
                continue;
            }
            let params: Value = serde_json::from_str(&decoded.params_json).ok()?;
            let mut params = params.as_object().cloned()?;
            if let Some(embedded_expiry) = params.get("expires_at") {
                let embedded_expiry = embedded_expiry.as_i64()?;
                if embedded_expiry < 0 {
                    return None;
                }
                let effective = (embedded_expiry as u64).min(parent.expires_at);
                if now > effective {
                    return None;
                }
            } else if now > parent.expires_at {
                return None;
            }
            params.remove("expires_at");
            return Some(Some(params));
        }
        None
    }
}

fn auth_against_key(key: &ApiKey, collection: &str, action: &str, now: u64, search_only: bool) -> bool {
    if now > key.expires_at {
        return false;
    }
    if search_only && !key.is_search_only() {
        return false;
    }
    if !action_allowed(&key.actions, action) {
        return false;
    }
    collection_allowed(&key.collections, collection)
}

fn action_allowed(actions: &[String], action: &str) -> bool {
    let resource = action.split(':').next().unwrap_or(action);
    actions.iter().any(|a| {
        a == "*"
            || a == action
            || a.strip_suffix(":*").map(|r| r == resource).unwrap_or(false)
    })
}

fn collection_allowed(collections: &[String], collection: &str) -> bool {
    if collection.is_empty() {
        return true;
    }
    collections.iter().any(|c| {
        if c == "*" || c == collection {
            return true;
        }
        regex::Regex::new(c).map(|re| re.is_match(collection)).unwrap_or(false)
    })
}

fn generate_key_value() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..GENERATED_KEY_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Merge an embedded scoped-key parameter into an existing params map, per
/// `auth_manager.cpp`'s `add_item_to_params`: `filter_by` conjoins, every
/// other key only overwrites when explicitly requested.
pub fn merge_param(existing: &mut Map<String, Value>, key: &str, new_value: Value, overwrite: bool) {
    if key == "filter_by" {
        let new_str = new_value.as_str().unwrap_or_default().to_string();
        let existing_str = existing.get("filter_by").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let merged = match (existing_str.is_empty(), new_str.is_empty()) {
            (true, true) => String::new(),
            (true, false) => new_str,
            (false, true) => existing_str,
            (false, false) => format!("({existing_str}) && ({new_str})"),
        };
        existing.insert("filter_by".to_string(), Value::String(merged));
        return;
    }
    if overwrite || !existing.contains_key(key) {
        existing.insert(key.to_string(), new_value);
    }
}

/// Merge every embedded scoped-key parameter set into `params` in order.
pub fn merge_embedded_params(params: &mut Map<String, Value>, embedded: &EmbeddedParams, overwrite: bool) {
    let Some(embedded) = embedded else { return };
    for (key, value) in embedded {
        merge_param(params, key, value.clone(), overwrite);
    }
}
