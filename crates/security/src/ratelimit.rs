//! Rule-based rate limiting: priority-ordered rule evaluation, a
//! two-bucket smoothed-rate throttle counter, and auto-ban lifecycle.
//!
//! The rule-engine shape (priority, `{throttle, allow, block}`, entity
//! tuples) is new relative to the source, which predates it with a
//! simpler single tracker; the smoothed-rate decay formula below is
//! carried over from `ratelimit_manager.cpp`'s
//! `previous_requests_count`/`current_requests_count`/`last_reset_time`
//! bookkeeping, generalized from one global counter to one counter per
//! matched entity tuple per rule.

use std::collections::HashMap;
use std::sync::Arc;

use meridian_storage::kv_store::{KvError, KvStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const RULE_STORE_KEY: &[u8] = b"$RATELIMIT_RULES";
const MINUTE_WINDOW_SECS: u64 = 60;
const HOUR_WINDOW_SECS: u64 = 3600;

/// Errors from rule CRUD or persistence.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The underlying KV store failed.
    #[error("rate limit store error: {0}")]
    Store(#[from] KvError),
    /// The persisted rule store failed to deserialize.
    #[error("corrupt rule store: {0}")]
    Corrupt(String),
    /// An entity or rule pattern did not compile as a regex.
    #[error("invalid entity pattern: {0}")]
    InvalidPattern(String),
}

/// What a matched rule does with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Let the request through, bypassing all lower-priority rules.
    Allow,
    /// Reject the request outright.
    Block,
    /// Apply the sliding-window counter and possibly auto-ban.
    Throttle,
}

/// What kind of value an entity tuple matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Matches the presented API key value.
    ApiKey,
    /// Matches the client's source IP.
    Ip,
}

/// One `(entity_type, pattern)` clause of a rule. `pattern` is matched as
/// a literal first; if it fails and contains regex metacharacters, it is
/// compiled and matched as a regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntity {
    /// Which request field this clause matches against.
    pub entity_type: EntityType,
    /// Literal value or regex pattern.
    pub entity_id: String,
}

/// Per-window request thresholds. `-1` disables that window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaxRequests {
    /// Requests per rolling minute before throttling kicks in.
    pub minute_threshold: i64,
    /// Requests per rolling hour before throttling kicks in.
    pub hour_threshold: i64,
}

/// Auto-ban configuration: after `threshold_num` throttle violations
/// within a minute window, ban for `num_hours`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBan {
    /// Number of violations within a minute window that trigger a ban.
    pub threshold_num: u32,
    /// Ban duration in hours.
    pub num_hours: u64,
}

/// A persisted rate-limit rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Monotonically assigned id.
    pub id: u32,
    /// What to do when every entity clause matches.
    pub action: RuleAction,
    /// Entity clauses; all must match for the rule to apply.
    pub entities: Vec<RuleEntity>,
    /// Throttle thresholds (ignored for `allow`/`block`).
    pub max_requests: Option<MaxRequests>,
    /// Optional auto-ban policy (ignored for `allow`/`block`).
    pub auto_ban: Option<AutoBan>,
    /// Lower values are evaluated first.
    pub priority: i64,
}

/// The two-bucket smoothed-rate counter for one `(rule, entity tuple)`.
#[derive(Debug, Clone, Default)]
struct WindowCounter {
    previous: u64,
    current: u64,
    last_reset: u64,
}

impl WindowCounter {
    fn rotate_and_rate(&mut self, now: u64, window: u64) -> f64 {
        if self.last_reset == 0 {
            self.last_reset = now;
        } else if now.saturating_sub(self.last_reset) > window {
            let gap = now.saturating_sub(self.last_reset);
            self.previous = self.current;
            self.current = 0;
            self.last_reset = now;
            if gap > 2 * window {
                self.previous = 0;
            }
        }
        self.current += 1;
        let elapsed = now.saturating_sub(self.last_reset) as f64;
        let window_f = window as f64;
        self.previous as f64 * ((window_f - elapsed).max(0.0) / window_f) + self.current as f64
    }
}

#[derive(Debug, Clone, Default)]
struct ThrottleState {
    minute: WindowCounter,
    hour: WindowCounter,
    violations_in_minute: u32,
    violation_window_start: u64,
    banned_until: u64,
}

/// What came of evaluating rate-limit rules for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// No matching rule, or the matching rule was `allow`.
    Allow,
    /// A `block` rule matched, or a `throttle` rule's thresholds were
    /// exceeded, or the entity tuple is currently banned.
    Deny,
}

/// Rule store plus live throttle counters and bans.
pub struct RateLimitManager {
    kv: Arc<dyn KvStore>,
    rules: RwLock<Vec<RateLimitRule>>,
    next_id: RwLock<u32>,
    counters: RwLock<HashMap<(u32, String), ThrottleState>>,
}

impl RateLimitManager {
    /// Load the rule store from the KV store (empty if absent).
    pub fn new(kv: Arc<dyn KvStore>) -> Result<Self, RateLimitError> {
        let rules: Vec<RateLimitRule> = match kv.get(RULE_STORE_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| RateLimitError::Corrupt(e.to_string()))?,
            None => Vec::new(),
        };
        let next_id = rules.iter().map(|r| r.id).max().map(|m| m + 1).unwrap_or(1);
        Ok(RateLimitManager {
            kv,
            rules: RwLock::new(rules),
            next_id: RwLock::new(next_id),
            counters: RwLock::new(HashMap::new()),
        })
    }

    /// Add a rule, assigning it the next monotonic id, and persist the
    /// updated rule store.
    pub fn add_rule(
        &self,
        action: RuleAction,
        entities: Vec<RuleEntity>,
        max_requests: Option<MaxRequests>,
        auto_ban: Option<AutoBan>,
        priority: i64,
    ) -> Result<RateLimitRule, RateLimitError> {
        let mut next_id = self.next_id.write();
        let id = *next_id;
        *next_id += 1;
        let rule = RateLimitRule {
            id,
            action,
            entities,
            max_requests,
            auto_ban,
            priority,
        };
        let mut rules = self.rules.write();
        rules.push(rule.clone());
        self.persist_locked(&rules)?;
        Ok(rule)
    }

    /// Remove a rule by id. Returns `true` if it existed.
    pub fn remove_rule(&self, id: u32) -> Result<bool, RateLimitError> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        let removed = rules.len() != before;
        if removed {
            self.persist_locked(&rules)?;
        }
        Ok(removed)
    }

    /// List every rule, in priority order.
    pub fn list_rules(&self) -> Vec<RateLimitRule> {
        let mut rules = self.rules.read().clone();
        rules.sort_by_key(|r| r.priority);
        rules
    }

    fn persist_locked(&self, rules: &[RateLimitRule]) -> Result<(), RateLimitError> {
        let bytes = serde_json::to_vec(rules).map_err(|e| RateLimitError::Corrupt(e.to_string()))?;
        self.kv.insert(RULE_STORE_KEY, &bytes)?;
        Ok(())
    }

    /// Decide allow/deny for one request carrying `entities`, e.g.
    /// `[(ApiKey, "abcd..."), (Ip, "10.0.0.1")]`. Rules are evaluated in
    /// ascending priority order; the first fully-matching rule wins.
    pub fn check(&self, entities: &[(EntityType, String)], now: u64) -> RateLimitDecision {
        let mut rules = self.rules.read().clone();
        rules.sort_by_key(|r| r.priority);

        for rule in &rules {
            if !rule_matches(rule, entities) {
                continue;
            }
            return match rule.action {
                RuleAction::Allow => RateLimitDecision::Allow,
                RuleAction::Block => RateLimitDecision::Deny,
                RuleAction::Throttle => self.apply_throttle(rule, entities, now),
            };
        }
        RateLimitDecision::Allow
    }

    fn apply_throttle(&self, rule: &RateLimitRule, entities: &[(EntityType, String)], now: u64) -> RateLimitDecision {
        let entity_key = throttle_key(entities);
        let mut counters = self.counters.write();
        let state = counters.entry((rule.id, entity_key)).or_default();

        if state.banned_until > now {
            state.minute.current = 0;
            state.hour.current = 0;
            return RateLimitDecision::Deny;
        }
        if state.banned_until != 0 && state.banned_until <= now {
            state.banned_until = 0;
            state.violations_in_minute = 0;
        }

        let max = match rule.max_requests {
            Some(m) => m,
            None => return RateLimitDecision::Allow,
        };

        let minute_rate = state.minute.rotate_and_rate(now, MINUTE_WINDOW_SECS);
        let hour_rate = state.hour.rotate_and_rate(now, HOUR_WINDOW_SECS);

        let exceeded = (max.minute_threshold >= 0 && minute_rate > max.minute_threshold as f64)
            || (max.hour_threshold >= 0 && hour_rate > max.hour_threshold as f64);

        if !exceeded {
            return RateLimitDecision::Allow;
        }

        if let Some(ban) = rule.auto_ban {
            if now.saturating_sub(state.violation_window_start) > MINUTE_WINDOW_SECS {
                state.violation_window_start = now;
                state.violations_in_minute = 0;
            }
            state.violations_in_minute += 1;
            if state.violations_in_minute >= ban.threshold_num {
                state.banned_until = now + ban.num_hours * HOUR_WINDOW_SECS;
            }
        }
        RateLimitDecision::Deny
    }
}

fn throttle_key(entities: &[(EntityType, String)]) -> String {
    entities
        .iter()
        .map(|(t, v)| format!("{t:?}:{v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn rule_matches(rule: &RateLimitRule, entities: &[(EntityType, String)]) -> bool {
    rule.entities.iter().all(|clause| {
        entities
            .iter()
            .filter(|(t, _)| *t == clause.entity_type)
            .any(|(_, v)| entity_matches(&clause.entity_id, v))
    })
}

fn entity_matches(pattern: &str, value: &str) -> bool {
    if pattern == value || pattern == "*" {
        return true;
    }
    regex::Regex::new(pattern).map(|re| re.is_match(value)).unwrap_or(false)
}
