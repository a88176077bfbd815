//! Authentication and rate limiting for the write/read path: API-key CRUD
//! and scoped-key verification ([`auth`]), and priority-ordered rate-limit
//! rule evaluation ([`ratelimit`]).

#![warn(missing_docs)]

pub mod auth;
pub mod ratelimit;

pub use auth::{merge_embedded_params, merge_param, ApiKey, AuthError, AuthManager, AuthOutcome, EmbeddedParams};
pub use ratelimit::{
    AutoBan, EntityType, MaxRequests, RateLimitDecision, RateLimitError, RateLimitManager, RateLimitRule, RuleAction,
    RuleEntity,
};
