//! Request dispatch for Meridian's write path.
//!
//! Bundles the auth, rate-limit, collection-store, and replication layers
//! into [`AppContext`], and drives them through [`dispatch`]: authenticate
//! the presented key, merge its embedded params, check rate limits, then
//! hand the request to [`meridian_engine::replication::ReplicationState`].
//! [`ApiError`] maps the result (or any rejection along the way) onto the
//! status-code categories a caller's HTTP layer would use.
//!
//! [`HttpLeaderForwarder`] is the one piece of this crate that does
//! network I/O — relaying a write to the current leader when this node
//! isn't it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app_context;
pub mod dispatch;
pub mod error;
pub mod forward;

pub use app_context::AppContext;
pub use dispatch::{dispatch, DispatchRequest};
pub use error::ApiError;
pub use forward::HttpLeaderForwarder;
