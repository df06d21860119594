//! Shared page watch domain primitives.
//!
//! This crate owns the polling-and-dispatch contracts and the deterministic
//! rules around them (marker ordering, snapshot diffs, fan-out planning,
//! poll windows, retry policy). It intentionally excludes AWS SDK, HTTP and
//! Lambda runtime concerns.

pub mod contract;
pub mod diff;
pub mod fanout;
pub mod marker;
pub mod retry;
pub mod schedule;
pub mod storage_keys;
