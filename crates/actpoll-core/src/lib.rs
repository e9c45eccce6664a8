//! actpoll-core: domain types, the watch registry, and the pure cursor
//! resolver for activity-log polling.
//!
//! Nothing here performs IO or touches a clock; callers pass `now_ms` in.

pub mod cursor;
pub mod registry;
pub mod types;
