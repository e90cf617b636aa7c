//! opencawt-store — the sled-backed persistence layer: one tree per entity,
//! `bincode` values, composite byte keys for the multi-column uniqueness and
//! range-scan requirements spec §3 calls for (ballots, transcript events,
//! idempotency records, rate-limit windows).

pub mod db;
pub mod idempotency;
pub mod ratelimit;

pub use db::StoreDb;
pub use idempotency::IdempotencyOutcome;
