//! opencawt-core — shared data model, error taxonomy, and configuration
//! for the OpenCawt notarisation and adjudication service.
//!
//! This crate defines the entity types from the spec's data model, the
//! tagged-variant enums used throughout the engine, and the canonical
//! error type that every other crate propagates via `Result<_, OpenCawtError>`.

pub mod agent;
pub mod agreement;
pub mod case;
pub mod claim;
pub mod config;
pub mod error;
pub mod ident;
pub mod idempotency;
pub mod jury;
pub mod seal;
pub mod submission;
pub mod transcript;
pub mod types;

pub use error::OpenCawtError;
