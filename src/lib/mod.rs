//! `work_coordinator`: a multi-source Bitcoin mining work coordinator.
//!
//! Consumes block work from Stratum V1 pools and Bitcoin Core's
//! `getblocktemplate` RPC, normalizes it into a uniform [`registry::WorkItem`],
//! dispatches it to a SHA-256d search engine, verifies candidate solutions on
//! the host, and routes accepted results back to their originating source.

pub mod adapters;
pub mod autotuner;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod outbox;
pub mod primitives;
pub mod registry;
pub mod router;
pub mod scheduler;

pub use error::CoordinatorError;
