//! Cross-protocol orchestration engine
//!
//! Coordinates quotes, composite operations and multi-agent decisions
//! across a swap-routing aggregator and a collateralized lending market.
//! The engine sequences calls to those external systems; it holds no
//! funds and performs no settlement of its own.

pub mod agents;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod ops;
pub mod protocols;
pub mod quotes;
pub mod recovery;
pub mod time;

pub use config::AppConfig;
pub use error::{ClassifiedError, ErrorKind, Result, Severity};
pub use gateway::Gateway;
