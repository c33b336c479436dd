// Application layer - use cases and orchestration
//
// - engine: atomic transfers
// - query: role-scoped ledger and audit views
// - service: facade adding onboarding, directory and integrity checks

pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod service;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use query::*;
pub use service::*;
