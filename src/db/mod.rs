//! Durable store: accounts, session rows, agent credentials and the
//! append-only security event log.

pub mod models;
pub mod operations;

pub use models::{Account, AgentCredential, SecurityEvent, SessionRow, TrustLevel};
pub use operations::Db;
