//! Backend for a personality-driven companion agent: bounded trait modifiers,
//! relationship memory, goal tracking, and a sidecar that watches conversation
//! quality and feeds warnings back into the next prompt.

pub mod agent;
pub mod config;
pub mod goals;
pub mod llm_client;
pub mod persona;
pub mod relationships;
pub mod sidecar;
mod storage;
pub mod tools;

pub use agent::{Companion, CompanionBuilder, CompanionEvent};
pub use config::AgentConfig;
