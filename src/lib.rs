//! Mail triage: classify flagged mail, reply when safe, escalate otherwise.

pub mod config;
pub mod draft;
pub mod error;
pub mod google;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod pubsub;
pub mod retry;
pub mod safety;
pub mod server;
pub mod store;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;
