pub mod backend;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod poll;
pub mod telemetry;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
