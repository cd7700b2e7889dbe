//! events-agent - polls a security-events API and forwards normalized events.
//!
//! Each enabled stream (sign-in attempts, item usages, audit events) is
//! polled on its own schedule. Pages are drained until the API reports no
//! more data, and the pagination cursor is persisted after every page so a
//! restart resumes where the last run stopped.

pub mod api;
pub mod config;
pub mod normalize;
pub mod persistence;
pub mod publish;
pub mod server;
pub mod supervisor;
pub mod types;
pub mod worker;

#[cfg(test)]
pub mod test_utils;
