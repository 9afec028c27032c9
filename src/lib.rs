//! `LootRun` - server core for a round-based contest against an
//! automated adversary.
//!
//! Participants connect over TCP, pick hiding spots each round, and try to
//! outguess the adversary when caught. The [`contest`] module holds the
//! event-driven phase state machine; everything else feeds it events or
//! carries its messages out.

pub mod cli;
pub mod config;
pub mod contest;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod rules;
pub mod server;
pub mod transport;
