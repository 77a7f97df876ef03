//! Aurelia: a minimal proof-of-work ledger
//!
//! The `blockchain` module holds the core (transactions, blocks, the chain,
//! mining, the pool and the address index). `api` exposes it over HTTP and
//! `config` loads node settings.

pub mod api;
pub mod blockchain;
pub mod config;
