//! Botrealm Server Library
//!
//! Bot population manager for a large-scale multiplayer game server: the
//! spawn scheduler decides which synthetic players to instantiate, when,
//! and how many to keep alive per world region while protecting the host
//! process under load.
//!
//! # Features
//!
//! - `metrics_extended` - Per-priority queue depths, zone table and
//!   reconciliation counters on the metrics endpoint (enabled by default)
//! - `jit_registry` - Mirror on-demand bot spawns into a JIT registry so
//!   orphan cleanup never touches world-population bots (enabled by default)

pub mod config;
pub mod metrics;
pub mod spawn;
pub mod world;
