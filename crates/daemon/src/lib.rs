//! Trafficlight daemon
//!
//! Coordinates remote client adapters over a long-poll HTTP protocol and
//! drives them through scripted scenarios.

pub mod adapter;
pub mod allocator;
pub mod client;
pub mod config;
pub mod homerunner;
pub mod http;
pub mod junit;
pub mod scenario;
pub mod scenarios;
pub mod state;
pub mod suite;
pub mod sweeper;
pub mod testcase;

pub use state::Orchestrator;
