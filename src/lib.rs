//! Five-level Up/Down ladder bot for Polymarket daily markets.
//!
//! The bot buys one side of a binary Up/Down market at a target price and,
//! when the price moves against it, buys the opposite side at escalating
//! stakes. A fifth level on each side closes the cycle by selling.
//!
//! # Ladder
//!
//! ```text
//! Up1 fills at 52c  ──►  Down2 armed at 52c
//! Down2 fills       ──►  Up3 armed at 52c
//! Up3 fills         ──►  Down4 armed at 52c
//! Down4 fills       ──►  Down5 = 47c (rebound), Up5 = 52c
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`store`]: Persisted trading document
//! - [`market`]: Market interface, CLOB implementation, discovery, mock
//! - [`ladder`]: Amount calculator, price matcher and the trade ladder
//! - [`scheduler`]: Named periodic and wall-clock tasks
//! - [`monitors`]: The tasks that poll, snapshot and heal the session
//! - [`supervisor`]: Session recovery
//! - [`notify`]: Alerts over Telegram or the log
//! - [`feed`]: Reference spot prices
//! - [`controller`]: Operator commands
//! - [`api`]: HTTP API for health, metrics, status and commands
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod ladder;
pub mod market;
pub mod metrics;
pub mod monitors;
pub mod notify;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod sync;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
