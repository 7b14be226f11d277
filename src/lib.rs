//! db-tally - parameterized analytical queries over a row store and a batch store.
//!
//! This library exposes the core modules for use by the `tally` binary and
//! integration tests.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod periods;
pub mod runner;
pub mod safety;
pub mod template;
