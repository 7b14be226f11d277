//! Integration tests for db-tally.

mod config_test;
mod postgres_test;
mod runner_test;
mod scenarios_test;
