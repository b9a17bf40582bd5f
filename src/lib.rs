//! weatherwatch: temporal weather snapshot store and windowed query engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod data;
pub mod storage;
pub mod engine;
pub mod api;
