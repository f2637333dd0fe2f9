//! Real-time direct message relay.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod config;
pub mod db;
pub mod dm;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;
