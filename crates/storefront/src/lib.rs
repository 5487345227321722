//! Certdeck shop library.
//!
//! This crate provides the shop functionality as a library, allowing it to
//! be tested and reused. The binary in `main.rs` wires it to real
//! collaborators (`PostgreSQL`, Stripe, PayPal); the test suites assemble
//! the same state from the in-memory store and fake gateways.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod routes;
pub mod services;
pub mod state;
