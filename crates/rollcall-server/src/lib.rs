//! # rollcall-server
//!
//! Axum WebSocket relay for short-lived peer identities.
//!
//! - Session registry with a single lock and a duplicate-peer policy
//! - Connection manager that turns failed sends into session teardown
//! - Message router for signals, shares, private messages and chat handshakes
//! - HTTP endpoints: health, active users, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod chat;
pub mod connection;
pub mod health;
pub mod manager;
pub mod registry;
pub mod router;
pub mod server;
pub mod websocket;

pub use manager::{ConnectionManager, Delivery};
pub use server::RollcallServer;
