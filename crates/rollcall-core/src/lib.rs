//! # rollcall-core
//!
//! Shared building blocks for the rollcall presence relay:
//!
//! - [`ids`]: branded peer and connection identifiers
//! - [`identity`]: the fixed label pool that hands out display identities
//! - [`messages`]: inbound/outbound wire frames as tagged unions
//! - [`errors`]: protocol, delivery and registry error types

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod ids;
pub mod messages;

pub use errors::{DeliveryError, ProtocolError, RegistryConflict};
pub use identity::IdentityPool;
pub use ids::{ConnectionId, PeerId};
pub use messages::{ChatKind, Inbound, Outbound, RosterEntry};
