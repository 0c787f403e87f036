//! # rollcall-settings
//!
//! Configuration with layered sources for the rollcall server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RollcallSettings::default()`]
//! 2. **User file**: `~/.rollcall/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ROLLCALL_*` overrides (highest priority)
//!
//! The binary applies its CLI flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings_from_path, settings_path};
pub use types::*;
