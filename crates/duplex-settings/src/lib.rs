//! # duplex-settings
//!
//! Configuration with layered sources. In priority order:
//! 1. **Compiled defaults**: [`DuplexSettings::default()`]
//! 2. **Settings file**: `~/.duplex/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `DUPLEX_*` overrides
//!
//! Connection fields left at zero are filled in by
//! [`ConnectionSettings::resolved`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
