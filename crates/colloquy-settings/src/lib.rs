//! # colloquy-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`Settings::default()`]
//! 2. **User file**: `~/.colloquy/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `COLLOQUY_*` overrides
//!
//! ```no_run
//! let settings = colloquy_settings::load_settings().unwrap_or_default();
//! println!("records live under {}", settings.storage.data_dir);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
