//! Unified configuration layer.
//!
//! Every environment variable the workspace reads goes through this module;
//! callers use the typed structs instead of `std::env::var`.
//!
//! - `loader`: `env_or`, `env_optional`, `env_bool`, `env_parse` helpers
//! - `schema`: `SandboxDefaults`, `ObservabilityConfig`
//! - `env_keys`: key constants

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_parse, load_dotenv};
pub use schema::{ObservabilityConfig, SandboxDefaults};
