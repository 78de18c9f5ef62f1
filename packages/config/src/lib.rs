// ABOUTME: Configuration primitives shared across Warden packages
// ABOUTME: Exposes environment variable names and typed parsing helpers

pub mod constants;
pub mod env;

pub use env::{parse_env_list, parse_env_or_default, parse_env_or_default_with_validation};
