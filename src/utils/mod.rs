//! Environment and clock helpers.

pub mod env;

pub use env::{get_env_with_prefix, now_unix};
