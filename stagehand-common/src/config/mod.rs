//! Configuration for the harness.
//!
//! - A single environment snapshot ([`EnvSource`]) taken at the entry point
//! - Type-safe parsing with source tracking ([`EnvParser`], [`Sourced`])
//! - An optional TOML file layered beneath the environment
//! - [`HarnessSettings`], passed by reference to every component

pub mod env;
pub mod file;
pub mod settings;
pub mod source;

pub use env::{EnvError, EnvParser, parse_bool};
pub use file::FileConfig;
pub use settings::{Credentials, DEFAULT_REGION, DEFAULT_TOOL, HarnessSettings};
pub use source::{ConfigSource, EnvSource, Sourced};
