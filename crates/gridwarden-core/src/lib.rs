//! gridwarden-core — shared types, node configuration, engine config
//! templates, and the retry executor.

pub mod config;
pub mod retry;
pub mod template;
pub mod types;

pub use config::{
    ConfigError, ConfigResult, EnvSettings, NodeConfiguration, NodeConfigurationBuilder,
    NodeLeftPolicy, NodeOptions,
};
pub use retry::RetryPolicy;
pub use template::ConfigTemplate;
pub use types::*;
