//! Typed configuration: schema, JSON loader with env overrides, and the
//! dotted-path walker behind the `update_config` tool.

pub mod loader;
pub mod paths;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::Config;
