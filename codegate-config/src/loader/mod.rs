pub mod layers;

mod config;
mod manager;
mod merge;


pub use config::CodegateConfig;
pub use manager::{ConfigManager, ConfigPaths};
pub use merge::merge_toml_values;
