pub mod config;
pub use config::{AppConfig, GenerationDefaults};

pub mod db;
