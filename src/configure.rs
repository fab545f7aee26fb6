use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub node_id: u64,
    pub epoch_ms: u64,
    pub enable_time_cache: bool,
    pub cache_refresh_ms: u64,
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("log_level", "info")?
        .set_default("log_to_file", false)?
        .set_default("log_file", "log/uidgen.log")?
        .set_default("node_id", 0)?
        // 2023-01-01T00:00:00Z
        .set_default("epoch_ms", 1_672_531_200_000i64)?
        .set_default("enable_time_cache", true)?
        .set_default("cache_refresh_ms", 1)?
        // Add configuration from a file
        .add_source(File::with_name("config/config.yaml").required(false))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("APP"))
        .build()?;

    s.try_deserialize()
}
