//! Application configuration.
//!
//! Defaults, then an optional `config/default.toml`, then `FLORENCE_`
//! environment variables (double underscore as the section separator, e.g.
//! `FLORENCE_SERVER__PORT=9000`). The whole struct is constructor-injected
//! into the components that need it; nothing reads the environment after
//! startup.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// External scoring backend. An unset `endpoint` selects the rule-based
/// strategy and the offline null backend; this is the only place strategy
/// selection is decided.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8000_i64)?
            .set_default("database.url", "sqlite://florence.db")?
            .set_default("ai.model", "llama3")?
            .set_default("ai.timeout_secs", 10_i64)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("FLORENCE").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_the_offline_backend() {
        let config = Config::load().expect("defaults must load");
        assert!(config.ai.endpoint.is_none());
        assert_eq!(config.ai.timeout_secs, 10);
        assert_eq!(config.server.port, 8000);
    }
}
