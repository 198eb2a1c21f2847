use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use a5_llm::OpenAiConfig;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";
const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-preview-05-20";

/// Server settings, read from `A5_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Derives the key sealing users' stored provider keys.
    pub encryption_secret: String,
    pub llm: OpenAiConfig,
    pub default_model: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let host = var("A5_HOST", "0.0.0.0");
        let port: u16 = var("A5_PORT", "3000")
            .parse()
            .context("A5_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

        let timeout_secs: u64 = var("A5_LLM_TIMEOUT_SECS", "120")
            .parse()
            .context("A5_LLM_TIMEOUT_SECS must be a whole number of seconds")?;

        let jwt_secret = var("A5_JWT_SECRET", DEFAULT_JWT_SECRET);
        let encryption_secret = get("A5_ENCRYPTION_KEY").unwrap_or_else(|| jwt_secret.clone());

        Ok(Self {
            addr,
            db_path: PathBuf::from(var("A5_DB_PATH", "a5.db")),
            jwt_secret,
            encryption_secret,
            llm: OpenAiConfig {
                base_url: var("A5_LLM_BASE_URL", a5_llm::openai::DEFAULT_BASE_URL),
                api_key: var("A5_LLM_API_KEY", ""),
                timeout: Duration::from_secs(timeout_secs),
            },
            default_model: var("A5_DEFAULT_MODEL", DEFAULT_MODEL),
        })
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr.to_string(), "0.0.0.0:3000");
        assert_eq!(cfg.db_path, PathBuf::from("a5.db"));
        assert_eq!(cfg.llm.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(cfg.llm.timeout, Duration::from_secs(120));
        assert_eq!(cfg.default_model, DEFAULT_MODEL);
        assert!(cfg.uses_default_secret());
        assert_eq!(cfg.encryption_secret, DEFAULT_JWT_SECRET);
    }

    #[test]
    fn encryption_key_falls_back_to_jwt_secret() {
        let cfg = config(&[("A5_JWT_SECRET", "prod")]).unwrap();
        assert_eq!(cfg.encryption_secret, "prod");

        let cfg = config(&[("A5_JWT_SECRET", "prod"), ("A5_ENCRYPTION_KEY", "vault")]).unwrap();
        assert_eq!(cfg.encryption_secret, "vault");
    }

    #[test]
    fn overrides_are_read() {
        let cfg = config(&[
            ("A5_HOST", "127.0.0.1"),
            ("A5_PORT", "8080"),
            ("A5_JWT_SECRET", "prod"),
            ("A5_DEFAULT_MODEL", "openai/gpt-4o"),
            ("A5_LLM_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(cfg.addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.default_model, "openai/gpt-4o");
        assert_eq!(cfg.llm.timeout, Duration::from_secs(30));
        assert!(!cfg.uses_default_secret());
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(config(&[("A5_PORT", "http")]).is_err());
    }
}
