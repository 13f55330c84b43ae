use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const DEFAULT_MODEL_ID: &str = "mistralai/Mistral-7B-Instruct-v0.3";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8001;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_id: String,
    pub model_dir: Option<PathBuf>,
    pub hf_token: Option<String>,
    pub device: Option<String>,
    pub chat_template_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got {raw:?}"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            model_id: var("MODEL_ID").unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            model_dir: var("MODEL_DIR").map(PathBuf::from),
            hf_token: var("HF_TOKEN"),
            device: var("MODEL_DEVICE"),
            chat_template_path: var("CHAT_TEMPLATE_PATH").map(PathBuf::from),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8001");
        assert_eq!(cfg.model_id, DEFAULT_MODEL_ID);
        assert!(cfg.model_dir.is_none());
        assert!(cfg.device.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("MODEL_DIR", "models/coach"),
            ("MODEL_DEVICE", "cpu"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9000");
        assert_eq!(cfg.model_dir, Some(PathBuf::from("models/coach")));
        assert_eq!(cfg.device.as_deref(), Some("cpu"));
    }

    #[test]
    fn invalid_port_is_an_error() {
        assert!(config_from(&[("PORT", "eighty")]).is_err());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config_from(&[("HOST", "  "), ("HF_TOKEN", "")]).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert!(cfg.hf_token.is_none());
    }
}
