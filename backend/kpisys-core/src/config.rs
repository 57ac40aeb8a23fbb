// src/config.rs
use serde::Deserialize;
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "KPISYS_";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Server Configuration
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // Persistence
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub seed_demo_data: bool,

    // Sessions
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,

    // TLS, only used when both are set
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_session_ttl_minutes() -> i64 {
    480
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_file: None,
            seed_demo_data: true,
            session_ttl_minutes: default_session_ttl_minutes(),
            cert_path: None,
            key_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        envy::prefixed(ENV_PREFIX).from_env::<Config>()
    }

    /// Parses from explicit pairs instead of the process environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(pairs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Certificate and key paths when TLS is fully configured.
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}
