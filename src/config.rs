use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_status_clear_secs() -> u64 {
    4
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub window: WindowConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Seconds the embedding status line stays visible after a run finishes.
    #[serde(default = "default_status_clear_secs")]
    pub status_clear_secs: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                base_url: default_base_url(),
                status_clear_secs: default_status_clear_secs(),
            },
            window: WindowConfig {
                width: 1100,
                height: 720,
            },
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => {
                    match toml::from_str(&contents) {
                        Ok(config) => return config,
                        Err(e) => eprintln!("Error parsing config.toml: {}. Using defaults.", e),
                    }
                }
                Err(e) => eprintln!("Error reading config.toml: {}. Using defaults.", e),
            }
        } else {
            // Create config directory if it doesn't exist
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
        }

        Config::default()
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/research-gpt")
        } else {
            PathBuf::from(".")
        }
    }

    fn token_path() -> PathBuf {
        Self::get_config_dir().join("token")
    }

    /// Bearer token saved by the last successful login, if any.
    pub fn load_token() -> Option<String> {
        match fs::read_to_string(Self::token_path()) {
            Ok(token) => {
                let token = token.trim().to_string();
                if token.is_empty() { None } else { Some(token) }
            }
            Err(_) => None,
        }
    }

    pub fn save_token(token: &str) {
        let _ = fs::create_dir_all(Self::get_config_dir());
        if let Err(e) = fs::write(Self::token_path(), token) {
            eprintln!("Error saving token: {}", e);
        }
    }

    pub fn clear_token() {
        let _ = fs::remove_file(Self::token_path());
    }
}
