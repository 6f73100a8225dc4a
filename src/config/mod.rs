use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub screener: ScreenerConfig,
    pub storage: StorageConfig,
    pub sink: SinkConfig,
    pub server: ServerConfig,
}

/// Screener login and browser-driving configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScreenerConfig {
    pub base_url: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,

    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub idle_browser_timeout_secs: u64,

    // Bounded waits for UI elements
    pub login_timeout_secs: u64,
    pub popup_timeout_secs: u64,
    pub element_timeout_secs: u64,
    pub filter_timeout_secs: u64,
    pub pager_timeout_secs: u64,
    pub page_turn_timeout_secs: u64,

    pub jitter_ms: u64,
    pub max_pages: u32,

    /// Pattern categories unticked before scraping.
    pub excluded_categories: Vec<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub run_migrations: bool,
}

/// CSV sink configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub csv_path: PathBuf,
}

/// Signal endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Tag recorded with every logged signal.
    pub source_repo: Option<String>,
    /// Upstream endpoint proxied by the token-check route.
    pub token_check_url: Option<String>,
    /// HOTT buy signals are forwarded here after logging, when set.
    pub hott_buy_url: Option<String>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://intradayscreener.com".to_string(),
            email: None,
            password: None,
            headless: true,
            window_width: 1920,
            window_height: 1080,
            idle_browser_timeout_secs: 300,
            login_timeout_secs: 30,
            popup_timeout_secs: 5,
            element_timeout_secs: 30,
            filter_timeout_secs: 10,
            pager_timeout_secs: 5,
            page_turn_timeout_secs: 10,
            jitter_ms: 250,
            max_pages: 50,
            excluded_categories: vec![
                "Bearish Patterns".to_string(),
                "Neutral Patterns".to_string(),
            ],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/screener.duckdb"),
            run_migrations: true,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("chart_patterns.csv"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            source_repo: None,
            token_check_url: None,
            hott_buy_url: None,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("SCREENER").separator("__"))
            // Variable names shared with the deployment environment
            .set_override_option("screener.email", env("INTRADAY_SCREENER_EMAIL"))?
            .set_override_option("screener.password", env("INTRADAY_SCREENER_PWD"))?
            .set_override_option("server.source_repo", env("SOURCE_REPO"))?
            .set_override_option("server.hott_buy_url", env("HOTT_BUY_URL"))?
            .set_override_option("server.token_check_url", env("TOKEN_CHECK_URL"))?
            .build()?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
