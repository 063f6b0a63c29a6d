use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BACKEND_URL: &str = "ws://127.0.0.1:44443";
pub const DEFAULT_CATALOG_URL: &str = "https://powertools.ngni.us";
pub const DEFAULT_POLL_MS: u64 = 5000;
pub const DEFAULT_REAPPLY_MS: u64 = 2000;
/// App id the panel uses for the device-wide profile.
pub const DEFAULT_MAIN_APP_ID: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogMode {
    /// Search and download are proxied through the backend.
    #[default]
    Backend,
    /// Search goes straight to the catalog over HTTPS.
    Http,
}

impl CatalogMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "backend" | "proxy" => Some(CatalogMode::Backend),
            "http" | "https" | "direct" => Some(CatalogMode::Http),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub backend_url: String,
    pub catalog_url: String,
    pub poll_period: Duration,
    pub reapply_wait: Duration,
    pub main_app_id: String,
    pub catalog_mode: CatalogMode,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            poll_period: Duration::from_millis(DEFAULT_POLL_MS),
            reapply_wait: Duration::from_millis(DEFAULT_REAPPLY_MS),
            main_app_id: DEFAULT_MAIN_APP_ID.to_string(),
            catalog_mode: CatalogMode::Backend,
        }
    }
}

impl PanelConfig {
    pub fn from_env() -> Self {
        Self::with_env(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup. Unparsable values
    /// keep their default and log a warning.
    pub fn with_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = non_empty("POWERTOOLS_BACKEND_URL") {
            cfg.backend_url = url;
        }
        if let Some(url) = non_empty("POWERTOOLS_CATALOG_URL") {
            cfg.catalog_url = url;
        }
        if let Some(raw) = non_empty("POWERTOOLS_POLL_MS") {
            if let Some(period) = parse_millis("POWERTOOLS_POLL_MS", &raw) {
                cfg.poll_period = period;
            }
        }
        if let Some(raw) = non_empty("POWERTOOLS_REAPPLY_MS") {
            if let Some(wait) = parse_millis("POWERTOOLS_REAPPLY_MS", &raw) {
                cfg.reapply_wait = wait;
            }
        }
        if let Some(id) = non_empty("POWERTOOLS_MAIN_APP_ID") {
            cfg.main_app_id = id;
        }
        if let Some(raw) = non_empty("POWERTOOLS_CATALOG") {
            match CatalogMode::parse(&raw) {
                Some(mode) => cfg.catalog_mode = mode,
                None => warn!("unknown POWERTOOLS_CATALOG={raw:?}, keeping {:?}", cfg.catalog_mode),
            }
        }
        cfg
    }
}

fn parse_millis(key: &str, raw: &str) -> Option<Duration> {
    match raw.parse::<u64>() {
        Ok(0) => {
            warn!("{key} must be positive, keeping default");
            None
        }
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            warn!("invalid {key}={raw:?}, keeping default");
            None
        }
    }
}
