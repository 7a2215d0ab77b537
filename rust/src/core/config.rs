use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "exit_config.json";
pub(crate) const DEFAULT_API_URL: &str = "https://api.exit.app";
const DEFAULT_PUSH_URL: &str = "wss://push.exit.app/ws";
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 350;
const DEFAULT_MIN_SEARCH_LEN: usize = 3;
const DEFAULT_MAX_CONCURRENT_PFP_FETCHES: usize = 4;

/// Optional overrides read from `<data_dir>/exit_config.json`. Every field falls back to a
/// built-in default so a missing or partial file is fine.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub push_url: Option<String>,
    #[serde(default)]
    pub disable_network: Option<bool>,
    #[serde(default)]
    pub search_debounce_ms: Option<u64>,
    #[serde(default)]
    pub min_search_len: Option<usize>,
    #[serde(default)]
    pub max_concurrent_pfp_fetches: Option<usize>,
}

pub fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let Ok(data) = std::fs::read_to_string(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_str::<AppConfig>(&data) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "ignoring malformed config");
            AppConfig::default()
        }
    }
}

fn non_empty(v: Option<&String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl AppConfig {
    pub fn api_url(&self) -> String {
        non_empty(self.api_url.as_ref())
            .or_else(|| env_non_empty("EXIT_API_URL"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn push_url(&self) -> String {
        non_empty(self.push_url.as_ref())
            .or_else(|| env_non_empty("EXIT_PUSH_URL"))
            .unwrap_or_else(|| DEFAULT_PUSH_URL.to_string())
    }

    pub fn network_enabled(&self) -> bool {
        !self.disable_network.unwrap_or(false)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(
            self.search_debounce_ms
                .unwrap_or(DEFAULT_SEARCH_DEBOUNCE_MS),
        )
    }

    pub fn min_search_len(&self) -> usize {
        self.min_search_len.unwrap_or(DEFAULT_MIN_SEARCH_LEN)
    }

    pub fn max_concurrent_pfp_fetches(&self) -> usize {
        self.max_concurrent_pfp_fetches
            .unwrap_or(DEFAULT_MAX_CONCURRENT_PFP_FETCHES)
            .max(1)
    }
}
