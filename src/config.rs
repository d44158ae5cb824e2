use std::time::Duration;

use crate::environment::{get_env_var_as_vec, get_env_var_opt, get_env_var_or};
use crate::linking::bottleneck::BottleneckConfig;
use crate::linking::suggestions::SuggestionConfig;

/// Runtime settings, read from the environment.
#[derive(Clone, Debug)]
pub struct FunnelConfig {
    pub database_path: String,
    pub rejections_path: String,
    pub log_dir: String,
    pub languages: Vec<String>,
    pub batch_concurrency: usize,
    /// `None` disables the per-call timeout on store writes.
    pub store_timeout: Option<Duration>,
    pub suggestions: SuggestionConfig,
    pub bottlenecks: BottleneckConfig,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        FunnelConfig {
            database_path: "funnelmap.db".to_string(),
            rejections_path: "rejected_suggestions.json".to_string(),
            log_dir: "logs".to_string(),
            languages: vec!["en".to_string()],
            batch_concurrency: 4,
            store_timeout: Some(Duration::from_secs(30)),
            suggestions: SuggestionConfig::default(),
            bottlenecks: BottleneckConfig::default(),
        }
    }
}

impl FunnelConfig {
    pub fn from_env() -> Self {
        let defaults = FunnelConfig::default();

        let languages = get_env_var_as_vec("LANGUAGES", ';');
        let timeout_secs: u64 = get_env_var_or("STORE_TIMEOUT_SECS", 30);

        let bottlenecks = BottleneckConfig {
            max_incoming_links: get_env_var_or(
                "MAX_INCOMING_LINKS",
                defaults.bottlenecks.max_incoming_links,
            ),
            ..defaults.bottlenecks
        };

        FunnelConfig {
            database_path: get_env_var_opt("DATABASE_PATH").unwrap_or(defaults.database_path),
            rejections_path: get_env_var_opt("REJECTIONS_PATH")
                .unwrap_or(defaults.rejections_path),
            log_dir: get_env_var_opt("LOG_DIR").unwrap_or(defaults.log_dir),
            languages: if languages.is_empty() {
                defaults.languages
            } else {
                languages
            },
            batch_concurrency: get_env_var_or("BATCH_CONCURRENCY", defaults.batch_concurrency)
                .max(1),
            store_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            suggestions: SuggestionConfig {
                fallback_topic: get_env_var_opt("SUGGESTION_FALLBACK_TOPIC"),
            },
            bottlenecks,
        }
    }

    /// Language used when a command does not name one.
    pub fn default_language(&self) -> &str {
        self.languages.first().map(String::as_str).unwrap_or("en")
    }
}
