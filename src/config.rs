use serde::Deserialize;
use std::path::PathBuf;

/// Process-level configuration, loaded once at startup from the
/// environment. Runtime-mutable backend settings (project, endpoints,
/// mock flag) live in [`crate::models::BackendConfig`] and are
/// persisted by the state store instead.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Scheduler poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Deadline for a single NFP document query.
    pub query_timeout_secs: u64,
    /// Gemini API key for the risk-summary collaborator. Absent key
    /// disables summaries without affecting processing runs.
    pub summarizer_api_key: Option<String>,
    pub summarizer_base_url: String,
    pub login_email: String,
    pub login_password: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "data".to_string())
                .into(),
            poll_interval_secs: std::env::var("SCHEDULER_POLL_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SCHEDULER_POLL_SECS must be a positive number"))
                .and_then(|secs: u64| {
                    if secs == 0 {
                        anyhow::bail!("SCHEDULER_POLL_SECS cannot be zero");
                    }
                    Ok(secs)
                })?,
            query_timeout_secs: std::env::var("QUERY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUERY_TIMEOUT_SECS must be a positive number"))?,
            summarizer_api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            summarizer_base_url: std::env::var("GEMINI_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            login_email: std::env::var("LOGIN_EMAIL")
                .unwrap_or_else(|_| "admin@contabilidade.com".to_string()),
            login_password: std::env::var("LOGIN_PASSWORD")
                .unwrap_or_else(|_| "admin123".to_string()),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Data dir: {}", config.data_dir.display());
        tracing::debug!("Scheduler poll interval: {}s", config.poll_interval_secs);
        tracing::debug!("Query timeout: {}s", config.query_timeout_secs);
        if config.summarizer_api_key.is_some() {
            tracing::info!("Summarizer enabled (Gemini key present)");
        } else {
            tracing::info!("Summarizer disabled (no GEMINI_API_KEY)");
        }
        tracing::debug!("Server port: {}", config.port);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Config used by unit and integration tests; never reads the
    /// environment so tests stay hermetic.
    pub fn test_config(data_dir: PathBuf) -> Config {
        Config {
            port: 0,
            data_dir,
            poll_interval_secs: 1,
            query_timeout_secs: 5,
            summarizer_api_key: None,
            summarizer_base_url: "http://localhost:0".to_string(),
            login_email: "admin@contabilidade.com".to_string(),
            login_password: "admin123".to_string(),
        }
    }

    #[test]
    fn defaults_apply_for_test_config() {
        let cfg = test_config(PathBuf::from("/tmp/x"));
        assert_eq!(cfg.poll_interval_secs, 1);
        assert!(cfg.summarizer_api_key.is_none());
    }
}
