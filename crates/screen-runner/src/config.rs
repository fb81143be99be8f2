use anyhow::{bail, Context, Result};

use prediction_core::{EnsembleConfig, RiskGuardConfig, ValidatorConfig};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has unparseable value {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Process configuration, read once at startup and validated before any
/// work begins. A bad weight table or an inverted haircut ladder is a
/// refusal to start, not a runtime surprise.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub market_data_base_url: String,
    pub market_data_api_key: String,
    pub market_data_rate_limit: usize,
    pub forecaster_base_url: Option<String>,
    pub sentiment_base_url: Option<String>,
    pub event_overrides_path: Option<String>,
    pub workers: usize,
    pub log_json: bool,
    pub ensemble: EnsembleConfig,
    pub risk: RiskGuardConfig,
    pub validator: ValidatorConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:predictions.db?mode=rwc".to_string());

        let market_data_base_url = std::env::var("MARKET_DATA_BASE_URL")
            .context("MARKET_DATA_BASE_URL must be set")?;
        let market_data_api_key = std::env::var("MARKET_DATA_API_KEY")
            .context("MARKET_DATA_API_KEY must be set")?;

        let market_data_rate_limit = env_or("MARKET_DATA_RATE_LIMIT", 60)?;
        let workers = env_or("SCREEN_WORKERS", 8)?;
        if workers == 0 {
            bail!("SCREEN_WORKERS must be at least 1");
        }

        let mut validator = ValidatorConfig::default();
        validator.tolerance_pct = env_or("VALIDATOR_TOLERANCE_PCT", validator.tolerance_pct)?;
        if !(0.0..1.0).contains(&validator.tolerance_pct) {
            bail!(
                "VALIDATOR_TOLERANCE_PCT {} must be a fraction below 1.0",
                validator.tolerance_pct
            );
        }

        let ensemble = EnsembleConfig::default();
        ensemble.validate()?;
        let risk = RiskGuardConfig::default();
        risk.validate()?;

        Ok(Self {
            database_url,
            market_data_base_url,
            market_data_api_key,
            market_data_rate_limit,
            forecaster_base_url: std::env::var("FORECASTER_BASE_URL").ok(),
            sentiment_base_url: std::env::var("SENTIMENT_BASE_URL").ok(),
            event_overrides_path: std::env::var("EVENT_OVERRIDES_PATH").ok(),
            workers,
            log_json: std::env::var("LOG_JSON").map(|v| v == "1" || v == "true") == Ok(true),
            ensemble,
            risk,
            validator,
        })
    }
}
