//! screen-runner: daily prediction screen over a symbol universe.
//!
//! Usage:
//!   screen-runner run-screen [--universe FILE] [--date YYYY-MM-DD] [--timeframe eod|weekly|intraday-1h]
//!   screen-runner validate
//!   screen-runner report [--symbol AAPL] [--days 30]
//!
//! Exit codes: 0 clean, 1 some symbols failed, 2 bad usage or configuration.

mod config;
mod report;
mod screen;
mod universe;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};

use accuracy_validator::{AccuracyStatsStore, AccuracyValidator};
use ensemble_combiner::EnsembleCombiner;
use event_risk_guard::{MergedEventCalendar, RiskGuard};
use market_data_client::{CachedMarketData, MarketDataClient};
use prediction_core::{
    EventCalendarProvider, MarketDataProvider, SentimentProvider, SignalProvider, Timeframe,
};
use prediction_engine::PredictionEngine;
use prediction_store::PredictionStore;
use signal_providers::{
    IndicatorVoterProvider, MomentumProvider, RemoteForecasterProvider, RemoteSentimentProvider,
    SentimentSignalProvider,
};

use config::AppConfig;

const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);
const BARS_CACHE_TTL: Duration = Duration::from_secs(600);

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  screen-runner run-screen [--universe FILE] [--date YYYY-MM-DD] [--timeframe eod|weekly|intraday-1h]");
    eprintln!("  screen-runner validate");
    eprintln!("  screen-runner report [--symbol AAPL] [--days 30]");
    std::process::exit(2);
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(|s| s.as_str()) else {
        usage();
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            std::process::exit(2);
        }
    };

    init_tracing(config.log_json);

    let code = match command {
        "run-screen" => run_screen_command(&config, &args[1..]).await,
        "validate" => validate_command(&config).await,
        "report" => report_command(&config, &args[1..]).await,
        _ => usage(),
    };

    match code {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "screen_runner=info,prediction_engine=info,accuracy_validator=info".into());

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &AppConfig) -> Result<(PredictionStore, AccuracyStatsStore)> {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    let store = PredictionStore::new(pool.clone());
    store.init_schema().await?;
    let stats = AccuracyStatsStore::new(pool);
    stats.init_schema().await?;
    Ok((store, stats))
}

fn build_market_data(config: &AppConfig) -> Arc<MarketDataClient> {
    Arc::new(MarketDataClient::new(
        config.market_data_base_url.clone(),
        config.market_data_api_key.clone(),
        config.market_data_rate_limit,
    ))
}

async fn build_engine(config: &AppConfig, store: PredictionStore) -> Result<PredictionEngine> {
    let vendor = build_market_data(config);
    let market_data: Arc<dyn MarketDataProvider> = Arc::new(CachedMarketData::new(
        vendor.clone(),
        BARS_CACHE_TTL,
    ));

    let sentiment: Option<Arc<dyn SentimentProvider>> =
        config.sentiment_base_url.as_ref().map(|url| {
            Arc::new(RemoteSentimentProvider::new(url.clone(), REMOTE_TIMEOUT))
                as Arc<dyn SentimentProvider>
        });

    let mut providers: Vec<Arc<dyn SignalProvider>> = vec![
        Arc::new(MomentumProvider::new(market_data.clone())),
        Arc::new(IndicatorVoterProvider::new(market_data.clone())),
    ];
    if let Some(url) = &config.forecaster_base_url {
        providers.push(Arc::new(RemoteForecasterProvider::new(
            url.clone(),
            REMOTE_TIMEOUT,
        )));
    } else {
        tracing::info!("no forecaster configured; ensemble runs without it");
    }
    if let Some(sentiment) = &sentiment {
        providers.push(Arc::new(SentimentSignalProvider::new(
            sentiment.clone(),
            config.risk.sentiment_window_hours,
        )));
    }

    let mut calendar =
        MergedEventCalendar::new(Some(vendor as Arc<dyn EventCalendarProvider>));
    if let Some(path) = &config.event_overrides_path {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        let overrides = MergedEventCalendar::overrides_from_json(&contents)?;
        tracing::info!("loaded {} manual event overrides from {}", overrides.len(), path);
        calendar = calendar.with_overrides(overrides)?;
    }

    let mut guard = RiskGuard::new(config.risk.clone(), Arc::new(calendar))?;
    if let Some(sentiment) = sentiment {
        guard = guard.with_sentiment(sentiment);
    }

    let combiner = EnsembleCombiner::new(config.ensemble.clone())?;

    Ok(PredictionEngine::new(store, market_data, providers, combiner, guard)
        .with_validator_config(config.validator.clone()))
}

async fn run_screen_command(config: &AppConfig, args: &[String]) -> Result<i32> {
    let timeframe = match flag_value(args, "--timeframe") {
        Some(raw) => Timeframe::from_str(raw)
            .with_context(|| format!("unknown timeframe {:?}", raw))?,
        None => Timeframe::EndOfDay,
    };

    // --date pins the anchor mid-session on the given day; the window stays
    // identical however often the screen reruns for that date.
    let as_of = match flag_value(args, "--date") {
        Some(raw) => raw
            .parse::<NaiveDate>()
            .with_context(|| format!("bad --date {:?}", raw))?
            .and_hms_opt(14, 30, 0)
            .context("mid-session anchor")?
            .and_utc(),
        None => Utc::now(),
    };

    let symbols = match flag_value(args, "--universe") {
        Some(path) => {
            let contents =
                std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
            let symbols = universe::parse_universe(&contents);
            if symbols.is_empty() {
                anyhow::bail!("universe file {} contains no symbols", path);
            }
            symbols
        }
        None => universe::DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect(),
    };

    tracing::info!(
        "screening {} symbols for {} ({})",
        symbols.len(),
        as_of.date_naive(),
        timeframe.as_str()
    );

    let (store, _) = open_store(config).await?;
    let engine = Arc::new(build_engine(config, store).await?);

    let (summary, records) =
        screen::run_screen(engine, symbols, timeframe, as_of, config.workers).await;
    screen::log_top_opportunities(&records, 10);

    Ok(summary.exit_code())
}

async fn validate_command(config: &AppConfig) -> Result<i32> {
    let (store, stats) = open_store(config).await?;
    let market_data = build_market_data(config);

    let validator =
        AccuracyValidator::new(store, stats, market_data, config.validator.clone());
    let run = validator.run(Utc::now()).await?;

    // Deferrals retry next run; only hard failures flip the exit code
    Ok(if run.due > 0 && run.completed == 0 && run.deferred == run.due {
        1
    } else {
        0
    })
}

async fn report_command(config: &AppConfig, args: &[String]) -> Result<i32> {
    let days: i64 = match flag_value(args, "--days") {
        Some(raw) => raw.parse().with_context(|| format!("bad --days {:?}", raw))?,
        None => 30,
    };
    let since = Utc::now().date_naive() - chrono::Duration::days(days);

    let (store, stats) = open_store(config).await?;

    match flag_value(args, "--symbol") {
        Some(symbol) => {
            let records = store.records_for_symbol(symbol, since).await?;
            let rollups = stats.for_symbol(symbol).await?;
            print!("{}", report::render_symbol_report(symbol, &records, &rollups));
        }
        None => {
            let records = store.records_between(since, Utc::now().date_naive()).await?;
            print!("{}", report::render_batch_report(&records));
        }
    }

    Ok(0)
}
