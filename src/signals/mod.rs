pub mod payload;

use crate::config::ServerConfig;
use crate::storage::{Database, SignalLogEntry};
use crate::utils::convert_to_ist;
use anyhow::{anyhow, Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, info_span, warn, Instrument};

use self::payload::{
    AlertMessage, HottIndicators, LoaderResponse, TradingViewHottPayload, TradingViewSignalPayload,
};

const HTTP_TIMEOUT_SECS: u64 = 30;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to process signal: {0:#}")]
    Signal(anyhow::Error),

    #[error("Token check failed: {0:#}")]
    TokenCheck(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": self.to_string() })),
        )
            .into_response()
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SignalState {
    db: Arc<Database>,
    http: reqwest::Client,
    source_repo: Option<String>,
    token_check_url: Option<String>,
    hott_buy_url: Option<String>,
}

impl SignalState {
    pub fn new(db: Arc<Database>, config: &ServerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            db,
            http,
            source_repo: config.source_repo.clone(),
            token_check_url: config.token_check_url.clone(),
            hott_buy_url: config.hott_buy_url.clone(),
        })
    }

    /// Write one log row on a short-lived session of its own.
    async fn log(&self, entry: SignalLogEntry) -> Result<i64> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.session()?.log_signal(&entry))
            .await
            .context("signal log task failed")?
    }
}

pub fn router(state: SignalState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/signal_data/loader", post(load_signal_data))
        .route("/signal_data/hott_loader", post(load_hott_signal_data))
        .route("/check_signal_processor_token/v1/", get(check_valid_token))
        .route("/signal_data_loader/health", get(health_check))
        .with_state(state)
        .layer(cors)
}

/// Serve until Ctrl-C. Request state is dropped before this returns.
pub async fn serve(config: &ServerConfig, db: Arc<Database>) -> Result<()> {
    let app = router(SignalState::new(db, config)?);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Signal data loader listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Shutdown requested.");
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn load_signal_data(
    State(state): State<SignalState>,
    Json(payload): Json<TradingViewSignalPayload>,
) -> Result<Json<LoaderResponse>, ApiError> {
    let (row_id, _) = process_signal(&state, "load_signal_", payload, None).await?;
    Ok(Json(inserted(row_id)))
}

async fn load_hott_signal_data(
    State(state): State<SignalState>,
    Json(payload): Json<TradingViewHottPayload>,
) -> Result<Json<LoaderResponse>, ApiError> {
    let TradingViewHottPayload { signal, indicators } = payload;
    let (row_id, signal) =
        process_signal(&state, "load_hott_signal_", signal, Some(&indicators)).await?;

    if let Some(url) = state.hott_buy_url.as_deref() {
        forward_hott(&state.http, url, &TradingViewHottPayload { signal, indicators }).await;
    }

    Ok(Json(inserted(row_id)))
}

async fn check_valid_token(
    State(state): State<SignalState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = state
        .token_check_url
        .as_deref()
        .ok_or_else(|| ApiError::TokenCheck(anyhow!("token check URL not configured")))?;

    let fetch = async {
        let resp = state.http.get(url).send().await?.error_for_status()?;
        resp.json::<serde_json::Value>().await
    };

    match fetch.await {
        Ok(body) => Ok(Json(body)),
        Err(e) => {
            error!(logger = "signal_processor_check_token", "Token check failed: {}", e);
            Err(ApiError::TokenCheck(e.into()))
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "Signal_Data_Loader healthy" }))
}

// ── Processing ────────────────────────────────────────────────────────────────

/// Convert, serialize and log one signal. Returns the row id and the
/// payload with its time converted.
async fn process_signal(
    state: &SignalState,
    prefix: &str,
    mut signal: TradingViewSignalPayload,
    indicators: Option<&HottIndicators>,
) -> Result<(i64, TradingViewSignalPayload), ApiError> {
    let logger_name = signal_logger_name(prefix, &signal);
    let span = info_span!("signal", logger = %logger_name);

    async move {
        info!("SLV processing: {}", signal.ticker);
        info!("SLV Algo Received signal payload for processing: {:?}", signal);

        signal.time = convert_to_ist(&signal.time);

        let result = match build_entry(logger_name, state.source_repo.clone(), &signal, indicators) {
            Ok(entry) => state.log(entry).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(row_id) => {
                info!("row_id : {} Created", row_id);
                Ok((row_id, signal))
            }
            Err(e) => {
                error!("Failed to process signal: {:?}", e);
                Err(ApiError::Signal(e))
            }
        }
    }
    .instrument(span)
    .await
}

fn build_entry(
    logger_name: String,
    source_repo: Option<String>,
    signal: &TradingViewSignalPayload,
    indicators: Option<&HottIndicators>,
) -> Result<SignalLogEntry> {
    let alert_message = serde_json::to_string(&[AlertMessage::received(&signal.ticker)])?;
    let indicators = indicators.map(serde_json::to_string).transpose()?;

    let mut details = signal.field_values();
    details.extend(indicators.clone());
    details.push(alert_message.clone());

    Ok(SignalLogEntry {
        logger_name,
        source_repo,
        exchange: signal.exchange.clone(),
        ticker: signal.ticker.clone(),
        trade_type: signal.trade_type.clone(),
        order_type: signal.order_type.clone(),
        quantity: signal.quantity,
        limit_price: signal.limitprice,
        signal_time: signal.time.clone(),
        strategy: signal.strategy.clone(),
        interval: signal.interval.clone(),
        alert_name: signal.alert_name.clone(),
        open: signal.open,
        close: signal.close,
        high: signal.high,
        low: signal.low,
        indicators,
        order_details: serde_json::to_string(&details)?,
        alert_message,
    })
}

async fn forward_hott(http: &reqwest::Client, url: &str, payload: &TradingViewHottPayload) {
    let sent = http
        .post(url)
        .json(payload)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    match sent {
        Ok(resp) => info!("Forwarded HOTT signal for {} ({})", payload.signal.ticker, resp.status()),
        Err(e) => warn!("HOTT forward to {} failed: {}", url, e),
    }
}

/// "load_signal_" + "NSE:SBIN-EQ" + "ORB" → "load_signal_NSE_SBIN_EQ_ORB"
fn signal_logger_name(prefix: &str, signal: &TradingViewSignalPayload) -> String {
    let tag: String = format!("{}_{}", signal.ticker, signal.strategy)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}{}", prefix, tag)
}

fn inserted(row_id: i64) -> LoaderResponse {
    LoaderResponse {
        status: "Success".to_string(),
        message: format!("Row ID: {} inserted", row_id),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
