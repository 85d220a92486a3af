//! Market Sync - market data synchronization daemon
//!
//! Follows the first configured symbol: seeds order book, trades and candles
//! from REST, keeps them current from exchange streams, logs every
//! reconciled view and optionally forwards it over IPC.

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_sync::feed::FeedContext;
use market_sync::{
    Config, FeedEvent, MarketDataError, MarketSession, Publisher, SessionFeeds, SyncMetrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting market sync");

    let config = Config::load()?;
    info!(symbols = ?config.symbols, rest = %config.rest_endpoint, "Configuration loaded");

    let metrics = Arc::new(SyncMetrics::new()?);

    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_port, health_metrics).await {
            warn!(error = %e, "Health server error");
        }
    });

    let publisher = match &config.ipc_socket_path {
        Some(path) => Some(Publisher::new(path).await),
        None => None,
    };

    let symbol = config
        .symbols
        .first()
        .cloned()
        .context("no symbols configured")?;

    let ctx = FeedContext::from_config(&config, &metrics)?;
    let mut session = MarketSession::new(ctx, SessionFeeds::from(&config));
    session.switch_symbol(&symbol);

    run(&mut session, &metrics, publisher.as_ref()).await;

    session.close();
    info!("Market sync stopped");
    Ok(())
}

/// Pump the active feeds until Ctrl-C
async fn run(session: &mut MarketSession, metrics: &SyncMetrics, publisher: Option<&Publisher>) {
    let Some(feeds) = session.feeds_mut() else {
        return;
    };
    let symbol = feeds.symbol().to_string();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutdown requested");
                break;
            }

            Some(event) = feeds.order_book.recv() => {
                if let FeedEvent::Snapshot(view) = &event {
                    info!(
                        symbol = %symbol,
                        best_bid = ?view.metrics.best_bid,
                        best_ask = ?view.metrics.best_ask,
                        spread_bps = ?view.metrics.spread_bps,
                        direction = ?view.price_direction,
                        "Order book updated"
                    );
                }
                forward("orderbook", &symbol, event, metrics, publisher).await;
            }

            Some(event) = feeds.trades.recv() => {
                if let FeedEvent::Snapshot(tape) = &event {
                    info!(
                        symbol = %symbol,
                        trades = tape.len(),
                        last_price = ?tape.first().map(|t| t.price),
                        "Trades updated"
                    );
                }
                forward("trades", &symbol, event, metrics, publisher).await;
            }

            Some(event) = feeds.candles.recv() => {
                if let FeedEvent::Snapshot(series) = &event {
                    info!(
                        symbol = %symbol,
                        candles = series.len(),
                        last_close = ?series.points().last().map(|p| p.close),
                        "Candles updated"
                    );
                }
                forward("candles", &symbol, event, metrics, publisher).await;
            }
        }
    }
}

/// Count, log and publish one feed event
async fn forward<O: Serialize>(
    feed: &str,
    symbol: &str,
    event: FeedEvent<O>,
    metrics: &SyncMetrics,
    publisher: Option<&Publisher>,
) {
    metrics.observe(feed, &event);

    match event {
        FeedEvent::Snapshot(view) => {
            if let Some(publisher) = publisher {
                if let Err(e) = publisher.publish(feed, symbol, &view).await {
                    warn!(feed, symbol, error = %e, "Failed to publish view");
                }
            }
        }
        FeedEvent::Status(status) => info!(feed, symbol, status = ?status, "Stream status"),
        FeedEvent::TerminalError(fault) => {
            let err = MarketDataError::from(fault);
            error!(feed, symbol, error = %err, "Feed stopped");
        }
        FeedEvent::Degraded(reason) => {
            warn!(feed, symbol, reason = %reason, "Running without initial snapshot")
        }
    }
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(port: u16, metrics: Arc<SyncMetrics>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .with_state(metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "market-sync",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn render_metrics(State(metrics): State<Arc<SyncMetrics>>) -> Result<String, StatusCode> {
    metrics.render().map_err(|e| {
        warn!(error = %e, "Failed to render metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
