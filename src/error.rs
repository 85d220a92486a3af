//! Error types for market data synchronization

use thiserror::Error;

/// Market data synchronization errors
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Rate limited by upstream after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Symbol not supported by the data source: {0}")]
    UnsupportedSymbol(String),

    #[error("Stream reconnect attempts exhausted after {attempts} attempts")]
    StreamExhausted { attempts: u32 },

    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MarketDataError::ParseError(err.to_string())
        } else {
            MarketDataError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for MarketDataError {
    fn from(err: std::io::Error) -> Self {
        MarketDataError::IpcError(err.to_string())
    }
}

impl From<config::ConfigError> for MarketDataError {
    fn from(err: config::ConfigError) -> Self {
        MarketDataError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
