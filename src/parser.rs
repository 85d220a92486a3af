//! Parser module for REST snapshots and stream messages
//!
//! Handles deserialization of depth snapshots, trades, klines and the
//! supported-symbol list. Numeric fields are accepted either as JSON
//! strings (exchange format) or as plain numbers (backend proxy format).

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use crate::candles::CandlePoint;
use crate::trades::TradeTick;

/// Price level (price, quantity pair)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Full order book snapshot, from REST or the depth stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DepthSnapshot {
    /// Last update ID; the depth stream may omit it
    #[serde(rename = "lastUpdateId", default)]
    pub last_update_id: Option<u64>,

    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Trade push event
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    /// Price
    #[serde(rename = "p", deserialize_with = "deserialize_decimal")]
    pub price: Decimal,

    /// Quantity
    #[serde(rename = "q", deserialize_with = "deserialize_decimal")]
    pub quantity: Decimal,

    /// Trade time (milliseconds)
    #[serde(rename = "T")]
    pub trade_time: i64,

    /// Is buyer maker
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Kline push event
#[derive(Debug, Clone, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "k")]
    pub kline: KlineData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineData {
    /// Bucket open time (milliseconds)
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "o", deserialize_with = "deserialize_decimal")]
    pub open: Decimal,
    #[serde(rename = "h", deserialize_with = "deserialize_decimal")]
    pub high: Decimal,
    #[serde(rename = "l", deserialize_with = "deserialize_decimal")]
    pub low: Decimal,
    #[serde(rename = "c", deserialize_with = "deserialize_decimal")]
    pub close: Decimal,
}

/// Trade row from the REST trades endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RestTrade {
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub qty: Decimal,
    pub time: i64,
    #[serde(rename = "isBuyerMaker")]
    pub is_buyer_maker: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradesResponse {
    pub trades: Vec<RestTrade>,
}

/// One `[openTime, open, high, low, close, ...]` row from the klines endpoint
#[derive(Debug, Clone)]
pub struct KlineRow(pub CandlePoint);

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolsResponse {
    pub symbols: Vec<SymbolEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolEntry {
    pub symbol: String,
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

/// Parsed stream message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Depth(DepthSnapshot),
    Trade(TradeTick),
    Kline(CandlePoint),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw stream message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        // Combined streams wrap the payload with its stream name
        if let Ok(stream_msg) = serde_json::from_value::<StreamMessage>(value.clone()) {
            return Self::parse_value(stream_msg.data);
        }

        Self::parse_value(value)
    }

    fn parse_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.get("k").is_some() {
            let event: KlineEvent = serde_json::from_value(value)?;
            return Ok(ParsedMessage::Kline(event.into()));
        }

        if value.get("bids").is_some() && value.get("asks").is_some() {
            let depth: DepthSnapshot = serde_json::from_value(value)?;
            return Ok(ParsedMessage::Depth(depth));
        }

        if value.get("p").is_some() && value.get("T").is_some() {
            let event: TradeEvent = serde_json::from_value(value)?;
            return Ok(ParsedMessage::Trade(event.try_into()?));
        }

        Ok(ParsedMessage::Unknown(value.to_string()))
    }
}

impl TryFrom<TradeEvent> for TradeTick {
    type Error = serde_json::Error;

    fn try_from(event: TradeEvent) -> Result<Self, Self::Error> {
        Ok(TradeTick {
            price: event.price,
            amount: event.quantity,
            time: millis_to_utc(event.trade_time)?,
            is_buyer_maker: event.is_buyer_maker,
        })
    }
}

impl TryFrom<RestTrade> for TradeTick {
    type Error = serde_json::Error;

    fn try_from(row: RestTrade) -> Result<Self, Self::Error> {
        Ok(TradeTick {
            price: row.price,
            amount: row.qty,
            time: millis_to_utc(row.time)?,
            is_buyer_maker: row.is_buyer_maker,
        })
    }
}

impl From<KlineEvent> for CandlePoint {
    fn from(event: KlineEvent) -> Self {
        let k = event.kline;
        CandlePoint {
            time: millis_to_bucket(k.open_time),
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
        }
    }
}

impl<'de> Deserialize<'de> for KlineRow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let row: Vec<serde_json::Value> = Deserialize::deserialize(deserializer)?;
        if row.len() < 5 {
            return Err(serde::de::Error::custom("Invalid kline row format"));
        }

        let open_time = row[0]
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("Invalid kline open time"))?;
        let field = |idx: usize| -> Result<Decimal, D::Error> {
            DecimalWire::deserialize(&row[idx])
                .map_err(serde::de::Error::custom)?
                .into_decimal()
                .map_err(serde::de::Error::custom)
        };

        Ok(KlineRow(CandlePoint {
            time: millis_to_bucket(open_time),
            open: field(1)?,
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
        }))
    }
}

/// Bucket start in unix seconds for an exchange open time in milliseconds
pub fn millis_to_bucket(ms: i64) -> i64 {
    ms.div_euclid(1000)
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, serde_json::Error> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| serde::de::Error::custom(format!("Invalid timestamp: {}", ms)))
}

/// Decimal that arrived as a JSON string or number
#[derive(Deserialize)]
#[serde(untagged)]
enum DecimalWire {
    Text(String),
    Number(serde_json::Number),
}

impl DecimalWire {
    fn into_decimal(self) -> Result<Decimal, rust_decimal::Error> {
        let text = match self {
            DecimalWire::Text(s) => s,
            DecimalWire::Number(n) => n.to_string(),
        };
        Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text))
    }
}

/// Custom deserializer for Decimal from string or number
fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    DecimalWire::deserialize(deserializer)?
        .into_decimal()
        .map_err(serde::de::Error::custom)
}

/// Custom deserializer for price levels from array of pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<DecimalWire>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            let mut values = pair.into_iter();
            match (values.next(), values.next()) {
                (Some(price), Some(quantity)) => Ok(PriceLevel {
                    price: price.into_decimal().map_err(serde::de::Error::custom)?,
                    quantity: quantity.into_decimal().map_err(serde::de::Error::custom)?,
                }),
                _ => Err(serde::de::Error::custom("Invalid price level format")),
            }
        })
        .collect()
}
