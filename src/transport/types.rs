// Wire types exchanged with the node command interface
// This file defines the request/response shapes for listchannels, decodepay,
// sendpay, waitsendpay and getinfo, plus millisatoshi amount parsing
//
// Numan Thabit 2025 Nov

use crate::errors::RouteError;
use crate::router::RouteHop;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub blockheight: Option<u64>,
}

/// One direction of a channel as reported by `listchannels`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelRecord {
    pub source: String,
    pub destination: String,
    pub short_channel_id: String,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub base_fee_millisatoshi: u64,
    #[serde(default)]
    pub fee_per_millionth: u64,
    #[serde(default)]
    pub delay: u32,
    #[serde(default, deserialize_with = "msat::option")]
    pub htlc_minimum_msat: Option<u64>,
    #[serde(default, deserialize_with = "msat::option")]
    pub htlc_maximum_msat: Option<u64>,
    #[serde(default, deserialize_with = "msat::option")]
    pub amount_msat: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListChannels {
    pub channels: Vec<ChannelRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecodedInvoice {
    pub payment_hash: String,
    pub payee: String,
    #[serde(default, deserialize_with = "msat::option")]
    pub amount_msat: Option<u64>,
    #[serde(default)]
    pub min_final_cltv_expiry: Option<u32>,
    #[serde(default)]
    pub payment_secret: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(default)]
    pub expiry: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendPayRequest<'a> {
    pub route: &'a [RouteHop],
    pub payment_hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'a str>,
    pub bolt11: &'a str,
    pub amount_msat: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_secret: Option<&'a str>,
}

/// Final record of a payment returned by `waitsendpay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub payment_hash: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_preimage: Option<String>,
    #[serde(default, deserialize_with = "msat::option")]
    pub amount_msat: Option<u64>,
    #[serde(default, deserialize_with = "msat::option")]
    pub amount_sent_msat: Option<u64>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PaymentResult {
    pub fn is_complete(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == "complete")
    }
}

/// Decimal exponents from the suffixed unit to msat.
const SAT_DECIMALS: u32 = 3;
const BTC_DECIMALS: u32 = 11;

/// Parse a user-supplied amount: a bare integer or a decimal with an
/// `msat`, `sat` or `btc` suffix.
pub fn parse_amount_msat(input: &str) -> Result<u64, RouteError> {
    let invalid = || RouteError::InvalidAmount(input.to_string());
    let trimmed = input.trim();
    let (number, scale) = if let Some(n) = trimmed.strip_suffix("msat") {
        (n, 0)
    } else if let Some(n) = trimmed.strip_suffix("sat") {
        (n, SAT_DECIMALS)
    } else if let Some(n) = trimmed.strip_suffix("btc") {
        (n, BTC_DECIMALS)
    } else {
        (trimmed, 0)
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if fraction.len() > scale as usize {
        return Err(invalid());
    }

    let mut digits = String::with_capacity(whole.len() + scale as usize);
    digits.push_str(whole);
    digits.push_str(fraction);
    for _ in fraction.len()..scale as usize {
        digits.push('0');
    }
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse::<u64>().map_err(|_| invalid())
}

pub(crate) mod msat {
    use serde::de::Error;

    use super::*;

    /// Millisatoshi values arrive either as integers or as `"<n>msat"` strings.
    pub fn option<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid msat value {n}"))),
            Some(Value::String(s)) => {
                let digits = s.strip_suffix("msat").unwrap_or(&s);
                digits
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| D::Error::custom(format!("invalid msat value {s}")))
            }
            Some(other) => Err(D::Error::custom(format!("invalid msat value {other}"))),
        }
    }
}
