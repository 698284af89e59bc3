// Configuration management module
// This file handles loading and parsing of configuration settings
// from environment variables prefixed with PATHPAY_
//
// Numan Thabit 2025 Nov

use crate::router::PayDefaults;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const ENV_PREFIX: &str = "PATHPAY";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_GRAPH_STALENESS_SECS: u64 = 30 * 60;
const DEFAULT_MAX_INFLIGHT: usize = 16;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Node command endpoint, e.g. https://127.0.0.1:9737/rpc
    pub rpc_endpoint: Url,
    /// Access key sent with every call
    pub rpc_access_key: Option<String>,
    /// Accept self-signed node certificates
    pub accept_invalid_certs: Option<bool>,
    /// Deadline for ordinary node calls
    pub request_timeout_secs: Option<u64>,
    /// Age after which the channel graph is rebuilt before routing
    pub graph_staleness_secs: Option<u64>,
    /// Background refresh interval (defaults to half the staleness)
    pub graph_refresh_secs: Option<u64>,
    /// Concurrency control
    pub max_inflight: Option<usize>,
    /// Payment defaults (optional)
    pub payment: Option<PaymentConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentConfig {
    pub max_fee_percent: Option<f64>,
    pub exempt_fee_msat: Option<u64>,
    pub risk_factor: Option<u64>,
    pub max_attempts: Option<u32>,
    pub max_hops: Option<usize>,
    pub fuzz_percent: Option<f64>,
    /// Overall time limit for one payment, in seconds
    pub deadline_secs: Option<u64>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: config::Config) -> Result<Self> {
        let parsed: Self = cfg
            .try_deserialize()
            .context("deserialize configuration")?;
        match parsed.rpc_endpoint.scheme() {
            "http" | "https" => {}
            other => bail!("unsupported rpc endpoint scheme: {other}"),
        }
        parsed.pay_defaults()?;
        Ok(parsed)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn graph_staleness(&self) -> Duration {
        Duration::from_secs(
            self.graph_staleness_secs
                .unwrap_or(DEFAULT_GRAPH_STALENESS_SECS),
        )
    }

    pub fn graph_refresh_interval(&self) -> Duration {
        match self.graph_refresh_secs {
            Some(secs) => Duration::from_secs(secs.max(1)),
            None => (self.graph_staleness() / 2).max(Duration::from_secs(1)),
        }
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight.unwrap_or(DEFAULT_MAX_INFLIGHT)
    }

    pub fn accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs.unwrap_or(false)
    }

    /// Executor defaults with any configured overrides applied.
    pub fn pay_defaults(&self) -> Result<PayDefaults> {
        let mut defaults = PayDefaults::default();
        let Some(payment) = &self.payment else {
            return Ok(defaults);
        };
        if let Some(percent) = payment.max_fee_percent {
            if !percent.is_finite() || percent < 0.0 {
                bail!("payment.max_fee_percent must be a non-negative number, got {percent}");
            }
            defaults.max_fee_percent = percent;
        }
        if let Some(percent) = payment.fuzz_percent {
            if !percent.is_finite() || percent < 0.0 {
                bail!("payment.fuzz_percent must be a non-negative number, got {percent}");
            }
            defaults.fuzz_percent = percent;
        }
        if payment.max_attempts == Some(0) {
            bail!("payment.max_attempts must be at least 1");
        }
        if payment.max_hops == Some(0) {
            bail!("payment.max_hops must be at least 1");
        }
        defaults.exempt_fee_msat = payment.exempt_fee_msat.unwrap_or(defaults.exempt_fee_msat);
        defaults.risk_factor = payment.risk_factor.unwrap_or(defaults.risk_factor);
        defaults.max_attempts = payment.max_attempts.unwrap_or(defaults.max_attempts);
        defaults.max_hops = payment.max_hops.unwrap_or(defaults.max_hops);
        defaults.deadline = payment.deadline_secs.map(Duration::from_secs);
        Ok(defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> config::ConfigBuilder<config::builder::DefaultState> {
        config::Config::builder()
            .set_override("rpc_endpoint", "https://127.0.0.1:9737/rpc")
            .unwrap()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = AppConfig::from_config(builder().build().unwrap()).unwrap();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.graph_staleness(), Duration::from_secs(1800));
        assert_eq!(cfg.graph_refresh_interval(), Duration::from_secs(900));
        assert_eq!(cfg.max_inflight(), 16);
        assert!(!cfg.accept_invalid_certs());

        let defaults = cfg.pay_defaults().unwrap();
        assert_eq!(defaults.max_fee_percent, 0.5);
        assert_eq!(defaults.exempt_fee_msat, 5_000_000);
        assert_eq!(defaults.risk_factor, 10);
        assert_eq!(defaults.max_attempts, 30);
        assert!(defaults.deadline.is_none());
    }

    #[test]
    fn payment_overrides_are_applied() {
        let cfg = builder()
            .set_override("payment.max_fee_percent", 1.5)
            .unwrap()
            .set_override("payment.max_attempts", 10)
            .unwrap()
            .set_override("payment.deadline_secs", 120)
            .unwrap()
            .build()
            .unwrap();
        let defaults = AppConfig::from_config(cfg).unwrap().pay_defaults().unwrap();
        assert_eq!(defaults.max_fee_percent, 1.5);
        assert_eq!(defaults.max_attempts, 10);
        assert_eq!(defaults.deadline, Some(Duration::from_secs(120)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cfg = builder()
            .set_override("payment.max_fee_percent", -1.0)
            .unwrap()
            .build()
            .unwrap();
        assert!(AppConfig::from_config(cfg).is_err());

        let cfg = config::Config::builder()
            .set_override("rpc_endpoint", "unix:///tmp/lightning-rpc")
            .unwrap()
            .build()
            .unwrap();
        assert!(AppConfig::from_config(cfg).is_err());

        assert!(AppConfig::from_config(config::Config::builder().build().unwrap()).is_err());
    }
}
