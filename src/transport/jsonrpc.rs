// JSON-RPC transport layer implementation
// This file implements the node command interface over HTTP, speaking the
// sparko-style `{"method", "params"}` POST protocol with an access key header
//
// Numan Thabit 2025 Nov

use super::types::ListChannels;
use super::{ChannelRecord, DecodedInvoice, NodeInfo, NodeRpc, PaymentResult, SendPayRequest};
use crate::errors::RpcError;
use crate::metrics::{RPC_ERRORS, RPC_LATENCY};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

const ACCESS_HEADER: &str = "X-Access";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// listchannels returns the whole network and needs far longer than a normal call.
const LISTCHANNELS_TIMEOUT: Duration = Duration::from_secs(120);
/// Extra HTTP allowance on top of the node-side waitsendpay timeout.
const WAIT_SLACK: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_RETRY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct JsonRpc {
    http: Client,
    url: Url,
    access_key: Option<String>,
    timeout: Duration,
    connect_retry: Duration,
}

enum CallFailure {
    /// The request never reached the node; safe to send again.
    Unreachable(RpcError),
    Fatal(RpcError),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl JsonRpc {
    pub fn new(
        url: Url,
        access_key: Option<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self, RpcError> {
        let http = Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| RpcError::Connect {
                endpoint: url.to_string(),
                reason: format!("build http client: {e}"),
            })?;
        Ok(Self {
            http,
            url,
            access_key,
            timeout: DEFAULT_TIMEOUT,
            connect_retry: DEFAULT_CONNECT_RETRY,
        })
    }

    /// Deadline applied to ordinary calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long to keep redialing an unreachable node before giving up.
    pub fn with_connect_retry(mut self, max_elapsed: Duration) -> Self {
        self.connect_retry = max_elapsed;
        self
    }

    pub fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<T, RpcError> {
        let started = Instant::now();
        let result = self.call_with_retry(method, &params, timeout).await;
        RPC_LATENCY
            .with_label_values(&[method])
            .observe(started.elapsed().as_secs_f64());

        let decoded = result.and_then(|value| {
            serde_json::from_value(value).map_err(|e| RpcError::Decode(format!("{method}: {e}")))
        });
        if let Err(err) = &decoded {
            RPC_ERRORS
                .with_label_values(&[method, err.kind().as_str()])
                .inc();
            debug!(method = method, error = %err, "node call failed");
        }
        decoded
    }

    async fn call_with_retry(
        &self,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.connect_retry),
            multiplier: 2.0,
            ..Default::default()
        };

        retry(backoff, || async move {
            self.call_once(method, params, timeout)
                .await
                .map_err(|failure| match failure {
                    CallFailure::Unreachable(err) => {
                        warn!(method = method, error = %err, "node unreachable; redialing");
                        backoff::Error::transient(err)
                    }
                    CallFailure::Fatal(err) => backoff::Error::permanent(err),
                })
        })
        .await
    }

    async fn call_once(
        &self,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, CallFailure> {
        let mut request = self
            .http
            .post(self.url.clone())
            .timeout(timeout)
            .json(&json!({ "method": method, "params": params }));
        if let Some(key) = &self.access_key {
            request = request.header(ACCESS_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.send_failure(e, timeout))?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CallFailure::Fatal(RpcError::Timeout {
                    secs: timeout.as_secs(),
                })
            } else {
                CallFailure::Fatal(RpcError::Decode(format!("http {status}: {e}")))
            }
        })?;

        if !status.is_success() {
            let err = body
                .get("error")
                .and_then(command_error)
                .or_else(|| command_error(&body))
                .unwrap_or_else(|| RpcError::Decode(format!("http {status}: {body}")));
            return Err(CallFailure::Fatal(err));
        }
        unwrap_envelope(body).map_err(CallFailure::Fatal)
    }

    fn send_failure(&self, err: reqwest::Error, timeout: Duration) -> CallFailure {
        if err.is_timeout() {
            return CallFailure::Fatal(RpcError::Timeout {
                secs: timeout.as_secs(),
            });
        }
        let failure = RpcError::Connect {
            endpoint: self.url.to_string(),
            reason: err.to_string(),
        };
        if err.is_connect() {
            CallFailure::Unreachable(failure)
        } else {
            CallFailure::Fatal(failure)
        }
    }
}

fn command_error(value: &Value) -> Option<RpcError> {
    let body: ErrorBody = serde_json::from_value(value.clone()).ok()?;
    Some(RpcError::Command {
        code: body.code,
        message: body.message,
        data: body.data,
    })
}

/// Accepts both a bare result and a JSON-RPC 2.0 envelope. Bare results such
/// as `getinfo` or `waitsendpay` carry their own `id`, so an `id` alone does
/// not mark an envelope.
fn unwrap_envelope(body: Value) -> Result<Value, RpcError> {
    let Value::Object(mut map) = body else {
        return Ok(body);
    };
    let envelope = map.contains_key("jsonrpc")
        || (map.contains_key("id") && (map.contains_key("result") || map.contains_key("error")));
    if !envelope {
        return Ok(Value::Object(map));
    }
    if let Some(err) = map.get("error").filter(|e| !e.is_null()) {
        return Err(command_error(err)
            .unwrap_or_else(|| RpcError::Decode(format!("malformed error object: {err}"))));
    }
    map.remove("result")
        .ok_or_else(|| RpcError::Decode("response carries neither result nor error".into()))
}

#[async_trait]
impl NodeRpc for JsonRpc {
    async fn getinfo(&self) -> Result<NodeInfo, RpcError> {
        self.call("getinfo", json!({}), self.timeout).await
    }

    async fn listchannels(&self) -> Result<Vec<ChannelRecord>, RpcError> {
        let res: ListChannels = self
            .call("listchannels", json!({}), self.timeout.max(LISTCHANNELS_TIMEOUT))
            .await?;
        Ok(res.channels)
    }

    async fn decodepay(
        &self,
        invoice: &str,
        description: Option<&str>,
    ) -> Result<DecodedInvoice, RpcError> {
        let mut params = Map::new();
        params.insert("bolt11".into(), json!(invoice));
        if let Some(description) = description {
            params.insert("description".into(), json!(description));
        }
        self.call("decodepay", Value::Object(params), self.timeout)
            .await
    }

    async fn sendpay(&self, request: &SendPayRequest<'_>) -> Result<(), RpcError> {
        let params = serde_json::to_value(request)
            .map_err(|e| RpcError::Decode(format!("encode sendpay: {e}")))?;
        let _: Value = self.call("sendpay", params, self.timeout).await?;
        Ok(())
    }

    async fn waitsendpay(
        &self,
        payment_hash: &str,
        timeout: Duration,
    ) -> Result<PaymentResult, RpcError> {
        let params = json!({ "payment_hash": payment_hash, "timeout": timeout.as_secs() });
        self.call("waitsendpay", params, timeout + WAIT_SLACK).await
    }
}
