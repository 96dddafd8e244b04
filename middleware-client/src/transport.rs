// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two wire transports to the middleware.
//!
//! Both expose the same contract: one method call with positional JSON
//! parameters, one JSON result. Every call carries a bounded timeout; a
//! timeout surfaces as [`CallError::Timeout`] and is never retried here.

use crate::exec::BoxedExecutor;
use crate::exec::ExecutionError;
use crate::exec::HostExecutor;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use slog::Logger;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Path of the middleware command-line client on the appliance.
pub const MIDCLT: &str = "/usr/bin/midclt";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("middleware call timed out")]
    Timeout,
    #[error("failed to invoke middleware client")]
    Execution(#[source] ExecutionError),
    #[error("HTTP request to middleware failed")]
    Http(#[source] reqwest::Error),
    #[error("middleware returned HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("middleware rejected {method}: {message}")]
    Rpc { method: String, code: i64, message: String },
    #[error("could not interpret middleware response")]
    Json(#[from] serde_json::Error),
}

impl CallError {
    /// True if retrying the same call later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Timeout => true,
            CallError::Execution(err) => err.is_transient(),
            CallError::Http(err) => err.is_timeout() || err.is_connect(),
            CallError::Status(status) => status.is_server_error(),
            CallError::Rpc { .. } | CallError::Json(_) => false,
        }
    }
}

/// Uniform request/response contract to the middleware.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, CallError>;
}

/// Which transport to use, chosen by configuration and threaded explicitly
/// into [`crate::MiddlewareClient::new`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Local `midclt` subprocess; only works on the appliance itself.
    Midclt {
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// JSON-RPC 2.0 over HTTP to a remote appliance.
    Rpc {
        url: String,
        api_key: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, thiserror::Error)]
pub enum TransportBuildError {
    #[error("failed to construct HTTP client")]
    Http(#[from] reqwest::Error),
}

impl TransportConfig {
    pub fn build(
        &self,
        log: &Logger,
    ) -> Result<Arc<dyn Transport>, TransportBuildError> {
        match self {
            TransportConfig::Midclt { timeout_secs } => {
                Ok(Arc::new(MidcltTransport::new(
                    log.clone(),
                    Duration::from_secs(*timeout_secs),
                )))
            }
            TransportConfig::Rpc { url, api_key, timeout_secs } => {
                Ok(Arc::new(RpcTransport::new(
                    url.clone(),
                    api_key.clone(),
                    Duration::from_secs(*timeout_secs),
                )?))
            }
        }
    }
}

/// Transport that shells out to `midclt call <method> <params...>`.
pub struct MidcltTransport {
    executor: BoxedExecutor,
}

impl MidcltTransport {
    pub fn new(log: Logger, timeout: Duration) -> Self {
        Self { executor: HostExecutor::new(log, timeout) }
    }

    /// Constructs a transport over an arbitrary executor (tests).
    #[cfg(any(test, feature = "testing"))]
    pub fn with_executor(executor: BoxedExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Transport for MidcltTransport {
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, CallError> {
        let mut command = tokio::process::Command::new(MIDCLT);
        command.arg("call").arg(method);
        for param in &params {
            command.arg(serde_json::to_string(param)?);
        }

        let output = match self.executor.execute(&mut command).await {
            Ok(output) => output,
            Err(ExecutionError::Timeout { .. }) => {
                return Err(CallError::Timeout);
            }
            // midclt reports middleware-level rejections on stderr with a
            // non-zero exit.
            Err(ExecutionError::CommandFailure { stderr, .. }) => {
                return Err(CallError::Rpc {
                    method: method.to_string(),
                    code: -1,
                    message: stderr,
                });
            }
            Err(err) => return Err(CallError::Execution(err)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(serde_json::from_str(trimmed)?)
        }
    }
}

/// Transport speaking JSON-RPC 2.0 over HTTP.
pub struct RpcTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl RpcTransport {
    pub fn new(
        url: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url, api_key, next_id: AtomicU64::new(1) })
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CallError::Timeout
                } else {
                    CallError::Http(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Status(status));
        }

        let rpc: RpcResponse =
            response.json().await.map_err(CallError::Http)?;
        if let Some(error) = rpc.error {
            return Err(CallError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }
}
