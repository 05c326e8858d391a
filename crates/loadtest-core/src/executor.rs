use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::TargetConfig;
use crate::error::{EngineError, Result};

/// What came back from one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub bytes_received: u64,
}

/// A request that produced no response at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub bytes_sent: u64,
    pub response: std::result::Result<Response, TransportError>,
}

pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = RequestOutcome> + Send + 'a>>;

/// Issues one request against the target per call.
pub trait RequestExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self) -> ExecuteFuture<'_>;
}

/// Creates one executor per virtual user. An error here is a spawn failure.
pub trait ExecutorFactory: Send + Sync {
    fn create(&self, target: &TargetConfig, virtual_user_id: u32) -> Result<Arc<dyn RequestExecutor>>;
}

/// Mock executor for testing and dry runs (fixed latency and status).
pub struct MockExecutor {
    latency: Duration,
    status_code: u16,
}

impl MockExecutor {
    pub fn new(latency: Duration, status_code: u16) -> Self {
        Self {
            latency,
            status_code,
        }
    }
}

impl RequestExecutor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn execute(&self) -> ExecuteFuture<'_> {
        Box::pin(async move {
            sleep(self.latency).await;
            RequestOutcome {
                bytes_sent: 0,
                response: Ok(Response {
                    status_code: self.status_code,
                    bytes_received: 0,
                }),
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct MockExecutorFactory {
    pub latency: Duration,
    pub status_code: u16,
}

impl ExecutorFactory for MockExecutorFactory {
    fn create(&self, _target: &TargetConfig, _virtual_user_id: u32) -> Result<Arc<dyn RequestExecutor>> {
        Ok(Arc::new(MockExecutor::new(self.latency, self.status_code)))
    }
}

/// Sends the configured request with reqwest; one client (and connection) per virtual user.
pub struct HttpExecutor {
    client: Client,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl HttpExecutor {
    pub fn new(target: &TargetConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true)
            .build()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &target.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| EngineError::Validation(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| EngineError::Validation(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let body = match &target.body {
            None => None,
            Some(serde_json::Value::String(raw)) => Some(raw.clone().into_bytes()),
            Some(value) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                let encoded = serde_json::to_vec(value)
                    .map_err(|e| EngineError::Validation(format!("request body: {e}")))?;
                Some(encoded)
            }
        };

        Ok(Self {
            client,
            method: target.parsed_method()?,
            url: target.url.clone(),
            headers,
            body,
        })
    }
}

impl RequestExecutor for HttpExecutor {
    fn name(&self) -> &'static str {
        "http"
    }

    fn execute(&self) -> ExecuteFuture<'_> {
        Box::pin(async move {
            let mut request = self
                .client
                .request(self.method.clone(), self.url.as_str())
                .headers(self.headers.clone());
            let bytes_sent = match &self.body {
                Some(body) => {
                    request = request.body(body.clone());
                    body.len() as u64
                }
                None => 0,
            };

            let response = match request.send().await {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    // Drain the body so the response time covers the full transfer.
                    match response.bytes().await {
                        Ok(body) => Ok(Response {
                            status_code,
                            bytes_received: body.len() as u64,
                        }),
                        Err(e) => Err(transport_error(e)),
                    }
                }
                Err(e) => Err(transport_error(e)),
            };

            RequestOutcome {
                bytes_sent,
                response,
            }
        })
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    let message = if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    };
    TransportError { message }
}

#[derive(Debug, Clone)]
pub struct HttpExecutorFactory {
    pub timeout: Duration,
}

impl ExecutorFactory for HttpExecutorFactory {
    fn create(&self, target: &TargetConfig, _virtual_user_id: u32) -> Result<Arc<dyn RequestExecutor>> {
        Ok(Arc::new(HttpExecutor::new(target, self.timeout)?))
    }
}
