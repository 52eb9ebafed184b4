use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;
use crate::types::BackendConfig;
use crate::Result;

/// Pooled HTTP clients, one per backend configuration.
///
/// The connect timeout is a client-level property, so a client is keyed by
/// (config id, connect timeout) and rebuilt when the timeout changes; read
/// timeouts are applied per request.
pub struct HttpClientPool {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpClientPool {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, config: &BackendConfig) -> Result<reqwest::Client> {
        let key = format!("{}:{}", config.id, config.connect_timeout.as_millis());
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// POST a JSON body and return (status, body text).
    ///
    /// The in-flight call races the cancellation token; a cancelled call
    /// drops the connection and returns [`Error::Cancelled`].
    pub async fn post_json(
        &self,
        config: &BackendConfig,
        url: &str,
        body: &serde_json::Value,
        headers: &[(&str, &str)],
        bearer: Option<&str>,
        read_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(u16, String)> {
        let client = self.client_for(config)?;
        let mut req = client
            .post(url)
            .timeout(read_timeout)
            .header("x-invoker-request-id", Uuid::new_v4().to_string())
            .headers(build_headers(headers)?)
            .json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        Self::execute(req, cancel).await
    }

    /// GET and return (status, body text).
    pub async fn get(
        &self,
        config: &BackendConfig,
        url: &str,
        headers: &[(&str, &str)],
        bearer: Option<&str>,
        read_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(u16, String)> {
        let client = self.client_for(config)?;
        let mut req = client
            .get(url)
            .timeout(read_timeout)
            .headers(build_headers(headers)?);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        Self::execute(req, cancel).await
    }

    async fn execute(
        req: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<(u16, String)> {
        let send = async {
            let resp = req.send().await.map_err(Error::from)?;
            let status = resp.status().as_u16();
            let body: bytes::Bytes = resp.bytes().await.map_err(Error::from)?;
            Ok((status, String::from_utf8_lossy(&body).into_owned()))
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = send => r,
        }
    }
}

impl Default for HttpClientPool {
    fn default() -> Self {
        Self::new()
    }
}

fn build_headers(pairs: &[(&str, &str)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid header value for '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}
