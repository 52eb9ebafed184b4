//! Message-style protocol (Anthropic-compatible messages).
//!
//! Key differences from chat-style: credential travels in a dedicated
//! `x-api-key` header next to a protocol-version header, `max_tokens` is
//! required, and the response carries typed content blocks rather than
//! choices.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{is_success, status_error};
use crate::error::Error;
use crate::transport::HttpClientPool;
use crate::types::{BackendConfig, Credential, InvocationRequest, InvocationResult};
use crate::Result;

const PROTOCOL_VERSION: &str = "2023-06-01";

pub(crate) fn build_body(request: &InvocationRequest) -> Value {
    json!({
        "model": request.config.model,
        "max_tokens": request.config.max_tokens,
        "messages": [{ "role": "user", "content": request.prompt }],
    })
}

fn auth_headers(credential: Option<&Credential>) -> Vec<(&'static str, &str)> {
    let mut headers = vec![("anthropic-version", PROTOCOL_VERSION)];
    if let Some(c) = credential {
        headers.push(("x-api-key", c.expose()));
    }
    headers
}

pub(crate) async fn invoke(
    pool: &HttpClientPool,
    request: &InvocationRequest,
    cancel: &CancellationToken,
) -> Result<InvocationResult> {
    let config = &request.config;
    let url = format!("{}/messages", config.base());
    let body = build_body(request);
    let headers = auth_headers(request.credential.as_ref());

    let (status, text) = pool
        .post_json(config, &url, &body, &headers, None, request.read_timeout(), cancel)
        .await?;
    if !is_success(status) {
        return Err(status_error(status, &text));
    }
    let response: Value = serde_json::from_str(&text)?;
    parse_response(&response)
}

pub(crate) fn parse_response(body: &Value) -> Result<InvocationResult> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Api("empty content blocks in response".into()))?;

    let text = blocks[0]
        .get("text")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::Api("missing text in first content block".into()))?;
    if text.trim().is_empty() {
        return Err(Error::Api("blank text in first content block".into()));
    }

    let mut result = InvocationResult::ok(text.trim());
    if let Some(usage) = body.get("usage") {
        let input = usage.get("input_tokens").and_then(|t| t.as_u64()).unwrap_or(0);
        let output = usage.get("output_tokens").and_then(|t| t.as_u64()).unwrap_or(0);
        if input + output > 0 {
            result = result.with_tokens(input + output);
        }
    }
    Ok(result)
}

/// Tiny one-token message; cheapest request the protocol allows.
pub(crate) async fn test_connection(
    pool: &HttpClientPool,
    config: &BackendConfig,
    credential: Option<&Credential>,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = format!("{}/messages", config.base());
    let body = json!({
        "model": config.model,
        "max_tokens": 1,
        "messages": [{ "role": "user", "content": "ping" }],
    });
    let headers = auth_headers(credential);
    let (status, text) = pool
        .post_json(config, &url, &body, &headers, None, config.read_timeout, cancel)
        .await?;
    if !is_success(status) {
        return Err(status_error(status, &text));
    }
    Ok(())
}
