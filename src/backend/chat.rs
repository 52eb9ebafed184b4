//! Chat-style protocol (OpenAI-compatible chat completions).
//!
//! Request: single user-role message, bearer auth. Response: a `choices`
//! list whose entries carry a finish reason and a message body. An abnormal
//! finish reason is an error, never silently treated as success.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{is_success, status_error};
use crate::error::Error;
use crate::transport::HttpClientPool;
use crate::types::{BackendConfig, Credential, InvocationRequest, InvocationResult};
use crate::Result;

pub(crate) fn build_body(request: &InvocationRequest) -> Value {
    json!({
        "model": request.config.model,
        "messages": [{ "role": "user", "content": request.prompt }],
        "max_tokens": request.config.max_tokens,
        "temperature": request.config.temperature,
        "stream": false,
    })
}

pub(crate) async fn invoke(
    pool: &HttpClientPool,
    request: &InvocationRequest,
    cancel: &CancellationToken,
) -> Result<InvocationResult> {
    let config = &request.config;
    let url = format!("{}/chat/completions", config.base());
    let body = build_body(request);
    let bearer = request.credential.as_ref().map(|c| c.expose());

    let (status, text) = pool
        .post_json(config, &url, &body, &[], bearer, request.read_timeout(), cancel)
        .await?;
    if !is_success(status) {
        return Err(status_error(status, &text));
    }
    let response: Value = serde_json::from_str(&text)?;
    parse_response(&response)
}

pub(crate) fn parse_response(body: &Value) -> Result<InvocationResult> {
    let choices = body
        .get("choices")
        .and_then(|c| c.as_array())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Api("empty choices in response".into()))?;
    let choice = &choices[0];

    if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
        if reason != "stop" {
            return Err(finish_reason_error(reason));
        }
    }

    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| Error::Api("missing content field in choice message".into()))?;
    if content.trim().is_empty() {
        return Err(Error::Api("blank content in choice message".into()));
    }

    let mut result = InvocationResult::ok(content.trim());
    if let Some(total) = body.pointer("/usage/total_tokens").and_then(|t| t.as_u64()) {
        result = result.with_tokens(total);
    }
    Ok(result)
}

fn finish_reason_error(reason: &str) -> Error {
    match reason {
        "length" => Error::Api("completion truncated: length limit exceeded".into()),
        "content_filter" => Error::Api("completion blocked by content filtering".into()),
        other => Error::Api(format!("abnormal completion reason '{}'", other)),
    }
}

/// List-models probe.
pub(crate) async fn test_connection(
    pool: &HttpClientPool,
    config: &BackendConfig,
    credential: Option<&Credential>,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = format!("{}/models", config.base());
    let bearer = credential.map(|c| c.expose());
    let (status, text) = pool
        .get(config, &url, &[], bearer, config.read_timeout, cancel)
        .await?;
    if !is_success(status) {
        return Err(status_error(status, &text));
    }
    Ok(())
}
